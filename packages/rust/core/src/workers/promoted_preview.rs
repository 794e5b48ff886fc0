//! Final stage: bulk-preview every promoted and copied destination against
//! the production tree, with one retry pass for failures.

use tracing::{info, instrument};

use graybox_executor::{BulkOperation, PathJobStatus, run_bulk_job};
use graybox_shared::{ProjectStatus, StatusEntry, preview_path};
use graybox_store::{layout, records};

use crate::context::{WorkerContext, WorkerResponse};
use crate::workers::{PROMOTE_STATUS_TABLE, failure_summary};

/// Preview all promoted/copied files in production.
#[instrument(skip_all, fields(project = %ctx.project()))]
pub async fn run(ctx: &WorkerContext) -> WorkerResponse {
    let project = ctx.project();

    if let Err(e) = records::advance_project(
        &ctx.state,
        &project,
        ProjectStatus::PromotedPreviewInProgress,
    )
    .await
    {
        return WorkerResponse::server_error(e.to_string());
    }

    let promoted = ctx
        .state
        .read_map_or_default::<Vec<String>>(&layout::promoted_paths(&project))
        .await;
    let copied = ctx
        .state
        .read_map_or_default::<Vec<String>>(&layout::copied_paths(&project))
        .await;
    let mut destinations: Vec<String> = Vec::new();
    for path in promoted.values().chain(copied.values()).flatten() {
        if !destinations.contains(path) {
            destinations.push(path.clone());
        }
    }

    if destinations.is_empty() {
        if let Err(e) = records::advance_project(
            &ctx.state,
            &project,
            ProjectStatus::PromotedPreviewCompleted,
        )
        .await
        {
            return WorkerResponse::server_error(e.to_string());
        }
        return WorkerResponse::ok("no promoted or copied files pending preview");
    }

    let paths: Vec<String> = destinations.iter().map(|d| preview_path(d)).collect();
    let mut statuses = run_bulk_job(
        ctx.admin.as_ref(),
        ctx.retry,
        ctx.poll,
        &paths,
        BulkOperation::Preview,
        None,
    )
    .await;

    // One retry pass for the paths that failed the first round.
    let retry_paths: Vec<String> = statuses
        .iter()
        .filter(|s| !s.success)
        .map(|s| s.path.clone())
        .collect();
    if !retry_paths.is_empty() {
        info!(failed = retry_paths.len(), "retrying failed previews");
        let retried = run_bulk_job(
            ctx.admin.as_ref(),
            ctx.retry,
            ctx.poll,
            &retry_paths,
            BulkOperation::Preview,
            None,
        )
        .await;
        merge_statuses(&mut statuses, &retried);
    }

    let failed: Vec<String> = statuses
        .iter()
        .filter(|s| !s.success)
        .map(|s| s.path.clone())
        .collect();
    if let Err(e) =
        records::append_strings(&ctx.state, &layout::preview_errors(&project), failed.clone())
            .await
    {
        return WorkerResponse::server_error(e.to_string());
    }

    let summary = failure_summary("Failed Previews", &failed);
    if let Err(e) = records::write_project_status(
        &ctx.state,
        &project,
        StatusEntry {
            step: format!(
                "Promoted preview completed: {} of {} files",
                statuses.len() - failed.len(),
                statuses.len()
            ),
            step_name: "promoted_preview_completed".into(),
            failures: summary.clone(),
            files: vec![],
            timestamp: None,
        },
        None,
    )
    .await
    {
        return WorkerResponse::server_error(e.to_string());
    }
    if let Err(e) = records::advance_project(
        &ctx.state,
        &project,
        ProjectStatus::PromotedPreviewCompleted,
    )
    .await
    {
        return WorkerResponse::server_error(e.to_string());
    }

    ctx.promoter()
        .report_status(
            &ctx.params.project_excel_path,
            PROMOTE_STATUS_TABLE,
            "Promoted preview completed",
            &summary,
            &format!("{{\"previewed\":{}}}", statuses.len()),
        )
        .await;

    WorkerResponse::ok(format!(
        "promoted preview completed for {} files",
        statuses.len()
    ))
}

/// Fold retry results back into the first round's statuses.
fn merge_statuses(statuses: &mut [PathJobStatus], retried: &[PathJobStatus]) {
    for retry in retried {
        if let Some(original) = statuses.iter_mut().find(|s| s.path == retry.path) {
            if retry.success {
                *original = retry.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(path: &str, success: bool) -> PathJobStatus {
        PathJobStatus {
            path: path.into(),
            success,
            file_name: String::new(),
            resource_path: String::new(),
            response_code: if success { 200 } else { 500 },
        }
    }

    #[test]
    fn merge_keeps_first_round_successes() {
        let mut statuses = vec![status("/a", true), status("/b", false)];
        merge_statuses(&mut statuses, &[status("/b", true)]);
        assert!(statuses.iter().all(|s| s.success));
    }

    #[test]
    fn merge_ignores_repeat_failures() {
        let mut statuses = vec![status("/a", false)];
        merge_statuses(&mut statuses, &[status("/a", false)]);
        assert!(!statuses[0].success);
    }
}
