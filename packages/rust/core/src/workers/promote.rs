//! Promote stage: upload generated artifacts to the production tree.

use tracing::{info, instrument, warn};

use graybox_shared::{
    BatchStatus, FailureRecord, GrayboxError, ProjectDocument, ProjectStatus, StatusEntry,
};
use graybox_store::{layout, records};

use crate::context::{WorkerContext, WorkerResponse};
use crate::workers::{PROMOTE_STATUS_TABLE, failure_summary};

/// Promote one batch of transformed artifacts.
#[instrument(skip_all, fields(project = %ctx.project(), batch = batch_name))]
pub async fn run(ctx: &WorkerContext, batch_name: &str) -> WorkerResponse {
    let project = ctx.project();

    match records::try_claim_batch(&ctx.state, &project, batch_name).await {
        Ok(true) => {}
        Ok(false) => return WorkerResponse::ok(format!("batch {batch_name} not claimable")),
        Err(e) => return WorkerResponse::server_error(e.to_string()),
    }
    // First claimed promote/copy batch moves the project into the promote
    // stage; later claims are monotonic no-ops.
    let _ = records::advance_project(&ctx.state, &project, ProjectStatus::PromoteInProgress)
        .await;

    let doc: ProjectDocument = match ctx.state.read(&layout::project_status(&project)).await {
        Ok(doc) => doc,
        Err(e) => return WorkerResponse::server_error(e.to_string()),
    };
    let batches = ctx
        .state
        .read_map_or_default::<Vec<String>>(&layout::promote_batches(&project))
        .await;
    let destinations = batches.get(batch_name).cloned().unwrap_or_default();

    let promoter = ctx.promoter();
    let mut promoted: Vec<String> = Vec::new();
    let mut failures: Vec<FailureRecord> = Vec::new();
    let mut newer_destinations: Vec<String> = Vec::new();

    for destination in &destinations {
        let artifact_key = layout::artifact(&project, destination);
        let bytes = match ctx.state.read_buffer(&artifact_key).await {
            Ok(bytes) => bytes,
            Err(GrayboxError::NotFound { .. }) => {
                failures.push(FailureRecord {
                    path: destination.clone(),
                    error: "processed artifact not found".into(),
                });
                continue;
            }
            Err(e) => {
                failures.push(FailureRecord {
                    path: destination.clone(),
                    error: e.to_string(),
                });
                continue;
            }
        };

        let report = promoter
            .save(&bytes, destination, Some(doc.created_time))
            .await;
        if report.newer_destination {
            newer_destinations.push(destination.clone());
        }
        if report.success {
            promoted.push(destination.clone());
        } else {
            if report.locked {
                warn!(destination, "destination locked, skipping and reporting");
            }
            failures.push(FailureRecord {
                path: destination.clone(),
                error: report
                    .error_msg
                    .unwrap_or_else(|| "upload failed".to_string()),
            });
        }
    }
    info!(
        promoted = promoted.len(),
        failed = failures.len(),
        "promote pass done"
    );

    let failed_paths: Vec<String> = failures
        .iter()
        .map(|f| format!("{} ({})", f.path, f.error))
        .collect();

    let persist = async {
        records::append_batch_paths(
            &ctx.state,
            &layout::promoted_paths(&project),
            batch_name,
            promoted.clone(),
        )
        .await?;
        records::append_failures(&ctx.state, &layout::promote_errors(&project), failures)
            .await?;
        records::append_strings(
            &ctx.state,
            &layout::newer_destination_files(&project),
            newer_destinations,
        )
        .await?;
        records::set_batch_status(&ctx.state, &project, batch_name, BatchStatus::Promoted)
            .await?;
        let summary = failure_summary("Failed Promotes", &failed_paths);
        records::write_project_status(
            &ctx.state,
            &project,
            StatusEntry {
                step: format!("Promote completed for batch {batch_name}"),
                step_name: "batch_promoted".into(),
                failures: summary.clone(),
                files: promoted.clone(),
                timestamp: None,
            },
            None,
        )
        .await?;
        Ok::<String, GrayboxError>(summary)
    };
    let summary = match persist.await {
        Ok(summary) => summary,
        Err(e) => return WorkerResponse::server_error(e.to_string()),
    };

    promoter
        .report_status(
            &ctx.params.project_excel_path,
            PROMOTE_STATUS_TABLE,
            &format!("Promote completed for batch {batch_name}"),
            &summary,
            &serde_json::to_string(&promoted).unwrap_or_default(),
        )
        .await;

    if let Err(e) = maybe_finalize_promotion(ctx).await {
        return WorkerResponse::server_error(e.to_string());
    }

    WorkerResponse::ok(format!(
        "promoted {} files for batch {batch_name}",
        promoted.len()
    ))
}

/// When every promote batch is promoted and every classified-copy batch is
/// copied, compute the terminal promote status from the accumulated
/// records: no failures → promoted, some successes → partially promoted,
/// none → promote failed.
pub async fn maybe_finalize_promotion(ctx: &WorkerContext) -> graybox_shared::Result<()> {
    let project = ctx.project();
    let batch_status = records::read_batch_status(&ctx.state, &project).await?;

    let promotes_done = records::prefix_complete(
        &batch_status.value,
        "promote_batch_",
        BatchStatus::Promoted,
    );
    let copies_done =
        records::prefix_complete(&batch_status.value, "copy_batch_", BatchStatus::Copied);
    if !promotes_done || !copies_done {
        return Ok(());
    }

    let promote_errors: Vec<FailureRecord> = ctx
        .state
        .read_array_or_default(&layout::promote_errors(&project))
        .await;
    let copy_errors: Vec<FailureRecord> = ctx
        .state
        .read_array_or_default(&layout::copy_errors(&project))
        .await;
    let promoted = ctx
        .state
        .read_map_or_default::<Vec<String>>(&layout::promoted_paths(&project))
        .await;
    let copied = ctx
        .state
        .read_map_or_default::<Vec<String>>(&layout::copied_paths(&project))
        .await;

    let failure_count = promote_errors.len() + copy_errors.len();
    let success_count: usize = promoted.values().map(Vec::len).sum::<usize>()
        + copied.values().map(Vec::len).sum::<usize>();

    let terminal = if failure_count == 0 {
        ProjectStatus::Promoted
    } else if success_count > 0 {
        ProjectStatus::PartiallyPromoted
    } else {
        ProjectStatus::PromoteFailed
    };

    records::write_project_status(
        &ctx.state,
        &project,
        StatusEntry {
            step: format!(
                "Promotion finished: {success_count} succeeded, {failure_count} failed"
            ),
            step_name: terminal.to_string(),
            failures: String::new(),
            files: vec![],
            timestamp: None,
        },
        None,
    )
    .await?;
    records::advance_project(&ctx.state, &project, terminal).await?;

    ctx.promoter()
        .report_status(
            &ctx.params.project_excel_path,
            PROMOTE_STATUS_TABLE,
            &format!("Promotion finished with status {terminal}"),
            "",
            &format!(
                "{{\"succeeded\":{success_count},\"failed\":{failure_count}}}"
            ),
        )
        .await;
    Ok(())
}
