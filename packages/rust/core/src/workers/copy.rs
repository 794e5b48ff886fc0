//! Copy workers: the non-processing stage and the classified-copy stage.
//!
//! Both move bytes unchanged from the staging tree to the production tree;
//! they differ only in where their batch membership lives and which project
//! transition their completion triggers.

use tracing::{info, instrument};

use graybox_shared::{
    BatchStatus, FailureRecord, FileKind, ProjectStatus, StatusEntry, WorkItem, json_to_xlsx,
};
use graybox_store::{layout, records};

use crate::context::{WorkerContext, WorkerResponse};
use crate::workers::{COPY_STATUS_TABLE, failure_summary};

/// Copy one non-processing batch (fragment-free pages, leaf fragments).
#[instrument(skip_all, fields(project = %ctx.project(), batch = batch_name))]
pub async fn run_non_processing(ctx: &WorkerContext, batch_name: &str) -> WorkerResponse {
    let project = ctx.project();

    match records::try_claim_batch(&ctx.state, &project, batch_name).await {
        Ok(true) => {}
        Ok(false) => return WorkerResponse::ok(format!("batch {batch_name} not claimable")),
        Err(e) => return WorkerResponse::server_error(e.to_string()),
    }

    let items: Vec<WorkItem> = match ctx
        .state
        .read(&layout::batch_file(&project, batch_name))
        .await
    {
        Ok(items) => items,
        Err(e) => return WorkerResponse::server_error(e.to_string()),
    };

    let (copied, failures) = copy_items(ctx, &items).await;
    if let Err(e) = record_copy_results(ctx, batch_name, &copied, failures).await {
        return WorkerResponse::server_error(e.to_string());
    }

    let batch_status =
        match records::set_batch_status(&ctx.state, &project, batch_name, BatchStatus::Copied)
            .await
        {
            Ok(doc) => doc,
            Err(e) => return WorkerResponse::server_error(e.to_string()),
        };

    if records::prefix_complete(&batch_status.value, "non_processing_batch_", BatchStatus::Copied)
    {
        if let Err(e) = records::write_project_status(
            &ctx.state,
            &project,
            StatusEntry {
                step: "All non-processing batches copied".into(),
                step_name: "non_processing_batches_copied".into(),
                failures: String::new(),
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
            ProjectStatus::NonProcessingBatchesCopied,
        )
        .await
        {
            return WorkerResponse::server_error(e.to_string());
        }
    }

    WorkerResponse::ok(format!(
        "copied {} files for batch {batch_name}",
        copied.len()
    ))
}

/// Copy one classified batch (items the dispatcher routed past the
/// transform). Completion feeds the promote-stage terminal check.
#[instrument(skip_all, fields(project = %ctx.project(), batch = batch_name))]
pub async fn run_classified(ctx: &WorkerContext, batch_name: &str) -> WorkerResponse {
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

    let batches = ctx
        .state
        .read_map_or_default::<Vec<WorkItem>>(&layout::copy_batches(&project))
        .await;
    let items = batches.get(batch_name).cloned().unwrap_or_default();

    let (copied, failures) = copy_items(ctx, &items).await;
    if let Err(e) = record_copy_results(ctx, batch_name, &copied, failures).await {
        return WorkerResponse::server_error(e.to_string());
    }

    match records::set_batch_status(&ctx.state, &project, batch_name, BatchStatus::Copied).await
    {
        Ok(_) => {}
        Err(e) => return WorkerResponse::server_error(e.to_string()),
    }

    if let Err(e) = super::promote::maybe_finalize_promotion(ctx).await {
        return WorkerResponse::server_error(e.to_string());
    }

    WorkerResponse::ok(format!(
        "copied {} files for batch {batch_name}",
        copied.len()
    ))
}

/// Copy a list of items concurrently, handling the `.json ⇄ .xlsx`
/// spreadsheet addressing. Per-item failures never stop the remaining
/// items; results are accumulated once all transfers settle, preserving
/// the batch's item order.
async fn copy_items(
    ctx: &WorkerContext,
    items: &[WorkItem],
) -> (Vec<String>, Vec<FailureRecord>) {
    let mut handles = Vec::with_capacity(items.len());
    for item in items {
        let (source, destination) = if item.file_type == FileKind::Excel {
            (
                json_to_xlsx(&item.source_path),
                json_to_xlsx(&item.destination_path),
            )
        } else {
            (item.source_path.clone(), item.destination_path.clone())
        };
        let promoter = ctx.promoter();
        handles.push(tokio::spawn(async move {
            let report = promoter.copy(&source, &destination).await;
            (destination, report)
        }));
    }

    let mut copied = Vec::new();
    let mut failures = Vec::new();
    for handle in handles {
        match handle.await {
            Ok((destination, report)) if report.success => copied.push(destination),
            Ok((destination, report)) => failures.push(FailureRecord {
                path: destination,
                error: report
                    .error_msg
                    .unwrap_or_else(|| "copy failed".to_string()),
            }),
            Err(e) => failures.push(FailureRecord {
                path: "unknown".into(),
                error: format!("copy task failed: {e}"),
            }),
        }
    }
    info!(copied = copied.len(), failed = failures.len(), "copy pass done");
    (copied, failures)
}

/// Record one copy batch's results and report the step to the workbook.
async fn record_copy_results(
    ctx: &WorkerContext,
    batch_name: &str,
    copied: &[String],
    failures: Vec<FailureRecord>,
) -> graybox_shared::Result<()> {
    let project = ctx.project();
    let failed_paths: Vec<String> = failures
        .iter()
        .map(|f| format!("{} ({})", f.path, f.error))
        .collect();

    records::append_batch_paths(
        &ctx.state,
        &layout::copied_paths(&project),
        batch_name,
        copied.to_vec(),
    )
    .await?;
    records::append_failures(&ctx.state, &layout::copy_errors(&project), failures).await?;

    let summary = failure_summary("Failed Copies", &failed_paths);
    records::write_project_status(
        &ctx.state,
        &project,
        StatusEntry {
            step: format!("Copy completed for batch {batch_name}"),
            step_name: "batch_copied".into(),
            failures: summary.clone(),
            files: copied.to_vec(),
            timestamp: None,
        },
        None,
    )
    .await?;

    ctx.promoter()
        .report_status(
            &ctx.params.project_excel_path,
            COPY_STATUS_TABLE,
            &format!("Copy completed for batch {batch_name}"),
            &summary,
            &serde_json::to_string(copied).unwrap_or_default(),
        )
        .await;
    Ok(())
}
