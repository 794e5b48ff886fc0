//! Processing stage: bulk-preview a batch, classify each previewed item,
//! and generate transform artifacts into the staging area.
//!
//! Classification is evaluated once per item; the resulting route fixes
//! which batch set and which result record the item belongs to for the
//! rest of the run.

use tracing::{info, instrument, warn};

use graybox_executor::{BulkOperation, run_bulk_job, with_retry};
use graybox_shared::{
    BatchStatus, FailureRecord, FileKind, GrayboxError, ProjectStatus, StatusEntry, WorkItem,
    preview_path,
};
use graybox_store::{layout, records};
use graybox_transform::{RenderOptions, Route, classify, transform_page, transform_sheet};

use crate::context::{WorkerContext, WorkerResponse};
use crate::partition::batch_suffix;
use crate::workers::{PROMOTE_STATUS_TABLE, failure_summary};

/// Process one batch: preview, classify, transform.
#[instrument(skip_all, fields(project = %ctx.project(), batch = batch_name))]
pub async fn run(ctx: &WorkerContext, batch_name: &str) -> WorkerResponse {
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

    // Stage-1 preview over the whole batch; items the job never confirmed
    // are excluded from classification and recorded as preview failures.
    let paths: Vec<String> = items
        .iter()
        .map(|item| preview_path(&item.source_path))
        .collect();
    let statuses = run_bulk_job(
        ctx.admin.as_ref(),
        ctx.retry,
        ctx.poll,
        &paths,
        BulkOperation::Preview,
        Some(&ctx.params.experience_name),
    )
    .await;

    let mut preview_record = ctx
        .state
        .read_map_or_default::<Vec<graybox_executor::PathJobStatus>>(&layout::preview_status(
            &project,
        ))
        .await;
    preview_record.insert(batch_name.to_string(), statuses.clone());
    if let Err(e) = ctx
        .state
        .write(&layout::preview_status(&project), &preview_record)
        .await
    {
        return WorkerResponse::server_error(e.to_string());
    }
    let failed_previews: Vec<String> = statuses
        .iter()
        .filter(|s| !s.success)
        .map(|s| s.path.clone())
        .collect();
    if let Err(e) = records::append_strings(
        &ctx.state,
        &layout::preview_errors(&project),
        failed_previews.clone(),
    )
    .await
    {
        return WorkerResponse::server_error(e.to_string());
    }

    // Classify and transform each successfully previewed item.
    let suffix = batch_suffix(batch_name);
    let promote_batch = format!("promote_batch_{suffix}");
    let copy_batch = format!("copy_batch_{suffix}");
    let mut promote_dests: Vec<String> = Vec::new();
    let mut copy_items: Vec<WorkItem> = Vec::new();
    let mut content_failures: Vec<FailureRecord> = Vec::new();

    for (item, status) in items.iter().zip(statuses.iter()) {
        if !status.success {
            continue;
        }
        let content = match fetch_rendered_content(ctx, &status.resource_path).await {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %status.path, error = %e, "content fetch failed");
                content_failures.push(FailureRecord {
                    path: item.destination_path.clone(),
                    error: e.to_string(),
                });
                continue;
            }
        };

        // Binary files with no rendered representation pass through as
        // copies; the marker check only applies to renderable content.
        let route = if item.file_type == FileKind::Other {
            Route::Copy
        } else {
            classify(&content, &ctx.params.experience_name)
        };

        match route {
            Route::Transform => {
                match generate_artifact(ctx, item, &content).await {
                    Ok(()) => promote_dests.push(item.destination_path.clone()),
                    Err(e) => content_failures.push(FailureRecord {
                        path: item.destination_path.clone(),
                        error: e.to_string(),
                    }),
                }
            }
            Route::Copy => copy_items.push(item.clone()),
        }
    }

    info!(
        transform = promote_dests.len(),
        copy = copy_items.len(),
        failed = content_failures.len(),
        "batch classified"
    );

    let persist = async {
        let mut seeded: Vec<String> = Vec::new();
        if !promote_dests.is_empty() {
            records::append_batch_paths(
                &ctx.state,
                &layout::promote_batches(&project),
                &promote_batch,
                promote_dests.clone(),
            )
            .await?;
            seeded.push(promote_batch.clone());
        }
        if !copy_items.is_empty() {
            let mut batches = ctx
                .state
                .read_map_or_default::<Vec<WorkItem>>(&layout::copy_batches(&project))
                .await;
            let entry = batches.entry(copy_batch.clone()).or_default();
            for item in &copy_items {
                if !entry.iter().any(|i| i.source_path == item.source_path) {
                    entry.push(item.clone());
                }
            }
            ctx.state
                .write(&layout::copy_batches(&project), &batches)
                .await?;
            seeded.push(copy_batch.clone());
        }
        records::seed_batch_statuses(&ctx.state, &project, &seeded).await?;
        records::append_failures(
            &ctx.state,
            &layout::promote_errors(&project),
            content_failures.clone(),
        )
        .await
    };
    if let Err(e) = persist.await {
        return WorkerResponse::server_error(e.to_string());
    }

    let batch_status = match records::set_batch_status(
        &ctx.state,
        &project,
        batch_name,
        BatchStatus::Processed,
    )
    .await
    {
        Ok(doc) => doc,
        Err(e) => return WorkerResponse::server_error(e.to_string()),
    };

    let summary = failure_summary(
        "Failed Previews (Promote won't happen for these)",
        &failed_previews,
    );
    if let Err(e) = records::write_project_status(
        &ctx.state,
        &project,
        StatusEntry {
            step: format!("Processing completed for batch {batch_name}"),
            step_name: "batch_processed".into(),
            failures: summary.clone(),
            files: promote_dests.clone(),
            timestamp: None,
        },
        None,
    )
    .await
    {
        return WorkerResponse::server_error(e.to_string());
    }
    ctx.promoter()
        .report_status(
            &ctx.params.project_excel_path,
            PROMOTE_STATUS_TABLE,
            &format!("Processing completed for batch {batch_name}"),
            &summary,
            &format!(
                "{{\"transform\":{},\"copy\":{}}}",
                promote_dests.len(),
                copy_items.len()
            ),
        )
        .await;

    if records::prefix_complete(&batch_status.value, "processing_batch_", BatchStatus::Processed)
    {
        if let Err(e) =
            records::advance_project(&ctx.state, &project, ProjectStatus::Processed).await
        {
            return WorkerResponse::server_error(e.to_string());
        }
    }

    WorkerResponse::ok(format!("processing finished for batch {batch_name}"))
}

/// Fetch an item's rendered markdown from the staging origin.
async fn fetch_rendered_content(
    ctx: &WorkerContext,
    resource_path: &str,
) -> graybox_shared::Result<String> {
    let url = format!("{}{}", ctx.params.staging_origin, resource_path);
    with_retry(ctx.retry, "fetch_content", || {
        let url = url.clone();
        async move {
            let mut request = ctx.http.get(&url);
            if let Some(key) = &ctx.params.admin_api_key {
                request = request.header("Authorization", format!("token {key}"));
            }
            let response = request
                .send()
                .await
                .map_err(|e| GrayboxError::Network(format!("{url}: {e}")))?;
            let status = response.status();
            if status.as_u16() == 429 {
                let retry_after_secs = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1);
                return Err(GrayboxError::RateLimited { retry_after_secs });
            }
            if !status.is_success() {
                return Err(GrayboxError::Network(format!("{url}: HTTP {status}")));
            }
            response
                .text()
                .await
                .map_err(|e| GrayboxError::Network(format!("{url}: body read failed: {e}")))
        }
    })
    .await
}

/// Generate the transformed artifact for one item into the staging area.
async fn generate_artifact(
    ctx: &WorkerContext,
    item: &WorkItem,
    content: &str,
) -> graybox_shared::Result<()> {
    let project = ctx.project();
    let bytes = match item.file_type {
        FileKind::Docx => {
            let options = RenderOptions {
                style_sheet: None,
                auth_token: ctx.params.admin_api_key.clone(),
            };
            transform_page(
                ctx.parser.as_ref(),
                ctx.renderer.as_ref(),
                content,
                &ctx.params.experience_name,
                &options,
            )
            .await?
        }
        FileKind::Excel => transform_sheet(
            ctx.codec.as_ref(),
            content,
            &ctx.params.experience_name,
        )?,
        FileKind::Other => {
            return Err(GrayboxError::Transform(format!(
                "no transform for {}",
                item.source_path
            )));
        }
    };
    ctx.state
        .write_buffer(&layout::artifact(&project, &item.destination_path), &bytes)
        .await
}
