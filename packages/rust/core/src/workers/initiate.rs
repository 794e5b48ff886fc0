//! Project initiation: walk the staging tree, seed the state machine.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::{info, instrument, warn};

use graybox_executor::with_retry;
use graybox_shared::{
    FailureRecord, ProjectDocument, ProjectQueueEntry, ProjectStatus, StatusEntry, WorkItem,
    experience_selector, is_pattern_matched,
};
use graybox_store::{layout, records};

use crate::context::{WorkerContext, WorkerResponse};
use crate::partition::partition;
use crate::workers::PROMOTE_STATUS_TABLE;

/// Initiate a promotion project.
///
/// Validates the trigger parameters (rejecting with a client error before
/// any state mutation), enumerates the staging tree, partitions the file
/// list, and seeds every state document the later stages read.
#[instrument(skip_all, fields(project = %ctx.project()))]
pub async fn run(ctx: &WorkerContext) -> WorkerResponse {
    if let Err(e) = ctx.params.validate() {
        return WorkerResponse::client_error(e.to_string());
    }

    let project = ctx.project();
    let items = match find_staged_files(ctx).await {
        Ok(items) => items,
        Err(e) => return WorkerResponse::server_error(e.to_string()),
    };
    info!(files = items.len(), "staging tree enumerated");

    let batches = partition(&items, ctx.batch_size, "batch");
    for (name, batch_items) in &batches {
        if let Err(e) = ctx
            .state
            .write(&layout::batch_file(&project, name), batch_items)
            .await
        {
            return WorkerResponse::server_error(e.to_string());
        }
    }

    let batch_names: Vec<String> = batches.keys().cloned().collect();
    let created_time = Utc::now();
    let doc = ProjectDocument {
        status: ProjectStatus::Initiated,
        params: ctx.params.clone(),
        created_time,
        statuses: vec![StatusEntry {
            step: format!("Promote triggered for {} files", items.len()),
            step_name: "initiated".into(),
            failures: String::new(),
            files: vec![],
            timestamp: Some(created_time),
        }],
    };

    let seed = async {
        ctx.state
            .write(&layout::project_status(&project), &doc)
            .await?;
        records::seed_batch_statuses(&ctx.state, &project, &batch_names).await?;
        ctx.state
            .write(
                &layout::promoted_paths(&project),
                &BTreeMap::<String, Vec<String>>::new(),
            )
            .await?;
        ctx.state
            .write(
                &layout::copied_paths(&project),
                &BTreeMap::<String, Vec<String>>::new(),
            )
            .await?;
        ctx.state
            .write(&layout::promote_errors(&project), &Vec::<FailureRecord>::new())
            .await?;
        ctx.state
            .write(&layout::copy_errors(&project), &Vec::<FailureRecord>::new())
            .await?;
        ctx.state
            .write(
                &layout::preview_status(&project),
                &BTreeMap::<String, Vec<serde_json::Value>>::new(),
            )
            .await?;
        ctx.state
            .write(&layout::preview_errors(&project), &Vec::<String>::new())
            .await?;
        records::upsert_queue_entry(
            &ctx.state,
            ProjectQueueEntry {
                project_path: project.clone(),
                status: ProjectStatus::Initiated,
                created_time,
            },
        )
        .await
    };
    if let Err(e) = seed.await {
        return WorkerResponse::server_error(e.to_string());
    }

    ctx.promoter()
        .report_status(
            &ctx.params.project_excel_path,
            PROMOTE_STATUS_TABLE,
            "Promote triggered",
            "",
            &format!("{{\"files\":{},\"batches\":{}}}", items.len(), batch_names.len()),
        )
        .await;

    WorkerResponse::ok(format!(
        "project {project} initiated with {} files in {} batches",
        items.len(),
        batch_names.len()
    ))
}

/// Iteratively enumerate all promotable files under the staging root.
async fn find_staged_files(ctx: &WorkerContext) -> graybox_shared::Result<Vec<WorkItem>> {
    let experience = &ctx.params.experience_name;
    let selector = experience_selector(experience);
    let ignore = &ctx.params.promote_ignore_paths;

    let mut folders: Vec<String> = if ctx.params.drafts_only {
        vec![format!("/{experience}/drafts")]
    } else {
        vec![String::new()]
    };
    let mut items = Vec::new();

    while let Some(folder) = folders.pop() {
        let listing = match with_retry(ctx.retry, "list_folder", || {
            ctx.objects.list_folder(&folder)
        })
        .await
        {
            Ok(listing) => listing,
            Err(e) => {
                warn!(folder, error = %e, "folder listing failed, skipping subtree");
                continue;
            }
        };
        for entry in listing {
            if is_pattern_matched(&entry.path, ignore) {
                info!(path = %entry.path, "ignored from promote");
                continue;
            }
            if entry.is_folder {
                folders.push(entry.path);
            } else if selector.is_match(&entry.path) {
                items.push(WorkItem::from_source(&entry.path, experience));
            }
        }
    }

    // Stable ordering: batch membership must not depend on listing order.
    items.sort_by(|a, b| a.source_path.cmp(&b.source_path));
    Ok(items)
}
