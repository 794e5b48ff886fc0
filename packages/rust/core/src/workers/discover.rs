//! Fragment discovery stage: annotate work items with their fragment
//! references, then build the dual batch sets.

use tracing::{info, instrument, warn};

use graybox_discovery::{DiscoveryConfig, FragmentDiscovery, categorize, fragment_url_to_path};
use graybox_shared::{
    BatchStatus, FileKind, FragmentRef, ProjectStatus, StatusEntry, WorkItem, preview_path,
};
use graybox_store::{layout, records};

use crate::context::{WorkerContext, WorkerResponse};
use crate::partition::dual_partition;
use crate::workers::PROMOTE_STATUS_TABLE;

/// Discover fragments for one batch of work items.
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

    let discovery = match FragmentDiscovery::new(DiscoveryConfig {
        staging_origin: ctx.params.staging_origin.clone(),
        admin_api_key: ctx.params.admin_api_key.clone(),
        timeout_secs: 30,
    }) {
        Ok(discovery) => discovery,
        Err(e) => return WorkerResponse::server_error(e.to_string()),
    };

    let mut annotated = Vec::with_capacity(items.len());
    for mut item in items {
        if item.file_type == FileKind::Docx {
            let page_url = format!(
                "{}{}",
                ctx.params.staging_origin,
                preview_path(&item.source_path)
            );
            let outcome = discovery.discover(std::slice::from_ref(&page_url)).await;
            item.has_fragments = !outcome.fragments.is_empty();
            item.fragments = outcome.fragments;
        }
        annotated.push(item);
    }
    info!(
        items = annotated.len(),
        with_fragments = annotated.iter().filter(|i| i.has_fragments).count(),
        "batch discovery complete"
    );

    // Accumulate into the project-wide discovery record, keyed by source.
    let mut discovered: Vec<WorkItem> = ctx
        .state
        .read_array_or_default(&layout::discovered_items(&project))
        .await;
    for item in &annotated {
        match discovered
            .iter_mut()
            .find(|d| d.source_path == item.source_path)
        {
            Some(existing) => *existing = item.clone(),
            None => discovered.push(item.clone()),
        }
    }
    if let Err(e) = ctx
        .state
        .write(&layout::discovered_items(&project), &discovered)
        .await
    {
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

    if records::prefix_complete(&batch_status.value, "batch_", BatchStatus::Processed) {
        if let Err(e) = build_dual_batch_sets(ctx, &discovered).await {
            return WorkerResponse::server_error(e.to_string());
        }
    }

    WorkerResponse::ok(format!(
        "fragment discovery finished for batch {batch_name}"
    ))
}

/// Partition the discovered items into the processing and non-processing
/// sets and advance the project. Runs once, in the worker that completed
/// the last discovery batch.
async fn build_dual_batch_sets(
    ctx: &WorkerContext,
    discovered: &[WorkItem],
) -> graybox_shared::Result<()> {
    let project = ctx.project();
    let experience = &ctx.params.experience_name;

    let pages_with: Vec<WorkItem> = discovered
        .iter()
        .filter(|item| item.has_fragments)
        .cloned()
        .collect();
    let pages_without: Vec<WorkItem> = discovered
        .iter()
        .filter(|item| !item.has_fragments)
        .cloned()
        .collect();

    // Fragments become work items of their own, bucketed by nesting: a
    // fragment referencing further fragments needs the recursive transform
    // path, a leaf fragment only a copy.
    let all_fragments: Vec<FragmentRef> = discovered
        .iter()
        .flat_map(|item| item.fragments.clone())
        .collect();
    let buckets = categorize(all_fragments);

    let mut processing = pages_with;
    for fragment in &buckets.with_nested {
        if let Some(item) = fragment_work_item(fragment, &ctx.params.staging_origin, experience)
        {
            push_unique(&mut processing, item);
        }
    }
    let mut non_processing = pages_without;
    for fragment in &buckets.without_nested {
        if let Some(item) = fragment_work_item(fragment, &ctx.params.staging_origin, experience)
        {
            push_unique(&mut non_processing, item);
        }
    }

    let sets = dual_partition(&processing, &non_processing, ctx.batch_size);
    for (name, batch_items) in sets.processing.iter().chain(sets.non_processing.iter()) {
        ctx.state
            .write(&layout::batch_file(&project, name), batch_items)
            .await?;
    }
    records::seed_batch_statuses(&ctx.state, &project, &sets.batch_names()).await?;

    records::write_project_status(
        &ctx.state,
        &project,
        StatusEntry {
            step: format!(
                "Fragment discovery completed: {} processing, {} non-processing items",
                processing.len(),
                non_processing.len()
            ),
            step_name: "fragment_discovery_completed".into(),
            failures: String::new(),
            files: vec![],
            timestamp: None,
        },
        None,
    )
    .await?;
    records::advance_project(&ctx.state, &project, ProjectStatus::FragmentDiscoveryCompleted)
        .await?;

    ctx.promoter()
        .report_status(
            &ctx.params.project_excel_path,
            PROMOTE_STATUS_TABLE,
            "Fragment discovery completed",
            "",
            &format!(
                "{{\"processing\":{},\"non_processing\":{}}}",
                processing.len(),
                non_processing.len()
            ),
        )
        .await;
    Ok(())
}

/// Convert a discovered fragment into a promotable work item.
fn fragment_work_item(
    fragment: &FragmentRef,
    staging_origin: &str,
    experience_name: &str,
) -> Option<WorkItem> {
    let path = fragment_url_to_path(&fragment.fragment_path, staging_origin)?;
    let source_path = format!("{path}.docx");
    let mut item = WorkItem::from_source(&source_path, experience_name);
    item.has_fragments = fragment.has_nested();
    item.fragments = fragment.nested_fragments.clone();
    Some(item)
}

fn push_unique(items: &mut Vec<WorkItem>, item: WorkItem) {
    if !items.iter().any(|i| i.source_path == item.source_path) {
        items.push(item);
    } else {
        warn!(source = %item.source_path, "duplicate fragment work item skipped");
    }
}
