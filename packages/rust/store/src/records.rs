//! Queue, status-log, and record-append operations over the state store.
//!
//! Appends are read-concatenate-deduplicate-write: replays of a batch must
//! not duplicate entries, and a racing writer loses at most the narrowest
//! window the store can offer (the accumulator is re-read immediately
//! before each append, never cached).

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::{info, warn};

use graybox_shared::{
    BatchStatus, FailureRecord, GrayboxError, ProjectDocument, ProjectQueueEntry,
    ProjectStatus, Result, StatusEntry,
};

use crate::{FileStore, Versioned, layout};

/// Batch-name → status map (the value inside the versioned document).
pub type BatchStatusMap = BTreeMap<String, BatchStatus>;

/// Bounded retries for read-modify-write loops on versioned documents.
const MAX_CAS_ATTEMPTS: u32 = 5;

// ---------------------------------------------------------------------------
// Project queue
// ---------------------------------------------------------------------------

/// Read the project queue, coercing corrupt shapes to empty.
pub async fn read_queue(store: &FileStore) -> Vec<ProjectQueueEntry> {
    store.read_array_or_default(&layout::project_queue()).await
}

/// Insert or replace a project's queue entry.
pub async fn upsert_queue_entry(store: &FileStore, entry: ProjectQueueEntry) -> Result<()> {
    let mut queue = read_queue(store).await;
    match queue
        .iter_mut()
        .find(|e| e.project_path == entry.project_path)
    {
        Some(existing) => *existing = entry,
        None => queue.push(entry),
    }
    store.write(&layout::project_queue(), &queue).await
}

/// Update one project's status in the queue. Missing entries are logged and
/// skipped — the per-project status document remains authoritative.
pub async fn set_queue_status(
    store: &FileStore,
    project: &str,
    status: ProjectStatus,
) -> Result<()> {
    let mut queue = read_queue(store).await;
    match queue.iter_mut().find(|e| e.project_path == project) {
        Some(entry) => {
            entry.status = status;
            store.write(&layout::project_queue(), &queue).await
        }
        None => {
            warn!(project, %status, "project missing from queue, skipping queue update");
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Project status document
// ---------------------------------------------------------------------------

/// Append an audit entry to the project's status log, optionally setting
/// the top-level status field.
pub async fn write_project_status(
    store: &FileStore,
    project: &str,
    mut entry: StatusEntry,
    overall: Option<ProjectStatus>,
) -> Result<()> {
    let key = layout::project_status(project);
    let mut doc: ProjectDocument = store.read(&key).await?;
    if entry.timestamp.is_none() {
        entry.timestamp = Some(Utc::now());
    }
    doc.statuses.push(entry);
    if let Some(status) = overall {
        doc.status = status;
    }
    store.write(&key, &doc).await
}

/// Advance the project status, enforcing monotonicity, and mirror the new
/// status into the queue. The two writes are ordered (status document
/// first) so a crash leaves the queue stale rather than dangling; cross-file
/// atomicity is not guaranteed.
///
/// A regressing transition is a no-op: the current status is returned and
/// nothing is written.
pub async fn advance_project(
    store: &FileStore,
    project: &str,
    to: ProjectStatus,
) -> Result<ProjectStatus> {
    let key = layout::project_status(project);
    let mut doc: ProjectDocument = store.read(&key).await?;
    if !doc.status.can_advance_to(to) {
        warn!(project, from = %doc.status, %to, "refusing status regression");
        return Ok(doc.status);
    }
    if doc.status == to {
        return Ok(to);
    }
    doc.status = to;
    store.write(&key, &doc).await?;
    set_queue_status(store, project, to).await?;
    info!(project, status = %to, "project advanced");
    Ok(to)
}

// ---------------------------------------------------------------------------
// Batch status
// ---------------------------------------------------------------------------

/// Read the project's versioned batch-status map.
pub async fn read_batch_status(
    store: &FileStore,
    project: &str,
) -> Result<Versioned<BatchStatusMap>> {
    store.read_versioned(&layout::batch_status(project)).await
}

/// Attempt to claim a batch for this worker: the conditional write of
/// `in_progress` is the mutual-exclusion substitute for a real lock.
/// Returns false when the batch is not `initiated` or another worker won
/// the version race.
pub async fn try_claim_batch(store: &FileStore, project: &str, batch: &str) -> Result<bool> {
    let key = layout::batch_status(project);
    let doc = read_batch_status(store, project).await?;
    if doc.value.get(batch) != Some(&BatchStatus::Initiated) {
        return Ok(false);
    }
    let mut value = doc.value;
    value.insert(batch.to_string(), BatchStatus::InProgress);
    match store.write_if_version(&key, doc.version, value).await {
        Ok(_) => Ok(true),
        Err(GrayboxError::Conflict { .. }) => {
            info!(project, batch, "lost batch claim race");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Set a batch's status, retrying the conditional write on version
/// conflicts up to a bounded number of attempts.
pub async fn set_batch_status(
    store: &FileStore,
    project: &str,
    batch: &str,
    status: BatchStatus,
) -> Result<Versioned<BatchStatusMap>> {
    let key = layout::batch_status(project);
    for _ in 0..MAX_CAS_ATTEMPTS {
        let doc = read_batch_status(store, project).await?;
        let mut value = doc.value;
        value.insert(batch.to_string(), status);
        match store.write_if_version(&key, doc.version, value).await {
            Ok(next) => return Ok(next),
            Err(GrayboxError::Conflict { .. }) => continue,
            Err(e) => return Err(e),
        }
    }
    Err(GrayboxError::Store(format!(
        "could not update batch status for {batch} after {MAX_CAS_ATTEMPTS} attempts"
    )))
}

/// Seed a set of batch names as `initiated`, preserving existing entries.
pub async fn seed_batch_statuses(
    store: &FileStore,
    project: &str,
    names: &[String],
) -> Result<()> {
    let key = layout::batch_status(project);
    for _ in 0..MAX_CAS_ATTEMPTS {
        let doc = read_batch_status(store, project).await?;
        let mut value = doc.value;
        for name in names {
            value.entry(name.clone()).or_insert(BatchStatus::Initiated);
        }
        match store.write_if_version(&key, doc.version, value).await {
            Ok(_) => return Ok(()),
            Err(GrayboxError::Conflict { .. }) => continue,
            Err(e) => return Err(e),
        }
    }
    Err(GrayboxError::Store(format!(
        "could not seed batch statuses after {MAX_CAS_ATTEMPTS} attempts"
    )))
}

/// Whether any batch name carries the given prefix.
pub fn prefix_exists(map: &BatchStatusMap, prefix: &str) -> bool {
    map.keys().any(|name| name.starts_with(prefix))
}

/// Whether every batch with the given name prefix reached `terminal`.
/// Vacuously true when no batch carries the prefix.
pub fn prefix_complete(map: &BatchStatusMap, prefix: &str, terminal: BatchStatus) -> bool {
    map.iter()
        .filter(|(name, _)| name.starts_with(prefix))
        .all(|(_, status)| *status == terminal)
}

// ---------------------------------------------------------------------------
// Append-only records
// ---------------------------------------------------------------------------

/// Append destination paths to a `{batch: [path, ...]}` record, deduplicating
/// so batch replays never duplicate successes. Returns the batch's total.
pub async fn append_batch_paths(
    store: &FileStore,
    key: &str,
    batch: &str,
    paths: Vec<String>,
) -> Result<usize> {
    let mut record: BTreeMap<String, Vec<String>> = store.read_map_or_default(key).await;
    let existing = record.entry(batch.to_string()).or_default();
    for path in paths {
        if !existing.contains(&path) {
            existing.push(path);
        }
    }
    let total = existing.len();
    store.write(key, &record).await?;
    Ok(total)
}

/// Append failure descriptors to a flat error record, deduplicating exact
/// repeats from replays.
pub async fn append_failures(
    store: &FileStore,
    key: &str,
    failures: Vec<FailureRecord>,
) -> Result<()> {
    if failures.is_empty() {
        return Ok(());
    }
    let mut record: Vec<FailureRecord> = store.read_array_or_default(key).await;
    for failure in failures {
        if !record.contains(&failure) {
            record.push(failure);
        }
    }
    store.write(key, &record).await
}

/// Append strings to a flat array record, deduplicating.
pub async fn append_strings(store: &FileStore, key: &str, items: Vec<String>) -> Result<()> {
    if items.is_empty() {
        return Ok(());
    }
    let mut record: Vec<String> = store.read_array_or_default(key).await;
    for item in items {
        if !record.contains(&item) {
            record.push(item);
        }
    }
    store.write(key, &record).await
}
