//! Deterministic batch partitioning.
//!
//! Batch `n` always contains items `[n·max, (n+1)·max)` of the stable input
//! ordering — callers must never reorder the source list between discovery
//! and partitioning, or batch membership silently shifts.

use std::collections::BTreeMap;

use graybox_shared::{BatchPriority, WorkItem};

/// Split `items` into bounded batches named `{prefix}_<n>` (1-based).
pub fn partition<T: Clone>(
    items: &[T],
    max_size: usize,
    prefix: &str,
) -> BTreeMap<String, Vec<T>> {
    let max_size = max_size.max(1);
    let mut batches = BTreeMap::new();
    for (index, chunk) in items.chunks(max_size).enumerate() {
        batches.insert(format!("{prefix}_{}", index + 1), chunk.to_vec());
    }
    batches
}

/// The two independent batch sets of a bulk-copy run: a processing set
/// (requires transformation) and a non-processing set (copy only), letting
/// the scheduler run cheap copies independently from expensive recursive
/// transforms.
#[derive(Debug, Default)]
pub struct BatchSets {
    pub processing: BTreeMap<String, Vec<WorkItem>>,
    pub non_processing: BTreeMap<String, Vec<WorkItem>>,
}

impl BatchSets {
    /// Every batch name across both sets.
    pub fn batch_names(&self) -> Vec<String> {
        self.processing
            .keys()
            .chain(self.non_processing.keys())
            .cloned()
            .collect()
    }
}

/// Partition the two item sets under their batch-name prefixes.
pub fn dual_partition(
    processing_items: &[WorkItem],
    non_processing_items: &[WorkItem],
    max_size: usize,
) -> BatchSets {
    BatchSets {
        processing: partition(processing_items, max_size, "processing_batch"),
        non_processing: partition(non_processing_items, max_size, "non_processing_batch"),
    }
}

/// Scheduling priority of a batch, recovered from its name prefix:
/// processing batches carry the expensive recursive transforms.
pub fn batch_priority(batch_name: &str) -> BatchPriority {
    if batch_name.starts_with("processing_batch_") || batch_name.starts_with("promote_batch_") {
        BatchPriority::High
    } else if batch_name.starts_with("non_processing_batch_")
        || batch_name.starts_with("copy_batch_")
    {
        BatchPriority::Low
    } else {
        BatchPriority::Medium
    }
}

/// The numeric suffix of a batch name (`"processing_batch_3"` → `"3"`).
pub fn batch_suffix(batch_name: &str) -> &str {
    batch_name
        .rsplit_once('_')
        .map(|(_, suffix)| suffix)
        .unwrap_or(batch_name)
}
