//! Stage workers.
//!
//! Each worker operates on one project (+ optionally one batch), performs
//! its stage work, records per-file results, and advances the batch — and,
//! when it completed the stage's last batch, the project. Item failures
//! accumulate in the error records; a worker's return is always
//! success-shaped past entry validation.

pub mod copy;
pub mod discover;
pub mod initiate;
pub mod process;
pub mod promote;
pub mod promoted_preview;

/// Workbook table receiving promote-stage status rows.
pub const PROMOTE_STATUS_TABLE: &str = "PROMOTE_STATUS";

/// Workbook table receiving copy-stage status rows.
pub const COPY_STATUS_TABLE: &str = "COPY_STATUS";

/// Summarize failed paths for a workbook status row.
pub(crate) fn failure_summary(label: &str, failures: &[String]) -> String {
    if failures.is_empty() {
        String::new()
    } else {
        format!("{label}:\n{}", failures.join("\n"))
    }
}
