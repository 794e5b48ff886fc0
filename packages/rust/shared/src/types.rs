//! Core domain types for graybox promotion projects.
//!
//! Every type here serializes to the JSON documents that make up the
//! file-backed state machine, so field names and enum spellings are part
//! of the wire format shared with schedulers and workers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PromoteParams;

// ---------------------------------------------------------------------------
// ProjectStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a promotion project.
///
/// The sequence is monotonic: a project only ever moves to a status with an
/// equal or higher stage index (the three promote outcomes share a stage).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Initiated,
    FragmentDiscoveryCompleted,
    NonProcessingBatchesCopied,
    Processed,
    ProcessContentInProgress,
    PromoteInProgress,
    Promoted,
    PartiallyPromoted,
    PromoteFailed,
    PromotedPreviewInProgress,
    PromotedPreviewCompleted,
}

impl ProjectStatus {
    /// Position of this status in the stage sequence.
    pub fn stage_index(self) -> u8 {
        match self {
            Self::Initiated => 0,
            Self::FragmentDiscoveryCompleted => 1,
            Self::NonProcessingBatchesCopied => 2,
            Self::Processed => 3,
            Self::ProcessContentInProgress => 4,
            Self::PromoteInProgress => 5,
            Self::Promoted | Self::PartiallyPromoted | Self::PromoteFailed => 6,
            Self::PromotedPreviewInProgress => 7,
            Self::PromotedPreviewCompleted => 8,
        }
    }

    /// Whether moving from `self` to `next` keeps the sequence monotonic.
    pub fn can_advance_to(self, next: ProjectStatus) -> bool {
        next.stage_index() >= self.stage_index()
    }

    /// Whether the project has reached a state no scheduler will advance.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::PromoteFailed | Self::PromotedPreviewCompleted)
    }
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initiated => "initiated",
            Self::FragmentDiscoveryCompleted => "fragment_discovery_completed",
            Self::NonProcessingBatchesCopied => "non_processing_batches_copied",
            Self::Processed => "processed",
            Self::ProcessContentInProgress => "process_content_in_progress",
            Self::PromoteInProgress => "promote_in_progress",
            Self::Promoted => "promoted",
            Self::PartiallyPromoted => "partially_promoted",
            Self::PromoteFailed => "promote_failed",
            Self::PromotedPreviewInProgress => "promoted_preview_in_progress",
            Self::PromotedPreviewCompleted => "promoted_preview_completed",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// BatchStatus
// ---------------------------------------------------------------------------

/// Per-stage status of one batch. A batch may be picked up by the scheduler
/// only while exactly `initiated`; the first write of `in_progress` is the
/// claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Initiated,
    InProgress,
    Processed,
    Promoted,
    Copied,
    Error,
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initiated => "initiated",
            Self::InProgress => "in_progress",
            Self::Processed => "processed",
            Self::Promoted => "promoted",
            Self::Copied => "copied",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Scheduling priority of a batch. Processing batches (recursive transforms)
/// are `high`; passthrough copies are `low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPriority {
    High,
    Medium,
    Low,
}

// ---------------------------------------------------------------------------
// Work items & fragments
// ---------------------------------------------------------------------------

/// Kind of file a work item refers to, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Docx,
    Excel,
    Other,
}

impl FileKind {
    /// Classify a source path by extension. JSON files are the authoring
    /// representation of spreadsheets and classify as `Excel`.
    pub fn from_path(path: &str) -> Self {
        let lower = path.to_ascii_lowercase();
        if lower.ends_with(".docx") {
            Self::Docx
        } else if lower.ends_with(".xlsx") || lower.ends_with(".json") {
            Self::Excel
        } else {
            Self::Other
        }
    }
}

/// A reference to a content fragment discovered inside a page or another
/// fragment. Fetch failures are recorded, never propagated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentRef {
    /// Absolute URL of the fragment on the authoring origin.
    pub fragment_path: String,
    /// HTTP status observed when fetching the fragment.
    pub status: u16,
    /// Human-readable availability ("Available", "Server Error", ...).
    pub availability: String,
    /// Fragments referenced by this fragment (expanded one level deep).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nested_fragments: Vec<FragmentRef>,
}

impl FragmentRef {
    pub fn has_nested(&self) -> bool {
        !self.nested_fragments.is_empty()
    }
}

/// One file or content fragment to move from the staging tree to the
/// production tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Location in the staging tree.
    pub source_path: String,
    /// Location in the production tree (experience segment stripped).
    pub destination_path: String,
    /// File kind, decides the transform/copy machinery used.
    pub file_type: FileKind,
    /// Whether discovery found fragment references in this item.
    #[serde(default)]
    pub has_fragments: bool,
    /// Fragments discovered in this item's content.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fragments: Vec<FragmentRef>,
}

impl WorkItem {
    /// Build a work item from a staging path, deriving the destination by
    /// stripping the experience-name segment.
    pub fn from_source(source_path: &str, experience_name: &str) -> Self {
        Self {
            source_path: source_path.to_string(),
            destination_path: crate::paths::strip_experience_segment(
                source_path,
                experience_name,
            ),
            file_type: FileKind::from_path(source_path),
            has_fragments: false,
            fragments: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Project documents
// ---------------------------------------------------------------------------

/// One audit entry in a project's status log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEntry {
    /// Human-readable step description.
    pub step: String,
    /// Machine-readable step name.
    pub step_name: String,
    /// Failure summary for this step, empty when clean.
    #[serde(default)]
    pub failures: String,
    /// Paths touched by this step.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    /// UTC timestamp, filled at append time when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// The per-project `status.json` document. Never deleted; terminal states
/// are retained for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDocument {
    /// Current lifecycle status.
    pub status: ProjectStatus,
    /// Frozen copy of the triggering request's configuration, replayed into
    /// every worker invocation.
    pub params: PromoteParams,
    /// When the project was initiated.
    pub created_time: DateTime<Utc>,
    /// Append-only audit log of stage completions.
    #[serde(default)]
    pub statuses: Vec<StatusEntry>,
}

/// One entry in the top-level project queue — the single discovery surface
/// the scheduler scans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectQueueEntry {
    pub project_path: String,
    pub status: ProjectStatus,
    pub created_time: DateTime<Utc>,
}

/// A failure descriptor accumulated in the error records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub path: String,
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_indices_are_monotonic_over_sequence() {
        let sequence = [
            ProjectStatus::Initiated,
            ProjectStatus::FragmentDiscoveryCompleted,
            ProjectStatus::NonProcessingBatchesCopied,
            ProjectStatus::Processed,
            ProjectStatus::ProcessContentInProgress,
            ProjectStatus::PromoteInProgress,
            ProjectStatus::PartiallyPromoted,
            ProjectStatus::PromotedPreviewInProgress,
            ProjectStatus::PromotedPreviewCompleted,
        ];
        for pair in sequence.windows(2) {
            assert!(pair[0].can_advance_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
            assert!(!pair[1].can_advance_to(pair[0]) || pair[1] == pair[0]);
        }
    }

    #[test]
    fn promote_outcomes_share_a_stage() {
        assert_eq!(
            ProjectStatus::Promoted.stage_index(),
            ProjectStatus::PromoteFailed.stage_index()
        );
        assert!(ProjectStatus::Promoted.can_advance_to(ProjectStatus::PartiallyPromoted));
    }

    #[test]
    fn status_wire_spelling() {
        let json = serde_json::to_string(&ProjectStatus::NonProcessingBatchesCopied)
            .expect("serialize");
        assert_eq!(json, "\"non_processing_batches_copied\"");
        let back: ProjectStatus =
            serde_json::from_str("\"promoted_preview_in_progress\"").expect("deserialize");
        assert_eq!(back, ProjectStatus::PromotedPreviewInProgress);
    }

    #[test]
    fn file_kind_from_extension() {
        assert_eq!(FileKind::from_path("/a/b/page.docx"), FileKind::Docx);
        assert_eq!(FileKind::from_path("/a/b/data.xlsx"), FileKind::Excel);
        assert_eq!(FileKind::from_path("/a/b/data.json"), FileKind::Excel);
        assert_eq!(FileKind::from_path("/a/b/logo.svg"), FileKind::Other);
    }

    #[test]
    fn work_item_destination_strips_experience() {
        let item = WorkItem::from_source("/site/my-exp/drafts/page.docx", "my-exp");
        assert_eq!(item.destination_path, "/site/drafts/page.docx");
        assert_eq!(item.file_type, FileKind::Docx);
    }
}
