//! Contracts for the destination object store and the content-origin
//! admin API.
//!
//! Both transports are supplied by the hosting platform; the pipeline
//! depends only on these narrow interfaces. Implementations surface
//! rate limiting as [`GrayboxError::RateLimited`] and connection-level
//! failures as [`GrayboxError::Network`] so the retry policy can act on
//! them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use graybox_shared::Result;

// ---------------------------------------------------------------------------
// Object store
// ---------------------------------------------------------------------------

/// Result of one upload attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Success,
    /// Destination held by another writer (conflict code).
    Locked,
    Failed(String),
}

/// One entry of a folder listing.
#[derive(Debug, Clone)]
pub struct FolderEntry {
    pub path: String,
    pub is_folder: bool,
}

/// Creation/modification metadata of a stored item.
#[derive(Debug, Clone, Copy)]
pub struct ItemMetadata {
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

/// The SharePoint-like destination store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Resolve a download URL for a stored file, `None` when absent.
    async fn get_download_url(&self, path: &str) -> Result<Option<String>>;

    /// Download a file's bytes via its download URL.
    async fn download(&self, url: &str) -> Result<Vec<u8>>;

    /// Create a folder, succeeding if it already exists.
    async fn create_folder(&self, path: &str) -> Result<()>;

    /// Open an upload session sized to the artifact.
    async fn create_upload_session(&self, path: &str, size: u64) -> Result<String>;

    /// Upload bytes to an open session.
    async fn upload(&self, session_url: &str, bytes: &[u8]) -> Result<UploadOutcome>;

    /// List the immediate children of a folder.
    async fn list_folder(&self, path: &str) -> Result<Vec<FolderEntry>>;

    /// Creation/modification metadata, `None` when the item is absent.
    async fn item_metadata(&self, path: &str) -> Result<Option<ItemMetadata>>;

    /// Append rows to a named table in a workbook.
    async fn update_table(
        &self,
        path: &str,
        table_name: &str,
        rows: Vec<Vec<String>>,
    ) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Admin API
// ---------------------------------------------------------------------------

/// Bulk operation kinds against the content-origin admin API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkOperation {
    Preview,
    Publish,
}

impl std::fmt::Display for BulkOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Preview => write!(f, "preview"),
            Self::Publish => write!(f, "publish"),
        }
    }
}

/// Handle to an asynchronous bulk job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle(pub String);

/// Lifecycle state of a bulk job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Stopped,
    Cancelled,
}

/// Per-path result of a bulk job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathJobStatus {
    pub path: String,
    pub success: bool,
    /// File name of the underlying source document.
    #[serde(default)]
    pub file_name: String,
    /// Resource path of the rendered representation.
    #[serde(default)]
    pub resource_path: String,
    /// HTTP status observed for this path.
    #[serde(default)]
    pub response_code: u16,
}

/// Snapshot of a bulk job's progress.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub state: JobState,
    pub resources: Vec<PathJobStatus>,
}

/// The content-origin admin API.
#[async_trait]
pub trait AdminApi: Send + Sync {
    /// Start a bulk job over `paths`, scoped to an experience subtree.
    async fn start_bulk_job(
        &self,
        paths: &[String],
        operation: BulkOperation,
        experience_scope: Option<&str>,
    ) -> Result<JobHandle>;

    /// Check a bulk job's progress.
    async fn job_status(&self, handle: &JobHandle) -> Result<JobReport>;
}
