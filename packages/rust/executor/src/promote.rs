//! Promotion/copy executor — the external-write protocol.
//!
//! Uploads go through an idempotent folder create, a sized upload session,
//! and a single upload attempt per retry round. A `locked` destination is
//! surfaced as a distinguishable failure so the caller can skip-and-report
//! instead of aborting the batch. Before overwriting, the destination's
//! last-modified time is compared against the source snapshot time; a
//! destination edited in production since staging began is flagged for
//! manual reconciliation, not blocked.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use graybox_shared::{GrayboxError, Result};

use crate::retry::{RetryPolicy, with_retry};
use crate::service::{ObjectStore, UploadOutcome};

/// Result of one promote/copy attempt.
#[derive(Debug, Clone)]
pub struct SaveReport {
    pub success: bool,
    pub path: String,
    pub error_msg: Option<String>,
    /// The destination reported a write conflict.
    pub locked: bool,
    /// The destination was modified after the source snapshot was taken.
    pub newer_destination: bool,
}

impl SaveReport {
    fn failure(path: &str, error_msg: String, locked: bool, newer_destination: bool) -> Self {
        Self {
            success: false,
            path: path.to_string(),
            error_msg: Some(error_msg),
            locked,
            newer_destination,
        }
    }
}

/// Executor over one destination store.
#[derive(Clone)]
pub struct Promoter {
    store: Arc<dyn ObjectStore>,
    retry: RetryPolicy,
}

impl Promoter {
    pub fn new(store: Arc<dyn ObjectStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Upload `bytes` to `destination`, following the write protocol.
    ///
    /// `source_snapshot` is the time the staging snapshot was taken; when
    /// the destination's last-modified is newer, the report flags it.
    pub async fn save(
        &self,
        bytes: &[u8],
        destination: &str,
        source_snapshot: Option<DateTime<Utc>>,
    ) -> SaveReport {
        let newer_destination = self
            .destination_is_newer(destination, source_snapshot)
            .await;
        if newer_destination {
            warn!(
                destination,
                "destination modified after staging snapshot, flagging for reconciliation"
            );
        }

        if let Some(parent) = parent_folder(destination) {
            if let Err(e) = with_retry(self.retry, "create_folder", || {
                self.store.create_folder(&parent)
            })
            .await
            {
                return SaveReport::failure(
                    destination,
                    format!("folder create failed: {e}"),
                    false,
                    newer_destination,
                );
            }
        }

        let size = bytes.len() as u64;
        let session = match with_retry(self.retry, "create_upload_session", || {
            self.store.create_upload_session(destination, size)
        })
        .await
        {
            Ok(session) => session,
            Err(e) => {
                return SaveReport::failure(
                    destination,
                    format!("upload session failed: {e}"),
                    false,
                    newer_destination,
                );
            }
        };

        let outcome = with_retry(self.retry, "upload", || {
            self.store.upload(&session, bytes)
        })
        .await;

        match outcome {
            Ok(UploadOutcome::Success) => {
                info!(destination, size, "upload complete");
                SaveReport {
                    success: true,
                    path: destination.to_string(),
                    error_msg: None,
                    locked: false,
                    newer_destination,
                }
            }
            Ok(UploadOutcome::Locked) => SaveReport::failure(
                destination,
                GrayboxError::locked(destination).to_string(),
                true,
                newer_destination,
            ),
            Ok(UploadOutcome::Failed(msg)) => {
                SaveReport::failure(destination, msg, false, newer_destination)
            }
            Err(GrayboxError::Locked { path }) => SaveReport::failure(
                destination,
                GrayboxError::locked(path).to_string(),
                true,
                newer_destination,
            ),
            Err(e) => SaveReport::failure(destination, e.to_string(), false, newer_destination),
        }
    }

    /// Byte-identical copy from a source location to a destination.
    pub async fn copy(&self, source: &str, destination: &str) -> SaveReport {
        let download_url = match with_retry(self.retry, "get_download_url", || {
            self.store.get_download_url(source)
        })
        .await
        {
            Ok(Some(url)) => url,
            Ok(None) => {
                return SaveReport::failure(
                    destination,
                    format!("no download URL for {source}"),
                    false,
                    false,
                );
            }
            Err(e) => {
                return SaveReport::failure(destination, e.to_string(), false, false);
            }
        };

        let bytes = match with_retry(self.retry, "download", || {
            self.store.download(&download_url)
        })
        .await
        {
            Ok(bytes) => bytes,
            Err(e) => {
                return SaveReport::failure(
                    destination,
                    format!("download failed for {source}: {e}"),
                    false,
                    false,
                );
            }
        };

        self.save(&bytes, destination, None).await
    }

    /// Append a human-readable status row to the project workbook. Failures
    /// here are logged, never escalated — status reporting must not break a
    /// stage.
    pub async fn report_status(
        &self,
        excel_path: &str,
        table_name: &str,
        step: &str,
        failures: &str,
        payload: &str,
    ) {
        let row = vec![
            step.to_string(),
            Utc::now().to_rfc3339(),
            failures.to_string(),
            payload.to_string(),
        ];
        if let Err(e) = self
            .store
            .update_table(excel_path, table_name, vec![row])
            .await
        {
            warn!(excel_path, table_name, error = %e, "status row update failed");
        }
    }

    async fn destination_is_newer(
        &self,
        destination: &str,
        source_snapshot: Option<DateTime<Utc>>,
    ) -> bool {
        let Some(snapshot) = source_snapshot else {
            return false;
        };
        match self.store.item_metadata(destination).await {
            Ok(Some(meta)) => meta.last_modified > snapshot,
            Ok(None) => false,
            Err(e) => {
                warn!(destination, error = %e, "metadata check failed, skipping");
                false
            }
        }
    }
}

/// Parent folder of a file path, `None` at the root.
fn parent_folder(path: &str) -> Option<String> {
    let idx = path.rfind('/')?;
    if idx == 0 {
        return None;
    }
    Some(path[..idx].to_string())
}

#[cfg(test)]
mod tests {
    use crate::memory::MemoryStore;
    use super::*;
    use std::time::Duration;

    fn fast_promoter(store: MemoryStore) -> (Arc<MemoryStore>, Promoter) {
        let store = Arc::new(store);
        let promoter = Promoter::new(
            store.clone(),
            RetryPolicy {
                max_attempts: 2,
                retry_delay: Duration::from_millis(1),
            },
        );
        (store, promoter)
    }

    #[tokio::test]
    async fn save_creates_parent_and_uploads() {
        let (store, promoter) = fast_promoter(MemoryStore::default());
        let report = promoter.save(b"bytes", "/site/drafts/page.docx", None).await;

        assert!(report.success);
        assert!(!report.locked);
        assert!(
            store
                .folders
                .lock()
                .expect("lock")
                .contains(&"/site/drafts".to_string())
        );
        assert_eq!(
            store.files.lock().expect("lock")["/site/drafts/page.docx"],
            b"bytes"
        );
    }

    #[tokio::test]
    async fn locked_destination_is_distinguishable() {
        let (_, promoter) =
            fast_promoter(MemoryStore::default().lock_path("/site/held.docx"));
        let report = promoter.save(b"bytes", "/site/held.docx", None).await;

        assert!(!report.success);
        assert!(report.locked);
        let msg = report.error_msg.expect("message").to_lowercase();
        assert!(msg.contains("locked"));
    }

    #[tokio::test]
    async fn copy_is_byte_identical() {
        let source_bytes = b"\x50\x4b\x03\x04 docx payload".to_vec();
        let (store, promoter) = fast_promoter(
            MemoryStore::default().with_file("/gb/exp/plain.docx", &source_bytes),
        );
        let report = promoter.copy("/gb/exp/plain.docx", "/site/plain.docx").await;

        assert!(report.success);
        assert_eq!(
            store.files.lock().expect("lock")["/site/plain.docx"],
            source_bytes
        );
    }

    #[tokio::test]
    async fn copy_of_missing_source_fails_per_item() {
        let (_, promoter) = fast_promoter(MemoryStore::default());
        let report = promoter.copy("/gb/exp/ghost.docx", "/site/ghost.docx").await;
        assert!(!report.success);
        assert!(report.error_msg.expect("message").contains("no download URL"));
    }

    #[tokio::test]
    async fn newer_destination_is_flagged_not_blocked() {
        let snapshot = Utc::now() - chrono::Duration::hours(2);
        let store = MemoryStore::default();
        store.metadata.lock().expect("lock").insert(
            "/site/edited.docx".to_string(),
            (snapshot - chrono::Duration::days(1), Utc::now()),
        );
        let (_, promoter) = fast_promoter(store);

        let report = promoter
            .save(b"bytes", "/site/edited.docx", Some(snapshot))
            .await;
        assert!(report.success);
        assert!(report.newer_destination);
    }

    #[tokio::test]
    async fn status_rows_have_four_columns() {
        let (store, promoter) = fast_promoter(MemoryStore::default());
        promoter
            .report_status("/gb/exp/promote.xlsx", "PROMOTE_STATUS", "Promote completed", "", "{}")
            .await;
        let rows = store.table_rows.lock().expect("lock");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].len(), 4);
        assert_eq!(rows[0][0], "Promote completed");
    }
}
