//! In-memory [`ObjectStore`] implementation.
//!
//! Used by tests across the workspace and by local dry runs where no real
//! destination transport is configured. Lock conflicts and item metadata
//! are scriptable so the write protocol's conflict paths can be exercised.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use graybox_shared::Result;

use crate::service::{FolderEntry, ItemMetadata, ObjectStore, UploadOutcome};

/// Scriptable in-memory object store.
#[derive(Default)]
pub struct MemoryStore {
    pub files: Mutex<BTreeMap<String, Vec<u8>>>,
    pub folders: Mutex<Vec<String>>,
    pub table_rows: Mutex<Vec<Vec<String>>>,
    /// Destinations that report a lock conflict on upload.
    pub locked_paths: Mutex<Vec<String>>,
    /// Destination metadata overrides.
    pub metadata: Mutex<BTreeMap<String, (DateTime<Utc>, DateTime<Utc>)>>,
}

impl MemoryStore {
    pub fn with_file(self, path: &str, bytes: &[u8]) -> Self {
        self.files
            .lock()
            .expect("lock")
            .insert(path.to_string(), bytes.to_vec());
        self
    }

    pub fn lock_path(self, path: &str) -> Self {
        self.locked_paths
            .lock()
            .expect("lock")
            .push(path.to_string());
        self
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_download_url(&self, path: &str) -> Result<Option<String>> {
        Ok(self
            .files
            .lock()
            .expect("lock")
            .contains_key(path)
            .then(|| format!("mem://{path}")))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let path = url.trim_start_matches("mem://");
        self.files
            .lock()
            .expect("lock")
            .get(path)
            .cloned()
            .ok_or_else(|| graybox_shared::GrayboxError::not_found(path))
    }

    async fn create_folder(&self, path: &str) -> Result<()> {
        let mut folders = self.folders.lock().expect("lock");
        if !folders.contains(&path.to_string()) {
            folders.push(path.to_string());
        }
        Ok(())
    }

    async fn create_upload_session(&self, path: &str, _size: u64) -> Result<String> {
        Ok(format!("session://{path}"))
    }

    async fn upload(&self, session_url: &str, bytes: &[u8]) -> Result<UploadOutcome> {
        let path = session_url.trim_start_matches("session://");
        if self
            .locked_paths
            .lock()
            .expect("lock")
            .iter()
            .any(|p| p == path)
        {
            return Ok(UploadOutcome::Locked);
        }
        self.files
            .lock()
            .expect("lock")
            .insert(path.to_string(), bytes.to_vec());
        Ok(UploadOutcome::Success)
    }

    async fn list_folder(&self, path: &str) -> Result<Vec<FolderEntry>> {
        let files = self.files.lock().expect("lock");
        let prefix = if path.is_empty() || path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        let mut entries: Vec<FolderEntry> = Vec::new();
        for file in files.keys() {
            let Some(rest) = file.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((folder, _)) => {
                    let folder_path = format!("{prefix}{folder}");
                    if !entries.iter().any(|e| e.path == folder_path) {
                        entries.push(FolderEntry {
                            path: folder_path,
                            is_folder: true,
                        });
                    }
                }
                None => entries.push(FolderEntry {
                    path: file.clone(),
                    is_folder: false,
                }),
            }
        }
        Ok(entries)
    }

    async fn item_metadata(&self, path: &str) -> Result<Option<ItemMetadata>> {
        Ok(self
            .metadata
            .lock()
            .expect("lock")
            .get(path)
            .map(|(created, last_modified)| ItemMetadata {
                created: *created,
                last_modified: *last_modified,
            }))
    }

    async fn update_table(
        &self,
        _path: &str,
        _table_name: &str,
        rows: Vec<Vec<String>>,
    ) -> Result<()> {
        self.table_rows.lock().expect("lock").extend(rows);
        Ok(())
    }
}
