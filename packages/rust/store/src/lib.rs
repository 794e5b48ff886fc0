//! File-backed JSON state store — the pipeline's only shared resource.
//!
//! The hierarchical key namespace *is* the database: every read-modify-write
//! is a non-transactional read / mutate / write sequence, and the store
//! supplies no locking and no schema validation. Callers use the defensive
//! typed readers for documents whose shape other writers may have corrupted,
//! and [`Versioned`] documents with [`FileStore::write_if_version`] where a
//! claim needs an optimistic concurrency token.

pub mod layout;
pub mod records;

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use graybox_shared::{GrayboxError, Result};

// ---------------------------------------------------------------------------
// Versioned documents
// ---------------------------------------------------------------------------

/// A state document carrying an optimistic concurrency token. The version
/// increments on every successful conditional write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

impl<T: Default> Default for Versioned<T> {
    fn default() -> Self {
        Self {
            version: 0,
            value: T::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

/// Handle to the JSON document namespace rooted at a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `root`. The directory is created lazily on
    /// first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the namespace.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key.trim_start_matches('/'))
    }

    /// Read and deserialize a JSON document. Missing files surface as
    /// [`GrayboxError::NotFound`]; shape mismatches as [`GrayboxError::State`].
    pub async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(GrayboxError::not_found(key));
            }
            Err(e) => return Err(GrayboxError::io(&path, e)),
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| GrayboxError::state(format!("{key}: {e}")))
    }

    /// Serialize and write a JSON document via a temp file + rename, so a
    /// concurrent reader never observes a torn write.
    pub async fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| GrayboxError::Store(format!("{key}: {e}")))?;
        self.write_buffer(key, &bytes).await
    }

    /// Read a document's raw bytes (artifact staging area).
    pub async fn read_buffer(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(GrayboxError::not_found(key))
            }
            Err(e) => Err(GrayboxError::io(&path, e)),
        }
    }

    /// Write raw bytes via a temp file + rename.
    pub async fn write_buffer(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| GrayboxError::io(parent, e))?;
        }
        let tmp = PathBuf::from(format!("{}.tmp", path.display()));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| GrayboxError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| GrayboxError::io(&path, e))?;
        Ok(())
    }

    /// Whether a document exists.
    pub async fn exists(&self, key: &str) -> bool {
        tokio::fs::try_exists(self.path_for(key))
            .await
            .unwrap_or(false)
    }

    // -----------------------------------------------------------------------
    // Defensive typed reads
    // -----------------------------------------------------------------------

    /// Read a document expected to be a JSON array. A missing file or a
    /// shape mismatch yields an empty vec — forward progress over strict
    /// consistency.
    pub async fn read_array_or_default<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
        match self.read::<serde_json::Value>(key).await {
            Ok(serde_json::Value::Array(items)) => items
                .into_iter()
                .filter_map(|v| match serde_json::from_value(v) {
                    Ok(item) => Some(item),
                    Err(e) => {
                        warn!(key, error = %e, "skipping malformed array entry");
                        None
                    }
                })
                .collect(),
            Ok(other) => {
                warn!(
                    key,
                    found = shape_name(&other),
                    "expected array, coercing to empty"
                );
                Vec::new()
            }
            Err(GrayboxError::NotFound { .. }) => Vec::new(),
            Err(e) => {
                warn!(key, error = %e, "unreadable array document, coercing to empty");
                Vec::new()
            }
        }
    }

    /// Read a document expected to be a JSON object keyed by strings. A
    /// missing file or a shape mismatch yields an empty map.
    pub async fn read_map_or_default<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> std::collections::BTreeMap<String, T> {
        match self.read::<serde_json::Value>(key).await {
            Ok(serde_json::Value::Object(entries)) => entries
                .into_iter()
                .filter_map(|(k, v)| match serde_json::from_value(v) {
                    Ok(item) => Some((k, item)),
                    Err(e) => {
                        warn!(key, entry = %k, error = %e, "skipping malformed map entry");
                        None
                    }
                })
                .collect(),
            Ok(other) => {
                warn!(
                    key,
                    found = shape_name(&other),
                    "expected object, coercing to empty"
                );
                Default::default()
            }
            Err(GrayboxError::NotFound { .. }) => Default::default(),
            Err(e) => {
                warn!(key, error = %e, "unreadable map document, coercing to empty");
                Default::default()
            }
        }
    }

    // -----------------------------------------------------------------------
    // Versioned documents
    // -----------------------------------------------------------------------

    /// Read a versioned document, defaulting to version 0 when missing.
    pub async fn read_versioned<T: DeserializeOwned + Default>(
        &self,
        key: &str,
    ) -> Result<Versioned<T>> {
        match self.read::<Versioned<T>>(key).await {
            Ok(doc) => Ok(doc),
            Err(GrayboxError::NotFound { .. }) => Ok(Versioned::default()),
            Err(e) => Err(e),
        }
    }

    /// Conditionally write a versioned document: succeeds only when the
    /// on-disk version still equals `expected`, and bumps the version by one.
    ///
    /// The check re-reads the document immediately before the rename, which
    /// narrows the lost-update window to the rename itself — adequate
    /// against schedulers sharing a filesystem, and the documented residual
    /// limitation of a lock-free namespace.
    pub async fn write_if_version<T: Serialize + DeserializeOwned + Default>(
        &self,
        key: &str,
        expected: u64,
        value: T,
    ) -> Result<Versioned<T>> {
        let on_disk: Versioned<serde_json::Value> = match self.read(key).await {
            Ok(doc) => doc,
            Err(GrayboxError::NotFound { .. }) => Versioned::default(),
            Err(e) => return Err(e),
        };
        if on_disk.version != expected {
            return Err(GrayboxError::Conflict {
                key: key.to_string(),
                expected,
                found: on_disk.version,
            });
        }
        let next = Versioned {
            version: expected + 1,
            value,
        };
        self.write(key, &next).await?;
        Ok(next)
    }
}

fn shape_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
