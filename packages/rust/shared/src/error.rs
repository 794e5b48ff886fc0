//! Error types for the graybox promotion pipeline.
//!
//! Library crates use [`GrayboxError`] via `thiserror`.
//! The CLI app wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum GrayboxError {
    /// Configuration loading or trigger-parameter validation error.
    /// Rejected at the entry point before any state mutation.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transient network/HTTP error (connection reset, timeout, 5xx).
    /// Retried automatically up to the retry ceiling.
    #[error("network error: {0}")]
    Network(String),

    /// The remote reported rate limiting (HTTP 429); holds the
    /// server-supplied delay to honor before the next attempt.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Destination write conflict — the target is held by another writer.
    /// Recorded distinctly, never retried in-line.
    #[error("file is locked: {path}")]
    Locked { path: String },

    /// A state document or remote resource does not exist.
    #[error("not found: {path}")]
    NotFound { path: String },

    /// Optimistic-concurrency token mismatch on a versioned state document.
    #[error("version conflict on {key}: expected {expected}, found {found}")]
    Conflict {
        key: String,
        expected: u64,
        found: u64,
    },

    /// Persisted state had an unexpected shape (array where an object was
    /// expected, or vice versa). Coerced to defaults at defensive reads.
    #[error("state error: {message}")]
    State { message: String },

    /// Content transformation error (parse, render, or sheet encode).
    #[error("transform error: {0}")]
    Transform(String),

    /// State store read/write error.
    #[error("store error: {0}")]
    Store(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (malformed paths, bad parameter shapes).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, GrayboxError>;

impl GrayboxError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a state-corruption error from any displayable message.
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a not-found error for a path or key.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Create a locked-destination error for a path.
    pub fn locked(path: impl Into<String>) -> Self {
        Self::Locked { path: path.into() }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the retry policy may re-attempt the failed operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RateLimited { .. })
    }
}
