//! Shared types, error model, and configuration for the graybox promotion
//! pipeline.
//!
//! This crate is the foundation depended on by all other pipeline crates.
//! It provides:
//! - [`GrayboxError`] — the unified error type
//! - Domain types ([`ProjectDocument`], [`WorkItem`], [`FragmentRef`], status enums)
//! - Configuration ([`AppConfig`], [`PromoteParams`], config loading)
//! - Path helpers (experience stripping, preview paths, ignore patterns)

pub mod config;
pub mod error;
pub mod paths;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, PromoteParams, RetryConfig, config_dir, config_file_path,
    init_config, load_config, load_config_from,
};
pub use error::{GrayboxError, Result};
pub use paths::{
    experience_selector, is_pattern_matched, json_to_xlsx, preview_path,
    strip_experience_segment,
};
pub use types::{
    BatchPriority, BatchStatus, FailureRecord, FileKind, FragmentRef, ProjectDocument,
    ProjectQueueEntry, ProjectStatus, StatusEntry, WorkItem,
};
