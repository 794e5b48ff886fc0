//! Promotion/copy executor and external-service contracts.
//!
//! This crate provides:
//! - [`service`] — the object-store and admin-API traits
//! - [`retry`] — the transient/rate-limit retry policy and bulk-job polling
//! - [`promote`] — the locking-aware external-write protocol
//! - [`memory`] — an in-memory object store for tests and dry runs

pub mod memory;
pub mod promote;
pub mod retry;
pub mod service;

pub use memory::MemoryStore;
pub use promote::{Promoter, SaveReport};
pub use retry::{PollPolicy, RetryPolicy, run_bulk_job, with_retry};
pub use service::{
    AdminApi, BulkOperation, FolderEntry, ItemMetadata, JobHandle, JobReport, JobState,
    ObjectStore, PathJobStatus, UploadOutcome,
};
