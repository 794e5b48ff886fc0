//! Content transform dispatcher for the graybox promotion pipeline.
//!
//! This crate provides:
//! - [`tree`] — the tagged document tree produced by the external parser
//! - [`cleanup`] — staging-marker detection and removal passes
//! - [`sheet`] — the JSON table model and spreadsheet rewrite
//! - [`dispatch`] — the transform-vs-copy classification and artifact generation
//! - [`traits`] — contracts for the external parser/renderer/codec

pub mod cleanup;
pub mod dispatch;
pub mod sheet;
pub mod traits;
pub mod tree;

pub use cleanup::{
    CleanupStats, STAGING_BLOCK_NAME, STAGING_DOMAIN_SUFFIX, STAGING_STYLE_PREFIX,
    clean_document, has_staging_markers, rewrite_staging_value,
};
pub use dispatch::{Route, classify, transform_page, transform_sheet};
pub use sheet::{JsonTable, rewrite_table};
pub use traits::{DocumentRenderer, MarkdownParser, RenderOptions, SpreadsheetCodec};
pub use tree::{Document, Node, visit_mut};
