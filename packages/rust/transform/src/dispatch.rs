//! Per-item transform/copy classification and artifact generation.
//!
//! The transform-vs-copy branch is the most consequential decision in the
//! pipeline: it fixes which batch set and which result record an item
//! belongs to for the rest of the run.

use tracing::{debug, info};

use graybox_shared::{GrayboxError, Result};

use crate::cleanup::{clean_document, has_staging_markers};
use crate::sheet::{JsonTable, rewrite_table};
use crate::traits::{DocumentRenderer, MarkdownParser, RenderOptions, SpreadsheetCodec};

/// Routing decision for one work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Staging markers present: strip, rewrite, regenerate the binary.
    Transform,
    /// No markers: byte-identical copy, no renderer invocation.
    Copy,
}

/// Classify an item's rendered content. Evaluated once per item.
pub fn classify(content: &str, experience_name: &str) -> Route {
    if has_staging_markers(content, experience_name) {
        Route::Transform
    } else {
        Route::Copy
    }
}

/// Clean a staged page and regenerate its binary document.
pub async fn transform_page(
    parser: &dyn MarkdownParser,
    renderer: &dyn DocumentRenderer,
    content: &str,
    experience_name: &str,
    options: &RenderOptions,
) -> Result<Vec<u8>> {
    let mut document = parser.parse(content)?;
    let stats = clean_document(&mut document, experience_name);
    debug!(
        links = stats.links_rewritten,
        styles = stats.styles_stripped,
        blocks = stats.blocks_removed,
        "document cleaned"
    );

    let bytes = renderer.render(&document, options).await?;
    if bytes.is_empty() {
        return Err(GrayboxError::Transform(
            "renderer produced an empty document".into(),
        ));
    }
    info!(size = bytes.len(), "document regenerated");
    Ok(bytes)
}

/// Rewrite a staged spreadsheet and re-encode its binary workbook.
pub fn transform_sheet(
    codec: &dyn SpreadsheetCodec,
    content: &str,
    experience_name: &str,
) -> Result<Vec<u8>> {
    let mut table: JsonTable = serde_json::from_str(content)
        .map_err(|e| GrayboxError::Transform(format!("invalid sheet JSON: {e}")))?;
    let changed = rewrite_table(&mut table, experience_name);
    debug!(changed, "sheet rewritten");
    codec.to_sheet(&table)
}
