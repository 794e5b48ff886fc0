//! Contracts for the external content libraries.
//!
//! Parsing, document rendering, and spreadsheet encoding are supplied by
//! the hosting platform; the pipeline only depends on these narrow
//! functional interfaces.

use async_trait::async_trait;

use graybox_shared::Result;

use crate::sheet::JsonTable;
use crate::tree::Document;

/// Markdown → document tree.
pub trait MarkdownParser: Send + Sync {
    fn parse(&self, text: &str) -> Result<Document>;
}

/// Options threaded to the document renderer.
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// Style sheet applied to the generated document.
    pub style_sheet: Option<String>,
    /// Auth token for resolving protected assets during rendering.
    pub auth_token: Option<String>,
}

/// Document tree → binary document.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render(&self, document: &Document, options: &RenderOptions) -> Result<Vec<u8>>;
}

/// JSON table → binary spreadsheet.
pub trait SpreadsheetCodec: Send + Sync {
    fn to_sheet(&self, table: &JsonTable) -> Result<Vec<u8>>;
}
