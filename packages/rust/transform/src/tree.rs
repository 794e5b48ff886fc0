//! Tagged document tree produced by the external markdown parser.
//!
//! The node union is a closed sum type so every traversal is an exhaustive
//! match; block names and link URLs are plain strings because they carry
//! the staging markers the cleanup passes rewrite.

use serde::{Deserialize, Serialize};

/// A parsed content document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub children: Vec<Node>,
}

/// One node of the document tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    /// A text run.
    Text { value: String },
    /// A link with display children.
    Link { url: String, children: Vec<Node> },
    /// A paragraph grouping inline children.
    Paragraph { children: Vec<Node> },
    /// A block table; the first row names the block type.
    Table { rows: Vec<Node> },
    /// One table row.
    Row { cells: Vec<Node> },
    /// One table cell.
    Cell { children: Vec<Node> },
    /// A named custom block.
    Block { name: String, children: Vec<Node> },
}

impl Node {
    /// Child nodes, empty for leaves.
    pub fn children(&self) -> &[Node] {
        match self {
            Node::Text { .. } => &[],
            Node::Link { children, .. }
            | Node::Paragraph { children }
            | Node::Cell { children }
            | Node::Block { children, .. } => children,
            Node::Table { rows } => rows,
            Node::Row { cells } => cells,
        }
    }

    /// Mutable child nodes, empty for leaves.
    pub fn children_mut(&mut self) -> &mut [Node] {
        match self {
            Node::Text { .. } => &mut [],
            Node::Link { children, .. }
            | Node::Paragraph { children }
            | Node::Cell { children }
            | Node::Block { children, .. } => children,
            Node::Table { rows } => rows,
            Node::Row { cells } => cells,
        }
    }

    /// Concatenated text of this node and its descendants.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }
}

fn collect_text(node: &Node, out: &mut String) {
    if let Node::Text { value } = node {
        out.push_str(value);
    }
    for child in node.children() {
        collect_text(child, out);
    }
}

/// Visit every node of a document mutably, depth-first.
pub fn visit_mut(document: &mut Document, f: &mut impl FnMut(&mut Node)) {
    for child in &mut document.children {
        visit_node_mut(child, f);
    }
}

fn visit_node_mut(node: &mut Node, f: &mut impl FnMut(&mut Node)) {
    f(node);
    for child in node.children_mut() {
        visit_node_mut(child, f);
    }
}
