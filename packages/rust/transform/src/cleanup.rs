//! Staging-marker cleanup passes over the document tree.
//!
//! Three passes rewrite a staged document for production: link rewriting
//! (drop the experience segment, strip the staging domain suffix), staging
//! style removal from the first row of each block table, and deletion of
//! staging-only blocks. The first-row accumulator is explicit per call,
//! scoped to one document.

use std::sync::LazyLock;

use regex::Regex;

use crate::tree::{Document, Node, visit_mut};

/// Staging style-class prefix inside block options.
pub const STAGING_STYLE_PREFIX: &str = "gb-";

/// Staging domain suffix on authoring hostnames.
pub const STAGING_DOMAIN_SUFFIX: &str = "-graybox";

/// Block-type name marking staging-only content.
pub const STAGING_BLOCK_NAME: &str = "graybox";

static STAGING_STYLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"gb-[a-zA-Z0-9,._-]*").expect("valid regex"));

/// Counts of what the cleanup passes changed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CleanupStats {
    pub links_rewritten: usize,
    pub styles_stripped: usize,
    pub blocks_removed: usize,
}

/// Whether content carries any staging marker and therefore requires
/// transformation rather than a byte-identical copy. Evaluated once per
/// item, never re-evaluated.
pub fn has_staging_markers(content: &str, experience_name: &str) -> bool {
    content.contains(experience_name)
        || content.contains(STAGING_STYLE_PREFIX)
        || content.contains(STAGING_DOMAIN_SUFFIX)
        || content.contains(STAGING_BLOCK_NAME)
}

/// Run the full cleanup pipeline on a parsed document.
pub fn clean_document(document: &mut Document, experience_name: &str) -> CleanupStats {
    let mut stats = CleanupStats::default();
    stats.links_rewritten = rewrite_links(document, experience_name);
    stats.styles_stripped = strip_first_row_styles(document);
    stats.blocks_removed = remove_staging_blocks(document);
    stats
}

/// Rewrite a single value that still points at the staging tree.
pub fn rewrite_staging_value(value: &str, experience_name: &str) -> String {
    value
        .replace(&format!("/{experience_name}/"), "/")
        .replace(STAGING_DOMAIN_SUFFIX, "")
}

fn value_is_staged(value: &str, experience_name: &str) -> bool {
    value.contains(experience_name) || value.contains(STAGING_DOMAIN_SUFFIX)
}

// ---------------------------------------------------------------------------
// Pass 1: Link rewriting
// ---------------------------------------------------------------------------

/// Rewrite link URLs and link display text still pointing at the staging
/// tree back to production paths.
fn rewrite_links(document: &mut Document, experience_name: &str) -> usize {
    let mut rewritten = 0;
    visit_mut(document, &mut |node| {
        if let Node::Link { url, children } = node {
            if value_is_staged(url, experience_name) {
                *url = rewrite_staging_value(url, experience_name);
                rewritten += 1;
            }
            for child in children {
                if let Node::Text { value } = child {
                    if value_is_staged(value, experience_name) {
                        *value = rewrite_staging_value(value, experience_name);
                        rewritten += 1;
                    }
                }
            }
        }
    });
    rewritten
}

// ---------------------------------------------------------------------------
// Pass 2: Style stripping
// ---------------------------------------------------------------------------

/// Strip staging style classes from the first row of each block table.
/// Style options only occur in the block-name row.
fn strip_first_row_styles(document: &mut Document) -> usize {
    let mut stripped = 0;
    for child in &mut document.children {
        if let Node::Table { rows } = child {
            if let Some(first_row) = rows.first_mut() {
                strip_styles_in(first_row, &mut stripped);
            }
        }
    }
    stripped
}

fn strip_styles_in(node: &mut Node, stripped: &mut usize) {
    if let Node::Text { value } = node {
        if value.contains(STAGING_STYLE_PREFIX) {
            let cleaned = STAGING_STYLE_RE
                .replace_all(value, "")
                .replace("()", "")
                .replace(", )", ")");
            *value = cleaned;
            *stripped += 1;
        }
        return;
    }
    for child in node.children_mut() {
        strip_styles_in(child, stripped);
    }
}

// ---------------------------------------------------------------------------
// Pass 3: Staging block removal
// ---------------------------------------------------------------------------

/// Delete staging-only blocks from the document. A block table qualifies
/// when its first row names the staging block type; named blocks match on
/// their name directly.
fn remove_staging_blocks(document: &mut Document) -> usize {
    let before = document.children.len();
    document.children.retain(|child| match child {
        Node::Table { rows } => !rows
            .first()
            .map(|row| row.text_content().contains(STAGING_BLOCK_NAME))
            .unwrap_or(false),
        Node::Block { name, .. } => !name.contains(STAGING_BLOCK_NAME),
        _ => true,
    });
    before - document.children.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXP: &str = "summer-launch";

    fn text(value: &str) -> Node {
        Node::Text {
            value: value.into(),
        }
    }

    fn block_table(first_cell: &str) -> Node {
        Node::Table {
            rows: vec![
                Node::Row {
                    cells: vec![Node::Cell {
                        children: vec![text(first_cell)],
                    }],
                },
                Node::Row {
                    cells: vec![Node::Cell {
                        children: vec![text("body")],
                    }],
                },
            ],
        }
    }

    #[test]
    fn marker_detection_covers_all_four() {
        assert!(has_staging_markers("see /summer-launch/page", EXP));
        assert!(has_staging_markers("marquee (gb-dark)", EXP));
        assert!(has_staging_markers("https://main--site-graybox--org.example.page/x", EXP));
        assert!(has_staging_markers("| graybox |", EXP));
        assert!(!has_staging_markers("plain production content", EXP));
    }

    #[test]
    fn links_lose_experience_segment_and_suffix() {
        let mut doc = Document {
            children: vec![Node::Paragraph {
                children: vec![Node::Link {
                    url: format!(
                        "https://main--site{STAGING_DOMAIN_SUFFIX}--org.example.page/{EXP}/drafts/a"
                    ),
                    children: vec![text(&format!("/{EXP}/drafts/a"))],
                }],
            }],
        };
        let stats = clean_document(&mut doc, EXP);
        assert_eq!(stats.links_rewritten, 2);

        let Node::Paragraph { children } = &doc.children[0] else {
            panic!("expected paragraph");
        };
        let Node::Link { url, children } = &children[0] else {
            panic!("expected link");
        };
        assert_eq!(url, "https://main--site--org.example.page/drafts/a");
        assert_eq!(children[0], text("/drafts/a"));
    }

    #[test]
    fn styles_stripped_only_from_first_row() {
        let mut doc = Document {
            children: vec![Node::Table {
                rows: vec![
                    Node::Row {
                        cells: vec![Node::Cell {
                            children: vec![text("marquee (gb-dark, large)")],
                        }],
                    },
                    Node::Row {
                        cells: vec![Node::Cell {
                            children: vec![text("body mentions gb-dark literally")],
                        }],
                    },
                ],
            }],
        };
        let stats = clean_document(&mut doc, EXP);
        assert_eq!(stats.styles_stripped, 1);

        let Node::Table { rows } = &doc.children[0] else {
            panic!("expected table");
        };
        assert_eq!(rows[0].text_content(), "marquee (large)");
        // Later rows are content, not block options.
        assert!(rows[1].text_content().contains("gb-dark"));
    }

    #[test]
    fn style_only_option_list_collapses() {
        let mut doc = Document {
            children: vec![block_table("marquee (gb-dark)")],
        };
        clean_document(&mut doc, EXP);
        let Node::Table { rows } = &doc.children[0] else {
            panic!("expected table");
        };
        assert_eq!(rows[0].text_content(), "marquee ");
    }

    #[test]
    fn staging_blocks_are_deleted() {
        let mut doc = Document {
            children: vec![
                block_table("graybox"),
                block_table("marquee"),
                Node::Block {
                    name: "graybox-banner".into(),
                    children: vec![text("staged only")],
                },
            ],
        };
        let stats = clean_document(&mut doc, EXP);
        assert_eq!(stats.blocks_removed, 2);
        assert_eq!(doc.children.len(), 1);
        assert!(doc.children[0].text_content().contains("marquee"));
    }

    #[test]
    fn clean_document_is_stable_on_clean_input() {
        let mut doc = Document {
            children: vec![block_table("marquee"), Node::Paragraph {
                children: vec![text("production copy")],
            }],
        };
        let original = doc.clone();
        let stats = clean_document(&mut doc, EXP);
        assert_eq!(stats, CleanupStats::default());
        assert_eq!(doc, original);
    }
}
