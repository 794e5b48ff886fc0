//! Spreadsheet rewrite for staged workbook content.
//!
//! Spreadsheets travel as their JSON table representation; matching column
//! headers and cell values are rewritten the same way links are, then the
//! external codec re-encodes the binary workbook.

use serde::{Deserialize, Serialize};

use crate::cleanup::rewrite_staging_value;

/// The JSON representation of one worksheet table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonTable {
    /// Column headers.
    #[serde(default)]
    pub columns: Vec<String>,
    /// Data rows.
    #[serde(default)]
    pub data: Vec<Vec<String>>,
}

/// Rewrite staged values in columns and cells. Returns how many values
/// changed.
pub fn rewrite_table(table: &mut JsonTable, experience_name: &str) -> usize {
    let mut changed = 0;

    for column in &mut table.columns {
        if rewrite_in_place(column, experience_name) {
            changed += 1;
        }
    }
    for row in &mut table.data {
        for cell in row {
            if rewrite_in_place(cell, experience_name) {
                changed += 1;
            }
        }
    }
    changed
}

fn rewrite_in_place(value: &mut String, experience_name: &str) -> bool {
    if value.contains(experience_name)
        || value.contains(crate::cleanup::STAGING_DOMAIN_SUFFIX)
    {
        let rewritten = rewrite_staging_value(value, experience_name);
        if rewritten != *value {
            *value = rewritten;
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXP: &str = "summer-launch";

    #[test]
    fn staged_cells_are_rewritten() {
        let mut table = JsonTable {
            columns: vec!["path".into(), "label".into()],
            data: vec![
                vec![
                    format!("https://main--site-graybox--org.example.page/{EXP}/offers"),
                    "Offers".into(),
                ],
                vec!["/plain/path".into(), "Plain".into()],
            ],
        };

        let changed = rewrite_table(&mut table, EXP);
        assert_eq!(changed, 1);
        assert_eq!(
            table.data[0][0],
            "https://main--site--org.example.page/offers"
        );
        assert_eq!(table.data[1][0], "/plain/path");
    }

    #[test]
    fn clean_table_is_untouched() {
        let mut table = JsonTable {
            columns: vec!["a".into()],
            data: vec![vec!["production".into()]],
        };
        let original = table.clone();
        assert_eq!(rewrite_table(&mut table, EXP), 0);
        assert_eq!(table, original);
    }

    #[test]
    fn json_table_roundtrip() {
        let json = r#"{"columns":["path"],"data":[["/x"],["/y"]]}"#;
        let table: JsonTable = serde_json::from_str(json).expect("parse");
        assert_eq!(table.columns.len(), 1);
        assert_eq!(table.data.len(), 2);
    }
}
