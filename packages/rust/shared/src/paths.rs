//! Path manipulation helpers shared by discovery, workers, and the executor.

use std::sync::LazyLock;

use regex::Regex;

/// Strip the experience-name segment from a staging path to obtain the
/// production destination. The segment may appear at the first or second
/// path level (`/<exp>/...` or `/<locale>/<exp>/...`).
pub fn strip_experience_segment(path: &str, experience_name: &str) -> String {
    let needle = format!("/{experience_name}/");
    if let Some(idx) = path.find(&needle) {
        let mut out = String::with_capacity(path.len());
        out.push_str(&path[..idx]);
        out.push('/');
        out.push_str(&path[idx + needle.len()..]);
        return out;
    }
    // Trailing segment with no content below it
    let suffix = format!("/{experience_name}");
    if let Some(stripped) = path.strip_suffix(&suffix) {
        if stripped.is_empty() {
            return "/".to_string();
        }
        return stripped.to_string();
    }
    path.to_string()
}

/// Map a storage path to the path used for preview/content requests:
/// pages lose their `.docx` extension, spreadsheets are addressed by their
/// `.json` authoring representation, everything else passes through.
pub fn preview_path(path: &str) -> String {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".docx") {
        path[..path.len() - ".docx".len()].to_string()
    } else if lower.ends_with(".xlsx") {
        format!("{}.json", &path[..path.len() - ".xlsx".len()])
    } else {
        path.to_string()
    }
}

/// Swap a `.json` extension for `.xlsx` — spreadsheet content is stored as
/// a workbook even when addressed by its JSON representation.
pub fn json_to_xlsx(path: &str) -> String {
    path.strip_suffix(".json")
        .map(|stem| format!("{stem}.xlsx"))
        .unwrap_or_else(|| path.to_string())
}

/// Whether a path matches any of the ignore patterns. Patterns support `*`
/// (any run within a segment) and `**` (any run across segments); a bare
/// prefix matches the subtree below it.
pub fn is_pattern_matched(path: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        if let Some(re) = glob_to_regex(pattern) {
            re.is_match(path)
        } else {
            path.starts_with(pattern.as_str())
        }
    })
}

/// Convert a glob-like pattern to a regex.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    if !pattern.contains('*') && !pattern.contains('?') {
        return None;
    }
    let escaped = regex::escape(pattern)
        .replace(r"\*\*", ".*")
        .replace(r"\*", "[^/]*")
        .replace(r"\?", ".");
    Regex::new(&format!("^{escaped}$")).ok()
}

/// Regex selecting staging paths that belong to an experience — the
/// experience name at the first or second path level.
pub fn experience_selector(experience_name: &str) -> Regex {
    static FALLBACK: LazyLock<Regex> =
        LazyLock::new(|| Regex::new("^$").expect("valid regex"));
    Regex::new(&format!(
        "^/([^/]+/)?{}(/.*)?$",
        regex::escape(experience_name)
    ))
    .unwrap_or_else(|_| FALLBACK.clone())
}
