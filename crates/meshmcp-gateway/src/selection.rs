//! Selection filtering for aggregated surfaces.
//!
//! Tools and prompts select by exact name. Resources select by URI pattern
//! with two wildcards: `*` matches any run of non-`/` characters, `**`
//! matches any run of any characters. Matching is total: a malformed
//! pattern matches nothing and never raises.

use regex::Regex;

use meshmcp_core::model::ToolSelectionMode;

/// Compile a URI pattern into an anchored regex.
///
/// Regex metacharacters are escaped except `*`; `**` becomes `.*`,
/// a remaining `*` becomes `[^/]*`.
fn compile_pattern(pattern: &str) -> Option<Regex> {
    let mut regex = String::with_capacity(pattern.len() * 2 + 2);
    regex.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '*' {
            if chars.peek() == Some(&'*') {
                while chars.peek() == Some(&'*') {
                    chars.next();
                }
                regex.push_str(".*");
            } else {
                regex.push_str("[^/]*");
            }
        } else {
            regex.push_str(&regex::escape(&c.to_string()));
        }
    }
    regex.push('$');
    Regex::new(&regex).ok()
}

/// Whether `uri` matches `pattern`. Total: malformed patterns match nothing.
pub fn matches_pattern(uri: &str, pattern: &str) -> bool {
    match compile_pattern(pattern) {
        Some(regex) => regex.is_match(uri),
        None => false,
    }
}

/// Whether `uri` matches any of `patterns`
pub fn matches_any(uri: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| matches_pattern(uri, pattern))
}

/// Apply a name-based selection list.
///
/// Inclusion: an empty or absent list selects nothing from this child.
/// Exclusion: an empty or absent list excludes nothing.
pub fn name_selected(name: &str, selected: Option<&[String]>, mode: ToolSelectionMode) -> bool {
    let list = selected.filter(|l| !l.is_empty());
    match (mode, list) {
        (ToolSelectionMode::Inclusion, None) => false,
        (ToolSelectionMode::Inclusion, Some(list)) => list.iter().any(|s| s == name),
        (ToolSelectionMode::Exclusion, None) => true,
        (ToolSelectionMode::Exclusion, Some(list)) => !list.iter().any(|s| s == name),
    }
}

/// Apply a pattern-based selection list to a resource URI.
pub fn uri_selected(uri: &str, selected: Option<&[String]>, mode: ToolSelectionMode) -> bool {
    let list = selected.filter(|l| !l.is_empty());
    match (mode, list) {
        (ToolSelectionMode::Inclusion, None) => false,
        (ToolSelectionMode::Inclusion, Some(list)) => matches_any(uri, list),
        (ToolSelectionMode::Exclusion, None) => true,
        (ToolSelectionMode::Exclusion, Some(list)) => !matches_any(uri, list),
    }
}
