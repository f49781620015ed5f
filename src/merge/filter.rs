//! Placeholder/sample entry filter

use crate::models::EntityRecord;

/// Case-insensitive substrings marking synthetic entries
pub const PLACEHOLDER_PATTERNS: &[&str] = &[
    "sample world",
    "test world",
    "fake world",
    "demo world",
    "placeholder world",
];

/// Whether a display name matches a known placeholder pattern
pub fn is_placeholder(name: &str) -> bool {
    let name = name.to_lowercase();
    PLACEHOLDER_PATTERNS
        .iter()
        .any(|pattern| name.contains(pattern))
}

/// Drop placeholder records, returning how many were removed
pub fn retain_genuine<T>(items: &mut Vec<T>, record: impl Fn(&T) -> &EntityRecord) -> usize {
    let before = items.len();
    items.retain(|item| !is_placeholder(&record(item).name));
    let removed = before - items.len();
    if removed > 0 {
        tracing::info!(removed, "Filtered out placeholder entries");
    }
    removed
}
