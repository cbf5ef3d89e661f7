//! Shared text utilities

/// Longest prefix of `s` with at most `max` characters.
/// Operates on Unicode char boundaries, not bytes.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Truncate to `max` characters, appending `marker` if anything was cut.
pub fn ellipsize(s: &str, max: usize, marker: &str) -> String {
    let truncated = truncate_chars(s, max);
    if truncated.len() < s.len() {
        format!("{}{}", truncated, marker)
    } else {
        truncated.to_string()
    }
}

/// Replace every run of whitespace with a single space and trim the ends.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
