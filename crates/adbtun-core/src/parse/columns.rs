//! Positional column lookup in separator-delimited text.

/// Returns the byte offset at which column `col` (0-based) starts in `s`.
///
/// Columns are separated by runs of any character in `separators`; a run of
/// several separators counts as one boundary.  Column 0 always starts at
/// offset 0.  Returns `None` when `s` has fewer than `col + 1` columns.
///
/// ```
/// use adbtun_core::index_of_column;
///
/// let line = "a  bb\tccc";
/// assert_eq!(index_of_column(line, 1, " \t"), Some(3));
/// assert_eq!(index_of_column(line, 2, " \t"), Some(6));
/// assert_eq!(index_of_column(line, 3, " \t"), None);
/// ```
pub fn index_of_column(s: &str, col: usize, separators: &str) -> Option<usize> {
    let is_sep = |c: char| separators.contains(c);
    let mut idx = 0;
    for _ in 0..col {
        let rest = &s[idx..];
        // Skip the current column's content.
        let content_len = rest.find(is_sep)?;
        idx += content_len;
        // Skip the separator run.
        let sep_len = s[idx..]
            .find(|c: char| !is_sep(c))
            .unwrap_or(s.len() - idx);
        idx += sep_len;
    }
    Some(idx)
}

/// Returns the token starting at `start`, up to the next separator.
pub fn token_at<'a>(s: &'a str, start: usize, separators: &str) -> &'a str {
    let rest = &s[start..];
    let end = rest.find(|c: char| separators.contains(c)).unwrap_or(rest.len());
    &rest[..end]
}

// ── Tests ─────────────────────────────────────────────────────────────────────
