//! Char-offset helpers. Every text offset in the engine counts `char`s; caret motion
//! steps over whole grapheme clusters.

use unicode_segmentation::UnicodeSegmentation;

pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Byte index of the `offset`-th char, clamped to the end of the string.
pub fn byte_index(s: &str, offset: usize) -> usize {
    s.char_indices()
        .nth(offset)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

/// Chars `start..end` of `s`.
pub fn slice_chars(s: &str, start: usize, end: usize) -> &str {
    let from = byte_index(s, start);
    let to = byte_index(s, end.max(start));
    &s[from..to]
}

/// Replace `delete` chars at `offset` with `insert`.
pub fn splice_chars(s: &str, offset: usize, delete: usize, insert: &str) -> String {
    let from = byte_index(s, offset);
    let to = byte_index(s, offset + delete);
    let mut out = String::with_capacity(s.len() - (to - from) + insert.len());
    out.push_str(&s[..from]);
    out.push_str(insert);
    out.push_str(&s[to..]);
    out
}

/// Char offset of the grapheme boundary after `offset`, or `None` at the end.
pub fn next_grapheme(s: &str, offset: usize) -> Option<usize> {
    let byte = byte_index(s, offset);
    let (_, grapheme) = s[byte..].grapheme_indices(true).next()?;
    Some(offset + char_len(grapheme))
}

/// Char offset of the grapheme boundary before `offset`, or `None` at the start.
pub fn prev_grapheme(s: &str, offset: usize) -> Option<usize> {
    let byte = byte_index(s, offset);
    let (_, grapheme) = s[..byte].grapheme_indices(true).next_back()?;
    Some(offset - char_len(grapheme))
}

/// Length in chars of the common prefix and (non-overlapping) common suffix.
pub fn common_affixes(a: &str, b: &str) -> (usize, usize) {
    let prefix = a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count();
    let max_suffix = char_len(a).min(char_len(b)) - prefix;
    let suffix = a
        .chars()
        .rev()
        .zip(b.chars().rev())
        .take(max_suffix)
        .take_while(|(x, y)| x == y)
        .count();
    (prefix, suffix)
}
