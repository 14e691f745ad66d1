//! Text assembly helpers for overlapping decode windows.

/// Merge a newly decoded text into the previously accumulated one.
///
/// Backends decode overlapping audio windows, so the new text frequently
/// repeats the tail of the old one. The merge finds the longest suffix of
/// `old_text` that is a prefix of `new_text` (over their common length) and
/// appends only the non-overlapping remainder, left-trimmed, separated by a
/// single space.
///
/// Empty new text leaves the old text unchanged; empty old text yields the
/// new text as-is.
#[must_use]
pub fn merge_texts(old_text: &str, new_text: &str) -> String {
    if new_text.is_empty() {
        return old_text.to_string();
    }
    if old_text.is_empty() {
        return new_text.to_string();
    }

    let old: Vec<char> = old_text.chars().collect();
    let new: Vec<char> = new_text.chars().collect();

    let common = old.len().min(new.len());
    let mut overlap = 0;
    for i in 1..=common {
        if old[old.len() - i..] == new[..i] {
            overlap = i;
        }
    }

    let tail: String = new[overlap..].iter().collect();
    let tail = tail.trim_start();

    if tail.is_empty() {
        old_text.to_string()
    } else {
        format!("{old_text} {tail}")
    }
}
