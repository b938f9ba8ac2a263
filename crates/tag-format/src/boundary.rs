//! Boundary-safe substring search.
//!
//! A match counts only when it does not cut into a longer token: on each side
//! the neighboring character must be absent, a boundary character, or the
//! match must itself start/end with a boundary character.

use std::ops::Range;

/// Characters that separate tokens in a prompt buffer.
pub fn is_boundary_char(c: char) -> bool {
    c.is_whitespace()
        || matches!(
            c,
            ',' | ';' | '|' | '.' | ':' | '(' | ')' | '[' | ']' | '{' | '}' | '<' | '>'
        )
}

fn left_is_bounded(haystack: &str, span: Range<usize>) -> bool {
    match haystack[..span.start].chars().next_back() {
        None => true,
        Some(neighbor) => {
            is_boundary_char(neighbor)
                || haystack[span].chars().next().is_some_and(is_boundary_char)
        }
    }
}

fn right_is_bounded(haystack: &str, span: Range<usize>) -> bool {
    match haystack[span.end..].chars().next() {
        None => true,
        Some(neighbor) => {
            is_boundary_char(neighbor)
                || haystack[span].chars().next_back().is_some_and(is_boundary_char)
        }
    }
}

/// Whether `haystack[span]` sits on token boundaries.
pub fn is_bounded(haystack: &str, span: Range<usize>) -> bool {
    left_is_bounded(haystack, span.clone()) && right_is_bounded(haystack, span)
}

/// Find the first boundary-safe occurrence of `needle` in `haystack`.
///
/// Overlapping candidates are considered, so a rejected match does not hide a
/// valid one that starts inside it. Empty needles never match.
pub fn find_bounded(haystack: &str, needle: &str) -> Option<Range<usize>> {
    if needle.is_empty() {
        return None;
    }
    let mut from = 0;
    while let Some(pos) = haystack[from..].find(needle) {
        let start = from + pos;
        let span = start..start + needle.len();
        if is_bounded(haystack, span.clone()) {
            return Some(span);
        }
        // Advance one character past the rejected start.
        let step = haystack[start..].chars().next().map_or(1, char::len_utf8);
        from = start + step;
    }
    None
}

/// True if putting `left` directly against `right` would merge two tokens.
pub fn joins_words(left: &str, right: &str) -> bool {
    let last = left.chars().next_back();
    let first = right.chars().next();
    matches!((last, first), (Some(a), Some(b)) if !is_boundary_char(a) && !is_boundary_char(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_match_inside_longer_token() {
        assert_eq!(find_bounded("cardinal bird", "card"), None);
        assert_eq!(find_bounded("scar", "car"), None);
    }

    #[test]
    fn accepts_match_at_edges() {
        assert_eq!(find_bounded("card", "card"), Some(0..4));
        assert_eq!(find_bounded("red card", "card"), Some(4..8));
        assert_eq!(find_bounded("card, bird", "card"), Some(0..4));
    }

    #[test]
    fn accepts_weighted_group() {
        assert_eq!(find_bounded("(card:1.2)", "card"), Some(1..5));
    }

    #[test]
    fn skips_rejected_candidate_and_keeps_looking() {
        assert_eq!(find_bounded("cardinal, card", "card"), Some(10..14));
    }

    #[test]
    fn separator_edges_count_as_boundaries() {
        // ", card" starts with a separator, so the word before it is fine.
        assert_eq!(find_bounded("bird, card", ", card"), Some(4..10));
        // "card, " ends with a separator, but the left side still needs one.
        assert_eq!(find_bounded("scard, bird", "card, "), None);
        assert_eq!(find_bounded("card, bird", "card, "), Some(0..6));
    }

    #[test]
    fn overlapping_candidates_are_considered() {
        assert_eq!(find_bounded("xa, a", "a"), Some(4..5));
    }

    #[test]
    fn empty_needle_never_matches() {
        assert_eq!(find_bounded("anything", ""), None);
    }

    #[test]
    fn handles_multibyte_text() {
        assert_eq!(find_bounded("ねこ, いぬ", "いぬ"), Some(8..14));
        assert_eq!(find_bounded("ねこいぬ", "いぬ"), None);
    }

    #[test]
    fn joins_words_only_between_word_chars() {
        assert!(joins_words("cat", "dog"));
        assert!(!joins_words("cat,", "dog"));
        assert!(!joins_words("cat", " dog"));
        assert!(!joins_words("", "dog"));
        assert!(!joins_words("cat", ""));
    }
}
