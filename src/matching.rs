//! Term matching shared by the glossary and the legacy dictionary.
//!
//! Terms containing a CJK ideograph match as plain substrings. All other
//! terms match case-insensitively and only where they are not glued to an
//! ASCII letter or digit, so "ik" never fires inside "like".

use regex::{Regex, RegexBuilder};
use std::ops::Range;

/// Whether `text` contains a CJK ideograph.
pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(|c| ('\u{4E00}'..='\u{9FFF}').contains(&c))
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
}

fn at_word_boundary(text: &str, range: &Range<usize>) -> bool {
    let before = text[..range.start].chars().next_back();
    let after = text[range.end..].chars().next();
    !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char)
}

fn latin_pattern(term: &str) -> Option<Regex> {
    RegexBuilder::new(&regex::escape(term))
        .case_insensitive(true)
        .build()
        .ok()
}

/// Byte ranges of every non-overlapping occurrence of `term`, left to right.
pub fn find_term(text: &str, term: &str) -> Vec<Range<usize>> {
    if term.is_empty() {
        return Vec::new();
    }

    if contains_cjk(term) {
        return text
            .match_indices(term)
            .map(|(start, m)| start..start + m.len())
            .collect();
    }

    let Some(pattern) = latin_pattern(term) else {
        return Vec::new();
    };

    let mut ranges = Vec::new();
    let mut pos = 0;
    while pos <= text.len() {
        let Some(m) = pattern.find_at(text, pos) else {
            break;
        };
        let range = m.range();
        if at_word_boundary(text, &range) {
            pos = range.end.max(range.start + 1);
            ranges.push(range);
        } else {
            // Retry one character further on; an overlapping occurrence may
            // still sit on a boundary.
            let step = text[range.start..].chars().next().map_or(1, char::len_utf8);
            pos = range.start + step;
        }
    }
    ranges
}

/// Whether `term` occurs in `text` under the boundary rule.
pub fn contains_term(text: &str, term: &str) -> bool {
    !find_term(text, term).is_empty()
}

/// Replace occurrences of the given terms in a single pass.
///
/// `terms` must already be ordered by priority (longest first). Each term
/// claims its occurrences in the original text; occurrences overlapping an
/// earlier claim are skipped, and replaced text is never scanned again.
/// `render` produces the replacement for a claimed occurrence.
pub fn replace_claimed<T, F>(text: &str, terms: &[(&str, T)], render: F) -> String
where
    F: FnMut(&T, &str) -> String,
{
    replace_claimed_where(text, terms, |_, _| true, render)
}

/// Like [`replace_claimed`], but an occurrence only claims its region when
/// `accept` says so. Rejected occurrences stay as they are and leave their
/// region free for shorter terms.
pub fn replace_claimed_where<T, A, F>(text: &str, terms: &[(&str, T)], accept: A, mut render: F) -> String
where
    A: Fn(&T, &Range<usize>) -> bool,
    F: FnMut(&T, &str) -> String,
{
    let mut claimed: Vec<(Range<usize>, usize)> = Vec::new();
    for (index, (term, value)) in terms.iter().enumerate() {
        for range in find_term(text, term) {
            if !accept(value, &range) {
                continue;
            }
            let overlaps = claimed
                .iter()
                .any(|(c, _)| c.start < range.end && range.start < c.end);
            if !overlaps {
                claimed.push((range, index));
            }
        }
    }

    if claimed.is_empty() {
        return text.to_string();
    }
    claimed.sort_by_key(|(range, _)| range.start);

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (range, index) in claimed {
        out.push_str(&text[cursor..range.start]);
        out.push_str(&render(&terms[index].1, &text[range.clone()]));
        cursor = range.end;
    }
    out.push_str(&text[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latin_term_respects_boundaries() {
        assert!(!contains_term("I like it", "ik"));
        assert!(contains_term("ik, that's right", "ik"));
        assert!(contains_term("well IK", "ik"));
        assert!(!contains_term("ik2", "ik"));
    }

    #[test]
    fn test_cjk_term_is_plain_substring() {
        assert!(contains_term("xthe的y", "the的"));
        assert!(contains_term("打野很强", "打野"));
    }

    #[test]
    fn test_find_term_skips_glued_then_finds_later() {
        let ranges = find_term("likes ik", "ik");
        assert_eq!(ranges, vec![6..8]);
    }

    #[test]
    fn test_find_term_case_insensitive_ranges() {
        let text = "GG and gg";
        assert_eq!(find_term(text, "gg"), vec![0..2, 7..9]);
    }

    #[test]
    fn test_replace_claimed_longest_first() {
        let terms = [("i know", "A"), ("ik", "B"), ("know", "C")];
        let out = replace_claimed("i know ik", &terms, |label, _| label.to_string());
        assert_eq!(out, "A B");
    }

    #[test]
    fn test_replace_claimed_does_not_rescan_replacements() {
        // "gank" replacement contains "g", which must not be re-matched.
        let terms = [("抓人", "gank"), ("g", "X")];
        let out = replace_claimed("去抓人", &terms, |r, _| r.to_string());
        assert_eq!(out, "去gank");
    }

    #[test]
    fn test_replace_claimed_where_skips_rejected_occurrences() {
        let terms = [("mid", "middle lane")];
        let out = replace_claimed_where("mid or mid", &terms, |_, range| range.start > 0, |r, _| r.to_string());
        assert_eq!(out, "mid or middle lane");
    }

    #[test]
    fn test_replace_claimed_passes_matched_text() {
        let terms = [("gg", ())];
        let out = replace_claimed("GG wp", &terms, |_, matched| format!("[{}]", matched));
        assert_eq!(out, "[GG] wp");
    }

    #[test]
    fn test_empty_term_never_matches() {
        assert!(find_term("abc", "").is_empty());
    }
}
