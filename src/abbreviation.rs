//! Per-guild abbreviation expansion ahead of the pass-through check.
//!
//! Keys are tried longest first. A key or value containing Chinese (or
//! ending in 的) expands wherever it appears unless it runs straight into an
//! ASCII word or a URL. Other keys only expand as standalone words, and
//! never within a few characters of a URL. Nothing inside a URL expands.

use crate::banner::url_regex;
use crate::matching::contains_cjk;
use std::collections::BTreeMap;

/// Chars before a Latin match that are checked for a URL
const URL_LOOKBEHIND_CHARS: usize = 8;
/// Chars from the start of a Latin match that are checked for a URL
const URL_LOOKAHEAD_CHARS: usize = 16;

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_chinese_rule(key: &str, value: &str) -> bool {
    key.ends_with('的') || value.ends_with('的') || contains_cjk(key) || contains_cjk(value)
}

/// Whether the text right after a match continues a word or starts a URL.
fn runs_into_word(rest: &str) -> bool {
    rest.chars().next().is_some_and(is_word_char) || url_regex().find(rest).is_some_and(|m| m.start() == 0)
}

fn is_standalone(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char)
}

fn inside_url(text: &str, start: usize) -> bool {
    url_regex()
        .find_iter(text)
        .any(|m| m.start() <= start && start < m.end())
}

fn near_url(text: &str, start: usize) -> bool {
    let at = text[..start].chars().count();
    let from = at.saturating_sub(URL_LOOKBEHIND_CHARS);
    let window: String = text
        .chars()
        .skip(from)
        .take(at + URL_LOOKAHEAD_CHARS - from)
        .collect();
    url_regex().is_match(&window)
}

/// Expand every abbreviation in `text`.
pub fn expand_abbreviations(text: &str, abbreviations: &BTreeMap<String, String>) -> String {
    let mut rules: Vec<(&str, &str)> = abbreviations
        .iter()
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect();
    rules.sort_by_key(|(key, _)| std::cmp::Reverse(key.chars().count()));

    let mut s = text.to_string();
    for (key, value) in rules {
        let chinese = is_chinese_rule(key, value);
        let mut out = String::with_capacity(s.len());
        let mut last = 0;
        for (start, _) in s.match_indices(key) {
            let end = start + key.len();
            let keep = if inside_url(&s, start) {
                true
            } else if chinese {
                runs_into_word(&s[end..])
            } else {
                !is_standalone(&s, start, end) || near_url(&s, start)
            };
            out.push_str(&s[last..start]);
            out.push_str(if keep { key } else { value });
            last = end;
        }
        out.push_str(&s[last..]);
        s = out;
    }
    s
}
