//! Reply banners and small text helpers for re-posted messages.
//!
//! A mirrored reply starts with a quote line pointing at the message it
//! answers: `> {mention} {icon} [{label}]({jump url}) {preview}`.

use crate::ids::{ChannelId, GuildId, MessageId};
use crate::language::Language;
use regex::{Captures, Regex};
use std::sync::OnceLock;

/// Shown instead of a preview when the replied-to message is only images.
pub const IMAGE_PREVIEW: &str = "[image]";

const ZERO_WIDTH_SPACE: char = '\u{200B}';

static URL_REGEX: OnceLock<Regex> = OnceLock::new();
static EMBED_URL_REGEX: OnceLock<Regex> = OnceLock::new();
static WRAPPED_URL_REGEX: OnceLock<Regex> = OnceLock::new();
static SCHEME_REGEX: OnceLock<Regex> = OnceLock::new();
static WWW_REGEX: OnceLock<Regex> = OnceLock::new();

pub(crate) fn url_regex() -> &'static Regex {
    URL_REGEX.get_or_init(|| Regex::new(r"https?://\S+").expect("url regex"))
}

pub fn build_jump_url(guild: GuildId, channel: ChannelId, message: MessageId) -> String {
    format!("https://discord.com/channels/{}/{}/{}", guild, channel, message)
}

/// Label of the banner link in the target channel's language.
pub fn reply_label(language: Language) -> &'static str {
    match language {
        Language::Chinese => "回复",
        Language::English => "REPLY",
    }
}

/// Drop leading quote lines (a previous banner) and the blank lines after them.
pub fn strip_banner(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let body_start = lines
        .iter()
        .position(|line| !line.trim_start().starts_with('>'))
        .unwrap_or(lines.len());
    let body_start = lines[body_start..]
        .iter()
        .position(|line| !line.trim().is_empty())
        .map_or(lines.len(), |offset| body_start + offset);
    lines[body_start..].join("\n").trim().to_string()
}

/// Wrap bare URLs in `<...>` so the platform doesn't unfurl them.
pub fn suppress_url_embeds(text: &str) -> String {
    let pattern = EMBED_URL_REGEX
        .get_or_init(|| Regex::new(r"<?https?://[^\s<>]+>?").expect("embed url regex"));
    pattern
        .replace_all(text, |caps: &Captures| {
            let found = &caps[0];
            if found.starts_with('<') && found.ends_with('>') {
                found.to_string()
            } else {
                format!("<{}>", found.trim_start_matches('<').trim_end_matches('>'))
            }
        })
        .into_owned()
}

/// Break links with a zero-width space so a preview never turns clickable.
pub fn delink_for_reply(text: &str) -> String {
    let scheme = SCHEME_REGEX.get_or_init(|| Regex::new(r"(?i)\bhttps?://").expect("scheme regex"));
    let www = WWW_REGEX.get_or_init(|| Regex::new(r"(?i)\bwww\.").expect("www regex"));

    let wrapped = WRAPPED_URL_REGEX
        .get_or_init(|| Regex::new(r"<+\s*(https?://[^>\s]+)\s*>+").expect("wrapped url regex"));

    let unwrapped = wrapped.replace_all(text, "$1");
    let s = scheme.replace_all(&unwrapped, |caps: &Captures| {
        let found = &caps[0];
        let mut chars = found.chars();
        let first = chars.next().map(String::from).unwrap_or_default();
        format!("{}{}{}", first, ZERO_WIDTH_SPACE, chars.as_str())
    });
    www.replace_all(&s, |caps: &Captures| {
        let found = &caps[0];
        format!("{}{}{}", &found[..1], ZERO_WIDTH_SPACE, &found[1..])
    })
    .into_owned()
}

/// Cut to `limit` chars, ending with an ellipsis. A limit of 0 disables.
pub fn shorten(text: &str, limit: usize) -> String {
    if limit == 0 || text.chars().count() <= limit {
        return text.to_string();
    }
    let head: String = text.chars().take(limit - 1).collect();
    format!("{}…", head.trim_end())
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn is_image_attachment(filename: &str, content_type: Option<&str>) -> bool {
    if content_type.is_some_and(|ct| ct.starts_with("image/")) {
        return true;
    }
    let name = filename.to_lowercase();
    [".png", ".jpg", ".jpeg", ".gif", ".webp", ".bmp"]
        .iter()
        .any(|ext| name.ends_with(ext))
}

/// Preview text for a banner: one line, de-linked and shortened.
pub fn preview_text(text: &str, only_image: bool, limit: usize) -> String {
    let text = if only_image { IMAGE_PREVIEW } else { text };
    shorten(&delink_for_reply(&collapse_whitespace(text)), limit)
}

pub fn format_reply_banner(mention: &str, icon: &str, label: &str, jump_url: &str, preview: &str) -> String {
    format!("> {} {} [{}]({}) {}", mention, icon, label, jump_url, preview)
        .trim_end()
        .to_string()
}
