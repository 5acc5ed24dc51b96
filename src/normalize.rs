//! Text normalization ahead of translation.
//!
//! Pulls emoji-like tokens out of the text so the translator never sees them,
//! rewrites a handful of colloquial Chinese constructions into phrasing the
//! translator handles well, detects the "包…的" certainty idiom, and decides
//! which script a message is written in.

use crate::language::Direction;
use regex::{Captures, Regex};
use std::sync::OnceLock;

/// Longest text (in chars) the learned-from rewrites are applied to
pub const LEARNED_FROM_MAX_CHARS: usize = 60;

/// Longest text (in chars) the disjunctive-question rewrite is applied to
pub const DISJUNCTIVE_MAX_CHARS: usize = 24;

/// Message text with emoji tokens lifted out and the certainty idiom split off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedText {
    /// Text with every emoji token replaced by its ordinal placeholder
    pub body: String,
    /// Extracted tokens, left to right
    pub emoji_tokens: Vec<String>,
    pub certainty: Option<CertaintyPayload>,
}

impl NormalizedText {
    /// Look for the certainty idiom in the current body. Only Chinese
    /// sources carry it; run this after the body is final.
    pub fn detect_certainty(&mut self, direction: Direction) {
        self.certainty = match direction {
            Direction::ZhToEn => encode_certainty(&self.body).into_payload(),
            Direction::EnToZh => None,
        };
    }

    /// Put the extracted tokens back into a translated text.
    pub fn restore(&self, translated: &str) -> String {
        restore_tokens(translated, &self.emoji_tokens)
    }
}

/// A sentence built around the certainty idiom "包X的" ("X for sure").
///
/// `lead` is a short subject before the idiom ("他" in "他包赢的"); it is
/// translated together with `core`. `remainder` is whatever follows "的".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertaintyPayload {
    pub lead: String,
    pub core: String,
    pub remainder: String,
}

impl CertaintyPayload {
    /// The part translated before " for sure" is appended.
    pub fn asserted(&self) -> String {
        format!("{}{}", self.lead, self.core)
    }
}

/// Outcome of [`encode_certainty`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Certainty {
    Plain(String),
    Payload(CertaintyPayload),
}

impl Certainty {
    pub fn into_payload(self) -> Option<CertaintyPayload> {
        match self {
            Certainty::Payload(payload) => Some(payload),
            Certainty::Plain(_) => None,
        }
    }
}

/// Dominant script of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Chinese,
    English,
    Meaningless,
}

static EMOJI_TOKEN_REGEX: OnceLock<Regex> = OnceLock::new();
static PLACEHOLDER_REGEX: OnceLock<Regex> = OnceLock::new();
static HMM_REGEX: OnceLock<Regex> = OnceLock::new();
static CJK_REGEX: OnceLock<Regex> = OnceLock::new();
static LATIN_REGEX: OnceLock<Regex> = OnceLock::new();
static FOR_PURPOSE_REGEX: OnceLock<Regex> = OnceLock::new();
static LEARNED_FROM_REGEXES: OnceLock<Vec<Regex>> = OnceLock::new();
static COPY_REGEX: OnceLock<Regex> = OnceLock::new();
static WHICH_CHOOSE_REGEX: OnceLock<Regex> = OnceLock::new();
static CERTAINTY_REGEX: OnceLock<Regex> = OnceLock::new();

/// Platform custom emoji (`<:name:id>`, `<a:name:id>`) or a run of pictographs.
pub(crate) fn emoji_token_regex() -> &'static Regex {
    EMOJI_TOKEN_REGEX.get_or_init(|| {
        Regex::new(
            r"<a?:\w{2,}:\d+>|[\x{1F300}-\x{1FAFF}\x{2700}-\x{27BF}\x{2600}-\x{26FF}\x{1F1E6}-\x{1F1FF}]+",
        )
        .expect("emoji token regex")
    })
}

fn placeholder_regex() -> &'static Regex {
    PLACEHOLDER_REGEX.get_or_init(|| Regex::new(r"⟦\s*E\s*(\d+)\s*⟧").expect("placeholder regex"))
}

fn placeholder(index: usize) -> String {
    format!("⟦E{}⟧", index)
}

/// Replace every emoji token with an index-addressed placeholder.
pub fn extract_tokens(text: &str) -> (String, Vec<String>) {
    let mut tokens = Vec::new();
    let stripped = emoji_token_regex().replace_all(text, |caps: &Captures| {
        let index = tokens.len();
        tokens.push(caps[0].to_string());
        placeholder(index)
    });
    (stripped.into_owned(), tokens)
}

/// Inverse of [`extract_tokens`].
///
/// Accepts placeholders the translator padded with spaces. Tokens whose
/// placeholder was lost in translation are appended at the end, in order.
pub fn restore_tokens(text: &str, tokens: &[String]) -> String {
    if tokens.is_empty() {
        return text.to_string();
    }

    let mut used = vec![false; tokens.len()];
    let restored = placeholder_regex().replace_all(text, |caps: &Captures| {
        match caps[1].parse::<usize>() {
            Ok(index) if index < tokens.len() => {
                used[index] = true;
                tokens[index].clone()
            }
            _ => caps[0].to_string(),
        }
    });

    let mut out = restored.into_owned();
    let missing: String = tokens
        .iter()
        .zip(&used)
        .filter(|(_, used)| !**used)
        .map(|(token, _)| token.as_str())
        .collect();
    if !missing.is_empty() {
        if !out.is_empty() && !out.ends_with(char::is_whitespace) {
            out.push(' ');
        }
        out.push_str(&missing);
    }
    out
}

/// Drop emoji tokens entirely (for classification and context lines).
pub fn remove_tokens(text: &str) -> String {
    emoji_token_regex().replace_all(text, "").into_owned()
}

/// A bare "6" or "666" is gaming slang for "impressive".
pub fn convert_praise_numbers(text: &str) -> String {
    match text.trim() {
        "6" | "666" => "厉害".to_string(),
        _ => text.to_string(),
    }
}

fn learned_from_regexes() -> &'static [Regex] {
    LEARNED_FROM_REGEXES.get_or_init(|| {
        [
            // 跟/向/从 X 学的做的
            r"(?:跟|向|从)(.{1,18}?)学的?(?:搞的|做的|整的|出来的|来的)",
            // 照着/参考/仿照 X 做的
            r"(?:照着|依照|参考|借鉴|仿照|模仿|照|按)(.{1,18}?)(?:搞的|做的|整的|出来的|来的)",
            // (我)学 X 做的
            r"(?:我们|我)?学(.{1,18}?)(?:搞的|做的|整的|出来的|来的)",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("learned-from regex"))
        .collect()
    })
}

fn rewrite_learned_from(text: &str) -> String {
    if text.chars().count() > LEARNED_FROM_MAX_CHARS {
        return text.to_string();
    }
    let for_purpose = FOR_PURPOSE_REGEX
        .get_or_init(|| Regex::new(r"[为给供][^，。！？,.!?]{0,6}做的").expect("for-purpose regex"));
    if for_purpose.is_match(text) {
        return text.to_string();
    }

    for pattern in learned_from_regexes() {
        let rewritten = pattern.replace_all(text, |caps: &Captures| format!("仿照{}做的", caps[1].trim()));
        if rewritten != text {
            return rewritten.into_owned();
        }
    }

    let copy = COPY_REGEX.get_or_init(|| {
        Regex::new(r"抄自?(.{1,18}?)的(?:功能|做法|方案|点子|思路)?").expect("copy regex")
    });
    copy.replace_all(text, |caps: &Captures| {
        let source = caps[1].trim();
        if source.is_empty() {
            "参考它做的".to_string()
        } else {
            format!("参考{}做的", source)
        }
    })
    .into_owned()
}

fn disambiguate_which_choose(text: &str) -> String {
    if text.chars().count() > DISJUNCTIVE_MAX_CHARS {
        return text.to_string();
    }
    let pattern = WHICH_CHOOSE_REGEX.get_or_init(|| {
        let question = r"(?:哪(?:个|些|儿|边|路|位|只|队)?|谁|什么|啥|哪里|哪儿)";
        let verb = r"(?:选择|挑选|选|挑|买|用|取|点|订|拿|出装|出|带|走|玩|上|开|配|搭|切换|切|锁定|锁|补位|ban|pick|buy|use|take|choose|select|lock|fill)";
        Regex::new(&format!(
            r"(?i)({q})([^，。！？,.!?；;]{{1,8}}?)({v})({q})",
            q = question,
            v = verb
        ))
        .expect("which-choose regex")
    });
    pattern.replace_all(text, "${1}${2}就${3}${4}").into_owned()
}

/// Rewrite colloquial constructions the translator tends to get wrong.
///
/// Two rule families, each gated by its own length limit. Within a family
/// the patterns are tried in priority order and the first one that changes
/// the text wins.
pub fn rewrite_idioms(text: &str) -> String {
    let s = rewrite_learned_from(text);
    disambiguate_which_choose(&s)
}

fn certainty_regex() -> &'static Regex {
    CERTAINTY_REGEX.get_or_init(|| {
        Regex::new(r"^([^\s，。！？,.!?包]{0,4}?)包(.{1,12}?)的").expect("certainty regex")
    })
}

/// Split a "包X的" sentence into its asserted core and trailing remainder.
pub fn encode_certainty(text: &str) -> Certainty {
    let trimmed = text.trim();
    let Some(caps) = certainty_regex().captures(trimmed) else {
        return Certainty::Plain(text.to_string());
    };

    let core = caps[2].trim();
    // 包括 is "include", never the idiom
    if core.is_empty() || core.starts_with('括') {
        return Certainty::Plain(text.to_string());
    }

    let end = caps.get(0).map(|m| m.end()).unwrap_or(trimmed.len());
    let remainder = trimmed[end..]
        .trim_start_matches(|c: char| c.is_whitespace() || "，,。.！!；;".contains(c))
        .trim_end();

    Certainty::Payload(CertaintyPayload {
        lead: caps[1].trim().to_string(),
        core: core.to_string(),
        remainder: remainder.to_string(),
    })
}

/// Decide which script a message is written in.
///
/// Any CJK ideograph makes it Chinese; otherwise any Latin letter makes it
/// English. Emoji tokens are ignored and "hmm"-style interjections collapse
/// to a single token first.
pub fn classify_script(text: &str) -> Script {
    let hmm = HMM_REGEX.get_or_init(|| Regex::new(r"(?i)(?:e?m+)+").expect("hmm regex"));
    let cjk = CJK_REGEX.get_or_init(|| Regex::new(r"[\x{4E00}-\x{9FFF}]").expect("cjk regex"));
    let latin = LATIN_REGEX.get_or_init(|| Regex::new(r"[A-Za-z]").expect("latin regex"));

    let stripped = remove_tokens(text.trim());
    let collapsed = hmm.replace_all(&stripped, "em");

    if cjk.is_match(&collapsed) {
        Script::Chinese
    } else if latin.is_match(&collapsed) {
        Script::English
    } else {
        Script::Meaningless
    }
}

/// Run the text-level normalization stages for a message in `direction`.
///
/// Idiom rewriting only applies to Chinese sources. Certainty is left
/// undetected so callers can still edit the body first; see
/// [`NormalizedText::detect_certainty`].
pub fn normalize(text: &str, direction: Direction) -> NormalizedText {
    let mut s = convert_praise_numbers(text);
    if direction == Direction::ZhToEn {
        s = rewrite_idioms(&s);
    }
    let (body, emoji_tokens) = extract_tokens(&s);
    NormalizedText {
        body,
        emoji_tokens,
        certainty: None,
    }
}

/// Normalize a context line: same rewrites, emoji dropped, one line.
pub fn normalize_context(text: &str, direction: Direction) -> String {
    let mut s = convert_praise_numbers(text);
    if direction == Direction::ZhToEn {
        s = rewrite_idioms(&s);
    }
    remove_tokens(&s).split_whitespace().collect::<Vec<_>>().join(" ")
}
