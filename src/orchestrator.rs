//! End-to-end translation of one chat message.
//!
//! A request goes through: dictionary overrides, normalization, mandatory
//! and judged glossary substitution, the certainty-idiom check, the
//! translation call (with reply or history context when available), a
//! truncation check with one sentence-split retry, and finally placeholder
//! resolution and emoji restoration.
//!
//! Every path yields text. External failures are logged and end in the
//! untranslatable marker [`UNTRANSLATABLE`].

use crate::config::PipelineSettings;
use crate::dictionary::{self, TermMap};
use crate::glossary::{resolve_pending, GlossaryStore, JudgedOccurrence, PendingScope};
use crate::ids::GuildId;
use crate::language::{Direction, Language};
use crate::normalize::{classify_script, normalize, normalize_context, CertaintyPayload, Script};
use crate::services::{JudgmentService, TranslationService};
use futures::future::join_all;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// Delivered when a message cannot be translated.
pub const UNTRANSLATABLE: &str = "/";

/// Judge answer meaning "包…的" does not express certainty here.
pub const NOT_FOR_SURE: &str = "NOT_FOR_SURE";

/// Judge answer confirming certainty without supplying a translation.
pub const FOR_SURE: &str = "FOR_SURE";

/// Judge answer meaning a judged glossary entry should be applied.
pub const APPLY_GLOSSARY: &str = "APPLY_GLOSSARY";

/// Appended to the translated core of a certainty sentence.
pub const CERTAINTY_CONNECTIVE: &str = " for sure";

const CERTAINTY_SYSTEM_PROMPT: &str = "You translate Chinese chat messages into English. \
Decide whether the '包…的' construction in the message expresses certainty or a guarantee \
(as in 包赢的 'a guaranteed win', 包过的 'will pass for sure', 包好的 'guaranteed to be fine') \
rather than talking about a bag or a package. \
If it expresses certainty, reply with a natural English translation of the whole message and nothing else, \
or with exactly FOR_SURE if you cannot translate it. \
Keep placeholders such as ⟦E0⟧ and __GLS_xxx__ unchanged. \
If it refers to a bag or package, or there is no such construction, reply with exactly NOT_FOR_SURE.";

const GLOSSARY_SYSTEM_PROMPT: &str = "You help translate messages in a bilingual gaming community. \
A community glossary suggests replacing a term in the message with a specific meaning. \
Decide from the conversation whether the term is used in that sense. \
Reply with APPLY_GLOSSARY if it is, otherwise reply with KEEP_ORIGINAL.";

const STAR_PATCH_SYSTEM_PROMPT_ZH: &str = "用户先发了一句完整的话，又发了一条以星号结尾的补丁来修正它。\
请把补丁以最小改动合并进原句：补丁是替换词时替换原句中最相关的部分，是补充词时放到合适的位置。\
不要改动无关内容，保留标点与风格。只返回合并后的句子，不要解释。";

const STAR_PATCH_SYSTEM_PROMPT_EN: &str = "The user sent a complete sentence, then a patch ending in * to correct it. \
Merge the patch into the original with a minimal edit: if it is a replacement word, replace the most relevant part; \
if it is an addition, put it where it belongs. Leave unrelated content, punctuation and style alone. \
Return only the merged sentence, no explanation.";

/// Extra text that may help the translator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ContextMode {
    #[default]
    None,
    /// The message this one replies to.
    Reply(String),
    /// Recent messages in the channel, oldest first.
    History(Vec<String>),
}

impl ContextMode {
    fn describe(&self) -> String {
        match self {
            ContextMode::None => "(none)".to_string(),
            ContextMode::Reply(text) => text.clone(),
            ContextMode::History(lines) => lines.join("\n"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranslationRequest {
    pub text: String,
    pub direction: Direction,
    pub context: ContextMode,
    pub guild: GuildId,
    /// Legacy `zh -> en` overrides of the guild
    pub dictionary: TermMap,
}

impl TranslationRequest {
    pub fn new(text: impl Into<String>, direction: Direction, guild: GuildId) -> Self {
        Self {
            text: text.into(),
            direction,
            context: ContextMode::None,
            guild,
            dictionary: TermMap::new(),
        }
    }

    pub fn with_context(mut self, context: ContextMode) -> Self {
        self.context = context;
        self
    }

    pub fn with_dictionary(mut self, dictionary: TermMap) -> Self {
        self.dictionary = dictionary;
        self
    }
}

/// Whether a first-attempt translation looks cut short.
///
/// Only sources of at least `settings.truncation_min_chars` are checked.
/// Fires when the source has more question marks than the result has
/// target-script question marks, when a question lost its trailing mark,
/// or when the result is much shorter than the source.
pub fn looks_truncated(
    source: &str,
    result: &str,
    target: Language,
    settings: &PipelineSettings,
) -> bool {
    let source = source.trim();
    let result = result.trim();
    let source_chars = source.chars().count();
    if source_chars < settings.truncation_min_chars {
        return false;
    }

    let is_question = |c: char| c == '?' || c == '？';
    let target_mark = target.question_mark();

    let source_questions = source.chars().filter(|&c| is_question(c)).count();
    let result_questions = result.chars().filter(|&c| c == target_mark).count();
    if source_questions > result_questions {
        return true;
    }

    if source.ends_with(is_question) && !result.ends_with(target_mark) {
        return true;
    }

    (result.chars().count() as f64) < settings.truncation_min_ratio * source_chars as f64
}

static SENTENCE_REGEX: OnceLock<Regex> = OnceLock::new();

/// Split on sentence-terminal punctuation, keeping it attached.
pub fn split_sentences(text: &str) -> Vec<String> {
    let pattern = SENTENCE_REGEX.get_or_init(|| {
        Regex::new(r"[^.!?。！？…]+[.!?。！？…]*|[.!?。！？…]+").expect("sentence regex")
    });
    pattern
        .find_iter(text)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub struct TranslationOrchestrator {
    translator: Arc<dyn TranslationService>,
    judge: Arc<dyn JudgmentService>,
    glossary: Arc<GlossaryStore>,
    settings: PipelineSettings,
}

impl TranslationOrchestrator {
    pub fn new(
        translator: Arc<dyn TranslationService>,
        judge: Arc<dyn JudgmentService>,
        glossary: Arc<GlossaryStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            translator,
            judge,
            glossary,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Translate one message. Never fails: unrecoverable problems yield
    /// [`UNTRANSLATABLE`].
    pub async fn translate(&self, request: &TranslationRequest) -> String {
        let direction = request.direction;
        let source = direction.source();

        let text = dictionary::apply(&request.text, direction, &request.dictionary);
        if text.trim().is_empty() {
            return UNTRANSLATABLE.to_string();
        }

        let mut normalized = normalize(&text, direction);

        // Glossary state is read from one snapshot for the whole request.
        let book = self.glossary.snapshot();
        let mut scope = PendingScope::new();

        let occurrences = book.judged_occurrences(&normalized.body, request.guild, source);
        let accepted = self
            .judge_occurrences(&normalized.body, &occurrences, &request.context)
            .await;
        normalized.body = book.apply_selected(&normalized.body, request.guild, source, &accepted, &mut scope);
        normalized.detect_certainty(direction);

        let translated = match &normalized.certainty {
            Some(payload) => match self.resolve_certainty(&normalized.body, payload).await {
                Some(final_text) => Some(final_text),
                None => self.translate_with_context(&normalized.body, request).await,
            },
            None => self.translate_with_context(&normalized.body, request).await,
        };

        let Some(translated) = translated.filter(|t| !t.trim().is_empty()) else {
            debug!("Translation of scope {:?} failed, dropping its placeholders", scope.id());
            return UNTRANSLATABLE.to_string();
        };
        if translated.trim() == UNTRANSLATABLE {
            return UNTRANSLATABLE.to_string();
        }

        let resolved = resolve_pending(&translated, scope);
        let restored = normalized.restore(&resolved);
        let out = restored.trim();
        if out.is_empty() {
            UNTRANSLATABLE.to_string()
        } else {
            out.to_string()
        }
    }

    /// Merge a star-patch correction into the author's previous message.
    ///
    /// `patch` comes without its trailing `*`. Falls back to `previous`
    /// when the judge fails or answers with nothing.
    pub async fn merge_star_patch(&self, previous: &str, patch: &str) -> String {
        let (system, prompt) = match classify_script(previous) {
            Script::Chinese => (
                STAR_PATCH_SYSTEM_PROMPT_ZH,
                format!("原句：\n{}\n补丁：\n{}", previous, patch),
            ),
            Script::English | Script::Meaningless => (
                STAR_PATCH_SYSTEM_PROMPT_EN,
                format!("ORIGINAL:\n{}\nPATCH:\n{}", previous, patch),
            ),
        };

        match self.judge.judge(system, &prompt).await {
            Ok(merged) if !merged.trim().is_empty() => {
                debug!("Star patch '{}' merged", patch);
                merged.trim().to_string()
            }
            Ok(_) => {
                warn!("Star patch merge came back empty, keeping previous message");
                previous.to_string()
            }
            Err(e) => {
                warn!("Star patch merge failed, keeping previous message: {}", e);
                previous.to_string()
            }
        }
    }

    /// One translation call. `None` on failure or empty output.
    async fn call_translate(&self, text: &str, direction: Direction) -> Option<String> {
        if text.trim().is_empty() {
            return None;
        }
        match self
            .translator
            .translate(text, Some(direction.source()), direction.target())
            .await
        {
            Ok(out) => {
                let out = out.trim().to_string();
                (!out.is_empty()).then_some(out)
            }
            Err(e) => {
                warn!("Translation to {} failed: {}", direction.target().prompt_name(), e);
                None
            }
        }
    }

    /// Ask the judge about each occurrence of a judged glossary entry, with
    /// that occurrence marked in the message. Returns the approved
    /// `(entry id, offset)` pairs. A failed judgment leaves the term alone.
    async fn judge_occurrences(
        &self,
        body: &str,
        occurrences: &[JudgedOccurrence<'_>],
        context: &ContextMode,
    ) -> Vec<(String, usize)> {
        if occurrences.is_empty() {
            return Vec::new();
        }
        let context = context.describe();

        let verdicts = join_all(occurrences.iter().map(|occurrence| {
            let entry = occurrence.entry;
            let range = occurrence.range.clone();
            let prompt = format!(
                "Conversation context:\n{}\n\nMessage (the occurrence in question is marked with [[ ]]):\n{}[[{}]]{}\n\nTerm: {}\nGlossary meaning: {}",
                context,
                &body[..range.start],
                &body[range.clone()],
                &body[range.end..],
                entry.source_text,
                entry.target_text
            );
            async move {
                match self.judge.judge(GLOSSARY_SYSTEM_PROMPT, &prompt).await {
                    Ok(answer) => answer.contains(APPLY_GLOSSARY),
                    Err(e) => {
                        warn!("Glossary judgment for '{}' at {} failed: {}", entry.source_text, range.start, e);
                        false
                    }
                }
            }
        }))
        .await;

        occurrences
            .iter()
            .zip(verdicts)
            .filter(|(_, apply)| *apply)
            .map(|(occurrence, _)| {
                debug!(
                    "Judged glossary entry {} applies at {}",
                    occurrence.entry.id, occurrence.range.start
                );
                (occurrence.entry.id.clone(), occurrence.range.start)
            })
            .collect()
    }

    /// Settle a message carrying the certainty idiom.
    ///
    /// `Some(text)` is the final translation; `None` means the message
    /// should be translated normally. Local reassembly only happens when the
    /// judge confirms certainty with [`FOR_SURE`].
    async fn resolve_certainty(&self, body: &str, payload: &CertaintyPayload) -> Option<String> {
        let prompt = format!("Chinese text: {}", body);
        match self.judge.judge(CERTAINTY_SYSTEM_PROMPT, &prompt).await {
            Ok(answer) if answer.trim() == FOR_SURE => {
                debug!("'包…的' confirmed as certainty, reassembling locally");
                Some(self.reassemble_certainty(payload).await)
            }
            Ok(answer) if answer.trim() == NOT_FOR_SURE => {
                debug!("'包…的' judged literal, translating normally");
                None
            }
            Ok(answer) if !answer.trim().is_empty() => Some(answer.trim().to_string()),
            Ok(_) => {
                warn!("Certainty judgment came back empty, translating normally");
                None
            }
            Err(e) => {
                warn!("Certainty judgment failed, translating normally: {}", e);
                None
            }
        }
    }

    /// Translate the asserted part, append the connective, then the
    /// translated remainder if there is one.
    async fn reassemble_certainty(&self, payload: &CertaintyPayload) -> String {
        let Some(core) = self
            .call_translate(&payload.asserted(), Direction::ZhToEn)
            .await
            .filter(|c| c != UNTRANSLATABLE)
        else {
            return UNTRANSLATABLE.to_string();
        };

        let mut out = format!("{}{}", core.trim().trim_end_matches('.'), CERTAINTY_CONNECTIVE);
        if !payload.remainder.trim().is_empty() {
            if let Some(rest) = self
                .call_translate(&payload.remainder, Direction::ZhToEn)
                .await
                .filter(|r| r != UNTRANSLATABLE)
            {
                out.push_str(", ");
                out.push_str(&rest);
            }
        }
        out
    }

    async fn translate_with_context(&self, body: &str, request: &TranslationRequest) -> Option<String> {
        let direction = request.direction;
        let first = match &request.context {
            ContextMode::None => self.call_translate(body, direction).await.map(Attempt::First),
            ContextMode::Reply(context) => self.translate_with_reply(body, context, request).await,
            ContextMode::History(lines) => self.translate_with_history(body, lines, request).await,
        };

        match first {
            Some(Attempt::First(result)) => Some(self.check_truncation(body, result, direction).await),
            Some(Attempt::Fallback(result)) => Some(result),
            None => None,
        }
    }

    fn normalize_context_line(&self, text: &str, request: &TranslationRequest) -> String {
        let text = dictionary::apply(text, request.direction, &request.dictionary);
        normalize_context(&text, request.direction)
    }

    /// Translate `context\nbody` in one call and keep the lines after the
    /// first. Falls back to the message alone when that cannot be done.
    async fn translate_with_reply(
        &self,
        body: &str,
        context: &str,
        request: &TranslationRequest,
    ) -> Option<Attempt> {
        let direction = request.direction;
        let context = self.normalize_context_line(context, request);
        if context.is_empty() {
            return self.call_translate(body, direction).await.map(Attempt::First);
        }

        let combined = format!("{}\n{}", context, body);
        let deliverable = self.call_translate(&combined, direction).await.and_then(|out| {
            let mut lines = out.split('\n');
            lines.next();
            let rest = lines.collect::<Vec<_>>().join("\n").trim().to_string();
            (!rest.is_empty() && rest != UNTRANSLATABLE).then_some(rest)
        });

        match deliverable {
            Some(text) => Some(Attempt::First(text)),
            None => {
                debug!("Reply-context translation unusable, translating message alone");
                self.call_translate(body, direction).await.map(Attempt::Fallback)
            }
        }
    }

    /// Translate the last few history lines plus the message in one call and
    /// keep the last output line. Falls back to the message alone when the
    /// line structure did not survive.
    async fn translate_with_history(
        &self,
        body: &str,
        history: &[String],
        request: &TranslationRequest,
    ) -> Option<Attempt> {
        let direction = request.direction;
        if body.contains('\n') {
            return self.call_translate(body, direction).await.map(Attempt::First);
        }

        let mut lines: Vec<String> = history
            .iter()
            .map(|line| self.normalize_context_line(line, request))
            .filter(|line| !line.is_empty())
            .collect();
        let keep = self.settings.history_lines;
        if lines.len() > keep {
            lines.drain(..lines.len() - keep);
        }
        if lines.is_empty() {
            return self.call_translate(body, direction).await.map(Attempt::First);
        }

        lines.push(body.to_string());
        let expected = lines.len();
        let combined = lines.join("\n");

        let deliverable = self.call_translate(&combined, direction).await.and_then(|out| {
            let out_lines: Vec<&str> = out.trim_end().split('\n').collect();
            if out_lines.len() != expected {
                debug!(
                    "History translation returned {} lines, expected {}",
                    out_lines.len(),
                    expected
                );
                return None;
            }
            let last = out_lines.last().map(|l| l.trim()).unwrap_or_default();
            (!last.is_empty()).then(|| last.to_string())
        });

        match deliverable {
            Some(text) => Some(Attempt::First(text)),
            None => self.call_translate(body, direction).await.map(Attempt::Fallback),
        }
    }

    /// Retry once sentence by sentence when the first attempt looks cut
    /// short. Keeps the first result if splitting does not help.
    async fn check_truncation(&self, source: &str, result: String, direction: Direction) -> String {
        if !looks_truncated(source, &result, direction.target(), &self.settings) {
            return result;
        }

        let sentences = split_sentences(source);
        if sentences.len() <= 1 {
            debug!("Translation looks truncated but source is a single sentence");
            return result;
        }

        info!(
            "Translation looks truncated, retrying {} sentences separately",
            sentences.len()
        );
        let parts = join_all(sentences.iter().map(|s| self.call_translate(s, direction))).await;
        if parts.iter().any(Option::is_none) {
            warn!("Sentence-split retry incomplete, keeping first result");
            return result;
        }
        parts.into_iter().flatten().collect::<Vec<_>>().join(" ")
    }
}

/// Outcome of the context-aware call: `First` results are still subject
/// to the truncation check, `Fallback` results are final.
enum Attempt {
    First(String),
    Fallback(String),
}
