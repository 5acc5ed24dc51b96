//! Platform-neutral message relay between a guild's Chinese and English
//! channels.
//!
//! The chat adapter hands over one [`InboundMessage`] per event and gets
//! back the posts to deliver. Once a post is delivered the adapter reports
//! the new message id through [`Relay::record_delivery`] so later replies can
//! be threaded.

use crate::abbreviation::expand_abbreviations;
use crate::banner::{
    build_jump_url, format_reply_banner, is_image_attachment, preview_text, reply_label,
    strip_banner, suppress_url_embeds, url_regex,
};
use crate::dictionary::DictionaryStore;
use crate::ids::{ChannelId, GuildId, MessageId, UserId};
use crate::language::{Direction, Language};
use crate::mirror::{Edges, MirrorGraph};
use crate::normalize::{classify_script, convert_praise_numbers, remove_tokens, Script};
use crate::orchestrator::{ContextMode, TranslationOrchestrator, TranslationRequest};
use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// Words and commands that are relayed untouched, and the abbreviations
/// expanded before that decision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassthroughRules {
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub fillers: Vec<String>,
    /// Abbreviation -> expansion
    #[serde(default)]
    pub abbreviations: BTreeMap<String, String>,
}

impl PassthroughRules {
    /// Lists are concatenated; a guild abbreviation replaces a default one
    /// with the same key.
    fn merged(&self, overrides: &PassthroughRules) -> PassthroughRules {
        let mut merged = self.clone();
        merged.commands.extend(overrides.commands.iter().cloned());
        merged.fillers.extend(overrides.fillers.iter().cloned());
        merged.abbreviations.extend(
            overrides
                .abbreviations
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        merged
    }
}

/// The channel pair bridged in one guild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildBridge {
    pub zh_channel_id: ChannelId,
    pub en_channel_id: ChannelId,
    #[serde(default)]
    pub passthrough: PassthroughRules,
}

impl GuildBridge {
    /// Language of `channel` within this bridge.
    pub fn side_of(&self, channel: ChannelId) -> Option<Language> {
        if channel == self.zh_channel_id {
            Some(Language::Chinese)
        } else if channel == self.en_channel_id {
            Some(Language::English)
        } else {
            None
        }
    }

    pub fn channel_for(&self, language: Language) -> ChannelId {
        match language {
            Language::Chinese => self.zh_channel_id,
            Language::English => self.en_channel_id,
        }
    }
}

/// Contents of the guilds file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Rules shared by every guild
    #[serde(default)]
    pub default: PassthroughRules,
    #[serde(default)]
    pub guilds: BTreeMap<GuildId, GuildBridge>,
}

impl BridgeConfig {
    /// Read the guilds file. A missing file means no guild is bridged yet.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("No guilds file at {}, no channels will be bridged", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };
        let config: BridgeConfig = serde_json::from_str(&text)
            .with_context(|| format!("Invalid guilds file {}", path.display()))?;
        info!("Bridging {} guilds", config.guilds.len());
        Ok(config)
    }

    pub fn rules_for(&self, guild: GuildId) -> PassthroughRules {
        match self.guilds.get(&guild) {
            Some(bridge) => self.default.merged(&bridge.passthrough),
            None => self.default.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
    /// Where the adapter can fetch the bytes from
    #[serde(default)]
    pub url: Option<String>,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        is_image_attachment(&self.filename, self.content_type.as_deref())
    }
}

/// The message a reply points at, as far as the adapter resolved it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyReference {
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    /// How to mention the original author in the banner
    pub author_mention: String,
    #[serde(default)]
    pub author_id: Option<UserId>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    #[serde(default)]
    pub author_id: Option<UserId>,
    pub author_name: String,
    #[serde(default)]
    pub author_avatar_url: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub reply_to: Option<ReplyReference>,
    /// Recent messages in the same channel, oldest first
    #[serde(default)]
    pub recent_history: Vec<String>,
    /// The author's own previous message, target of a star patch
    #[serde(default)]
    pub previous_message: Option<String>,
}

/// One post to deliver into a mirror channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundPost {
    pub channel_id: ChannelId,
    pub language: Language,
    pub username: String,
    pub avatar_url: Option<String>,
    pub content: String,
    pub attachments: Vec<Attachment>,
    /// The inbound message this post mirrors
    pub source_message_id: MessageId,
}

/// A message fetched back from the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedMessage {
    pub content: String,
    pub attachments: Vec<Attachment>,
}

/// Looks up already-posted messages, e.g. a mirror for a reply preview.
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn fetch(&self, guild: GuildId, channel: ChannelId, message: MessageId) -> Option<FetchedMessage>;
}

/// For adapters that cannot fetch messages; previews are then built from the
/// replied-to message itself.
pub struct NoFetch;

#[async_trait]
impl MessageSource for NoFetch {
    async fn fetch(&self, _: GuildId, _: ChannelId, _: MessageId) -> Option<FetchedMessage> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct BannerSettings {
    pub icon: String,
    pub preview_limit: usize,
}

impl Default for BannerSettings {
    fn default() -> Self {
        Self {
            icon: "↪".to_string(),
            preview_limit: 50,
        }
    }
}

static PUNCT_GAP_REGEX: OnceLock<Regex> = OnceLock::new();
static FILLER_REGEX: OnceLock<Regex> = OnceLock::new();
static LETTER_REGEX: OnceLock<Regex> = OnceLock::new();

/// Commands start with `!` or one of the configured prefixes.
pub fn is_command(text: &str, rules: &PassthroughRules) -> bool {
    let t = text.trim();
    if t.is_empty() {
        return false;
    }
    if t.starts_with('!') {
        return true;
    }
    let lower = t.to_lowercase();
    rules
        .commands
        .iter()
        .filter(|c| !c.is_empty())
        .any(|c| lower.starts_with(&c.to_lowercase()))
}

/// Interjections like "hmm", "oh", "www" and configured filler words.
pub fn is_filler(text: &str, rules: &PassthroughRules) -> bool {
    if text.trim().is_empty() {
        return false;
    }
    let t = remove_tokens(text).trim().to_lowercase();
    if t.is_empty() {
        return true;
    }
    if rules.fillers.iter().any(|f| f.to_lowercase() == t) {
        return true;
    }
    let filler = FILLER_REGEX.get_or_init(|| {
        Regex::new(r"^(?:e?hm+|e+m+h+|em+|oh+|ah+|uh+h*|h+|w+|…+|\.)$").expect("filler regex")
    });
    filler.is_match(&t)
}

/// A one-line message ending in `*` corrects the author's previous message.
/// Returns the patch without its star.
pub fn star_patch(text: &str) -> Option<&str> {
    let t = text.trim();
    if t.chars().count() < 2 || t.contains('\n') {
        return None;
    }
    t.strip_suffix('*').map(str::trim).filter(|p| !p.is_empty())
}

/// Whether a message is relayed verbatim instead of translated.
pub fn is_pass_through(text: &str, has_attachments: bool, rules: &PassthroughRules) -> bool {
    let gap = PUNCT_GAP_REGEX.get_or_init(|| Regex::new(r"[\s\W_]+").expect("punct gap regex"));
    let letters =
        LETTER_REGEX.get_or_init(|| Regex::new(r"[A-Za-z\x{4E00}-\x{9FFF}]").expect("letter regex"));

    let stripped = remove_tokens(text);
    let stripped = gap.replace_all(&stripped, "");
    if stripped.is_empty() && !has_attachments {
        return true;
    }

    let trimmed = text.trim();
    if url_regex()
        .find(trimmed)
        .is_some_and(|m| m.start() == 0 && m.end() == trimmed.len())
    {
        return true;
    }

    if is_command(text, rules) || is_filler(text, rules) {
        return true;
    }
    !letters.is_match(&stripped)
}

pub struct Relay {
    config: Arc<BridgeConfig>,
    orchestrator: Arc<TranslationOrchestrator>,
    dictionary: Arc<DictionaryStore>,
    graph: Arc<MirrorGraph>,
    source: Arc<dyn MessageSource>,
    banner: BannerSettings,
}

impl Relay {
    pub fn new(
        config: Arc<BridgeConfig>,
        orchestrator: Arc<TranslationOrchestrator>,
        dictionary: Arc<DictionaryStore>,
        graph: Arc<MirrorGraph>,
        source: Arc<dyn MessageSource>,
        banner: BannerSettings,
    ) -> Self {
        Self {
            config,
            orchestrator,
            dictionary,
            graph,
            source,
            banner,
        }
    }

    pub fn graph(&self) -> &Arc<MirrorGraph> {
        &self.graph
    }

    /// Work out what to post for one inbound message.
    pub async fn process(&self, inbound: &InboundMessage) -> Vec<OutboundPost> {
        let Some(bridge) = self.config.guilds.get(&inbound.guild_id) else {
            debug!("Guild {} is not bridged", inbound.guild_id);
            return Vec::new();
        };
        let Some(side) = bridge.side_of(inbound.channel_id) else {
            return Vec::new();
        };
        let rules = self.config.rules_for(inbound.guild_id);

        // Bot commands belong to the channel they were typed in.
        if is_command(&inbound.content, &rules) {
            debug!("Message {} is a command, not relaying", inbound.message_id);
            return Vec::new();
        }

        let raw = convert_praise_numbers(&inbound.content);
        let raw = expand_abbreviations(&raw, &rules.abbreviations);
        if is_pass_through(&raw, !inbound.attachments.is_empty(), &rules) {
            debug!("Message {} passes through untranslated", inbound.message_id);
            let target = side.other();
            return vec![self.post(inbound, bridge, target, &raw).await];
        }

        let merged = self.apply_star_patch(inbound, &raw).await;
        let raw = merged.unwrap_or(raw);
        let text = strip_banner(&raw);
        let script = classify_script(&text);
        info!(
            "Relaying message {} from {} channel ({:?})",
            inbound.message_id, side, script
        );

        // (target language, body) pairs in delivery order
        let plan: Vec<(Language, String)> = match (side, script) {
            (Language::English, Script::English) => {
                vec![(Language::Chinese, self.translate(inbound, &text, Direction::EnToZh).await)]
            }
            (Language::English, Script::Chinese) => vec![
                (Language::Chinese, text.clone()),
                (Language::English, self.translate(inbound, &text, Direction::ZhToEn).await),
            ],
            (Language::English, Script::Meaningless) => vec![(Language::Chinese, text.clone())],
            (Language::Chinese, Script::Chinese) => {
                vec![(Language::English, self.translate(inbound, &text, Direction::ZhToEn).await)]
            }
            (Language::Chinese, Script::English) => vec![
                (Language::Chinese, self.translate(inbound, &text, Direction::EnToZh).await),
                (Language::English, text.clone()),
            ],
            (Language::Chinese, Script::Meaningless) => vec![(Language::English, text.clone())],
        };

        let mut posts = Vec::with_capacity(plan.len());
        for (target, body) in plan {
            posts.push(self.post(inbound, bridge, target, &body).await);
        }
        posts
    }

    /// Register a delivered post so replies to either side can be threaded.
    pub async fn record_delivery(
        &self,
        guild: GuildId,
        source_channel: ChannelId,
        source: MessageId,
        target_channel: ChannelId,
        mirrored: MessageId,
    ) {
        self.graph
            .add(guild, source_channel, source, target_channel, mirrored)
            .await;
    }

    /// Mirrors to retract when `message` is edited or deleted.
    pub async fn mirrors_of(&self, guild: GuildId, message: MessageId) -> Edges {
        self.graph.neighbors(guild, message).await
    }

    /// The corrected previous message when `text` is a star patch and the
    /// author's previous message is known. A reply to the author's own
    /// message takes precedence over the adapter's previous message.
    async fn apply_star_patch(&self, inbound: &InboundMessage, text: &str) -> Option<String> {
        let patch = star_patch(text)?;
        let own_reply = inbound
            .reply_to
            .as_ref()
            .filter(|reply| reply.author_id.is_some() && reply.author_id == inbound.author_id)
            .map(|reply| reply.content.as_str());
        let base = own_reply
            .or(inbound.previous_message.as_deref())
            .map(strip_banner)
            .filter(|base| !base.is_empty())?;

        info!("Message {} is a star patch, merging", inbound.message_id);
        Some(self.orchestrator.merge_star_patch(&base, patch).await)
    }

    fn context_for(&self, inbound: &InboundMessage) -> ContextMode {
        if let Some(reply) = &inbound.reply_to {
            let text = strip_banner(&reply.content);
            if !text.is_empty() {
                return ContextMode::Reply(text);
            }
        }
        let history: Vec<String> = inbound
            .recent_history
            .iter()
            .map(|line| strip_banner(line))
            .filter(|line| !line.is_empty())
            .collect();
        if history.is_empty() {
            ContextMode::None
        } else {
            ContextMode::History(history)
        }
    }

    async fn translate(&self, inbound: &InboundMessage, text: &str, direction: Direction) -> String {
        let request = TranslationRequest::new(text, direction, inbound.guild_id)
            .with_context(self.context_for(inbound))
            .with_dictionary(self.dictionary.terms(inbound.guild_id));
        self.orchestrator.translate(&request).await
    }

    async fn post(
        &self,
        inbound: &InboundMessage,
        bridge: &GuildBridge,
        target: Language,
        body: &str,
    ) -> OutboundPost {
        let channel = bridge.channel_for(target);
        let banner = match &inbound.reply_to {
            Some(reply) => Some(self.reply_banner(inbound.guild_id, reply, target, channel).await),
            None => None,
        };

        let body = suppress_url_embeds(body.trim());
        let content = [banner.unwrap_or_default(), body]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        OutboundPost {
            channel_id: channel,
            language: target,
            username: inbound.author_name.clone(),
            avatar_url: inbound.author_avatar_url.clone(),
            content,
            attachments: inbound.attachments.clone(),
            source_message_id: inbound.message_id,
        }
    }

    /// Banner pointing at the version of the replied-to message that lives
    /// in `channel`, when there is one.
    async fn reply_banner(
        &self,
        guild: GuildId,
        reply: &ReplyReference,
        target: Language,
        channel: ChannelId,
    ) -> String {
        let (jump, preview, only_image) = self.jump_and_preview(guild, reply, target, channel).await;
        let preview = preview_text(&preview, only_image, self.banner.preview_limit);
        format_reply_banner(
            &reply.author_mention,
            &self.banner.icon,
            reply_label(target),
            &jump,
            &preview,
        )
    }

    async fn jump_and_preview(
        &self,
        guild: GuildId,
        reply: &ReplyReference,
        target: Language,
        channel: ChannelId,
    ) -> (String, String, bool) {
        if reply.channel_id == channel {
            let text = strip_banner(&reply.content);
            let only_image = text.is_empty() && reply.attachments.iter().any(Attachment::is_image);
            return (build_jump_url(guild, channel, reply.message_id), text, only_image);
        }

        let mirror = self.graph.find_mirror(guild, reply.message_id, channel).await;
        if let Some(mirror) = mirror {
            if let Some(fetched) = self.source.fetch(guild, channel, mirror).await {
                let text = strip_banner(&fetched.content);
                let only_image = text.is_empty() && fetched.attachments.iter().any(Attachment::is_image);
                return (build_jump_url(guild, channel, mirror), text, only_image);
            }
        }

        // Either no mirror is known or its text is not available: preview
        // the original, translated into the target channel's language.
        let jump = match mirror {
            Some(mirror) => build_jump_url(guild, channel, mirror),
            None => build_jump_url(guild, reply.channel_id, reply.message_id),
        };
        let raw = strip_banner(&reply.content);
        if raw.is_empty() && reply.attachments.iter().any(Attachment::is_image) {
            return (jump, String::new(), true);
        }

        let preview = match (classify_script(&raw), target) {
            (Script::English, Language::Chinese) => self.translate_preview(guild, &raw, Direction::EnToZh).await,
            (Script::Chinese, Language::English) => self.translate_preview(guild, &raw, Direction::ZhToEn).await,
            _ => raw,
        };
        (jump, preview, false)
    }

    async fn translate_preview(&self, guild: GuildId, text: &str, direction: Direction) -> String {
        let request = TranslationRequest::new(text, direction, guild).with_dictionary(self.dictionary.terms(guild));
        self.orchestrator.translate(&request).await
    }
}
