//! Per-guild glossary: admin-defined term replacements applied before
//! translation.
//!
//! `Mandatory` entries always apply; `Judged` entries only apply when the
//! judgment service agrees they fit the conversation. An entry whose source
//! and target language differ cannot simply be substituted into the source
//! text (the translator would mangle it), so the matched term is swapped for
//! an opaque placeholder and restored after translation. Those placeholders
//! live in a [`PendingScope`] owned by the request that minted them.

use crate::ids::GuildId;
use crate::language::Language;
use crate::matching::{contains_term, find_term, replace_claimed_where};
use crate::storage::Storage;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Storage key of the glossary mapping.
pub const STORAGE_KEY: &str = "glossaries";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementMode {
    Mandatory,
    Judged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlossaryEntry {
    pub id: String,
    pub source_language: Language,
    pub source_text: String,
    pub target_language: Language,
    pub target_text: String,
    pub replacement_mode: ReplacementMode,
}

impl GlossaryEntry {
    pub fn is_cross_language(&self) -> bool {
        self.source_language != self.target_language
    }
}

/// One place a judged entry matched, as a byte range of the text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JudgedOccurrence<'a> {
    pub entry: &'a GlossaryEntry,
    pub range: Range<usize>,
}

/// One guild's entries, keyed by entry id.
pub type Glossary = BTreeMap<String, GlossaryEntry>;

/// Glossaries of every guild.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlossaryBook {
    guilds: BTreeMap<GuildId, Glossary>,
}

/// Identifies the request that owns a set of pending substitutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u64);

static NEXT_SCOPE: AtomicU64 = AtomicU64::new(1);

/// A cross-language replacement waiting for the translated text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSubstitution {
    pub placeholder: String,
    pub restoration: String,
    pub scope: ScopeId,
}

/// Placeholders minted while processing one request.
///
/// Each request creates its own scope and hands it to [`resolve_pending`]
/// when the translation is back; concurrent requests can never see each
/// other's placeholders. Dropping a scope discards its substitutions.
#[derive(Debug)]
pub struct PendingScope {
    id: ScopeId,
    pending: Vec<PendingSubstitution>,
}

impl PendingScope {
    pub fn new() -> Self {
        Self {
            id: ScopeId(NEXT_SCOPE.fetch_add(1, Ordering::Relaxed)),
            pending: Vec::new(),
        }
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    pub fn pending(&self) -> &[PendingSubstitution] {
        &self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Mint a placeholder for `source_text` that resolves to `restoration`.
    pub fn register(&mut self, source_text: &str, restoration: &str) -> String {
        let placeholder = mint_placeholder(source_text);
        self.pending.push(PendingSubstitution {
            placeholder: placeholder.clone(),
            restoration: restoration.to_string(),
            scope: self.id,
        });
        placeholder
    }
}

impl Default for PendingScope {
    fn default() -> Self {
        Self::new()
    }
}

/// `__GLS_<random 8 hex><sha256 prefix of the term>__`
fn mint_placeholder(source_text: &str) -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    let digest = hex::encode(Sha256::digest(source_text.as_bytes()));
    format!("__GLS_{}{}__", &random[..8], &digest[..8])
}

/// Substitute every placeholder of `scope` back to its target text.
///
/// Consumes the scope, so its pending set cannot be resolved twice.
pub fn resolve_pending(text: &str, scope: PendingScope) -> String {
    let mut out = text.to_string();
    for sub in &scope.pending {
        if out.contains(&sub.placeholder) {
            out = out.replace(&sub.placeholder, &sub.restoration);
        } else {
            debug!(
                "Glossary placeholder for '{}' lost in translation",
                sub.restoration
            );
        }
    }
    out
}

impl GlossaryBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guild(&self, guild: GuildId) -> Option<&Glossary> {
        self.guilds.get(&guild)
    }

    pub fn guild_count(&self) -> usize {
        self.guilds.len()
    }

    pub fn insert(&mut self, guild: GuildId, entry: GlossaryEntry) {
        self.guilds
            .entry(guild)
            .or_default()
            .insert(entry.id.clone(), entry);
    }

    pub fn remove(&mut self, guild: GuildId, id: &str) -> Option<GlossaryEntry> {
        let glossary = self.guilds.get_mut(&guild)?;
        let removed = glossary.remove(id);
        if glossary.is_empty() {
            self.guilds.remove(&guild);
        }
        removed
    }

    /// Entries of `guild` in `source_language` that occur in `text`,
    /// longest source text first.
    pub fn find_matches(
        &self,
        text: &str,
        guild: GuildId,
        source_language: Language,
    ) -> Vec<&GlossaryEntry> {
        let Some(glossary) = self.guilds.get(&guild) else {
            return Vec::new();
        };

        let mut matches: Vec<&GlossaryEntry> = glossary
            .values()
            .filter(|e| e.source_language == source_language)
            .filter(|e| contains_term(text, &e.source_text))
            .collect();
        matches.sort_by(|a, b| {
            b.source_text
                .chars()
                .count()
                .cmp(&a.source_text.chars().count())
                .then_with(|| a.id.cmp(&b.id))
        });
        matches
    }

    /// Apply only the mandatory entries.
    pub fn apply_mandatory(
        &self,
        text: &str,
        guild: GuildId,
        source_language: Language,
        scope: &mut PendingScope,
    ) -> String {
        self.apply_selected(text, guild, source_language, &[], scope)
    }

    /// Occurrences of judged entries, each needing its own judgment call
    /// before it may apply. Ordered like [`Self::find_matches`], then by
    /// position.
    pub fn judged_occurrences(
        &self,
        text: &str,
        guild: GuildId,
        source_language: Language,
    ) -> Vec<JudgedOccurrence<'_>> {
        self.find_matches(text, guild, source_language)
            .into_iter()
            .filter(|e| e.replacement_mode == ReplacementMode::Judged)
            .flat_map(|entry| {
                find_term(text, &entry.source_text)
                    .into_iter()
                    .map(move |range| JudgedOccurrence { entry, range })
            })
            .collect()
    }

    /// Apply mandatory entries plus the judged occurrences listed in
    /// `accepted`, given as `(entry id, byte offset)` into `text`.
    ///
    /// Runs as one pass over the original match list: a longer term claims
    /// its region first and shorter overlapping terms are skipped.
    pub fn apply_selected(
        &self,
        text: &str,
        guild: GuildId,
        source_language: Language,
        accepted: &[(String, usize)],
        scope: &mut PendingScope,
    ) -> String {
        let selected: Vec<(&str, &GlossaryEntry)> = self
            .find_matches(text, guild, source_language)
            .into_iter()
            .map(|e| (e.source_text.as_str(), e))
            .collect();

        if selected.is_empty() {
            return text.to_string();
        }

        let accept = |entry: &&GlossaryEntry, range: &Range<usize>| {
            entry.replacement_mode == ReplacementMode::Mandatory
                || accepted
                    .iter()
                    .any(|(id, start)| *id == entry.id && *start == range.start)
        };
        replace_claimed_where(text, &selected, accept, |entry, matched| {
            if entry.is_cross_language() {
                scope.register(matched, &entry.target_text)
            } else {
                entry.target_text.clone()
            }
        })
    }

    pub fn to_mapping(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }

    pub fn from_mapping(mapping: serde_json::Map<String, serde_json::Value>) -> Self {
        // Parse guild by guild so one malformed guild doesn't wipe the rest.
        let mut book = GlossaryBook::new();
        for (guild, value) in mapping {
            let Ok(guild_id) = guild.parse::<GuildId>() else {
                warn!("Skipping glossary for invalid guild id '{}'", guild);
                continue;
            };
            match serde_json::from_value::<Glossary>(value) {
                Ok(glossary) => {
                    book.guilds.insert(guild_id, glossary);
                }
                Err(e) => warn!("Skipping malformed glossary for guild {}: {}", guild_id, e),
            }
        }
        book
    }
}

/// Live glossary shared by all request tasks.
///
/// Readers take an `Arc` snapshot and keep it for the whole request; edits
/// and reloads build a new book and swap it in wholesale.
#[derive(Debug, Default)]
pub struct GlossaryStore {
    book: RwLock<Arc<GlossaryBook>>,
}

impl GlossaryStore {
    pub fn new(book: GlossaryBook) -> Self {
        Self {
            book: RwLock::new(Arc::new(book)),
        }
    }

    pub fn snapshot(&self) -> Arc<GlossaryBook> {
        match self.book.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn replace(&self, book: GlossaryBook) {
        let mut guard = match self.book.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::new(book);
    }

    fn update<R>(&self, edit: impl FnOnce(&mut GlossaryBook) -> R) -> R {
        let mut guard = match self.book.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next = GlossaryBook::clone(&guard);
        let result = edit(&mut next);
        *guard = Arc::new(next);
        result
    }

    pub fn upsert(&self, guild: GuildId, entry: GlossaryEntry) {
        self.update(|book| book.insert(guild, entry));
    }

    pub fn remove(&self, guild: GuildId, id: &str) -> Option<GlossaryEntry> {
        self.update(|book| book.remove(guild, id))
    }

    pub fn entries(&self, guild: GuildId) -> Vec<GlossaryEntry> {
        self.snapshot()
            .guild(guild)
            .map(|g| g.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Replace the live book with what `storage` holds.
    pub async fn reload(&self, storage: &Storage) {
        let book = GlossaryBook::from_mapping(storage.load(STORAGE_KEY).await);
        info!("Glossaries loaded for {} guilds", book.guild_count());
        self.replace(book);
    }

    pub async fn persist(&self, storage: &Storage) -> bool {
        storage.save(STORAGE_KEY, &self.snapshot().to_mapping()).await
    }
}
