//! Legacy per-guild dictionary: a flat `Chinese term -> English term` map
//! applied as literal substitutions before anything else in the pipeline.

use crate::ids::GuildId;
use crate::language::Direction;
use crate::matching::replace_claimed;
use crate::storage::Storage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

pub const STORAGE_KEY: &str = "dictionary";

/// `zh -> en` terms of one guild.
pub type TermMap = BTreeMap<String, String>;

/// Substitute dictionary terms in the source language of `direction`.
///
/// ZhToEn replaces Chinese keys with their English values; EnToZh replaces
/// English values with their Chinese keys. Longest term wins on overlap.
pub fn apply(text: &str, direction: Direction, map: &TermMap) -> String {
    if map.is_empty() || text.is_empty() {
        return text.to_string();
    }

    let mut pairs: Vec<(&str, &str)> = match direction {
        Direction::ZhToEn => map.iter().map(|(zh, en)| (zh.as_str(), en.as_str())).collect(),
        Direction::EnToZh => map.iter().map(|(zh, en)| (en.as_str(), zh.as_str())).collect(),
    };
    pairs.retain(|(from, _)| !from.trim().is_empty());
    pairs.sort_by(|a, b| b.0.chars().count().cmp(&a.0.chars().count()).then_with(|| a.0.cmp(b.0)));

    replace_claimed(text, &pairs, |to, _| to.to_string())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DictionaryBook {
    guilds: BTreeMap<GuildId, TermMap>,
}

impl DictionaryBook {
    pub fn guild(&self, guild: GuildId) -> Option<&TermMap> {
        self.guilds.get(&guild)
    }

    pub fn guild_count(&self) -> usize {
        self.guilds.len()
    }

    pub fn insert(&mut self, guild: GuildId, zh: impl Into<String>, en: impl Into<String>) {
        self.guilds.entry(guild).or_default().insert(zh.into(), en.into());
    }

    pub fn remove(&mut self, guild: GuildId, zh: &str) -> Option<String> {
        self.guilds.get_mut(&guild)?.remove(zh)
    }

    pub fn from_mapping(mapping: serde_json::Map<String, serde_json::Value>) -> Self {
        let mut book = DictionaryBook::default();
        for (guild, value) in mapping {
            let Ok(guild_id) = guild.parse::<GuildId>() else {
                warn!("Skipping dictionary for invalid guild id '{}'", guild);
                continue;
            };
            match serde_json::from_value::<TermMap>(value) {
                Ok(terms) => {
                    book.guilds.insert(guild_id, terms);
                }
                Err(e) => warn!("Skipping malformed dictionary for guild {}: {}", guild_id, e),
            }
        }
        book
    }

    pub fn to_mapping(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }
}

/// Live dictionary, swapped wholesale on reload.
#[derive(Debug, Default)]
pub struct DictionaryStore {
    book: RwLock<Arc<DictionaryBook>>,
}

impl DictionaryStore {
    pub fn new(book: DictionaryBook) -> Self {
        Self {
            book: RwLock::new(Arc::new(book)),
        }
    }

    pub fn snapshot(&self) -> Arc<DictionaryBook> {
        match self.book.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Terms of one guild (empty when the guild has none).
    pub fn terms(&self, guild: GuildId) -> TermMap {
        self.snapshot().guild(guild).cloned().unwrap_or_default()
    }

    pub fn replace(&self, book: DictionaryBook) {
        let mut guard = match self.book.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::new(book);
    }

    pub async fn reload(&self, storage: &Storage) {
        let book = DictionaryBook::from_mapping(storage.load(STORAGE_KEY).await);
        info!("Dictionary loaded for {} guilds", book.guilds.len());
        self.replace(book);
    }

    pub async fn persist(&self, storage: &Storage) -> bool {
        storage.save(STORAGE_KEY, &self.snapshot().to_mapping()).await
    }
}
