//! Cross-channel message correlation.
//!
//! Every mirrored post adds an edge in both directions between the original
//! message and its copy, labelled with the channel the other side lives in.
//! Replies are threaded across channels by walking these edges.

use crate::ids::{ChannelId, GuildId, MessageId};
use crate::storage::write_atomic;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Edges of one message: channel -> message id in that channel.
pub type Edges = BTreeMap<ChannelId, MessageId>;

/// Per-guild adjacency, serialized as `{guild: {message: {channel: message}}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MirrorSnapshot {
    guilds: BTreeMap<GuildId, BTreeMap<MessageId, Edges>>,
}

impl MirrorSnapshot {
    fn insert_edge(&mut self, guild: GuildId, from: MessageId, channel: ChannelId, to: MessageId) {
        self.guilds
            .entry(guild)
            .or_default()
            .entry(from)
            .or_default()
            .insert(channel, to);
    }

    /// Evict the oldest messages (smallest ids) until at most `cap` remain.
    /// A cap of 0 disables pruning.
    fn prune(&mut self, guild: GuildId, cap: usize) -> usize {
        if cap == 0 {
            return 0;
        }
        let Some(adjacency) = self.guilds.get_mut(&guild) else {
            return 0;
        };
        let mut evicted = 0;
        while adjacency.len() > cap {
            if adjacency.pop_first().is_none() {
                break;
            }
            evicted += 1;
        }
        evicted
    }

    fn find(&self, guild: GuildId, source: MessageId, target_channel: ChannelId) -> Option<MessageId> {
        let adjacency = self.guilds.get(&guild)?;
        if !adjacency.contains_key(&source) {
            return None;
        }

        let mut visited = HashSet::from([source]);
        let mut queue = VecDeque::from([source]);
        while let Some(current) = queue.pop_front() {
            let Some(edges) = adjacency.get(&current) else {
                continue;
            };
            if let Some(found) = edges.get(&target_channel) {
                return Some(*found);
            }
            for next in edges.values() {
                if visited.insert(*next) {
                    queue.push_back(*next);
                }
            }
        }
        None
    }
}

/// The live graph. All mutation goes through one async mutex so that the
/// add, prune and persist steps of a write happen as a unit.
#[derive(Debug)]
pub struct MirrorGraph {
    state: Mutex<MirrorSnapshot>,
    path: Option<PathBuf>,
    max_per_guild: usize,
}

impl MirrorGraph {
    /// Empty graph; persisted to `path` if given.
    pub fn new(path: Option<PathBuf>, max_per_guild: usize) -> Self {
        Self::with_snapshot(MirrorSnapshot::default(), path, max_per_guild)
    }

    fn with_snapshot(snapshot: MirrorSnapshot, path: Option<PathBuf>, max_per_guild: usize) -> Self {
        Self {
            state: Mutex::new(snapshot),
            path,
            max_per_guild,
        }
    }

    /// Load the snapshot at `path`. A missing or corrupt snapshot yields an
    /// empty graph.
    pub async fn load(path: impl Into<PathBuf>, max_per_guild: usize) -> Self {
        let path = path.into();
        let snapshot = match read_snapshot(&path).await {
            Ok(Some(snapshot)) => {
                info!(
                    "Loaded mirror graph from {} ({} guilds)",
                    path.display(),
                    snapshot.guilds.len()
                );
                snapshot
            }
            Ok(None) => {
                debug!("No mirror graph at {}, starting empty", path.display());
                MirrorSnapshot::default()
            }
            Err(e) => {
                error!("Failed to load mirror graph: {:#}", e);
                MirrorSnapshot::default()
            }
        };
        Self::with_snapshot(snapshot, Some(path), max_per_guild)
    }

    /// Record that `mirrored` (in `target_channel`) is a copy of `source`
    /// (in `source_channel`). Both directions are stored.
    pub async fn add(
        &self,
        guild: GuildId,
        source_channel: ChannelId,
        source: MessageId,
        target_channel: ChannelId,
        mirrored: MessageId,
    ) {
        let mut state = self.state.lock().await;
        state.insert_edge(guild, source, target_channel, mirrored);
        state.insert_edge(guild, mirrored, source_channel, source);
        self.prune_and_persist(&mut state, guild).await;
    }

    /// Record a single directed edge `source -> mirrored` in `channel`.
    pub async fn add_edge(&self, guild: GuildId, source: MessageId, channel: ChannelId, mirrored: MessageId) {
        let mut state = self.state.lock().await;
        state.insert_edge(guild, source, channel, mirrored);
        self.prune_and_persist(&mut state, guild).await;
    }

    async fn prune_and_persist(&self, state: &mut MirrorSnapshot, guild: GuildId) {
        let evicted = state.prune(guild, self.max_per_guild);
        if evicted > 0 {
            debug!("Pruned {} mirror entries for guild {}", evicted, guild);
        }
        self.persist(state).await;
    }

    /// Breadth-first search from `source` for the copy living in
    /// `target_channel`.
    pub async fn find_mirror(
        &self,
        guild: GuildId,
        source: MessageId,
        target_channel: ChannelId,
    ) -> Option<MessageId> {
        self.state.lock().await.find(guild, source, target_channel)
    }

    /// Direct edges of one message.
    pub async fn neighbors(&self, guild: GuildId, message: MessageId) -> Edges {
        self.state
            .lock()
            .await
            .guilds
            .get(&guild)
            .and_then(|adjacency| adjacency.get(&message))
            .cloned()
            .unwrap_or_default()
    }

    /// Number of messages with edges in `guild`.
    pub async fn len(&self, guild: GuildId) -> usize {
        self.state
            .lock()
            .await
            .guilds
            .get(&guild)
            .map_or(0, BTreeMap::len)
    }

    pub async fn prune(&self, guild: GuildId) {
        let mut state = self.state.lock().await;
        self.prune_and_persist(&mut state, guild).await;
    }

    /// Write the current snapshot. Returns whether it was written.
    pub async fn flush(&self) -> bool {
        let state = self.state.lock().await;
        self.persist(&state).await
    }

    async fn persist(&self, state: &MirrorSnapshot) -> bool {
        let Some(path) = &self.path else {
            return true;
        };
        match write_snapshot(path, state).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to persist mirror graph: {:#}", e);
                false
            }
        }
    }
}

async fn read_snapshot(path: &Path) -> Result<Option<MirrorSnapshot>> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };
    if text.trim().is_empty() {
        return Ok(None);
    }
    let snapshot = serde_json::from_str(&text)
        .with_context(|| format!("Invalid mirror graph in {}", path.display()))?;
    Ok(Some(snapshot))
}

async fn write_snapshot(path: &Path, snapshot: &MirrorSnapshot) -> Result<()> {
    let json = serde_json::to_vec(snapshot).context("Failed to serialize mirror graph")?;
    write_atomic(path, &json).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    const GUILD: GuildId = GuildId(1);
    const ZH: ChannelId = ChannelId(100);
    const EN: ChannelId = ChannelId(200);
    const JP: ChannelId = ChannelId(300);

    // ==================== Lookup Tests ====================

    #[tokio::test]
    async fn test_multi_hop_lookup() {
        let graph = MirrorGraph::new(None, 0);
        graph.add(GUILD, ZH, MessageId(10), EN, MessageId(11)).await;
        graph.add(GUILD, EN, MessageId(11), JP, MessageId(12)).await;

        assert_eq!(graph.find_mirror(GUILD, MessageId(10), JP).await, Some(MessageId(12)));
        assert_eq!(graph.find_mirror(GUILD, MessageId(12), ZH).await, Some(MessageId(10)));
        assert_eq!(graph.find_mirror(GUILD, MessageId(10), EN).await, Some(MessageId(11)));
    }

    #[tokio::test]
    async fn test_directed_edges_multi_hop() {
        let graph = MirrorGraph::new(None, 0);
        graph.add_edge(GUILD, MessageId(10), EN, MessageId(11)).await;
        graph.add_edge(GUILD, MessageId(11), JP, MessageId(12)).await;

        assert_eq!(graph.find_mirror(GUILD, MessageId(10), JP).await, Some(MessageId(12)));
        // No reverse edges were recorded.
        assert_eq!(graph.find_mirror(GUILD, MessageId(12), EN).await, None);
    }

    #[tokio::test]
    async fn test_lookup_misses() {
        let graph = MirrorGraph::new(None, 0);
        graph.add(GUILD, ZH, MessageId(10), EN, MessageId(11)).await;

        assert_eq!(graph.find_mirror(GUILD, MessageId(99), EN).await, None);
        assert_eq!(graph.find_mirror(GuildId(2), MessageId(10), EN).await, None);
        assert_eq!(graph.find_mirror(GUILD, MessageId(10), JP).await, None);
    }

    #[tokio::test]
    async fn test_one_mirror_per_channel() {
        let graph = MirrorGraph::new(None, 0);
        graph.add_edge(GUILD, MessageId(10), EN, MessageId(11)).await;
        graph.add_edge(GUILD, MessageId(10), EN, MessageId(13)).await;

        let edges = graph.neighbors(GUILD, MessageId(10)).await;
        assert_eq!(edges.len(), 1);
        assert_eq!(edges.get(&EN), Some(&MessageId(13)));
    }

    // ==================== Pruning Tests ====================

    #[tokio::test]
    async fn test_pruning_bound() {
        let max = 3;
        let graph = MirrorGraph::new(None, max);
        for i in 0..=max as u64 {
            graph.add_edge(GUILD, MessageId(10 + i), EN, MessageId(100 + i)).await;
            assert!(graph.len(GUILD).await <= max);
        }
        // The oldest source was evicted.
        assert!(graph.neighbors(GUILD, MessageId(10)).await.is_empty());
        assert!(!graph.neighbors(GUILD, MessageId(13)).await.is_empty());
    }

    #[tokio::test]
    async fn test_pruning_evicts_smallest_ids() {
        let graph = MirrorGraph::new(None, 2);
        graph.add(GUILD, ZH, MessageId(50), EN, MessageId(51)).await;
        graph.add(GUILD, ZH, MessageId(60), EN, MessageId(61)).await;

        assert_eq!(graph.len(GUILD).await, 2);
        assert!(graph.neighbors(GUILD, MessageId(50)).await.is_empty());
        assert_eq!(graph.find_mirror(GUILD, MessageId(60), EN).await, Some(MessageId(61)));
    }

    #[tokio::test]
    async fn test_zero_cap_disables_pruning() {
        let graph = MirrorGraph::new(None, 0);
        for i in 0..50u64 {
            graph.add_edge(GUILD, MessageId(i), EN, MessageId(1000 + i)).await;
        }
        assert_eq!(graph.len(GUILD).await, 50);
    }

    // ==================== Persistence Tests ====================

    #[tokio::test]
    async fn test_persist_and_reload() {
        let dir = TempDir::new().expect("Should create temp dir");
        let path = dir.path().join("state").join("mirror.json");

        let graph = MirrorGraph::load(&path, 100).await;
        graph.add(GUILD, ZH, MessageId(10), EN, MessageId(11)).await;
        assert!(path.exists());

        let json = std::fs::read_to_string(&path).expect("Should read snapshot");
        let value: serde_json::Value = serde_json::from_str(&json).expect("Should parse");
        assert_eq!(value["1"]["10"]["200"], 11);

        let reloaded = MirrorGraph::load(&path, 100).await;
        assert_eq!(reloaded.find_mirror(GUILD, MessageId(11), ZH).await, Some(MessageId(10)));
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_loads_empty() {
        let dir = TempDir::new().expect("Should create temp dir");
        let path = dir.path().join("mirror.json");
        std::fs::write(&path, "{\"1\": {\"x\": 3}}").expect("write");

        let graph = MirrorGraph::load(&path, 100).await;
        assert_eq!(graph.len(GUILD).await, 0);

        // Still writable afterwards.
        graph.add(GUILD, ZH, MessageId(1), EN, MessageId(2)).await;
        assert!(graph.flush().await);
    }

    #[tokio::test]
    async fn test_concurrent_adds_are_serialized() {
        let dir = TempDir::new().expect("Should create temp dir");
        let path = dir.path().join("mirror.json");
        let graph = Arc::new(MirrorGraph::load(&path, 0).await);

        let tasks: Vec<_> = (0..20u64)
            .map(|i| {
                let graph = Arc::clone(&graph);
                tokio::spawn(async move {
                    graph.add(GUILD, ZH, MessageId(i * 2), EN, MessageId(i * 2 + 1)).await;
                })
            })
            .collect();
        for task in tasks {
            task.await.expect("task should not panic");
        }

        assert_eq!(graph.len(GUILD).await, 40);
        let reloaded = MirrorGraph::load(&path, 0).await;
        assert_eq!(reloaded.len(GUILD).await, 40);
    }
}
