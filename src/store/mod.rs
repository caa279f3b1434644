//! Persistent local store backed by sled.
//!
//! Durable state lives in one sled tree per logical partition. Bounded
//! partitions evict their oldest entries by insertion order once capacity is
//! exceeded; TTL-bearing partitions never serve expired values. The store is
//! a best-effort cache, never a source of truth: if the backend cannot be
//! opened or rejects a write, operations degrade to no-op writes and empty
//! reads instead of raising.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::WaysideError;
use crate::models::{RecentSearch, UserPreferences};

/// Maximum entries kept in the recent-searches list.
const RECENT_SEARCHES_MAX: usize = 10;

/// Logical partitions of the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    /// Cached entrance lookups, bounded.
    Entrances,
    /// Cached map tiles, bounded with TTL.
    Tiles,
    /// Cached same-origin API GET responses, bounded with TTL.
    ApiCache,
    /// Singleton preferences scalar.
    Preferences,
    /// Self-trimming recent-searches list.
    RecentSearches,
    /// Write actions awaiting replay. Unbounded by count, TTL per entry
    /// enforced by the replay coordinator.
    WriteQueue,
}

impl Partition {
    fn tree_name(self) -> &'static str {
        match self {
            Partition::Entrances => "entrances",
            Partition::Tiles => "tiles",
            Partition::ApiCache => "api_cache",
            Partition::Preferences => "preferences",
            Partition::RecentSearches => "recent_searches",
            Partition::WriteQueue => "write_queue",
        }
    }

    /// Capacity for bounded partitions.
    fn capacity(self) -> Option<usize> {
        match self {
            Partition::Entrances | Partition::Tiles | Partition::ApiCache => Some(5),
            Partition::Preferences | Partition::RecentSearches | Partition::WriteQueue => None,
        }
    }

    /// Time-to-live for cache partitions.
    fn ttl(self) -> Option<Duration> {
        match self {
            Partition::Tiles => Some(Duration::days(3)),
            Partition::ApiCache => Some(Duration::days(1)),
            _ => None,
        }
    }
}

/// Stored value envelope carrying insertion order and expiry metadata.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    seq: u64,
    cached_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
    payload: serde_json::Value,
}

/// Handle to the durable store. Cheap to clone; all clones share the same
/// sled database.
#[derive(Clone)]
pub struct LocalStore {
    db: Option<sled::Db>,
}

impl LocalStore {
    /// Open (or create) the store at the given path. If the backend cannot
    /// be opened the store comes up disabled and every operation degrades to
    /// a no-op, per the best-effort contract.
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        match sled::open(path.as_ref()) {
            Ok(db) => {
                info!("Opened local store at {}", path.as_ref().display());
                Self { db: Some(db) }
            }
            Err(e) => {
                warn!(
                    "Local store unavailable at {}: {}. Continuing without durable cache.",
                    path.as_ref().display(),
                    e
                );
                Self { db: None }
            }
        }
    }

    /// A store with no backend. Writes are dropped, reads are empty.
    pub fn disabled() -> Self {
        Self { db: None }
    }

    /// A throwaway store in a temp-backed sled, for tests.
    pub fn temporary() -> Self {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .expect("temporary sled db");
        Self { db: Some(db) }
    }

    fn tree(&self, partition: Partition) -> Option<sled::Tree> {
        let db = self.db.as_ref()?;
        match db.open_tree(partition.tree_name()) {
            Ok(tree) => Some(tree),
            Err(e) => {
                warn!("Failed to open partition {:?}: {}", partition, e);
                None
            }
        }
    }

    /// Store a value under a key. Last-write-wins. Bounded partitions evict
    /// their oldest entries afterwards; a rejected write degrades to a no-op.
    pub async fn put<T: Serialize>(&self, partition: Partition, key: &str, value: &T) {
        let Some(tree) = self.tree(partition) else {
            return;
        };
        let payload = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                warn!("Unserializable value for {:?}/{}: {}", partition, key, e);
                return;
            }
        };

        let now = Utc::now();
        let envelope = Envelope {
            seq: self.next_seq(),
            cached_at: now,
            expires_at: partition.ttl().map(|ttl| now + ttl),
            payload,
        };
        let bytes = match serde_json::to_vec(&envelope) {
            Ok(b) => b,
            Err(e) => {
                warn!("Failed to encode envelope for {:?}/{}: {}", partition, key, e);
                return;
            }
        };

        if let Err(e) = tree.insert(key.as_bytes(), bytes) {
            // Best-effort cache: log and move on.
            warn!(
                "{} ({:?}/{})",
                WaysideError::QuotaExceeded(e.to_string()),
                partition,
                key
            );
            return;
        }

        if let Some(capacity) = partition.capacity() {
            self.evict_oldest(&tree, partition, capacity);
        }
    }

    /// Fetch a value by key. Expired entries are deleted and reported as
    /// absent; backend failures read as empty.
    pub async fn get<T: DeserializeOwned>(&self, partition: Partition, key: &str) -> Option<T> {
        let tree = self.tree(partition)?;
        let bytes = match tree.get(key.as_bytes()) {
            Ok(Some(b)) => b,
            Ok(None) => return None,
            Err(e) => {
                warn!("Store read failed for {:?}/{}: {}", partition, key, e);
                return None;
            }
        };

        let envelope: Envelope = serde_json::from_slice(&bytes).ok()?;
        if let Some(expires_at) = envelope.expires_at {
            if Utc::now() >= expires_at {
                debug!("Entry {:?}/{} expired, dropping", partition, key);
                let _ = tree.remove(key.as_bytes());
                return None;
            }
        }
        serde_json::from_value(envelope.payload).ok()
    }

    /// All unexpired values in a partition, in insertion order.
    pub async fn get_all<T: DeserializeOwned>(&self, partition: Partition) -> Vec<T> {
        let Some(tree) = self.tree(partition) else {
            return Vec::new();
        };
        let now = Utc::now();

        let mut entries: Vec<(u64, T)> = Vec::new();
        for item in tree.iter() {
            let (key, bytes) = match item {
                Ok(kv) => kv,
                Err(e) => {
                    warn!("Store scan failed for {:?}: {}", partition, e);
                    break;
                }
            };
            let Ok(envelope) = serde_json::from_slice::<Envelope>(&bytes) else {
                continue;
            };
            if envelope.expires_at.is_some_and(|exp| now >= exp) {
                let _ = tree.remove(key);
                continue;
            }
            if let Ok(value) = serde_json::from_value(envelope.payload) {
                entries.push((envelope.seq, value));
            }
        }

        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, v)| v).collect()
    }

    /// Remove a single key.
    pub async fn delete(&self, partition: Partition, key: &str) {
        if let Some(tree) = self.tree(partition) {
            if let Err(e) = tree.remove(key.as_bytes()) {
                warn!("Store delete failed for {:?}/{}: {}", partition, key, e);
            }
        }
    }

    /// Drop every entry in a partition.
    pub async fn clear(&self, partition: Partition) {
        if let Some(tree) = self.tree(partition) {
            if let Err(e) = tree.clear() {
                warn!("Store clear failed for {:?}: {}", partition, e);
            }
        }
    }

    /// Unexpired entry count of a partition. Expired leftovers are purged on
    /// the way through, matching the read paths.
    pub async fn len(&self, partition: Partition) -> usize {
        let Some(tree) = self.tree(partition) else {
            return 0;
        };
        let now = Utc::now();

        let mut count = 0;
        for item in tree.iter() {
            let (key, bytes) = match item {
                Ok(kv) => kv,
                Err(e) => {
                    warn!("Store scan failed for {:?}: {}", partition, e);
                    break;
                }
            };
            let Ok(envelope) = serde_json::from_slice::<Envelope>(&bytes) else {
                continue;
            };
            if envelope.expires_at.is_some_and(|exp| now >= exp) {
                let _ = tree.remove(key);
            } else {
                count += 1;
            }
        }
        count
    }

    pub async fn is_empty(&self, partition: Partition) -> bool {
        self.len(partition).await == 0
    }

    // ---- scalar accessors -------------------------------------------------

    /// Read the singleton preferences, applying defaults when absent.
    pub async fn preferences(&self) -> UserPreferences {
        self.get(Partition::Preferences, "preferences")
            .await
            .unwrap_or_default()
    }

    pub async fn set_preferences(&self, prefs: &UserPreferences) {
        self.put(Partition::Preferences, "preferences", prefs).await;
    }

    /// The recent-searches list, most recent first.
    pub async fn recent_searches(&self) -> Vec<RecentSearch> {
        self.get(Partition::RecentSearches, "recent_searches")
            .await
            .unwrap_or_default()
    }

    /// Prepend a search, de-duplicating by id and trimming to the cap.
    pub async fn push_recent_search(&self, search: RecentSearch) {
        let mut list = self.recent_searches().await;
        list.retain(|s| s.id != search.id);
        list.insert(0, search);
        list.truncate(RECENT_SEARCHES_MAX);
        self.put(Partition::RecentSearches, "recent_searches", &list).await;
    }

    /// Insert a value whose TTL has already elapsed, for expiry tests.
    #[cfg(test)]
    async fn put_stale<T: Serialize>(&self, partition: Partition, key: &str, value: &T) {
        let Some(tree) = self.tree(partition) else {
            return;
        };
        let now = Utc::now();
        let envelope = Envelope {
            seq: self.next_seq(),
            cached_at: now - Duration::days(30),
            expires_at: Some(now - Duration::seconds(1)),
            payload: serde_json::to_value(value).unwrap(),
        };
        tree.insert(key.as_bytes(), serde_json::to_vec(&envelope).unwrap())
            .unwrap();
    }

    // ---- internals --------------------------------------------------------

    fn next_seq(&self) -> u64 {
        self.db
            .as_ref()
            .and_then(|db| db.generate_id().ok())
            .unwrap_or(0)
    }

    /// Delete oldest-by-insertion-sequence entries until size <= capacity.
    fn evict_oldest(&self, tree: &sled::Tree, partition: Partition, capacity: usize) {
        let len = tree.len();
        if len <= capacity {
            return;
        }

        let mut entries: Vec<(u64, sled::IVec)> = Vec::with_capacity(len);
        for item in tree.iter() {
            let Ok((key, bytes)) = item else { continue };
            if let Ok(envelope) = serde_json::from_slice::<Envelope>(&bytes) {
                entries.push((envelope.seq, key));
            }
        }
        entries.sort_by_key(|(seq, _)| *seq);

        let excess = entries.len().saturating_sub(capacity);
        for (_, key) in entries.into_iter().take(excess) {
            debug!("Evicting oldest entry from {:?}", partition);
            let _ = tree.remove(key);
        }
    }
}
