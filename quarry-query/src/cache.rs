//! Query result caching.
//!
//! Results of cache-enabled reads are stored under the statement's
//! fingerprint (SQL text plus bound parameters) until their TTL lapses.
//! Writes never invalidate entries; callers that need fresh data use
//! `without_cache()` or [`ResultCache::clear`].
//!
//! ```rust
//! use std::time::Duration;
//! use quarry_query::cache::ResultCache;
//! use quarry_query::Record;
//!
//! let cache = ResultCache::new(100);
//! cache.insert("SELECT 1", vec![Record::new()], Duration::from_secs(60));
//!
//! assert_eq!(cache.get("SELECT 1").map(|rows| rows.len()), Some(1));
//! assert!(cache.get("SELECT 2").is_none());
//! assert_eq!(cache.stats().hits, 1);
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::debug;

use crate::record::Record;

/// Statistics about cache usage.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of insertions.
    pub inserts: u64,
    /// Number of entries dropped to make room.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate.
    #[inline]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
struct Entry {
    rows: Arc<Vec<Record>>,
    inserted_at: Instant,
    // `None` when the TTL reaches past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// TTL cache of materialized query results.
#[derive(Debug)]
pub struct ResultCache {
    max_entries: usize,
    entries: RwLock<HashMap<String, Entry>>,
    stats: RwLock<CacheStats>,
}

impl ResultCache {
    /// Capacity used when none is configured.
    pub const DEFAULT_CAPACITY: usize = 1000;

    /// Create a cache holding at most `max_entries` result sets.
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            entries: RwLock::new(HashMap::new()),
            stats: RwLock::new(CacheStats::default()),
        }
    }

    /// Fetch a non-expired entry.
    pub fn get(&self, fingerprint: &str) -> Option<Arc<Vec<Record>>> {
        let now = Instant::now();
        let hit = {
            let entries = self.entries.read();
            entries
                .get(fingerprint)
                .filter(|entry| !entry.is_expired(now))
                .map(|entry| entry.rows.clone())
        };

        let mut stats = self.stats.write();
        if hit.is_some() {
            stats.hits += 1;
            debug!(fingerprint_len = fingerprint.len(), "ResultCache hit");
        } else {
            stats.misses += 1;
        }
        hit
    }

    /// Store `rows` for `ttl`, replacing any previous entry.
    pub fn insert(&self, fingerprint: impl Into<String>, rows: Vec<Record>, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let mut stats = self.stats.write();

        let key = fingerprint.into();
        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            entries.retain(|_, entry| !entry.is_expired(now));
            if entries.len() >= self.max_entries {
                // Drop the oldest entry.
                if let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.inserted_at)
                    .map(|(key, _)| key.clone())
                {
                    entries.remove(&oldest);
                    stats.evictions += 1;
                }
            }
        }

        debug!(rows = rows.len(), ttl_ms = ttl.as_millis() as u64, "ResultCache insert");
        entries.insert(
            key,
            Entry {
                rows: Arc::new(rows),
                inserted_at: now,
                expires_at: now.checked_add(ttl),
            },
        );
        stats.inserts += 1;
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Drop expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Usage statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats.read().clone()
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
