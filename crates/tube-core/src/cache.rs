//! Time-expiring cache for remote playlist listings.
//!
//! Expiration is lazy: nothing runs in the background.  `get` hides stale
//! entries on its own, and callers sweep at the start of every playlist fetch.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::RawVideo;

/// Entries older than this are stale.  Fixed; not configurable per entry.
pub const CACHE_EXPIRATION: Duration = Duration::from_secs(30 * 60);

/// Cache key for a remote playlist identifier.
pub fn playlist_key(playlist_id: &str) -> String {
    format!("playlist_{}", playlist_id)
}

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: Vec<RawVideo>,
    stored_at: Instant,
}

impl CacheEntry {
    fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.stored_at)
    }
}

/// Diagnostic view of one entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntryStats {
    pub key: String,
    pub age_secs: u64,
    pub expired: bool,
    pub data_size: usize,
}

/// Diagnostic view of the whole cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CacheStats {
    pub total_entries: usize,
    pub entries: Vec<CacheEntryStats>,
}

#[derive(Debug, Default)]
pub struct MetadataCache {
    entries: HashMap<String, CacheEntry>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&[RawVideo]> {
        self.get_at(key, Instant::now())
    }

    /// Payload for `key` if it is younger than the expiration window at `now`.
    pub fn get_at(&self, key: &str, now: Instant) -> Option<&[RawVideo]> {
        let entry = self.entries.get(key)?;
        if entry.age(now) < CACHE_EXPIRATION {
            Some(&entry.payload)
        } else {
            None
        }
    }

    pub fn put(&mut self, key: impl Into<String>, payload: Vec<RawVideo>) {
        self.put_at(key, payload, Instant::now());
    }

    /// Store `payload`, replacing any previous entry and its timestamp.
    pub fn put_at(&mut self, key: impl Into<String>, payload: Vec<RawVideo>, now: Instant) {
        let key = key.into();
        debug!("cache: put {} ({} entries)", key, payload.len());
        self.entries.insert(
            key,
            CacheEntry {
                payload,
                stored_at: now,
            },
        );
    }

    pub fn sweep_expired(&mut self) -> usize {
        self.sweep_expired_at(Instant::now())
    }

    /// Drop every entry whose age exceeds the window.  Returns how many went.
    pub fn sweep_expired_at(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.age(now) <= CACHE_EXPIRATION);
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!("cache: cleaned {} expired entries", removed);
        }
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.stats_at(Instant::now())
    }

    pub fn stats_at(&self, now: Instant) -> CacheStats {
        let mut entries: Vec<CacheEntryStats> = self
            .entries
            .iter()
            .map(|(key, entry)| {
                let age = entry.age(now);
                CacheEntryStats {
                    key: key.clone(),
                    age_secs: age.as_secs(),
                    expired: age > CACHE_EXPIRATION,
                    data_size: entry.payload.len(),
                }
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        CacheStats {
            total_entries: entries.len(),
            entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn videos(n: usize) -> Vec<RawVideo> {
        (0..n)
            .map(|i| RawVideo {
                video_id: format!("v{i}"),
                title: format!("Video {i}"),
            })
            .collect()
    }

    #[test]
    fn fresh_entry_is_returned() {
        let t0 = Instant::now();
        let mut cache = MetadataCache::new();
        cache.put_at(playlist_key("PL1"), videos(3), t0);
        let hit = cache.get_at("playlist_PL1", t0 + Duration::from_secs(60));
        assert_eq!(hit.map(|v| v.len()), Some(3));
    }

    #[test]
    fn stale_entry_is_hidden_without_sweep() {
        let t0 = Instant::now();
        let mut cache = MetadataCache::new();
        cache.put_at("k", videos(1), t0);
        let later = t0 + CACHE_EXPIRATION + Duration::from_secs(1);
        assert!(cache.get_at("k", later).is_none());
        // Still physically present until swept.
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn sweep_removes_only_entries_past_the_window() {
        let t0 = Instant::now();
        let mut cache = MetadataCache::new();
        cache.put_at("old", videos(1), t0);
        cache.put_at("edge", videos(1), t0 + Duration::from_secs(60));
        cache.put_at("young", videos(1), t0 + Duration::from_secs(20 * 60));

        let now = t0 + CACHE_EXPIRATION + Duration::from_secs(60);
        // "edge" is exactly at the window: not past it.
        assert_eq!(cache.sweep_expired_at(now), 1);
        assert!(cache.get_at("young", now).is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn put_refreshes_timestamp() {
        let t0 = Instant::now();
        let mut cache = MetadataCache::new();
        cache.put_at("k", videos(1), t0);
        let t1 = t0 + Duration::from_secs(29 * 60);
        cache.put_at("k", videos(2), t1);
        let later = t0 + CACHE_EXPIRATION + Duration::from_secs(5);
        assert_eq!(cache.get_at("k", later).map(|v| v.len()), Some(2));
    }

    #[test]
    fn stats_report_age_and_expiry() {
        let t0 = Instant::now();
        let mut cache = MetadataCache::new();
        cache.put_at("a", videos(2), t0);
        cache.put_at("b", videos(5), t0 + CACHE_EXPIRATION);
        let stats = cache.stats_at(t0 + CACHE_EXPIRATION + Duration::from_secs(10));
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.entries[0].key, "a");
        assert!(stats.entries[0].expired);
        assert_eq!(stats.entries[0].data_size, 2);
        assert!(!stats.entries[1].expired);
        assert_eq!(stats.entries[1].age_secs, 10);

        cache.clear();
        assert!(cache.is_empty());
    }
}
