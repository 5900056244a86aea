//! Size-bounded in-memory store of decoded thumbnails.
//!
//! Least-recently-requested entries go first once either budget (bytes or
//! entry count) is exceeded. Entries belonging to pinned identities (the
//! focused file and its neighbors) are never evicted.

use lru::LruCache;
use std::collections::HashSet;
use tracing::debug;

use super::{CacheKey, Thumbnail};

pub(crate) struct MemoryCache {
    entries: LruCache<CacheKey, Thumbnail>,
    bytes: usize,
    max_bytes: usize,
    max_entries: usize,
    pinned: HashSet<String>,
}

impl MemoryCache {
    pub(crate) fn new(max_bytes: usize, max_entries: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            bytes: 0,
            max_bytes,
            max_entries: max_entries.max(1),
            pinned: HashSet::new(),
        }
    }

    /// Look up and mark as most recently requested
    pub(crate) fn get(&mut self, key: &CacheKey) -> Option<Thumbnail> {
        self.entries.get(key).cloned()
    }

    pub(crate) fn insert(&mut self, key: CacheKey, thumbnail: Thumbnail) {
        self.bytes = self.bytes.saturating_add(thumbnail.cost);
        if let Some(existing) = self.entries.put(key, thumbnail) {
            self.bytes = self.bytes.saturating_sub(existing.cost);
        }
        self.evict_to_budget();
    }

    fn over_budget(&self) -> bool {
        self.bytes > self.max_bytes || self.entries.len() > self.max_entries
    }

    fn evict_to_budget(&mut self) {
        while self.over_budget() {
            // Walk from least to most recently used, skipping pinned identities
            let victim = self
                .entries
                .iter()
                .rev()
                .find(|(key, _)| !self.pinned.contains(&key.key))
                .map(|(key, _)| key.clone());

            let Some(victim) = victim else {
                // Everything left is pinned; allow the overage
                break;
            };
            if let Some(evicted) = self.entries.pop(&victim) {
                self.bytes = self.bytes.saturating_sub(evicted.cost);
                debug!("Evicted {} ({:?})", victim.key, victim.size);
            }
        }
    }

    /// Replace the pinned identity set, then re-apply the budget
    pub(crate) fn set_pinned(&mut self, pinned: HashSet<String>) {
        self.pinned = pinned;
        self.evict_to_budget();
    }

    /// Drop every entry for an identity key, whatever its fingerprint or size
    pub(crate) fn remove_identity(&mut self, identity_key: &str) -> usize {
        let victims: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(key, _)| key.key == identity_key)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &victims {
            if let Some(evicted) = self.entries.pop(key) {
                self.bytes = self.bytes.saturating_sub(evicted.cost);
            }
        }
        victims.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.bytes = 0;
        self.pinned.clear();
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn bytes(&self) -> usize {
        self.bytes
    }
}
