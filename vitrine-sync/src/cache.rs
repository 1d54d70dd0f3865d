//! Entity cache with versioned writes and staleness metadata.
//!
//! The cache is the single mutable structure shared by the mutation,
//! reconciliation, and prefetch paths. Every write carries a version;
//! writes at or below the stored version are rejected as superseded. The
//! version floor survives removal and eviction so a late write from a
//! stale source can never resurrect old state under a fresh-looking entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;
use vitrine_core::{CacheValue, QueryKey, Timestamp, Version};

/// Configuration for the entity cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Staleness window for demand-fetched and mutation-settled entries.
    pub demand_staleness: Duration,
    /// Staleness window for speculative (prefetched) entries. Longer,
    /// since a speculative entry was never shown to the user under a
    /// freshness promise.
    pub speculative_staleness: Duration,
    /// Capacity of the update broadcast channel. Slow observers that lag
    /// past this many updates miss notifications and should re-read.
    pub update_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            demand_staleness: Duration::from_secs(30),
            speculative_staleness: Duration::from_secs(300),
            update_capacity: 256,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_demand_staleness(mut self, window: Duration) -> Self {
        self.demand_staleness = window;
        self
    }

    pub fn with_speculative_staleness(mut self, window: Duration) -> Self {
        self.speculative_staleness = window;
        self
    }

    pub fn with_update_capacity(mut self, capacity: usize) -> Self {
        self.update_capacity = capacity;
        self
    }
}

/// Freshness state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Fresh,
    Stale,
    /// A refetch for this key is in flight.
    Invalidating,
}

/// How an entry got into the cache; selects its staleness window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOrigin {
    Demand,
    Prefetch,
}

/// One cached query result.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: CacheValue,
    pub version: Version,
    pub stale_at: Timestamp,
    pub state: EntryState,
    pub origin: EntryOrigin,
}

impl CacheEntry {
    /// Whether the entry is still inside its staleness window.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.state == EntryState::Fresh && now < self.stale_at
    }
}

/// Notification that a key's value changed, broadcast to UI observers.
#[derive(Debug, Clone)]
pub struct CacheUpdate {
    pub key: QueryKey,
    pub version: Version,
}

#[derive(Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    rejected_writes: AtomicU64,
    evictions: AtomicU64,
}

/// Point-in-time view of the cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub rejected_writes: u64,
    pub evictions: u64,
}

/// Keyed store of query results.
pub struct EntityCache {
    entries: RwLock<HashMap<QueryKey, CacheEntry>>,
    /// Highest version ever written per key, kept across removal so
    /// superseded writes stay rejected after eviction.
    version_floor: RwLock<HashMap<QueryKey, Version>>,
    updates: broadcast::Sender<CacheUpdate>,
    refetch_tx: mpsc::UnboundedSender<QueryKey>,
    stats: CacheStats,
    config: CacheConfig,
}

impl EntityCache {
    /// Create a cache and the refetch-request receiver consumed by the
    /// engine's background refetch loop.
    pub fn new(config: CacheConfig) -> (Self, mpsc::UnboundedReceiver<QueryKey>) {
        let (updates, _) = broadcast::channel(config.update_capacity);
        let (refetch_tx, refetch_rx) = mpsc::unbounded_channel();
        (
            Self {
                entries: RwLock::new(HashMap::new()),
                version_floor: RwLock::new(HashMap::new()),
                updates,
                refetch_tx,
                stats: CacheStats::default(),
                config,
            },
            refetch_rx,
        )
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Read an entry, counting a hit or miss.
    pub fn read(&self, key: &QueryKey) -> Option<CacheEntry> {
        let entry = self.entries.read().unwrap().get(key).cloned();
        match entry {
            Some(entry) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Read an entry without touching the hit/miss counters. Used by the
    /// internal paths (snapshot, merge) that are not UI reads.
    pub fn peek(&self, key: &QueryKey) -> Option<CacheEntry> {
        self.entries.read().unwrap().get(key).cloned()
    }

    /// The current version for a key: the stored entry's version, or the
    /// retained floor if the entry was removed, or 0 for a never-seen key.
    pub fn version_of(&self, key: &QueryKey) -> Version {
        if let Some(entry) = self.entries.read().unwrap().get(key) {
            return entry.version;
        }
        self.version_floor
            .read()
            .unwrap()
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Write a demand-origin value. Returns false if the write was
    /// rejected as superseded.
    pub fn write(&self, key: QueryKey, value: CacheValue, version: Version) -> bool {
        self.write_with_origin(key, value, version, EntryOrigin::Demand)
    }

    /// Write a speculative value with the longer staleness window.
    pub fn write_prefetched(&self, key: QueryKey, value: CacheValue, version: Version) -> bool {
        self.write_with_origin(key, value, version, EntryOrigin::Prefetch)
    }

    fn write_with_origin(
        &self,
        key: QueryKey,
        value: CacheValue,
        version: Version,
        origin: EntryOrigin,
    ) -> bool {
        let window = match origin {
            EntryOrigin::Demand => self.config.demand_staleness,
            EntryOrigin::Prefetch => self.config.speculative_staleness,
        };
        let current = {
            // The gate and the insert happen under one write guard so two
            // racing writers cannot cross each other.
            let mut entries = self.entries.write().unwrap();
            let floor = self
                .version_floor
                .read()
                .unwrap()
                .get(&key)
                .copied()
                .unwrap_or(0);
            let current = entries
                .get(&key)
                .map(|entry| entry.version)
                .unwrap_or(0)
                .max(floor);
            if version > current {
                entries.insert(
                    key.clone(),
                    CacheEntry {
                        value,
                        version,
                        stale_at: Utc::now()
                            + chrono::Duration::from_std(window).unwrap_or_default(),
                        state: EntryState::Fresh,
                        origin,
                    },
                );
            }
            current
        };

        if version <= current {
            self.stats.rejected_writes.fetch_add(1, Ordering::Relaxed);
            debug!(
                family = key.family(),
                version, current, "rejected superseded cache write"
            );
            return false;
        }

        self.version_floor
            .write()
            .unwrap()
            .entry(key.clone())
            .and_modify(|floor| *floor = (*floor).max(version))
            .or_insert(version);
        let _ = self.updates.send(CacheUpdate { key, version });
        true
    }

    /// Remove an entry, keeping its version floor. Used by rollback when
    /// the pre-mutation snapshot was "absent".
    pub fn remove(&self, key: &QueryKey) {
        let removed = { self.entries.write().unwrap().remove(key) };
        if removed.is_some() {
            let version = self.version_of(key);
            let _ = self.updates.send(CacheUpdate {
                key: key.clone(),
                version,
            });
        }
    }

    /// Mark a key stale and request a background refetch. No-op for keys
    /// that were never cached.
    pub fn invalidate(&self, key: &QueryKey) {
        let mut entries = self.entries.write().unwrap();
        if let Some(entry) = entries.get_mut(key) {
            if entry.state == EntryState::Fresh {
                entry.state = EntryState::Stale;
            }
            let _ = self.refetch_tx.send(key.clone());
        }
    }

    /// Mark a key's refetch as in flight so repeated invalidations do not
    /// stack fetches.
    pub fn mark_invalidating(&self, key: &QueryKey) -> bool {
        let mut entries = self.entries.write().unwrap();
        match entries.get_mut(key) {
            Some(entry) if entry.state == EntryState::Stale => {
                entry.state = EntryState::Invalidating;
                true
            }
            _ => false,
        }
    }

    /// Return a key whose refetch failed to the `Stale` state so a later
    /// invalidation can schedule another attempt.
    pub fn refetch_failed(&self, key: &QueryKey) {
        let mut entries = self.entries.write().unwrap();
        if let Some(entry) = entries.get_mut(key) {
            if entry.state == EntryState::Invalidating {
                entry.state = EntryState::Stale;
            }
        }
    }

    /// Evict entries past their staleness window for which `retain`
    /// returns false (no active subscribers). Returns the eviction count.
    pub fn evict_idle(&self, now: DateTime<Utc>, retain: impl Fn(&QueryKey) -> bool) -> usize {
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|key, entry| now < entry.stale_at || retain(key));
        let evicted = before - entries.len();
        if evicted > 0 {
            self.stats
                .evictions
                .fetch_add(evicted as u64, Ordering::Relaxed);
            debug!(evicted, "evicted idle cache entries");
        }
        evicted
    }

    /// All keys currently cached.
    pub fn keys(&self) -> Vec<QueryKey> {
        self.entries.read().unwrap().keys().cloned().collect()
    }

    /// Subscribe to update notifications.
    pub fn watch(&self) -> broadcast::Receiver<CacheUpdate> {
        self.updates.subscribe()
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            rejected_writes: self.stats.rejected_writes.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vitrine_core::{ProductDetail, ProductId};

    fn product_key() -> (QueryKey, CacheValue) {
        let product_id = ProductId::generate();
        let key = QueryKey::ProductDetail { product_id };
        let value = CacheValue::Product(ProductDetail {
            product_id,
            name: "Walnut Desk Organizer".to_string(),
            description: None,
            price_cents: 4800,
            stock: 12,
            updated_at: Utc::now(),
        });
        (key, value)
    }

    #[test]
    fn test_write_then_read() {
        let (cache, _rx) = EntityCache::new(CacheConfig::default());
        let (key, value) = product_key();

        assert!(cache.write(key.clone(), value.clone(), 1));
        let entry = cache.read(&key).expect("entry present");
        assert_eq!(entry.value, value);
        assert_eq!(entry.version, 1);
        assert_eq!(entry.state, EntryState::Fresh);
    }

    #[test]
    fn test_superseded_write_rejected() {
        let (cache, _rx) = EntityCache::new(CacheConfig::default());
        let (key, value) = product_key();

        assert!(cache.write(key.clone(), value.clone(), 5));
        assert!(!cache.write(key.clone(), value.clone(), 5));
        assert!(!cache.write(key.clone(), value, 3));
        assert_eq!(cache.version_of(&key), 5);
        assert_eq!(cache.stats().rejected_writes, 2);
    }

    #[test]
    fn test_version_floor_survives_removal() {
        let (cache, _rx) = EntityCache::new(CacheConfig::default());
        let (key, value) = product_key();

        assert!(cache.write(key.clone(), value.clone(), 7));
        cache.remove(&key);
        assert!(cache.peek(&key).is_none());
        // A late write from a stale source must stay rejected.
        assert!(!cache.write(key.clone(), value.clone(), 4));
        assert!(cache.write(key, value, 8));
    }

    #[test]
    fn test_invalidate_marks_stale_and_requests_refetch() {
        let (cache, mut refetch_rx) = EntityCache::new(CacheConfig::default());
        let (key, value) = product_key();

        cache.write(key.clone(), value, 1);
        cache.invalidate(&key);

        assert_eq!(cache.peek(&key).unwrap().state, EntryState::Stale);
        assert_eq!(refetch_rx.try_recv().unwrap(), key);
    }

    #[test]
    fn test_invalidate_unknown_key_is_noop() {
        let (cache, mut refetch_rx) = EntityCache::new(CacheConfig::default());
        let (key, _) = product_key();
        cache.invalidate(&key);
        assert!(refetch_rx.try_recv().is_err());
    }

    #[test]
    fn test_write_notifies_watchers() {
        let (cache, _rx) = EntityCache::new(CacheConfig::default());
        let mut watcher = cache.watch();
        let (key, value) = product_key();

        cache.write(key.clone(), value, 1);
        let update = watcher.try_recv().expect("update broadcast");
        assert_eq!(update.key, key);
        assert_eq!(update.version, 1);
    }

    #[test]
    fn test_prefetched_entries_use_longer_window() {
        let config = CacheConfig::default()
            .with_demand_staleness(Duration::from_secs(10))
            .with_speculative_staleness(Duration::from_secs(600));
        let (cache, _rx) = EntityCache::new(config);
        let (key, value) = product_key();
        let (other_key, other_value) = product_key();

        cache.write(key.clone(), value, 1);
        cache.write_prefetched(other_key.clone(), other_value, 1);

        let demand = cache.peek(&key).unwrap();
        let prefetched = cache.peek(&other_key).unwrap();
        assert!(prefetched.stale_at > demand.stale_at);
        assert_eq!(prefetched.origin, EntryOrigin::Prefetch);
    }

    #[test]
    fn test_evict_idle_skips_retained_keys() {
        let (cache, _rx) = EntityCache::new(CacheConfig::default());
        let (kept, kept_value) = product_key();
        let (dropped, dropped_value) = product_key();

        cache.write(kept.clone(), kept_value, 1);
        cache.write(dropped.clone(), dropped_value, 1);

        let far_future = Utc::now() + chrono::Duration::hours(1);
        let evicted = cache.evict_idle(far_future, |key| *key == kept);

        assert_eq!(evicted, 1);
        assert!(cache.peek(&kept).is_some());
        assert!(cache.peek(&dropped).is_none());
        assert_eq!(cache.stats().evictions, 1);
    }
}
