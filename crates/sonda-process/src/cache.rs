use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use lru::LruCache;
use tokio::time::Instant;

use crate::manager::Info;

/// Snapshot of the process information cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of lookups which found a live entry.
    pub hits: u64,

    /// Number of lookups which found no live entry.
    pub misses: u64,

    /// Number of entries evicted because the cache was full.
    pub evictions: u64,

    /// Number of entries dropped because they were not accessed in time.
    pub expirations: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

struct CacheEntry {
    info: Arc<Info>,
    last_access: Instant,
}

/// Bounded cache of process information.
///
/// Entries expire when they are not accessed for longer than the TTL, and
/// the least recently used entry is evicted when the cache is full.
pub(crate) struct InfoCache {
    entries: Mutex<LruCache<u32, CacheEntry>>,
    ttl: Duration,
    counters: Counters,
}

impl InfoCache {
    pub fn new(max_entries: NonZeroUsize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(max_entries)),
            ttl,
            counters: Counters::default(),
        }
    }

    /// Returns the live entry of the given process, refreshing its TTL.
    pub fn get(&self, pid: u32) -> Option<Arc<Info>> {
        let now = Instant::now();
        let mut entries = self.lock();

        let info = match entries.get_mut(&pid) {
            Some(entry) if now.duration_since(entry.last_access) <= self.ttl => {
                entry.last_access = now;
                Some(entry.info.clone())
            }
            Some(_) => {
                entries.pop(&pid);
                self.counters.expirations.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(pid, "process information expired");
                None
            }
            None => None,
        };

        let counter = match info {
            Some(_) => &self.counters.hits,
            None => &self.counters.misses,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        info
    }

    /// Returns whether a live entry exists, without refreshing its TTL nor
    /// updating the counters.
    pub fn contains(&self, pid: u32) -> bool {
        let now = Instant::now();

        self.lock()
            .peek(&pid)
            .is_some_and(|entry| now.duration_since(entry.last_access) <= self.ttl)
    }

    /// Stores the information of a process.
    pub fn insert(&self, pid: u32, info: Arc<Info>) {
        let now = Instant::now();
        let mut entries = self.lock();

        self.purge_expired(&mut entries, now);

        let entry = CacheEntry {
            info,
            last_access: now,
        };

        if let Some((evicted_pid, _)) = entries.push(pid, entry) {
            if evicted_pid != pid {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(pid = evicted_pid, "process information evicted");
            }
        }
    }

    /// Returns the number of entries (including expired ones not purged yet).
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns a snapshot of the cache counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
        }
    }

    /// Drops expired entries.
    ///
    /// Since every access refreshes both the TTL and the LRU position, expired
    /// entries are the least recently used ones.
    fn purge_expired(&self, entries: &mut LruCache<u32, CacheEntry>, now: Instant) {
        while let Some((&pid, entry)) = entries.peek_lru() {
            if now.duration_since(entry.last_access) <= self.ttl {
                break;
            }

            entries.pop_lru();
            self.counters.expirations.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(pid, "process information expired");
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<u32, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
