//! Process-local TTL cache for schema-version reads.
//!
//! Reads take the reader lock; expiry is lazy. Entries past their deadline
//! count as misses and are swept when a write lands after the purge period.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Hit/miss counters double as the test seam: a miss is exactly one
/// database read on the version path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

struct Entry<T> {
    value: T,
    expires_at: Instant,
}

pub struct TtlCache<T> {
    entries: RwLock<HashMap<String, Entry<T>>>,
    ttl: Duration,
    purge_interval: Duration,
    last_purge: Mutex<Instant>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration, purge_interval: Duration) -> Self {
        TtlCache {
            entries: RwLock::new(HashMap::new()),
            ttl,
            purge_interval,
            last_purge: Mutex::new(Instant::now()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<T> {
        let entries = self.entries.read().expect("cache lock poisoned");
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, key: impl Into<String>, value: T) {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        entries.insert(
            key.into(),
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
        self.maybe_purge(&mut entries);
    }

    pub fn remove(&self, key: &str) {
        self.entries
            .write()
            .expect("cache lock poisoned")
            .remove(key);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.read().expect("cache lock poisoned").len(),
        }
    }

    fn maybe_purge(&self, entries: &mut HashMap<String, Entry<T>>) {
        let mut last = self.last_purge.lock().expect("cache lock poisoned");
        let now = Instant::now();
        if now.duration_since(*last) < self.purge_interval {
            return;
        }
        *last = now;
        entries.retain(|_, entry| entry.expires_at > now);
    }
}
