//! Bounded TTL + LRU cache for admitted events.
//!
//! - Entries expire `ttl` after insertion; `get` drops stale entries lazily.
//! - At capacity, a new key evicts the least-recently-accessed entry.
//! - Every operation is one short critical section with no I/O.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::{CacheConfig, MAX_CACHE_TTL_SECS};

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: Instant,
    pub last_accessed: Instant,
    pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

struct Inner<V> {
    entries: LruCache<String, CacheEntry<V>>,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub ttl_seconds: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub hit_rate_pct: f64,
}

pub struct Cache<V> {
    inner: Mutex<Inner<V>>,
    ttl: Duration,
    capacity: NonZeroUsize,
}

impl<V: Clone> Cache<V> {
    /// A zero `max_size` is treated as 1.
    pub fn new(cfg: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(cfg.max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
                evictions: 0,
                expirations: 0,
            }),
            ttl: Duration::from_secs(cfg.ttl_seconds.min(MAX_CACHE_TTL_SECS)),
            capacity,
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        match inner.entries.get_mut(key) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(entry) if entry.is_expired(now) => {}
            Some(entry) => {
                entry.last_accessed = now;
                inner.hits += 1;
                return Some(entry.value.clone());
            }
        }

        inner.entries.pop(key);
        inner.expirations += 1;
        inner.misses += 1;
        tracing::trace!(key, "[CACHE] entry expired");
        None
    }

    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_at(key, value, Instant::now());
    }

    pub fn set_at(&self, key: impl Into<String>, value: V, now: Instant) {
        let key = key.into();
        let entry = CacheEntry {
            value,
            created_at: now,
            last_accessed: now,
            expires_at: now + self.ttl,
        };

        let mut inner = self.inner.lock();
        // `push` hands back the displaced entry: either the old value for this key or the LRU victim.
        if let Some((displaced, _)) = inner.entries.push(key.clone(), entry) {
            if displaced != key {
                inner.evictions += 1;
                tracing::trace!(evicted = %displaced, "[CACHE] capacity eviction");
            }
        }
    }

    /// Returns true if the key was present.
    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().entries.pop(key).is_some()
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Instant::now())
    }

    /// Remove every expired entry; returns the number removed.
    pub fn cleanup_expired_at(&self, now: Instant) -> usize {
        let mut inner = self.inner.lock();
        let stale: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            inner.entries.pop(key);
        }
        inner.expirations += stale.len() as u64;
        stale.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let lookups = inner.hits + inner.misses;
        CacheStats {
            size: inner.entries.len(),
            capacity: self.capacity.get(),
            ttl_seconds: self.ttl.as_secs(),
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            expirations: inner.expirations,
            hit_rate_pct: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64 * 100.0
            },
        }
    }
}
