// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded LRU cache with per-entry expiry (partial mode).
//!
//! Entries are stamped with [`tokio::time::Instant`] on insert, so tests can
//! drive expiry with a paused clock. An entry is fresh while
//! `now < inserted_at + ttl`; once expired it is dropped on the next read.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::CachedRows;
use crate::row::{Key, Row};

struct Entry {
    rows: CachedRows,
    inserted_at: Instant,
}

pub struct PartialCache {
    entries: Mutex<LruCache<Key, Entry>>,
    capacity: NonZeroUsize,
    ttl: Duration,
    evictions: AtomicU64,
}

impl PartialCache {
    #[must_use]
    pub fn new(capacity: NonZeroUsize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            capacity,
            ttl,
            evictions: AtomicU64::new(0),
        }
    }

    /// Cached rows for `key`. `None` means "not cached", which is distinct
    /// from `Some` of an empty slice ("cached as no match").
    ///
    /// A hit promotes the entry to most-recently-used.
    pub fn get(&self, key: &Key) -> Option<CachedRows> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            None => return None,
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                return Some(entry.rows.clone());
            }
            Some(_) => {}
        }
        entries.pop(key);
        None
    }

    /// Insert or replace the rows for `key`, evicting the least-recently-used
    /// entry when full. Returns `true` if another key was evicted.
    pub fn put(&self, key: Key, rows: Vec<Row>) -> bool {
        let entry = Entry {
            rows: rows.into(),
            inserted_at: Instant::now(),
        };
        let displaced = self.entries.lock().push(key.clone(), entry);
        match displaced {
            Some((old_key, _)) if old_key != key => {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }

    /// Entries currently held, expired-but-unread ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Total LRU evictions since creation.
    #[must_use]
    pub fn eviction_count(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl std::fmt::Debug for PartialCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartialCache")
            .field("entries", &self.len())
            .field("capacity", &self.capacity)
            .field("ttl", &self.ttl)
            .field("evictions", &self.eviction_count())
            .finish()
    }
}

/// Shared handle used by the engine.
pub type SharedPartialCache = Arc<PartialCache>;
