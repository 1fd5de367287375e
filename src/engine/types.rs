// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the lookup engine.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;

use crate::cache::SnapshotError;
use crate::storage::ExecutorError;

/// Errors surfaced to the embedding framework.
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("engine failed to initialize: {0}")]
    Initialization(String),
    #[error("engine is not open")]
    NotOpen,
    #[error("lookup failed after {attempts} attempts")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: ExecutorError,
    },
    #[error("reconnect to the remote store failed")]
    Reconnect {
        #[source]
        source: ExecutorError,
    },
}

/// Why a full-table refresh did not publish.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("full-table scan failed: {0}")]
    Scan(#[from] ExecutorError),
    #[error(transparent)]
    Overflow(#[from] SnapshotError),
    #[error("a refresh is already in progress")]
    Busy,
    #[error("engine is not serving a full snapshot")]
    Inactive,
}

/// Engine lifecycle state.
///
/// Use [`super::LookupEngine::state()`] to check the current state or
/// [`super::LookupEngine::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Constructed, `open()` not called yet
    Created,
    /// Establishing the session and loading the first snapshot
    Opening,
    /// Serving lookups
    Ready,
    /// Teardown in progress
    Closing,
    /// Torn down (or `open()` failed)
    Closed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Opening => write!(f, "Opening"),
            Self::Ready => write!(f, "Ready"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// Cache discipline, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Every lookup goes to the remote store
    Uncached,
    /// On-demand LRU cache with per-entry expiry
    Partial { capacity: NonZeroUsize, ttl: Duration },
    /// Whole-table snapshot, reloaded on a cron schedule
    Full { ceiling: Option<usize> },
}

impl CacheMode {
    #[must_use]
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full { .. })
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uncached => write!(f, "uncached"),
            Self::Partial { capacity, ttl } => write!(f, "partial(max={}, ttl={:?})", capacity, ttl),
            Self::Full { ceiling: Some(c) } => write!(f, "full(ceiling={})", c),
            Self::Full { ceiling: None } => write!(f, "full"),
        }
    }
}

/// Point-in-time lookup counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LookupStats {
    /// Served from the partial cache
    pub cache_hits: u64,
    /// Partial-cache misses that went to the remote store
    pub cache_misses: u64,
    /// Lookups answered by a remote query (misses plus uncached lookups)
    pub remote_lookups: u64,
    /// Lookups answered from the full snapshot, found or not
    pub snapshot_lookups: u64,
    /// Lookups that ended in an error
    pub failed_lookups: u64,
    /// Rows handed to callers
    pub rows_emitted: u64,
}

impl LookupStats {
    /// Partial-cache hit ratio, `None` before the first partial lookup.
    #[must_use]
    pub fn hit_rate(&self) -> Option<f64> {
        let total = self.cache_hits + self.cache_misses;
        (total > 0).then(|| self.cache_hits as f64 / total as f64)
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub remote_lookups: AtomicU64,
    pub snapshot_lookups: AtomicU64,
    pub failed_lookups: AtomicU64,
    pub rows_emitted: AtomicU64,
}

impl StatsCounters {
    pub fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LookupStats {
        LookupStats {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            remote_lookups: self.remote_lookups.load(Ordering::Relaxed),
            snapshot_lookups: self.snapshot_lookups.load(Ordering::Relaxed),
            failed_lookups: self.failed_lookups.load(Ordering::Relaxed),
            rows_emitted: self.rows_emitted.load(Ordering::Relaxed),
        }
    }
}
