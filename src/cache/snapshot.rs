// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Full-table snapshots (full mode).
//!
//! A [`Snapshot`] is built in one pass by a [`SnapshotBuilder`] and is
//! immutable afterwards. The [`SnapshotCell`] holds the one snapshot that
//! lookups observe:
//!
//! ```text
//!  refresh task                       lookups
//!  ────────────                       ───────
//!  SnapshotBuilder::push(..) x N      cell.load() ──► Arc<Snapshot> (old)
//!  SnapshotBuilder::build()           cell.load() ──► Arc<Snapshot> (old)
//!  cell.publish(new) ── swap ──►      cell.load() ──► Arc<Snapshot> (new)
//! ```
//!
//! Readers hold the cell's lock only long enough to clone the `Arc`, and the
//! writer only long enough to swap it, so a reader sees either the old
//! snapshot in full or the new one in full.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::time::Instant;

use super::CachedRows;
use crate::row::{Key, Row};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("snapshot exceeds the configured ceiling of {ceiling} keys")]
    Overflow { ceiling: usize },
}

/// Immutable key → rows map from one bulk load.
#[derive(Debug)]
pub struct Snapshot {
    entries: HashMap<Key, CachedRows>,
    row_count: u64,
    built_at: Instant,
}

impl Snapshot {
    /// An empty snapshot.
    #[must_use]
    pub fn empty() -> Self {
        SnapshotBuilder::new(None).build()
    }

    #[must_use]
    pub fn get(&self, key: &Key) -> Option<CachedRows> {
        self.entries.get(key).cloned()
    }

    /// Distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rows loaded, across all keys.
    #[must_use]
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    #[must_use]
    pub fn built_at(&self) -> Instant {
        self.built_at
    }
}

/// Accumulates scanned rows, preserving arrival order within each key.
#[derive(Debug)]
pub struct SnapshotBuilder {
    entries: HashMap<Key, Vec<Row>>,
    ceiling: Option<usize>,
    row_count: u64,
}

impl SnapshotBuilder {
    /// `ceiling` caps the number of distinct keys; `None` is unbounded.
    #[must_use]
    pub fn new(ceiling: Option<usize>) -> Self {
        Self {
            entries: HashMap::new(),
            ceiling,
            row_count: 0,
        }
    }

    pub fn push(&mut self, key: Key, row: Row) -> Result<(), SnapshotError> {
        if let Some(ceiling) = self.ceiling {
            if self.entries.len() >= ceiling && !self.entries.contains_key(&key) {
                return Err(SnapshotError::Overflow { ceiling });
            }
        }
        self.entries.entry(key).or_default().push(row);
        self.row_count += 1;
        Ok(())
    }

    #[must_use]
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    #[must_use]
    pub fn build(self) -> Snapshot {
        Snapshot {
            entries: self
                .entries
                .into_iter()
                .map(|(k, rows)| (k, CachedRows::from(rows)))
                .collect(),
            row_count: self.row_count,
            built_at: Instant::now(),
        }
    }
}

/// The published snapshot, swapped atomically on refresh.
///
/// Once sealed the cell stays empty: publishing and sealing both run under
/// the write lock, so a build that completes after `seal` can never land.
#[derive(Debug, Default)]
pub struct SnapshotCell {
    live: RwLock<Option<Arc<Snapshot>>>,
    sealed: AtomicBool,
}

impl SnapshotCell {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The live snapshot, if one has been published.
    #[must_use]
    pub fn load(&self) -> Option<Arc<Snapshot>> {
        self.live.read().clone()
    }

    /// Make `snapshot` the live one. Returns the one it replaced, or hands
    /// `snapshot` back untouched if the cell is sealed.
    pub fn publish(&self, snapshot: Snapshot) -> Result<Option<Arc<Snapshot>>, Snapshot> {
        let mut live = self.live.write();
        if self.sealed.load(Ordering::Acquire) {
            return Err(snapshot);
        }
        Ok(live.replace(Arc::new(snapshot)))
    }

    /// Drop the live snapshot and refuse every later publish. Readers still
    /// holding an `Arc` keep theirs.
    pub fn seal(&self) -> Option<Arc<Snapshot>> {
        let mut live = self.live.write();
        self.sealed.store(true, Ordering::Release);
        live.take()
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }
}

/// Shared handle used by the engine and its refresh task.
pub type SharedSnapshotCell = Arc<SnapshotCell>;
