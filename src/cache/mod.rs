// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache stores.
//!
//! - [`partial`]: LRU + TTL, filled key by key from remote lookups
//! - [`snapshot`]: whole-table snapshot, built in one pass and published atomically

pub mod partial;
pub mod snapshot;

use std::sync::Arc;

use crate::row::Row;

/// A cached result sequence. Cloning is an `Arc` bump.
pub type CachedRows = Arc<[Row]>;

pub use partial::PartialCache;
pub use snapshot::{Snapshot, SnapshotBuilder, SnapshotCell, SnapshotError};
