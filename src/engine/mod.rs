// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Lookup engine.
//!
//! The [`LookupEngine`] ties together the remote executor, the cache store
//! for its mode, and (in full mode) the refresh scheduler:
//!
//! - **Uncached**: every lookup queries the remote store
//! - **Partial**: LRU + TTL cache in front of the remote store
//! - **Full**: whole-table snapshot, reloaded on a cron schedule; lookups
//!   never reach the remote store
//!
//! # Lifecycle
//!
//! ```text
//! Created → Opening → Ready → Closing → Closed
//!              │                          ▲
//!              └──── open() failed ───────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use lookup_cache::{EngineState, InMemoryExecutor, Key, LookupConfig, LookupEngine, Row, Value};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = LookupConfig {
//!     field_names: vec!["id".into(), "name".into()],
//!     key_names: vec!["id".into()],
//!     cache_max_size: 100,
//!     cache_ttl: 60_000,
//!     ..Default::default()
//! };
//! let rows = vec![Row::new(vec![Value::Int(1), Value::from("alice")])];
//! let executor = Arc::new(InMemoryExecutor::new(vec![0], rows));
//!
//! let engine = LookupEngine::new(config, executor).unwrap();
//! engine.open().await.unwrap();
//! assert_eq!(engine.state(), EngineState::Ready);
//!
//! let found = engine.lookup(&Key::new(vec![Value::Int(1)])).await.unwrap();
//! assert_eq!(found.len(), 1);
//! assert_eq!(engine.cache_size(), 1);
//!
//! engine.close().await;
//! # }
//! ```

mod lifecycle;
mod lookup;
mod refresh;
mod types;

pub use types::{CacheMode, EngineState, LookupError, LookupStats, RefreshError};

use std::num::NonZeroUsize;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;

use crate::cache::partial::SharedPartialCache;
use crate::config::LookupConfig;
use crate::resilience::LookupRetryPolicy;
use crate::scheduler::{CronSchedule, RefreshScheduler};
use crate::storage::QueryExecutor;

use refresh::Refresher;
use types::StatsCounters;

/// One lookup-cache instance (one per parallel task of the host job).
///
/// # Thread Safety
///
/// The engine is `Send + Sync`; every operation takes `&self`, so one engine
/// can serve concurrent lookups from behind an `Arc`.
pub struct LookupEngine<E: QueryExecutor> {
    pub(super) config: LookupConfig,

    /// Unique per instance; labels logs, metrics and schedule ids
    pub(super) instance_id: String,

    pub(super) mode: CacheMode,

    /// Key field positions within a row
    pub(super) key_indices: Vec<usize>,

    pub(super) retry_policy: LookupRetryPolicy,

    /// Parsed refresh schedule (full mode only)
    pub(super) refresh_schedule: Option<CronSchedule>,

    pub(super) executor: Arc<E>,

    /// Engine state (broadcast to watchers)
    pub(super) state: watch::Sender<EngineState>,

    /// Engine state receiver (for internal use)
    pub(super) state_rx: watch::Receiver<EngineState>,

    /// Partial-mode cache; `None` until open and after close
    pub(super) partial: RwLock<Option<SharedPartialCache>>,

    /// Full-mode snapshot and its refresh procedure
    pub(super) refresher: Arc<Refresher<E>>,

    /// Full-mode scheduler, owned from open to close
    pub(super) scheduler: Mutex<Option<RefreshScheduler>>,

    pub(super) stats: StatsCounters,
}

impl<E: QueryExecutor> LookupEngine<E> {
    /// Create an engine over `executor`.
    ///
    /// The engine starts in `Created` state. Call [`open()`](Self::open)
    /// before issuing lookups.
    ///
    /// # Errors
    ///
    /// [`LookupError::Config`] if the configuration is inconsistent.
    pub fn new(config: LookupConfig, executor: Arc<E>) -> Result<Self, LookupError> {
        config.validate()?;
        let key_indices = config.key_indices()?;

        let mode = if config.cache_all {
            CacheMode::Full {
                ceiling: config.cache_max_size(),
            }
        } else {
            match (
                config.cache_max_size().and_then(NonZeroUsize::new),
                config.cache_ttl(),
            ) {
                (Some(capacity), Some(ttl)) => CacheMode::Partial { capacity, ttl },
                _ => CacheMode::Uncached,
            }
        };

        let refresh_schedule = match (&mode, config.cache_all_refresh_schedule.as_deref()) {
            (CacheMode::Full { .. }, Some(expr)) => {
                Some(CronSchedule::parse(expr).map_err(|e| LookupError::Config(e.to_string()))?)
            }
            _ => None,
        };

        let instance_id = format!("{}-{}", executor.name(), short_id());
        let refresher = Arc::new(Refresher::new(
            instance_id.clone(),
            executor.clone(),
            key_indices.clone(),
            match mode {
                CacheMode::Full { ceiling } => ceiling,
                _ => None,
            },
        ));
        let (state_tx, state_rx) = watch::channel(EngineState::Created);

        Ok(Self {
            retry_policy: LookupRetryPolicy::new(config.max_retry_times, config.retry_backoff()),
            config,
            instance_id,
            mode,
            key_indices,
            refresh_schedule,
            executor,
            state: state_tx,
            state_rx,
            partial: RwLock::new(None),
            refresher,
            scheduler: Mutex::new(None),
            stats: StatsCounters::default(),
        })
    }

    /// Get current engine state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    /// Check if the engine is serving lookups.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == EngineState::Ready
    }

    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    #[must_use]
    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    #[must_use]
    pub fn config(&self) -> &LookupConfig {
        &self.config
    }

    /// Positions of the key fields within each row.
    #[must_use]
    pub fn key_indices(&self) -> &[usize] {
        &self.key_indices
    }

    #[must_use]
    pub fn executor(&self) -> &Arc<E> {
        &self.executor
    }

    /// Keys held by the live cache store: partial-cache entries, or distinct
    /// keys of the published snapshot. Zero when caching is off or released.
    #[must_use]
    pub fn cache_size(&self) -> usize {
        match self.mode {
            CacheMode::Full { .. } => self.refresher.cell().load().map_or(0, |s| s.len()),
            _ => self.partial.read().as_ref().map_or(0, |c| c.len()),
        }
    }

    /// Row count of the last successful bulk load. Stays 0 outside full mode.
    #[must_use]
    pub fn loaded_row_count(&self) -> u64 {
        self.refresher.loaded_rows()
    }

    /// `(successful, failed)` full-table refreshes so far.
    #[must_use]
    pub fn refresh_counts(&self) -> (u64, u64) {
        self.refresher.run_counts()
    }

    #[must_use]
    pub fn stats(&self) -> LookupStats {
        self.stats.snapshot()
    }
}

impl<E: QueryExecutor> std::fmt::Debug for LookupEngine<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LookupEngine")
            .field("instance_id", &self.instance_id)
            .field("mode", &self.mode)
            .field("state", &self.state())
            .field("cache_size", &self.cache_size())
            .finish()
    }
}

fn short_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}
