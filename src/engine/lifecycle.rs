// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine lifecycle management: open, close, on-demand refresh.

use std::sync::Arc;

use tracing::{error, info, warn};

use super::{CacheMode, EngineState, LookupEngine, LookupError, RefreshError};
use crate::cache::PartialCache;
use crate::scheduler::RefreshScheduler;
use crate::storage::QueryExecutor;

impl<E: QueryExecutor> LookupEngine<E> {
    /// Open the engine.
    ///
    /// Startup flow:
    /// 1. Establish the remote session
    /// 2. Full mode: load the first snapshot synchronously, then register the
    ///    recurring refresh with a scheduler owned by this engine
    /// 3. Partial mode: create the empty LRU cache (if size and TTL are set)
    /// 4. Ready
    ///
    /// # Errors
    ///
    /// [`LookupError::Initialization`] if any step fails. The engine is left
    /// `Closed` with its session released; it is never half-open.
    #[tracing::instrument(skip(self), fields(instance = %self.instance_id, mode = %self.mode))]
    pub async fn open(&self) -> Result<(), LookupError> {
        let claimed = self.state.send_if_modified(|state| {
            if *state == EngineState::Created {
                *state = EngineState::Opening;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(LookupError::Initialization(format!(
                "cannot open engine in state {}",
                self.state()
            )));
        }
        info!("Opening lookup engine...");

        if let Err(e) = self.executor.establish().await {
            return self
                .abort_open(format!("failed to establish session with {}: {}", self.executor.name(), e))
                .await;
        }

        match self.mode {
            CacheMode::Full { .. } => {
                if let Err(reason) = self.start_full_mode().await {
                    return self.abort_open(reason).await;
                }
            }
            CacheMode::Partial { capacity, ttl } => {
                *self.partial.write() = Some(Arc::new(PartialCache::new(capacity, ttl)));
                crate::metrics::set_cache_entries(&self.instance_id, 0);
                info!(capacity = capacity.get(), ttl_ms = ttl.as_millis() as u64, "Partial cache enabled");
            }
            CacheMode::Uncached => {
                info!("Caching disabled; every lookup queries the remote store");
            }
        }

        let _ = self.state.send(EngineState::Ready);
        info!("Lookup engine ready");
        Ok(())
    }

    async fn start_full_mode(&self) -> Result<(), String> {
        let rows = self
            .refresher
            .refresh()
            .await
            .map_err(|e| format!("initial full load failed: {}", e))?;
        info!(rows, "Initial snapshot loaded");

        let schedule = self
            .refresh_schedule
            .clone()
            .ok_or_else(|| "full mode requires a refresh schedule".to_string())?;
        let scheduler = RefreshScheduler::new(self.instance_id.clone()).map_err(|e| e.to_string())?;
        let id = scheduler
            .schedule(schedule, self.refresher.task())
            .map_err(|e| e.to_string())?;
        info!(schedule_id = %id, "Recurring refresh registered");

        *self.scheduler.lock() = Some(scheduler);
        Ok(())
    }

    async fn abort_open(&self, reason: String) -> Result<(), LookupError> {
        error!(reason = %reason, "Failed to open lookup engine");
        self.teardown().await;
        let _ = self.state.send(EngineState::Closed);
        Err(LookupError::Initialization(reason))
    }

    /// Close the engine.
    ///
    /// Releases the cache, closes the remote session, and cancels the refresh
    /// schedule. Each step runs even if an earlier one failed; failures are
    /// logged, never returned. An in-flight refresh or lookup finishes on its
    /// own and its result is discarded. Closing twice is a no-op.
    #[tracing::instrument(skip(self), fields(instance = %self.instance_id))]
    pub async fn close(&self) {
        let mut previous = EngineState::Closed;
        let claimed = self.state.send_if_modified(|state| {
            previous = *state;
            match *state {
                EngineState::Closing | EngineState::Closed => false,
                _ => {
                    *state = EngineState::Closing;
                    true
                }
            }
        });
        if !claimed {
            return;
        }
        info!(from = %previous, "Closing lookup engine...");

        let failures = self.teardown().await;

        let _ = self.state.send(EngineState::Closed);
        if failures == 0 {
            info!("Lookup engine closed");
        } else {
            warn!(failures, "Lookup engine closed with teardown errors");
        }
    }

    /// Best-effort teardown. Returns the number of steps that failed.
    async fn teardown(&self) -> usize {
        let mut failures = 0;

        // 1. Release the cache
        let partial = self.partial.write().take();
        if let Some(cache) = partial {
            cache.clear();
        }
        self.refresher.release();
        crate::metrics::set_cache_entries(&self.instance_id, 0);

        // 2. Close the remote session
        if let Err(e) = self.executor.close().await {
            failures += 1;
            warn!(error = %e, executor = self.executor.name(), "Failed to close remote session");
        }

        // 3. Cancel the refresh schedule
        let scheduler = self.scheduler.lock().take();
        if let Some(scheduler) = scheduler {
            let cancelled = scheduler.shutdown();
            info!(cancelled, "Refresh schedule cancelled");
        }

        failures
    }

    /// Run a full-table refresh now, outside the cron schedule.
    ///
    /// Shares the single-flight guard with scheduled runs: if one is already
    /// in progress this returns [`RefreshError::Busy`] without scanning.
    /// Returns the row count of the published snapshot. On failure the
    /// previous snapshot stays live.
    pub async fn refresh_now(&self) -> Result<u64, RefreshError> {
        if !self.is_ready() || !self.mode.is_full() {
            return Err(RefreshError::Inactive);
        }
        self.refresher.refresh().await
    }
}
