// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Full-table refresh: scan, build a fresh snapshot, publish it.
//!
//! The scan feeds a private [`SnapshotBuilder`]; the live [`SnapshotCell`] is
//! only touched at the final swap. Any failure before that point leaves the
//! previously published snapshot exactly as it was.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::types::RefreshError;
use crate::cache::snapshot::SharedSnapshotCell;
use crate::cache::{SnapshotBuilder, SnapshotCell, SnapshotError};
use crate::row::Row;
use crate::scheduler::RefreshTask;
use crate::storage::QueryExecutor;

/// Owns everything the refresh path needs, so the scheduled task can hold
/// it without borrowing the engine.
pub(crate) struct Refresher<E: QueryExecutor> {
    instance: String,
    executor: Arc<E>,
    cell: SharedSnapshotCell,
    key_indices: Vec<usize>,
    ceiling: Option<usize>,
    loaded_rows: AtomicU64,
    refreshes: AtomicU64,
    failed_refreshes: AtomicU64,
    /// Single-flight guard shared by scheduled and on-demand refreshes.
    in_flight: Mutex<()>,
}

impl<E: QueryExecutor> Refresher<E> {
    pub(crate) fn new(
        instance: String,
        executor: Arc<E>,
        key_indices: Vec<usize>,
        ceiling: Option<usize>,
    ) -> Self {
        Self {
            instance,
            executor,
            cell: Arc::new(SnapshotCell::new()),
            key_indices,
            ceiling,
            loaded_rows: AtomicU64::new(0),
            refreshes: AtomicU64::new(0),
            failed_refreshes: AtomicU64::new(0),
            in_flight: Mutex::new(()),
        }
    }

    pub(crate) fn cell(&self) -> &SnapshotCell {
        &self.cell
    }

    /// Row count of the last published snapshot.
    pub(crate) fn loaded_rows(&self) -> u64 {
        self.loaded_rows.load(Ordering::Relaxed)
    }

    /// `(successful, failed)` refresh runs; busy skips are not counted.
    pub(crate) fn run_counts(&self) -> (u64, u64) {
        (
            self.refreshes.load(Ordering::Relaxed),
            self.failed_refreshes.load(Ordering::Relaxed),
        )
    }

    /// Scan the table and publish a fresh snapshot. Returns the row count.
    #[tracing::instrument(skip(self), fields(instance = %self.instance))]
    pub(crate) async fn refresh(&self) -> Result<u64, RefreshError> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            warn!("Refresh already in progress; skipping this run");
            crate::metrics::record_refresh(&self.instance, "busy");
            return Err(RefreshError::Busy);
        };

        let start = Instant::now();
        debug!("Starting full-table scan");

        match self.build().await {
            Ok(builder) => {
                let snapshot = builder.build();
                let rows = snapshot.row_count();
                let keys = snapshot.len();
                let built_at = snapshot.built_at();

                if self.cell.publish(snapshot).is_err() {
                    info!(rows, "Engine closed during refresh; discarding snapshot");
                    crate::metrics::record_refresh(&self.instance, "discarded");
                    return Ok(rows);
                }
                self.loaded_rows.store(rows, Ordering::Relaxed);
                self.refreshes.fetch_add(1, Ordering::Relaxed);

                let scan = built_at.duration_since(start);
                let elapsed = start.elapsed();
                info!(
                    rows,
                    keys,
                    scan_ms = scan.as_millis() as u64,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Snapshot published"
                );
                crate::metrics::set_loaded_rows(&self.instance, rows);
                crate::metrics::set_cache_entries(&self.instance, keys);
                crate::metrics::record_refresh(&self.instance, "success");
                crate::metrics::record_refresh_latency(&self.instance, elapsed);
                Ok(rows)
            }
            Err(e) => {
                self.failed_refreshes.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, "Refresh failed; keeping the previous snapshot");
                crate::metrics::record_refresh(&self.instance, "error");
                Err(e)
            }
        }
    }

    async fn build(&self) -> Result<SnapshotBuilder, RefreshError> {
        let mut builder = SnapshotBuilder::new(self.ceiling);
        let mut overflow: Option<SnapshotError> = None;

        let scanned = {
            let key_indices = &self.key_indices;
            let mut sink = |row: Row| {
                let key = row.project(key_indices);
                match builder.push(key, row) {
                    Ok(()) => ControlFlow::Continue(()),
                    Err(e) => {
                        overflow = Some(e);
                        ControlFlow::Break(())
                    }
                }
            };
            self.executor.fetch_all(&mut sink).await
        };

        if let Some(e) = overflow {
            return Err(e.into());
        }
        scanned?;
        Ok(builder)
    }

    /// Stop publishing and drop the live snapshot.
    pub(crate) fn release(&self) {
        self.cell.seal();
    }

    /// Wrap this refresher as a scheduler job. Failures are already logged.
    pub(crate) fn task(self: &Arc<Self>) -> RefreshTask {
        let refresher = Arc::clone(self);
        Arc::new(move || {
            let refresher = Arc::clone(&refresher);
            Box::pin(async move {
                let _ = refresher.refresh().await;
            })
        })
    }
}
