// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Lookup path: snapshot read, cache read, or remote query with retry.

use std::ops::ControlFlow;

use tracing::{debug, error, info, warn};

use super::types::StatsCounters;
use super::{CacheMode, LookupEngine, LookupError};
use crate::resilience::retry::{QueryEvent, QueryState};
use crate::row::{Key, Row};
use crate::storage::{ExecutorError, QueryExecutor};

impl<E: QueryExecutor> LookupEngine<E> {
    /// Push every row matching `key` into `emit`, in stored (or remote
    /// result) order. Returns the number of rows emitted.
    ///
    /// - Full mode reads the published snapshot; a miss emits nothing.
    /// - Partial mode serves cache hits directly, otherwise queries the
    ///   remote store with retry and caches the result.
    ///
    /// # Errors
    ///
    /// [`LookupError::NotOpen`] outside `Ready`, and
    /// [`LookupError::RetriesExhausted`] / [`LookupError::Reconnect`] when the
    /// remote store cannot answer. No rows are emitted on error.
    pub async fn eval<F>(&self, key: &Key, mut emit: F) -> Result<usize, LookupError>
    where
        F: FnMut(Row) + Send,
    {
        if !self.is_ready() {
            return Err(LookupError::NotOpen);
        }
        let _timer = crate::metrics::LookupTimer::new(&self.instance_id);

        let result = match self.mode {
            CacheMode::Full { .. } => Ok(self.eval_snapshot(key, &mut emit)),
            CacheMode::Partial { .. } | CacheMode::Uncached => self.eval_remote(key, &mut emit).await,
        };

        match &result {
            Ok(emitted) => StatsCounters::bump(&self.stats.rows_emitted, *emitted as u64),
            Err(_) => {
                StatsCounters::bump(&self.stats.failed_lookups, 1);
                crate::metrics::record_lookup(&self.instance_id, "error");
            }
        }
        result
    }

    /// Collecting form of [`eval()`](Self::eval).
    pub async fn lookup(&self, key: &Key) -> Result<Vec<Row>, LookupError> {
        let mut rows = Vec::new();
        self.eval(key, |row| rows.push(row)).await?;
        Ok(rows)
    }

    fn eval_snapshot<F>(&self, key: &Key, emit: &mut F) -> usize
    where
        F: FnMut(Row),
    {
        StatsCounters::bump(&self.stats.snapshot_lookups, 1);
        let rows = self.refresher.cell().load().and_then(|snapshot| snapshot.get(key));
        match rows {
            Some(rows) => {
                crate::metrics::record_lookup(&self.instance_id, "snapshot_hit");
                rows.iter().cloned().for_each(&mut *emit);
                rows.len()
            }
            None => {
                crate::metrics::record_lookup(&self.instance_id, "snapshot_miss");
                0
            }
        }
    }

    async fn eval_remote<F>(&self, key: &Key, emit: &mut F) -> Result<usize, LookupError>
    where
        F: FnMut(Row) + Send,
    {
        // Taken once: a close() racing this lookup leaves us holding the
        // released cache, so whatever we insert below is simply dropped.
        let cache = self.partial.read().clone();

        if let Some(cache) = &cache {
            if let Some(rows) = cache.get(key) {
                StatsCounters::bump(&self.stats.cache_hits, 1);
                crate::metrics::record_lookup(&self.instance_id, "hit");
                rows.iter().cloned().for_each(&mut *emit);
                return Ok(rows.len());
            }
            StatsCounters::bump(&self.stats.cache_misses, 1);
            crate::metrics::record_lookup(&self.instance_id, "miss");
        } else {
            crate::metrics::record_lookup(&self.instance_id, "uncached");
        }

        StatsCounters::bump(&self.stats.remote_lookups, 1);
        let rows = self.query_with_retry(key).await?;
        let emitted = rows.len();

        if let Some(cache) = &cache {
            if !rows.is_empty() || self.config.cache_missing_key {
                if cache.put(key.clone(), rows.clone()) {
                    crate::metrics::record_evictions(&self.instance_id, 1);
                }
                crate::metrics::set_cache_entries(&self.instance_id, cache.len());
            }
        }

        rows.into_iter().for_each(&mut *emit);
        Ok(emitted)
    }

    /// Drive the retry state machine for one key.
    ///
    /// Rows are collected per attempt and returned only from a successful
    /// attempt, so a query that fails part-way never leaks rows.
    async fn query_with_retry(&self, key: &Key) -> Result<Vec<Row>, LookupError> {
        let policy = self.retry_policy;
        let mut state = policy.next(QueryState::Idle, QueryEvent::Start);
        let mut rows: Vec<Row> = Vec::new();
        let mut last_error: Option<ExecutorError> = None;
        let mut reconnect_failed = false;

        loop {
            state = match state {
                QueryState::Idle => policy.next(state, QueryEvent::Start),

                QueryState::Querying { attempt } => {
                    rows.clear();
                    let outcome = {
                        let mut sink = |row: Row| {
                            rows.push(row);
                            ControlFlow::Continue(())
                        };
                        self.executor.fetch_by_key(key, &mut sink).await
                    };
                    match outcome {
                        Ok(_) => {
                            crate::metrics::record_remote_query(&self.instance_id, true);
                            policy.next(state, QueryEvent::QueryOk)
                        }
                        Err(e) => {
                            crate::metrics::record_remote_query(&self.instance_id, false);
                            error!(
                                instance = %self.instance_id,
                                key = %key,
                                retry = attempt,
                                error = %e,
                                "Remote lookup query failed"
                            );
                            last_error = Some(e);
                            policy.next(state, QueryEvent::QueryFailed)
                        }
                    }
                }

                QueryState::Retrying { .. } => {
                    if self.executor.is_connection_valid().await {
                        policy.next(state, QueryEvent::ConnectionValid)
                    } else {
                        policy.next(state, QueryEvent::ConnectionInvalid)
                    }
                }

                QueryState::Reconnecting { attempt } => {
                    warn!(instance = %self.instance_id, retry = attempt, "Session is no longer valid; reconnecting");
                    match self.executor.reconnect().await {
                        Ok(()) => {
                            crate::metrics::record_reconnect(&self.instance_id, true);
                            info!(instance = %self.instance_id, "Reconnected to remote store");
                            policy.next(state, QueryEvent::Reconnected)
                        }
                        Err(e) => {
                            crate::metrics::record_reconnect(&self.instance_id, false);
                            error!(instance = %self.instance_id, error = %e, "Reconnect failed");
                            last_error = Some(e);
                            reconnect_failed = true;
                            policy.next(state, QueryEvent::ReconnectFailed)
                        }
                    }
                }

                QueryState::BackingOff { attempt, delay } => {
                    crate::metrics::record_retry(&self.instance_id);
                    debug!(instance = %self.instance_id, retry = attempt + 1, ?delay, "Backing off before retry");
                    tokio::time::sleep(delay).await;
                    policy.next(state, QueryEvent::BackoffElapsed)
                }

                QueryState::Succeeded { attempts } => {
                    if attempts > 1 {
                        info!(instance = %self.instance_id, key = %key, attempts, "Lookup succeeded after retries");
                    }
                    return Ok(rows);
                }

                QueryState::Failed { attempts } => {
                    let source = last_error
                        .unwrap_or_else(|| ExecutorError::Query("no attempt recorded".into()));
                    if reconnect_failed {
                        return Err(LookupError::Reconnect { source });
                    }
                    return Err(LookupError::RetriesExhausted { attempts, source });
                }
            };
        }
    }
}
