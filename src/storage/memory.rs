// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory table executor.
//!
//! Serves a fixed set of rows and lets callers inject faults: failing the
//! next N queries, failing everything, dropping the session, or breaking a
//! full scan part-way through. Used by the test suites and the demo.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::traits::{ExecutorError, QueryExecutor, RowSink};
use crate::row::{Key, Row};

pub struct InMemoryExecutor {
    rows: RwLock<Vec<Row>>,
    key_indices: Vec<usize>,
    connected: AtomicBool,
    closed: AtomicBool,
    fail_next: AtomicUsize,
    fail_always: AtomicBool,
    fail_establish: AtomicBool,
    fail_reconnect: AtomicBool,
    drop_session_on_failure: AtomicBool,
    /// Break `fetch_all` after this many rows (0 = never)
    fail_scan_after: AtomicUsize,
    scan_delay: RwLock<Option<Duration>>,
    query_delay: RwLock<Option<Duration>>,
    queries: AtomicU64,
    scans: AtomicU64,
    reconnects: AtomicU64,
}

impl InMemoryExecutor {
    /// Table keyed on the given field positions of each row.
    #[must_use]
    pub fn new(key_indices: Vec<usize>, rows: Vec<Row>) -> Self {
        Self {
            rows: RwLock::new(rows),
            key_indices,
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            fail_next: AtomicUsize::new(0),
            fail_always: AtomicBool::new(false),
            fail_establish: AtomicBool::new(false),
            fail_reconnect: AtomicBool::new(false),
            drop_session_on_failure: AtomicBool::new(false),
            fail_scan_after: AtomicUsize::new(0),
            scan_delay: RwLock::new(None),
            query_delay: RwLock::new(None),
            queries: AtomicU64::new(0),
            scans: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        }
    }

    /// Replace the table contents (simulates writes to the backing store).
    pub fn set_rows(&self, rows: Vec<Row>) {
        *self.rows.write() = rows;
    }

    /// Fail the next `n` keyed queries.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Fail every keyed query and scan until cleared.
    pub fn set_fail_always(&self, fail: bool) {
        self.fail_always.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_establish(&self, fail: bool) {
        self.fail_establish.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reconnect(&self, fail: bool) {
        self.fail_reconnect.store(fail, Ordering::SeqCst);
    }

    /// When set, an injected query failure also marks the session dead,
    /// so the next liveness probe reports invalid.
    pub fn set_drop_session_on_failure(&self, drop: bool) {
        self.drop_session_on_failure.store(drop, Ordering::SeqCst);
    }

    /// Break the next full scans after `rows` rows have been delivered.
    pub fn fail_scan_after(&self, rows: usize) {
        self.fail_scan_after.store(rows, Ordering::SeqCst);
    }

    /// Sleep before streaming each full scan.
    pub fn set_scan_delay(&self, delay: Option<Duration>) {
        *self.scan_delay.write() = delay;
    }

    /// Sleep before answering each keyed query.
    pub fn set_query_delay(&self, delay: Option<Duration>) {
        *self.query_delay.write() = delay;
    }

    /// Keyed query attempts, failed ones included.
    #[must_use]
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }

    /// Full scan attempts, failed ones included.
    #[must_use]
    pub fn scan_count(&self) -> u64 {
        self.scans.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> Result<(), ExecutorError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ExecutorError::Closed);
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ExecutorError::Connection("session not established".into()));
        }
        Ok(())
    }

    fn injected_failure(&self) -> Option<ExecutorError> {
        let fail = self.fail_always.load(Ordering::SeqCst)
            || self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if !fail {
            return None;
        }
        if self.drop_session_on_failure.load(Ordering::SeqCst) {
            self.connected.store(false, Ordering::SeqCst);
        }
        Some(ExecutorError::Query("injected failure".into()))
    }
}

#[async_trait]
impl QueryExecutor for InMemoryExecutor {
    fn name(&self) -> &str {
        "memory"
    }

    async fn establish(&self) -> Result<(), ExecutorError> {
        if self.fail_establish.load(Ordering::SeqCst) {
            return Err(ExecutorError::Connection("injected establish failure".into()));
        }
        self.closed.store(false, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_by_key(&self, key: &Key, sink: &mut RowSink<'_>) -> Result<u64, ExecutorError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let delay = *self.query_delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_open()?;
        if let Some(err) = self.injected_failure() {
            return Err(err);
        }

        let matching: Vec<Row> = self
            .rows
            .read()
            .iter()
            .filter(|row| &row.project(&self.key_indices) == key)
            .cloned()
            .collect();

        let mut pushed = 0;
        for row in matching {
            pushed += 1;
            if sink(row).is_break() {
                break;
            }
        }
        Ok(pushed)
    }

    async fn fetch_all(&self, sink: &mut RowSink<'_>) -> Result<u64, ExecutorError> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        let delay = *self.scan_delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_open()?;
        if self.fail_always.load(Ordering::SeqCst) {
            return Err(ExecutorError::Query("injected scan failure".into()));
        }

        let snapshot = self.rows.read().clone();
        let break_after = self.fail_scan_after.load(Ordering::SeqCst);
        let mut pushed = 0u64;
        for row in snapshot {
            if break_after > 0 && pushed as usize >= break_after {
                return Err(ExecutorError::Query(format!(
                    "injected scan failure after {} rows",
                    pushed
                )));
            }
            pushed += 1;
            if let ControlFlow::Break(()) = sink(row) {
                break;
            }
        }
        Ok(pushed)
    }

    async fn is_connection_valid(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.connected.load(Ordering::SeqCst)
    }

    async fn reconnect(&self) -> Result<(), ExecutorError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        if self.fail_reconnect.load(Ordering::SeqCst) {
            return Err(ExecutorError::Connection("injected reconnect failure".into()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), ExecutorError> {
        self.connected.store(false, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
