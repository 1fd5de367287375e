// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::ops::ControlFlow;

use async_trait::async_trait;
use thiserror::Error;

use crate::row::{Key, Row};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("row decode failed: {0}")]
    Decode(String),
    #[error("session is closed")]
    Closed,
}

/// Receives rows as the driver yields them. Returning
/// `ControlFlow::Break` stops the scan early; the fetch still returns `Ok`.
pub type RowSink<'a> = dyn FnMut(Row) -> ControlFlow<()> + Send + 'a;

/// Remote store access for the lookup engine.
///
/// Rows are pushed into a [`RowSink`] while the result set is being read,
/// so a full-table scan never has to hold the whole result in memory.
///
/// Faults are surfaced as-is. Retrying is the caller's job; the executor
/// only offers a liveness probe and a reconnect that rebuilds the session.
#[async_trait]
pub trait QueryExecutor: Send + Sync + 'static {
    /// Short name for logs and metric labels.
    fn name(&self) -> &str;

    /// Open the session. Called once from the engine's `open()`.
    async fn establish(&self) -> Result<(), ExecutorError>;

    /// Parameterized query: every row whose key fields equal `key`.
    /// Returns the number of rows pushed into `sink`.
    async fn fetch_by_key(&self, key: &Key, sink: &mut RowSink<'_>) -> Result<u64, ExecutorError>;

    /// Unparameterized scan of the whole table.
    async fn fetch_all(&self, sink: &mut RowSink<'_>) -> Result<u64, ExecutorError>;

    /// Cheap probe of the current session.
    async fn is_connection_valid(&self) -> bool;

    /// Drop the current session and open a fresh one.
    async fn reconnect(&self) -> Result<(), ExecutorError>;

    /// Release the session. Further fetches fail with [`ExecutorError::Closed`].
    async fn close(&self) -> Result<(), ExecutorError>;
}
