// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote query executors.
//!
//! - [`traits`]: the [`QueryExecutor`] contract and [`ExecutorError`]
//! - [`sql`]: sqlx `Any` pool (SQLite, MySQL, PostgreSQL)
//! - [`memory`]: in-memory table with fault injection

pub mod traits;
pub mod sql;
pub mod memory;

pub use memory::InMemoryExecutor;
pub use sql::SqlQueryExecutor;
pub use traits::{ExecutorError, QueryExecutor, RowSink};
