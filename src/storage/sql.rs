// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL executor over the sqlx `Any` driver.
//!
//! Two statements are derived from the config once, at construction:
//!
//! ```sql
//! -- keyed lookup (partial mode)
//! SELECT id, name, tier FROM customers WHERE id = ?
//! -- full scan (snapshot mode)
//! SELECT id, name, tier FROM customers
//! ```
//!
//! PostgreSQL URLs get `$n` placeholders; everything else gets `?`.
//!
//! ## Sessions
//!
//! The session is a pooled `AnyPool`. sqlx keeps prepared statements per
//! connection, so [`reconnect`](QueryExecutor::reconnect) closing the pool
//! and opening a new one also discards and re-prepares the keyed statement.
//!
//! ## sqlx Any driver quirks
//!
//! The `Any` row exposes no stable type names across backends, so
//! [`decode_row`] probes the Rust types in a fixed order
//! (`i64`, `f64`, `String`, `bool`, `Vec<u8>`). SQLite booleans therefore
//! come back as `Value::Int`.

use std::ops::ControlFlow;
use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use parking_lot::RwLock;
use sqlx::any::{AnyArguments, AnyPoolOptions, AnyRow};
use sqlx::query::Query;
use sqlx::{Any, AnyPool, Row as _, ValueRef};
use tracing::{debug, info, warn};

use super::traits::{ExecutorError, QueryExecutor, RowSink};
use crate::config::LookupConfig;
use crate::resilience::retry::{retry, RetryConfig};
use crate::row::{Key, Row, Value};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

const VALIDATION_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqlQueryExecutor {
    url: String,
    max_connections: u32,
    select_by_key: String,
    select_all: String,
    pool: RwLock<Option<AnyPool>>,
}

impl SqlQueryExecutor {
    /// Build the executor and its statements. Does not connect; the engine
    /// calls [`establish`](QueryExecutor::establish) from `open()`.
    pub fn new(config: &LookupConfig) -> Result<Self, ExecutorError> {
        let url = config
            .sql_url
            .clone()
            .ok_or_else(|| ExecutorError::Connection("no sql-url configured".into()))?;
        if config.table_name.is_empty() || config.field_names.is_empty() {
            return Err(ExecutorError::Query(
                "table-name and field-names are required".into(),
            ));
        }

        let numbered = url.starts_with("postgres:") || url.starts_with("postgresql:");
        let (select_by_key, select_all) = build_statements(
            &config.table_name,
            &config.field_names,
            &config.key_names,
            numbered,
        );

        Ok(Self {
            url,
            max_connections: config.max_pool_size.max(1),
            select_by_key,
            select_all,
            pool: RwLock::new(None),
        })
    }

    #[must_use]
    pub fn select_by_key_sql(&self) -> &str {
        &self.select_by_key
    }

    #[must_use]
    pub fn select_all_sql(&self) -> &str {
        &self.select_all
    }

    async fn connect(&self) -> Result<AnyPool, ExecutorError> {
        install_drivers();
        AnyPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(300))
            .connect(&self.url)
            .await
            .map_err(|e| ExecutorError::Connection(e.to_string()))
    }

    fn current_pool(&self) -> Result<AnyPool, ExecutorError> {
        self.pool.read().clone().ok_or(ExecutorError::Closed)
    }

    async fn stream_rows<'a>(
        &self,
        query: Query<'a, Any, AnyArguments<'a>>,
        pool: &AnyPool,
        sink: &mut RowSink<'_>,
    ) -> Result<u64, ExecutorError> {
        let mut rows = query.fetch(pool);
        let mut pushed = 0u64;
        while let Some(row) = rows
            .try_next()
            .await
            .map_err(|e| ExecutorError::Query(e.to_string()))?
        {
            pushed += 1;
            if sink(decode_row(&row)?).is_break() {
                break;
            }
        }
        Ok(pushed)
    }
}

#[async_trait]
impl QueryExecutor for SqlQueryExecutor {
    fn name(&self) -> &str {
        "sql"
    }

    async fn establish(&self) -> Result<(), ExecutorError> {
        if self.pool.read().is_some() {
            return Ok(());
        }
        let pool = retry("sql_connect", &RetryConfig::startup(), || self.connect()).await?;
        info!(max_connections = self.max_connections, "SQL session established");
        *self.pool.write() = Some(pool);
        Ok(())
    }

    async fn fetch_by_key(&self, key: &Key, sink: &mut RowSink<'_>) -> Result<u64, ExecutorError> {
        let pool = self.current_pool()?;
        let query = key
            .values()
            .iter()
            .fold(sqlx::query(&self.select_by_key), bind_value);
        self.stream_rows(query, &pool, sink).await
    }

    async fn fetch_all(&self, sink: &mut RowSink<'_>) -> Result<u64, ExecutorError> {
        let pool = self.current_pool()?;
        let pushed = self
            .stream_rows(sqlx::query(&self.select_all), &pool, sink)
            .await?;
        debug!(rows = pushed, "Full table scan finished");
        Ok(pushed)
    }

    async fn is_connection_valid(&self) -> bool {
        let Ok(pool) = self.current_pool() else {
            return false;
        };
        if pool.is_closed() {
            return false;
        }
        let probe = sqlx::query("SELECT 1").fetch_one(&pool);
        matches!(tokio::time::timeout(VALIDATION_TIMEOUT, probe).await, Ok(Ok(_)))
    }

    async fn reconnect(&self) -> Result<(), ExecutorError> {
        let old = self.pool.write().take();
        if let Some(old) = old {
            old.close().await;
        }
        let pool = self.connect().await?;
        *self.pool.write() = Some(pool);
        info!("SQL session re-established");
        Ok(())
    }

    async fn close(&self) -> Result<(), ExecutorError> {
        let pool = self.pool.write().take();
        match pool {
            Some(pool) => {
                pool.close().await;
                Ok(())
            }
            None => {
                warn!("SQL session close requested but no session was open");
                Ok(())
            }
        }
    }
}

/// Build `(select_by_key, select_all)` for a table.
fn build_statements(
    table: &str,
    fields: &[String],
    keys: &[String],
    numbered_placeholders: bool,
) -> (String, String) {
    let select_all = format!("SELECT {} FROM {}", fields.join(", "), table);
    let conditions: Vec<String> = keys
        .iter()
        .enumerate()
        .map(|(i, k)| {
            if numbered_placeholders {
                format!("{} = ${}", k, i + 1)
            } else {
                format!("{} = ?", k)
            }
        })
        .collect();
    let select_by_key = format!("{} WHERE {}", select_all, conditions.join(" AND "));
    (select_by_key, select_all)
}

fn bind_value<'q>(
    query: Query<'q, Any, AnyArguments<'q>>,
    value: &Value,
) -> Query<'q, Any, AnyArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::Text(s) => query.bind(s.clone()),
        Value::Bytes(b) => query.bind(b.clone()),
    }
}

/// Convert a driver row into a [`Row`], column by column.
fn decode_row(row: &AnyRow) -> Result<Row, ExecutorError> {
    let mut values = Vec::with_capacity(row.len());
    for i in 0..row.len() {
        let is_null = row
            .try_get_raw(i)
            .map_err(|e| ExecutorError::Decode(e.to_string()))?
            .is_null();
        if is_null {
            values.push(Value::Null);
            continue;
        }
        let value = row
            .try_get::<i64, _>(i)
            .map(Value::Int)
            .or_else(|_| row.try_get::<f64, _>(i).map(Value::Float))
            .or_else(|_| row.try_get::<String, _>(i).map(Value::Text))
            .or_else(|_| row.try_get::<bool, _>(i).map(Value::Bool))
            .or_else(|_| row.try_get::<Vec<u8>, _>(i).map(Value::Bytes))
            .map_err(|e| ExecutorError::Decode(format!("column {}: {}", i, e)))?;
        values.push(value);
    }
    Ok(Row::new(values))
}
