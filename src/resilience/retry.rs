// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic.
//!
//! Two policies live here:
//!
//! - [`RetryConfig`] + [`retry()`]: exponential backoff for establishing a
//!   session at startup. Fail fast on bad config.
//! - [`LookupRetryPolicy`]: the per-lookup state machine. Linear backoff,
//!   a liveness probe after every failure, and a reconnect when the probe
//!   says the session is dead.
//!
//! ```text
//!  Idle ──Start──► Querying(n) ──QueryOk──► Succeeded
//!                     │  ▲
//!          QueryFailed│  │BackoffElapsed (n+1)
//!                     ▼  │
//!        ┌────────── Retrying(n) ──ConnectionValid──► BackingOff(n)
//!        │               │                              ▲
//!        │    ConnectionInvalid                         │
//!        │               ▼                              │
//!        │          Reconnecting(n) ───Reconnected──────┘
//!        │               │
//!        │        ReconnectFailed
//!        ▼               ▼
//!      Failed ◄──────────┘      (QueryFailed with n == max also → Failed)
//! ```
//!
//! # Example
//!
//! ```
//! use lookup_cache::resilience::retry::{LookupRetryPolicy, QueryEvent, QueryState};
//! use std::time::Duration;
//!
//! let policy = LookupRetryPolicy::new(1, Duration::from_millis(1000));
//! let s = policy.next(QueryState::Idle, QueryEvent::Start);
//! let s = policy.next(s, QueryEvent::QueryFailed);
//! assert_eq!(s, QueryState::Retrying { attempt: 0 });
//!
//! // First retry sleeps 1000 * 0 ms
//! let s = policy.next(s, QueryEvent::ConnectionValid);
//! assert_eq!(s, QueryState::BackingOff { attempt: 0, delay: Duration::ZERO });
//!
//! let s = policy.next(s, QueryEvent::BackoffElapsed);
//! let s = policy.next(s, QueryEvent::QueryFailed);
//! assert_eq!(s, QueryState::Failed { attempts: 2 });
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

/// Configuration for session establishment retry.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub max_retries: usize,
}

impl RetryConfig {
    /// Fast-fail retry for initial startup connection.
    /// Attempts 5 times with exponential backoff, failing after ~5 seconds.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }
}

/// Run `operation` until it succeeds or `config.max_retries` attempts fail.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = config.initial_delay;
    let mut attempts = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    info!("Operation '{}' succeeded after {} retries", operation_name, attempts);
                }
                return Ok(val);
            }
            Err(err) => {
                attempts += 1;
                if attempts >= config.max_retries {
                    return Err(err);
                }
                warn!(
                    "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
                    operation_name, attempts, config.max_retries, err, delay
                );
                sleep(delay).await;
                delay = (delay.mul_f64(config.factor)).min(config.max_delay);
            }
        }
    }
}

/// Where a single lookup's remote query currently stands.
///
/// `attempt` is the zero-based retry index: the first query is attempt 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Idle,
    Querying { attempt: u32 },
    /// Query failed with budget left; probing the session.
    Retrying { attempt: u32 },
    /// Session probe failed; rebuilding it.
    Reconnecting { attempt: u32 },
    BackingOff { attempt: u32, delay: Duration },
    Succeeded { attempts: u32 },
    Failed { attempts: u32 },
}

impl QueryState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Failed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryEvent {
    Start,
    QueryOk,
    QueryFailed,
    ConnectionValid,
    ConnectionInvalid,
    Reconnected,
    ReconnectFailed,
    BackoffElapsed,
}

/// Retry budget and linear backoff for lookup queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupRetryPolicy {
    max_retries: u32,
    backoff_unit: Duration,
}

impl LookupRetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32, backoff_unit: Duration) -> Self {
        Self {
            max_retries,
            backoff_unit,
        }
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Sleep before the query following retry index `attempt`.
    /// Linear: `unit * attempt`, so the first retry does not wait.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_unit.saturating_mul(attempt)
    }

    /// Transition function. Events that make no sense in `state` leave it
    /// unchanged.
    #[must_use]
    pub fn next(&self, state: QueryState, event: QueryEvent) -> QueryState {
        use QueryEvent as E;
        use QueryState as S;

        match (state, event) {
            (S::Idle, E::Start) => S::Querying { attempt: 0 },
            (S::Querying { attempt }, E::QueryOk) => S::Succeeded { attempts: attempt + 1 },
            (S::Querying { attempt }, E::QueryFailed) if attempt >= self.max_retries => {
                S::Failed { attempts: attempt + 1 }
            }
            (S::Querying { attempt }, E::QueryFailed) => S::Retrying { attempt },
            (S::Retrying { attempt }, E::ConnectionValid)
            | (S::Reconnecting { attempt }, E::Reconnected) => S::BackingOff {
                attempt,
                delay: self.backoff(attempt),
            },
            (S::Retrying { attempt }, E::ConnectionInvalid) => S::Reconnecting { attempt },
            (S::Reconnecting { attempt }, E::ReconnectFailed) => S::Failed { attempts: attempt + 1 },
            (S::BackingOff { attempt, .. }, E::BackoffElapsed) => S::Querying { attempt: attempt + 1 },
            (state, _) => state,
        }
    }
}
