// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the lookup cache.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding process is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `lookup_cache_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `instance`: engine instance id
//! - `result`: hit, miss, uncached, snapshot_hit, snapshot_miss, error
//! - `status`: success, error, busy, discarded

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Set the row count of the last successful bulk load
pub fn set_loaded_rows(instance: &str, rows: u64) {
    gauge!(
        "lookup_cache_loaded_rows",
        "instance" => instance.to_string()
    )
    .set(rows as f64);
}

/// Set the number of keys held by the live cache store
pub fn set_cache_entries(instance: &str, entries: usize) {
    gauge!(
        "lookup_cache_entries",
        "instance" => instance.to_string()
    )
    .set(entries as f64);
}

/// Record one lookup call and how it was served
pub fn record_lookup(instance: &str, result: &'static str) {
    counter!(
        "lookup_cache_lookups_total",
        "instance" => instance.to_string(),
        "result" => result
    )
    .increment(1);
}

/// Record lookup latency, remote round-trips and backoff included
pub fn record_lookup_latency(instance: &str, duration: Duration) {
    histogram!(
        "lookup_cache_lookup_seconds",
        "instance" => instance.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record one keyed query attempt against the remote store
pub fn record_remote_query(instance: &str, success: bool) {
    let status = if success { "success" } else { "error" };
    counter!(
        "lookup_cache_remote_queries_total",
        "instance" => instance.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record a retry (counted when the backoff before it starts)
pub fn record_retry(instance: &str) {
    counter!(
        "lookup_cache_retries_total",
        "instance" => instance.to_string()
    )
    .increment(1);
}

/// Record a session rebuild
pub fn record_reconnect(instance: &str, success: bool) {
    let status = if success { "success" } else { "error" };
    counter!(
        "lookup_cache_reconnects_total",
        "instance" => instance.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record a full-table refresh outcome
pub fn record_refresh(instance: &str, status: &'static str) {
    counter!(
        "lookup_cache_refresh_total",
        "instance" => instance.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record full-table refresh duration (scan + build + publish)
pub fn record_refresh_latency(instance: &str, duration: Duration) {
    histogram!(
        "lookup_cache_refresh_seconds",
        "instance" => instance.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record LRU evictions from the partial cache
pub fn record_evictions(instance: &str, count: u64) {
    counter!(
        "lookup_cache_evictions_total",
        "instance" => instance.to_string()
    )
    .increment(count);
}

/// Record cron firings skipped because a refresh overran them
pub fn record_skipped_firings(schedule: &str, count: usize) {
    counter!(
        "lookup_cache_skipped_firings_total",
        "schedule" => schedule.to_string()
    )
    .increment(count as u64);
}

/// A timing guard that records lookup latency on drop
pub struct LookupTimer<'a> {
    instance: &'a str,
    start: Instant,
}

impl<'a> LookupTimer<'a> {
    /// Start a new lookup timer
    pub fn new(instance: &'a str) -> Self {
        Self {
            instance,
            start: Instant::now(),
        }
    }
}

impl Drop for LookupTimer<'_> {
    fn drop(&mut self) {
        record_lookup_latency(self.instance, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    #[test]
    fn test_counters_reach_the_installed_recorder() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_lookup("engine-1", "hit");
            record_lookup("engine-1", "miss");
            record_remote_query("engine-1", false);
            record_retry("engine-1");
            record_evictions("engine-1", 3);
            record_skipped_firings("engine-1-abc", 2);
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let counter_value = |name: &str| -> u64 {
            snapshot
                .iter()
                .filter(|(key, _, _, _)| key.key().name() == name)
                .map(|(_, _, _, value)| match value {
                    DebugValue::Counter(v) => *v,
                    _ => 0,
                })
                .sum()
        };
        assert_eq!(counter_value("lookup_cache_lookups_total"), 2);
        assert_eq!(counter_value("lookup_cache_remote_queries_total"), 1);
        assert_eq!(counter_value("lookup_cache_retries_total"), 1);
        assert_eq!(counter_value("lookup_cache_evictions_total"), 3);
        assert_eq!(counter_value("lookup_cache_skipped_firings_total"), 2);
    }

    #[test]
    fn test_loaded_rows_gauge() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            set_loaded_rows("engine-1", 10);
            set_loaded_rows("engine-1", 42);
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let gauge = snapshot
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "lookup_cache_loaded_rows")
            .map(|(_, _, _, value)| value.clone());
        assert!(matches!(gauge, Some(DebugValue::Gauge(v)) if v.into_inner() == 42.0));
    }

    #[test]
    fn test_no_recorder_is_a_noop() {
        set_cache_entries("engine-1", 5000);
        record_reconnect("engine-1", true);
        record_refresh("engine-1", "success");
        record_refresh_latency("engine-1", Duration::from_millis(50));
    }

    #[test]
    fn test_lookup_timer() {
        {
            let _timer = LookupTimer::new("engine-1");
            std::thread::sleep(Duration::from_micros(10));
        }
        // Timer recorded on drop
    }
}
