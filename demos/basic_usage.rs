// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic lookup-cache usage example.
//!
//! Demonstrates:
//! 1. Partial mode: LRU + TTL cache in front of a flaky remote store
//! 2. Retry with backoff riding over injected query failures
//! 3. Full mode: whole-table snapshot, refreshed on demand
//! 4. Displaying engine stats and raw metrics
//! 5. Clean shutdown
//!
//! Uses the in-memory executor, so no database is needed.
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::Arc;
use std::time::Instant;

use lookup_cache::{InMemoryExecutor, Key, LookupConfig, LookupEngine, Row, Value};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};

fn customer(id: i64, name: &str, tier: &str) -> Row {
    Row::new(vec![Value::Int(id), Value::from(name), Value::from(tier)])
}

fn key(id: i64) -> Key {
    Key::new(vec![Value::Int(id)])
}

fn table() -> Vec<Row> {
    vec![
        customer(1, "Alice", "gold"),
        customer(2, "Bob", "silver"),
        customer(3, "Carol", "gold"),
        customer(1, "Alice (billing)", "gold"),
    ]
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           lookup-cache: Basic Usage Example                   ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Partial mode
    // ─────────────────────────────────────────────────────────────────────────
    println!("📦 Partial mode (cache-max-size=100, cache-ttl=60s)...");

    let config = LookupConfig::from_json(
        r#"{
            "table-name": "customers",
            "field-names": ["id", "name", "tier"],
            "key-names": ["id"],
            "cache-max-size": 100,
            "cache-ttl": 60000,
            "max-retry-times": 3,
            "retry-backoff-ms": 50
        }"#,
    )?;
    let executor = Arc::new(InMemoryExecutor::new(vec![0], table()));
    let engine = LookupEngine::new(config, executor)?;
    println!("   Mode: {}  State: {}", engine.mode(), engine.state());

    engine.open().await?;
    println!("   ✅ Engine ready! State: {}", engine.state());

    println!("\n🔍 Looking up keys (first pass misses, second pass hits)...");
    for pass in 1..=2 {
        for id in [1, 2, 42] {
            let start = Instant::now();
            let rows = engine.lookup(&key(id)).await?;
            println!("   └─ pass {} key {} → {} row(s) ({:?})", pass, id, rows.len(), start.elapsed());
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Retry over a flaky store
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n⚡ Injecting 2 query failures, then looking up an uncached key...");
    engine.executor().fail_next(2);
    let start = Instant::now();
    let emitted = engine
        .eval(&key(3), |row| println!("   └─ emitted {:?}", row.values()))
        .await?;
    println!("   ✅ {} row(s) after retries ({:?})", emitted, start.elapsed());

    let stats = engine.stats();
    println!("\n📊 Partial-mode stats:");
    println!("   ├─ Cached keys: {}", engine.cache_size());
    println!("   ├─ Hits / misses: {} / {}", stats.cache_hits, stats.cache_misses);
    println!("   ├─ Remote lookups: {}", stats.remote_lookups);
    println!(
        "   └─ Hit rate: {}",
        stats.hit_rate().map_or("n/a".into(), |r| format!("{:.0}%", r * 100.0))
    );

    engine.close().await;
    println!("   ✅ Closed. State: {}", engine.state());

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Full mode
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📦 Full mode (cache-all, refreshed every 10 minutes)...");

    let config = LookupConfig {
        cache_all: true,
        cache_all_refresh_schedule: Some("0 */10 * * * ?".into()),
        table_name: "customers".into(),
        field_names: vec!["id".into(), "name".into(), "tier".into()],
        key_names: vec!["id".into()],
        ..Default::default()
    };
    let executor = Arc::new(InMemoryExecutor::new(vec![0], table()));
    let engine = LookupEngine::new(config, executor)?;
    engine.open().await?;
    println!(
        "   ✅ Snapshot loaded: {} rows across {} keys",
        engine.loaded_row_count(),
        engine.cache_size()
    );

    for row in engine.lookup(&key(1)).await? {
        println!("   └─ key 1 → {:?}", row.values());
    }

    println!("\n🔄 Table changes; refreshing now instead of waiting for cron...");
    engine.executor().set_rows(vec![customer(4, "Dave", "bronze")]);
    let rows = engine.refresh_now().await?;
    println!("   └─ Published {} row(s)", rows);
    println!("   └─ key 1 → {} row(s)", engine.lookup(&key(1)).await?.len());
    println!("   └─ key 4 → {} row(s)", engine.lookup(&key(4)).await?.len());

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Raw metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Clean shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    engine.close().await;
    println!("   ✅ Shutdown complete! State: {}", engine.state());

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

/// Dump all captured metrics, grouped by kind and sorted by name
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut counters = Vec::new();
    let mut gauges = Vec::new();
    let mut histograms = Vec::new();

    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };
        let name = format!("{}{}", key.name(), label_str);

        match value {
            DebugValue::Counter(v) => counters.push((name, v)),
            DebugValue::Gauge(v) => gauges.push((name, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                histograms.push((name, count, sum));
            }
        }
    }

    counters.sort_by(|a, b| a.0.cmp(&b.0));
    gauges.sort_by(|a, b| a.0.cmp(&b.0));
    histograms.sort_by(|a, b| a.0.cmp(&b.0));

    if !counters.is_empty() {
        println!("   ┌─ Counters (cumulative)");
        for (name, value) in &counters {
            println!("   │  └─ {} = {}", name, value);
        }
    }
    if !gauges.is_empty() {
        println!("   ├─ Gauges (current value)");
        for (name, value) in &gauges {
            println!("   │  └─ {} = {:.0}", name, value);
        }
    }
    if !histograms.is_empty() {
        println!("   └─ Histograms (distributions)");
        for (name, count, sum) in &histograms {
            let avg = if *count > 0 { sum / *count as f64 } else { 0.0 };
            println!("      └─ {} count={} avg={:.6}s", name, count, avg);
        }
    }
    if counters.is_empty() && gauges.is_empty() && histograms.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
}
