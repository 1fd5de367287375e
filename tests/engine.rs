//! Engine behaviour tests against the in-memory executor.
//!
//! Covers both cache disciplines end to end: remote fallback, TTL expiry,
//! LRU bounds, missing-key caching, retry budgets, full snapshots and their
//! scheduled refresh, and concurrent lookups.
//!
//! Run with: `cargo test --test engine`

use std::sync::Arc;
use std::time::Duration;

use lookup_cache::{
    CacheMode, EngineState, InMemoryExecutor, Key, LookupConfig, LookupEngine, LookupError, Row,
    Value,
};

// =============================================================================
// Helpers
// =============================================================================

fn row(id: i64, name: &str) -> Row {
    Row::new(vec![Value::Int(id), Value::from(name)])
}

fn key(id: i64) -> Key {
    Key::new(vec![Value::Int(id)])
}

fn base_config() -> LookupConfig {
    LookupConfig {
        table_name: "customers".into(),
        field_names: vec!["id".into(), "name".into()],
        key_names: vec!["id".into()],
        retry_backoff_ms: 100,
        ..Default::default()
    }
}

fn partial_config(max_size: i64, ttl_ms: i64) -> LookupConfig {
    LookupConfig {
        cache_max_size: max_size,
        cache_ttl: ttl_ms,
        ..base_config()
    }
}

fn full_config(schedule: &str) -> LookupConfig {
    LookupConfig {
        cache_all: true,
        cache_all_refresh_schedule: Some(schedule.into()),
        ..base_config()
    }
}

async fn open(config: LookupConfig, rows: Vec<Row>) -> LookupEngine<InMemoryExecutor> {
    let executor = Arc::new(InMemoryExecutor::new(vec![0], rows));
    let engine = LookupEngine::new(config, executor).expect("valid config");
    engine.open().await.expect("open");
    engine
}

// =============================================================================
// Partial mode
// =============================================================================

#[tokio::test]
async fn uncached_every_lookup_queries_once() {
    let engine = open(base_config(), vec![row(1, "a"), row(2, "b")]).await;
    assert_eq!(engine.mode(), CacheMode::Uncached);

    for id in [1, 2, 1, 3, 1] {
        engine.lookup(&key(id)).await.unwrap();
    }

    assert_eq!(engine.executor().query_count(), 5);
    assert_eq!(engine.cache_size(), 0);
    assert_eq!(engine.stats().remote_lookups, 5);
}

#[tokio::test(start_paused = true)]
async fn ttl_hit_before_expiry_requery_after() {
    let engine = open(partial_config(100, 1_000), vec![row(1, "a")]).await;

    assert_eq!(engine.lookup(&key(1)).await.unwrap(), vec![row(1, "a")]);
    assert_eq!(engine.executor().query_count(), 1);

    // Backing store changes; the cache keeps serving the old rows until expiry
    engine.executor().set_rows(vec![row(1, "a2")]);
    tokio::time::advance(Duration::from_millis(999)).await;
    assert_eq!(engine.lookup(&key(1)).await.unwrap(), vec![row(1, "a")]);
    assert_eq!(engine.executor().query_count(), 1);

    tokio::time::advance(Duration::from_millis(1)).await;
    assert_eq!(engine.lookup(&key(1)).await.unwrap(), vec![row(1, "a2")]);
    assert_eq!(engine.executor().query_count(), 2);
}

#[tokio::test]
async fn lru_never_exceeds_max_size() {
    let rows: Vec<Row> = (0..50).map(|i| row(i, "x")).collect();
    let engine = open(partial_config(10, 60_000), rows).await;

    for id in 0..50 {
        engine.lookup(&key(id)).await.unwrap();
        assert!(engine.cache_size() <= 10);
    }
    assert_eq!(engine.cache_size(), 10);

    // Most recent keys survive, oldest were evicted
    let before = engine.executor().query_count();
    engine.lookup(&key(49)).await.unwrap();
    assert_eq!(engine.executor().query_count(), before);
    engine.lookup(&key(0)).await.unwrap();
    assert_eq!(engine.executor().query_count(), before + 1);
}

#[tokio::test]
async fn missing_key_cached_when_enabled() {
    let config = LookupConfig {
        cache_missing_key: true,
        ..partial_config(100, 60_000)
    };
    let engine = open(config, vec![row(1, "a")]).await;

    assert!(engine.lookup(&key(404)).await.unwrap().is_empty());
    assert!(engine.lookup(&key(404)).await.unwrap().is_empty());

    assert_eq!(engine.executor().query_count(), 1);
    assert_eq!(engine.cache_size(), 1);
    assert_eq!(engine.stats().cache_hits, 1);
}

#[tokio::test]
async fn missing_key_not_cached_when_disabled() {
    let config = LookupConfig {
        cache_missing_key: false,
        ..partial_config(100, 60_000)
    };
    let engine = open(config, vec![row(1, "a")]).await;

    assert!(engine.lookup(&key(404)).await.unwrap().is_empty());
    assert!(engine.lookup(&key(404)).await.unwrap().is_empty());

    assert_eq!(engine.executor().query_count(), 2);
    assert_eq!(engine.cache_size(), 0);

    // Non-empty results are still cached
    engine.lookup(&key(1)).await.unwrap();
    engine.lookup(&key(1)).await.unwrap();
    assert_eq!(engine.executor().query_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn two_failures_then_success_takes_three_attempts() {
    let config = LookupConfig {
        max_retry_times: 2,
        ..partial_config(100, 60_000)
    };
    let engine = open(config, vec![row(1, "a")]).await;
    engine.executor().fail_next(2);

    let mut emitted = Vec::new();
    let n = engine.eval(&key(1), |r| emitted.push(r)).await.unwrap();

    assert_eq!(n, 1);
    assert_eq!(emitted, vec![row(1, "a")]);
    assert_eq!(engine.executor().query_count(), 3);
    assert_eq!(engine.stats().failed_lookups, 0);
}

#[tokio::test(start_paused = true)]
async fn retry_exhaustion_after_max_plus_one_attempts() {
    let config = LookupConfig {
        max_retry_times: 1,
        ..partial_config(100, 60_000)
    };
    let engine = open(config, vec![row(1, "a")]).await;
    engine.executor().set_fail_always(true);

    let mut emitted = Vec::new();
    let err = engine.eval(&key(1), |r| emitted.push(r)).await.unwrap_err();

    assert!(matches!(err, LookupError::RetriesExhausted { attempts: 2, .. }));
    assert!(emitted.is_empty());
    assert_eq!(engine.executor().query_count(), 2);
    assert_eq!(engine.cache_size(), 0);

    // The engine itself stays usable
    engine.executor().set_fail_always(false);
    assert_eq!(engine.lookup(&key(1)).await.unwrap(), vec![row(1, "a")]);
    assert_eq!(engine.state(), EngineState::Ready);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_lookups_get_their_own_rows() {
    let rows: Vec<Row> = (0..64)
        .flat_map(|i| vec![row(i, &format!("{}-a", i)), row(i, &format!("{}-b", i))])
        .collect();
    let engine = Arc::new(open(partial_config(1_000, 60_000), rows).await);

    let handles: Vec<_> = (0..64)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move { (i, engine.lookup(&key(i)).await) })
        })
        .collect();

    for handle in handles {
        let (i, result) = handle.await.unwrap();
        assert_eq!(
            result.unwrap(),
            vec![row(i, &format!("{}-a", i)), row(i, &format!("{}-b", i))]
        );
    }
    assert_eq!(engine.cache_size(), 64);
}

// =============================================================================
// Full mode
// =============================================================================

#[tokio::test]
async fn full_mode_serves_snapshot_in_arrival_order() {
    let rows = vec![row(1, "r1"), row(2, "r3"), row(1, "r2")];
    let engine = open(full_config("0 0 0 1 1 ?"), rows).await;

    assert_eq!(engine.lookup(&key(1)).await.unwrap(), vec![row(1, "r1"), row(1, "r2")]);
    assert_eq!(engine.lookup(&key(2)).await.unwrap(), vec![row(2, "r3")]);
    assert!(engine.lookup(&key(3)).await.unwrap().is_empty());

    // Lookups never reach the remote store in full mode
    assert_eq!(engine.executor().query_count(), 0);
    assert_eq!(engine.executor().scan_count(), 1);
    assert_eq!(engine.loaded_row_count(), 3);
    assert_eq!(engine.cache_size(), 2);
}

#[tokio::test]
async fn full_mode_ceiling_rejects_oversized_table() {
    let config = LookupConfig {
        cache_max_size: 2,
        ..full_config("0 0 0 1 1 ?")
    };
    let executor = Arc::new(InMemoryExecutor::new(
        vec![0],
        vec![row(1, "a"), row(2, "b"), row(3, "c")],
    ));
    let engine = LookupEngine::new(config, executor).unwrap();

    assert!(matches!(engine.open().await, Err(LookupError::Initialization(_))));
    assert_eq!(engine.state(), EngineState::Closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scheduled_refresh_picks_up_changes() {
    let engine = open(full_config("* * * * * *"), vec![row(1, "old")]).await;
    engine.executor().set_rows(vec![row(1, "new"), row(2, "new")]);

    let mut refreshed = false;
    for _ in 0..30 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if engine.lookup(&key(1)).await.unwrap() == vec![row(1, "new")] {
            refreshed = true;
            break;
        }
    }
    assert!(refreshed, "snapshot was not refreshed within 3s");
    assert_eq!(engine.loaded_row_count(), 2);

    engine.close().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let scans = engine.executor().scan_count();
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(engine.executor().scan_count(), scans);
}

#[tokio::test]
async fn engines_are_independent() {
    let a = open(full_config("0 0 0 1 1 ?"), vec![row(1, "a")]).await;
    let b = open(full_config("0 0 0 1 1 ?"), vec![row(1, "b")]).await;

    assert_ne!(a.instance_id(), b.instance_id());
    assert_eq!(a.lookup(&key(1)).await.unwrap(), vec![row(1, "a")]);
    assert_eq!(b.lookup(&key(1)).await.unwrap(), vec![row(1, "b")]);

    a.close().await;
    assert_eq!(b.lookup(&key(1)).await.unwrap(), vec![row(1, "b")]);
    assert_eq!(b.state(), EngineState::Ready);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn state_receiver_sees_transitions() {
    let executor = Arc::new(InMemoryExecutor::new(vec![0], vec![]));
    let engine = LookupEngine::new(partial_config(10, 1_000), executor).unwrap();
    let rx = engine.state_receiver();
    assert_eq!(*rx.borrow(), EngineState::Created);

    engine.open().await.unwrap();
    assert_eq!(*rx.borrow(), EngineState::Ready);

    engine.close().await;
    assert_eq!(*rx.borrow(), EngineState::Closed);
}

#[tokio::test]
async fn close_drops_partial_cache() {
    let engine = open(partial_config(10, 60_000), vec![row(1, "a")]).await;
    engine.lookup(&key(1)).await.unwrap();
    assert_eq!(engine.cache_size(), 1);

    engine.close().await;
    assert_eq!(engine.cache_size(), 0);
    assert!(engine.executor().is_closed());
}

#[tokio::test]
async fn stats_track_hits_and_misses() {
    let engine = open(partial_config(10, 60_000), vec![row(1, "a"), row(2, "b")]).await;
    for id in [1, 1, 2, 1, 2] {
        engine.lookup(&key(id)).await.unwrap();
    }

    let stats = engine.stats();
    assert_eq!(stats.cache_misses, 2);
    assert_eq!(stats.cache_hits, 3);
    assert_eq!(stats.rows_emitted, 5);
    assert_eq!(stats.hit_rate(), Some(0.6));
    assert_eq!(engine.cache_size(), 2);
}
