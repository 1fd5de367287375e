//! Property-based tests (fuzzing) for the cache stores and input parsing.
//!
//! Uses proptest to generate random inputs and verify the caches keep their
//! bounds and the parsers never panic, only return clean errors.
//!
//! Run with: `cargo test --test proptest_fuzz`

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::time::Duration;

use proptest::prelude::*;

use lookup_cache::cache::SnapshotBuilder;
use lookup_cache::{CronSchedule, Key, LookupConfig, PartialCache, Row, Value};

// =============================================================================
// Strategies for generating test data
// =============================================================================

fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        any::<f64>().prop_map(Value::Float),
        ".{0,20}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
    ]
}

fn key_strategy() -> impl Strategy<Value = Key> {
    prop::collection::vec(value_strategy(), 1..4).prop_map(Key::new)
}

fn hash_of(key: &Key) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

// =============================================================================
// Key Identity Tests
// =============================================================================

proptest! {
    /// Keys built from the same values are equal and hash alike
    #[test]
    fn prop_key_structural_equality(values in prop::collection::vec(value_strategy(), 1..5)) {
        let a = Key::new(values.clone());
        let b = Key::new(values);
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(hash_of(&a), hash_of(&b));
    }

    /// Projecting a row onto key positions gives the same key as building it directly
    #[test]
    fn prop_row_projection_matches_key(
        values in prop::collection::vec(value_strategy(), 1..6),
        picks in prop::collection::vec(any::<prop::sample::Index>(), 1..4),
    ) {
        let indices: Vec<usize> = picks.iter().map(|i| i.index(values.len())).collect();
        let expected = Key::new(indices.iter().map(|&i| values[i].clone()).collect());
        let row = Row::new(values);
        prop_assert_eq!(row.project(&indices), expected);
    }

    /// Int and Text never collide, even when they print alike
    #[test]
    fn prop_value_variants_are_distinct(n in any::<i64>()) {
        let int_key = Key::new(vec![Value::Int(n)]);
        let text_key = Key::new(vec![Value::Text(n.to_string())]);
        prop_assert_ne!(int_key, text_key);
    }

    /// Any key, including NULL and NaN components, finds its own cache entry
    #[test]
    fn prop_any_key_round_trips_through_cache(key in key_strategy()) {
        let cache = PartialCache::new(NonZeroUsize::new(4).unwrap(), Duration::from_secs(60));
        cache.put(key.clone(), Vec::new());
        prop_assert!(cache.get(&key).is_some());
    }
}

// =============================================================================
// Partial Cache Bound Tests
// =============================================================================

proptest! {
    /// The LRU never holds more entries than its capacity
    #[test]
    fn prop_partial_cache_never_exceeds_capacity(
        capacity in 1usize..32,
        keys in prop::collection::vec(0i64..100, 0..300),
    ) {
        let cache = PartialCache::new(
            NonZeroUsize::new(capacity).unwrap(),
            Duration::from_secs(3600),
        );
        for id in keys {
            let key = Key::new(vec![Value::Int(id)]);
            cache.put(key, vec![Row::new(vec![Value::Int(id)])]);
            prop_assert!(cache.len() <= capacity);
        }
    }

    /// The most recently inserted key is always readable
    #[test]
    fn prop_partial_cache_keeps_latest_insert(
        capacity in 1usize..16,
        keys in prop::collection::vec(0i64..50, 1..100),
    ) {
        let cache = PartialCache::new(
            NonZeroUsize::new(capacity).unwrap(),
            Duration::from_secs(3600),
        );
        for id in &keys {
            cache.put(Key::new(vec![Value::Int(*id)]), vec![Row::new(vec![Value::Int(*id)])]);
        }
        let last = *keys.last().unwrap();
        let rows = cache.get(&Key::new(vec![Value::Int(last)]));
        prop_assert!(rows.is_some());
        prop_assert_eq!(rows.unwrap().len(), 1);
    }
}

// =============================================================================
// Snapshot Builder Tests
// =============================================================================

proptest! {
    /// Every pushed row lands under its key, in push order
    #[test]
    fn prop_snapshot_groups_rows_in_order(ids in prop::collection::vec(0i64..10, 0..200)) {
        let mut builder = SnapshotBuilder::new(None);
        for (seq, id) in ids.iter().enumerate() {
            let row = Row::new(vec![Value::Int(*id), Value::Int(seq as i64)]);
            builder.push(Key::new(vec![Value::Int(*id)]), row).unwrap();
        }
        let snapshot = builder.build();
        prop_assert_eq!(snapshot.row_count(), ids.len() as u64);

        for id in 0..10i64 {
            let expected: Vec<i64> = ids
                .iter()
                .enumerate()
                .filter(|(_, v)| **v == id)
                .map(|(seq, _)| seq as i64)
                .collect();
            let got: Vec<i64> = snapshot
                .get(&Key::new(vec![Value::Int(id)]))
                .map(|rows| {
                    rows.iter()
                        .map(|r| match r.get(1) {
                            Some(Value::Int(seq)) => *seq,
                            _ => -1,
                        })
                        .collect()
                })
                .unwrap_or_default();
            prop_assert_eq!(got, expected);
        }
    }

    /// A ceiling rejects the first row for a key past the limit, never earlier
    #[test]
    fn prop_snapshot_ceiling(ceiling in 1usize..10, distinct in 1usize..20) {
        let mut builder = SnapshotBuilder::new(Some(ceiling));
        let mut rejected_at = None;
        for id in 0..distinct {
            let key = Key::new(vec![Value::Int(id as i64)]);
            if builder.push(key, Row::new(vec![Value::Int(id as i64)])).is_err() {
                rejected_at = Some(id);
                break;
            }
        }
        if distinct > ceiling {
            prop_assert_eq!(rejected_at, Some(ceiling));
        } else {
            prop_assert_eq!(rejected_at, None);
        }
    }
}

// =============================================================================
// Input Parsing Fuzz Tests
// =============================================================================

proptest! {
    /// Cron parsing should never panic on arbitrary text
    #[test]
    fn fuzz_cron_parse_arbitrary(expression in ".{0,64}") {
        let _ = CronSchedule::parse(&expression);
    }

    /// Cron parsing over field-shaped input
    #[test]
    fn fuzz_cron_parse_field_shaped(
        fields in prop::collection::vec("[0-9*,?-]{1,6}", 1..8),
    ) {
        let expression = fields.join(" ");
        if let Ok(schedule) = CronSchedule::parse(&expression) {
            prop_assert_eq!(schedule.expression(), expression.as_str());
        }
    }

    /// Day tokens in either day field parse cleanly or fail cleanly, and
    /// whatever parses can compute its next fire time
    #[test]
    fn fuzz_cron_day_tokens(
        dom in "[0-9LW?*-]{1,4}",
        dow in "[0-9LSUNFRI#?*-]{1,5}",
    ) {
        let expression = format!("0 0 0 {} * {}", dom, dow);
        if let Ok(schedule) = CronSchedule::parse(&expression) {
            let from = chrono::DateTime::from_timestamp(1_767_225_600, 0).unwrap();
            let _ = schedule.next_after(&from);
        }
    }

    /// Config parsing should never panic on arbitrary bytes
    #[test]
    fn fuzz_config_from_random_text(text in ".{0,200}") {
        let _ = LookupConfig::from_json(&text);
    }

    /// Whatever numbers come in, validation returns rather than panics
    #[test]
    fn fuzz_config_validate_sizes(
        max_size in any::<i64>(),
        ttl in any::<i64>(),
        cache_all in any::<bool>(),
    ) {
        let config = LookupConfig {
            field_names: vec!["id".into()],
            key_names: vec!["id".into()],
            cache_max_size: max_size,
            cache_ttl: ttl,
            cache_all,
            cache_all_refresh_schedule: Some("0 */5 * * * ?".into()),
            ..Default::default()
        };
        let valid = config.validate().is_ok();
        let sizes_ok = (max_size == -1 || max_size > 0) && (ttl == -1 || ttl > 0);
        prop_assert_eq!(valid, sizes_ok);
    }
}
