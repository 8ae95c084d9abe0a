use rand::Rng;
use std::sync::Arc;
use swaydb_core::{
    level::{self, LevelReader},
    segment::read_state::ThreadReadState,
    value::{Entry, RangeEntry, RangeValue, Remove, Update, Value},
    FunctionStore, LevelZeroMapCache, Slice, Time,
};
use test_log::test;

fn cache() -> (Arc<FunctionStore>, LevelZeroMapCache) {
    let functions = Arc::new(FunctionStore::new());
    let cache = LevelZeroMapCache::new(functions.clone());
    (functions, cache)
}

fn update_range(from: &[u8], to: &[u8], value: &[u8], time: u64) -> Entry {
    Entry::Range(RangeEntry::new(
        Slice::from(from),
        Slice::from(to),
        None,
        RangeValue::Update(Update {
            value: Some(Slice::from(value)),
            deadline: None,
            time: Time::from(time),
        }),
    ))
}

fn remove_range(from: &[u8], to: &[u8], time: u64) -> Entry {
    Entry::Range(RangeEntry::new(
        Slice::from(from),
        Slice::from(to),
        None,
        RangeValue::Remove(Remove {
            deadline: None,
            time: Time::from(time),
        }),
    ))
}

/// No duplicate keys, no overlapping ranges, and every range's from value
/// sits exactly at its from key.
fn assert_well_formed(cache: &LevelZeroMapCache) {
    let entries = cache.entries();

    for pair in entries.windows(2) {
        assert!(
            pair[0].key() < pair[1].key(),
            "keys out of order: {:?} vs {:?}",
            pair[0].key(),
            pair[1].key(),
        );

        if let Entry::Range(range) = &pair[0] {
            assert!(
                range.to_key <= *pair[1].key(),
                "overlapping ranges: {range:?} then {:?}",
                pair[1],
            );
        }
    }

    for entry in &entries {
        if let Entry::Range(range) = entry {
            assert!(range.from_key < range.to_key, "inverted range: {range:?}");
        }
    }
}

#[test]
fn level_zero_range_overwrite_scenario() -> swaydb_core::Result<()> {
    let (_, cache) = cache();

    cache.write(update_range(&[10], &[20], b"20", 1))?;
    cache.write(update_range(&[1], &[15], b"40", 2))?;

    assert_well_formed(&cache);

    let pieces: Vec<_> = cache
        .entries()
        .into_iter()
        .map(|entry| match entry {
            Entry::Range(range) => {
                let value = match &range.range_value {
                    RangeValue::Update(update) => {
                        update.value.as_ref().map(|v| v.to_vec()).unwrap_or_default()
                    }
                    other => panic!("expected update range, got {other:?}"),
                };

                (range.from_key.to_vec(), range.to_key.to_vec(), value)
            }
            Entry::Fixed { .. } => panic!("expected only ranges"),
        })
        .collect();

    assert_eq!(
        vec![
            (vec![1], vec![10], b"40".to_vec()),
            (vec![10], vec![15], b"40".to_vec()),
            (vec![15], vec![20], b"20".to_vec()),
        ],
        pieces,
    );

    Ok(())
}

#[test]
fn level_zero_remove_range_scenario() -> swaydb_core::Result<()> {
    let (functions, cache) = cache();
    let mut state = ThreadReadState::new();

    for i in 1u8..=10 {
        cache.write(Entry::fixed(
            [i],
            Value::put([i], None, Time::from(u64::from(i))),
        ))?;
    }

    cache.write(remove_range(&[2], &[5], 100))?;

    assert_well_formed(&cache);

    let levels: Vec<&dyn LevelReader> = vec![&cache];

    let expect_put = |key: u8, state: &mut ThreadReadState| -> swaydb_core::Result<()> {
        let hit = level::get(&levels, &Slice::from([key]), &functions, state)?
            .unwrap_or_else(|| panic!("key {key} should be live"));
        assert_eq!(Some(Slice::from([key])), hit.value);
        Ok(())
    };

    expect_put(1, &mut state)?;

    for i in 2u8..5 {
        assert!(
            level::get(&levels, &Slice::from([i]), &functions, &mut state)?.is_none(),
            "key {i} should be removed",
        );
    }

    for i in 5u8..=10 {
        expect_put(i, &mut state)?;
    }

    Ok(())
}

#[test]
fn level_zero_stays_well_formed_under_random_writes() -> swaydb_core::Result<()> {
    let (_, cache) = cache();
    let mut rng = rand::rng();

    for time in 0..2_000u64 {
        let a: u8 = rng.random_range(0..200);
        let b: u8 = rng.random_range(0..200);

        match rng.random_range(0..4) {
            0 => {
                cache.write(Entry::fixed(
                    [a],
                    Value::put([a], None, Time::from(time)),
                ))?;
            }
            1 => {
                cache.write(Entry::fixed([a], Value::remove(None, Time::from(time))))?;
            }
            2 if a != b => {
                let (lo, hi) = if a < b { (a, b) } else { (b, a) };
                cache.write(update_range(&[lo], &[hi], b"u", time))?;
            }
            3 if a != b => {
                let (lo, hi) = if a < b { (a, b) } else { (b, a) };
                cache.write(remove_range(&[lo], &[hi], time))?;
            }
            _ => {}
        }

        assert_well_formed(&cache);
    }

    Ok(())
}

#[test]
fn level_zero_navigation_matches_entries() -> swaydb_core::Result<()> {
    let (_, cache) = cache();

    for i in [10u8, 20, 30, 40] {
        cache.write(Entry::fixed(
            [i],
            Value::put([i], None, Time::from(u64::from(i))),
        ))?;
    }

    cache.write(update_range(&[50], &[60], b"u", 99))?;

    assert_eq!(
        Some(vec![20]),
        cache.higher(&Slice::from([10])).map(|e| e.key().to_vec()),
    );
    assert_eq!(
        Some(vec![50]),
        cache.higher(&Slice::from([55])).map(|e| e.key().to_vec()),
        "a range containing the probe is its own higher",
    );
    assert_eq!(
        Some(vec![40]),
        cache.lower(&Slice::from([50])).map(|e| e.key().to_vec()),
    );
    assert_eq!(None, cache.lower(&Slice::from([10])).map(|e| e.key().to_vec()));
    assert_eq!(
        Some(vec![10]),
        cache.floor(&Slice::from([15])).map(|e| e.key().to_vec()),
    );

    Ok(())
}
