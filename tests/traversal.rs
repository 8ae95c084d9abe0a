use std::{sync::Arc, time::Duration};
use swaydb_core::{
    level::{self, LevelReader, SegmentLevel},
    segment::{
        block_cache::BlockPool,
        config::SegmentConfig,
        read_state::ThreadReadState,
        writer::Writer,
        Segment, FORMAT_ONE,
    },
    sweeper::NoSweeper,
    value::{Entry, RangeEntry, RangeValue, Remove, Value},
    Deadline, FunctionOutput, FunctionStore, LevelZeroMapCache, Slice, SwayFunction, Time,
};
use test_log::test;

fn persisted_segment(entries: &[Entry]) -> Arc<Segment> {
    let mut writer = Writer::new(SegmentConfig::default(), 1);

    for entry in entries {
        writer.add(entry).expect("write should succeed");
    }

    let transient = writer
        .finish()
        .expect("finish should succeed")
        .expect("non-empty");

    let mut file = vec![FORMAT_ONE];
    file.extend_from_slice(&transient.bytes);

    Arc::new(
        Segment::load(
            Arc::new(Slice::from(file)),
            BlockPool::default(),
            Arc::new(NoSweeper),
        )
        .expect("segment should load"),
    )
}

fn put(key: &[u8], value: &[u8], time: u64) -> Entry {
    Entry::fixed(key, Value::put(value, None, Time::from(time)))
}

#[test]
fn get_resolves_function_against_deeper_level() -> swaydb_core::Result<()> {
    let functions = Arc::new(FunctionStore::new());
    functions.put(
        *b"swap",
        SwayFunction::KeyValue(Arc::new(|_, _| FunctionOutput::Update {
            value: Some(Slice::from(*b"v2")),
            deadline: None,
        })),
    );

    let mut state = ThreadReadState::new();

    // Level 1 holds the function, level 2 the put it applies to
    let level_one = persisted_segment(&[Entry::fixed(
        *b"k",
        Value::function(*b"swap", Time::from(10)),
    )]);
    let level_two = persisted_segment(&[put(b"k", b"v1", 5)]);

    let level_one = SegmentLevel::new(vec![level_one])?;
    let level_two = SegmentLevel::new(vec![level_two])?;

    let levels: Vec<&dyn LevelReader> = vec![&level_one, &level_two];

    let hit = level::get(&levels, &Slice::from(*b"k"), &functions, &mut state)?
        .expect("function should resolve");

    assert_eq!(Some(Slice::from(*b"v2")), hit.value);
    assert_eq!(Time::from(10), hit.time);

    Ok(())
}

#[test]
fn get_resolves_timed_remove_against_deeper_put() -> swaydb_core::Result<()> {
    let functions = Arc::new(FunctionStore::new());
    let mut state = ThreadReadState::new();

    let deadline = Deadline::after(Duration::from_secs(3600));

    let upper = LevelZeroMapCache::new(functions.clone());
    upper.write(Entry::fixed(
        *b"k",
        Value::remove(Some(deadline), Time::from(7)),
    ))?;

    let deeper = SegmentLevel::new(vec![persisted_segment(&[put(b"k", b"v", 5)])])?;

    let levels: Vec<&dyn LevelReader> = vec![&upper, &deeper];

    // The key lives on until the removal deadline fires
    let hit = level::get(&levels, &Slice::from(*b"k"), &functions, &mut state)?
        .expect("key should still be live");

    assert_eq!(Some(Slice::from(*b"v")), hit.value);
    assert_eq!(Some(deadline), hit.deadline);
    assert_eq!(Time::from(7), hit.time);

    Ok(())
}

#[test]
fn get_sees_expired_put_as_absent() -> swaydb_core::Result<()> {
    let functions = Arc::new(FunctionStore::new());
    let mut state = ThreadReadState::new();

    let expired = Deadline::from_unix(Duration::from_secs(1));

    let level = SegmentLevel::new(vec![persisted_segment(&[
        Entry::fixed(*b"dead", Value::put(*b"v", Some(expired), Time::from(1))),
        put(b"live", b"v", 1),
    ])])?;

    let levels: Vec<&dyn LevelReader> = vec![&level];

    assert!(level::get(&levels, &Slice::from(*b"dead"), &functions, &mut state)?.is_none());
    assert!(level::get(&levels, &Slice::from(*b"live"), &functions, &mut state)?.is_some());

    Ok(())
}

#[test]
fn traversal_across_level_zero_and_persisted_level() -> swaydb_core::Result<()> {
    let functions = Arc::new(FunctionStore::new());
    let mut state = ThreadReadState::new();

    // Persisted: even keys 0..100
    let persisted: Vec<Entry> = (0..50u8).map(|i| put(&[i * 2], b"old", 1)).collect();
    let deeper = SegmentLevel::new(vec![persisted_segment(&persisted)])?;

    // Level 0: overwrite some, remove some, range-remove a window
    let upper = LevelZeroMapCache::new(functions.clone());
    upper.write(Entry::fixed([4], Value::put(*b"new", None, Time::from(10))))?;
    upper.write(Entry::fixed([8], Value::remove(None, Time::from(10))))?;
    upper.write(Entry::Range(RangeEntry::new(
        Slice::from([20]),
        Slice::from([31]),
        None,
        RangeValue::Remove(Remove {
            deadline: None,
            time: Time::from(10),
        }),
    )))?;

    let levels: Vec<&dyn LevelReader> = vec![&upper, &deeper];

    let hit = level::get(&levels, &Slice::from([4]), &functions, &mut state)?
        .expect("overwritten key should be live");
    assert_eq!(Some(Slice::from(*b"new")), hit.value);

    assert!(level::get(&levels, &Slice::from([8]), &functions, &mut state)?.is_none());

    for key in (20u8..31).step_by(2) {
        assert!(
            level::get(&levels, &Slice::from([key]), &functions, &mut state)?.is_none(),
            "key {key} should be range-removed",
        );
    }

    let hit = level::get(&levels, &Slice::from([32]), &functions, &mut state)?
        .expect("key past the range should be live");
    assert_eq!(Some(Slice::from(*b"old")), hit.value);

    // higher() skips the removed window entirely
    let h = level::higher(&levels, &Slice::from([18]), &functions, &mut state)?
        .expect("should find higher");
    assert_eq!(Slice::from([32]), h.key);

    // lower() from above the window lands before it
    let l = level::lower(&levels, &Slice::from([31]), &functions, &mut state)?
        .expect("should find lower");
    assert_eq!(Slice::from([18]), l.key);

    Ok(())
}

#[test]
fn full_scan_via_higher_matches_live_set() -> swaydb_core::Result<()> {
    let functions = Arc::new(FunctionStore::new());
    let mut state = ThreadReadState::new();

    let persisted: Vec<Entry> = (1..=20u8).map(|i| put(&[i], b"v", 1)).collect();
    let deeper = SegmentLevel::new(vec![persisted_segment(&persisted)])?;

    let upper = LevelZeroMapCache::new(functions.clone());

    // Remove every third key
    for i in (3..=20u8).step_by(3) {
        upper.write(Entry::fixed([i], Value::remove(None, Time::from(10))))?;
    }

    let levels: Vec<&dyn LevelReader> = vec![&upper, &deeper];

    let mut seen = vec![];
    let mut cursor = Slice::from([0u8]);

    while let Some(live) = level::higher(&levels, &cursor, &functions, &mut state)? {
        seen.push(live.key.to_vec());
        cursor = live.key;
    }

    let expected: Vec<Vec<u8>> = (1..=20u8).filter(|i| i % 3 != 0).map(|i| vec![i]).collect();

    assert_eq!(expected, seen);

    Ok(())
}
