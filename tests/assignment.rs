use rand::Rng;
use std::sync::Arc;
use swaydb_core::{
    assigner::{assign, Assignable},
    segment::{
        block_cache::BlockPool,
        config::SegmentConfig,
        writer::Writer,
        Segment, SegmentRead, FORMAT_ONE,
    },
    sweeper::NoSweeper,
    value::{Entry, RangeEntry, RangeValue, Update, Value},
    Slice, Time,
};
use test_log::test;

fn segment_of(entries: &[Entry]) -> Arc<Segment> {
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

fn put(key: &[u8]) -> Entry {
    Entry::fixed(key, Value::put(*b"v", None, Time::from(1)))
}

#[test]
fn range_spreading_over_two_targets_splits_at_the_boundary() -> swaydb_core::Result<()> {
    // Targets [1..10] and [10..20]
    let targets = vec![
        segment_of(&[put(&[1]), put(&[9])]),
        segment_of(&[put(&[10]), put(&[20])]),
    ];

    let incoming = Entry::Range(RangeEntry::new(
        Slice::from([5]),
        Slice::from([15]),
        None,
        RangeValue::Update(Update {
            value: Some(Slice::from(*b"v")),
            deadline: None,
            time: Time::from(9),
        }),
    ));

    let assignments = assign([Assignable::Entry(incoming)], &targets, false)?;

    let left = match assignments[0].mid_overlap.as_slice() {
        [Assignable::Entry(Entry::Range(range))] => range,
        other => panic!("expected one range piece, got {other:?}"),
    };
    assert_eq!((&left.from_key, &left.to_key), (&Slice::from([5]), &Slice::from([10])));
    assert!(left.from_value.is_none());

    let right = match assignments[1].mid_overlap.as_slice() {
        [Assignable::Entry(Entry::Range(range))] => range,
        other => panic!("expected one range piece, got {other:?}"),
    };
    assert_eq!(
        (&right.from_key, &right.to_key),
        (&Slice::from([10]), &Slice::from([15])),
    );
    assert!(right.from_value.is_none());

    Ok(())
}

#[test]
fn every_assignable_lands_exactly_once() -> swaydb_core::Result<()> {
    let mut rng = rand::rng();

    let targets = vec![
        segment_of(&[put(&[30]), put(&[60])]),
        segment_of(&[put(&[90]), put(&[120])]),
        segment_of(&[put(&[150]), put(&[180])]),
    ];

    for gaps in [false, true] {
        let mut keys: Vec<u8> = (0..64).map(|_| rng.random()).collect();
        keys.sort_unstable();
        keys.dedup();

        let incoming: Vec<_> = keys
            .iter()
            .map(|k| Assignable::Entry(put(&[*k])))
            .collect();

        let assignments = assign(incoming, &targets, gaps)?;

        let mut seen: Vec<u8> = vec![];

        for assignment in &assignments {
            for bucket in [
                &assignment.head_gap,
                &assignment.mid_overlap,
                &assignment.tail_gap,
            ] {
                for assignable in bucket {
                    match assignable {
                        Assignable::Entry(entry) => {
                            seen.extend(entry.key().iter().copied());
                        }
                        Assignable::Segment(_) => panic!("no sub-segments were submitted"),
                    }
                }
            }
        }

        seen.sort_unstable();
        assert_eq!(keys, seen, "gaps={gaps}");

        if !gaps {
            for assignment in &assignments {
                assert!(assignment.head_gap.is_empty());
                assert!(assignment.tail_gap.is_empty());
            }
        }
    }

    Ok(())
}

#[test]
fn assigned_keys_never_cross_the_next_target() -> swaydb_core::Result<()> {
    let targets = vec![
        segment_of(&[put(&[30]), put(&[60])]),
        segment_of(&[put(&[90]), put(&[120])]),
    ];

    let incoming: Vec<_> = (0..=255u8)
        .step_by(5)
        .map(|k| Assignable::Entry(put(&[k])))
        .collect();

    let assignments = assign(incoming, &targets, true)?;

    let next_mins: Vec<Option<Slice>> = (0..assignments.len())
        .map(|i| {
            assignments
                .get(i + 1)
                .map(|a| a.segment.meta().map(|m| m.min_key))
                .transpose()
        })
        .collect::<swaydb_core::Result<_>>()?;

    for (i, assignment) in assignments.iter().enumerate() {
        let meta = assignment.segment.meta()?;

        for assignable in assignment.mid_overlap.iter().chain(&assignment.tail_gap) {
            let Assignable::Entry(entry) = assignable else {
                continue;
            };

            if let Some(next_min) = &next_mins[i] {
                assert!(
                    entry.key() < next_min,
                    "key {:?} crossed into the next target",
                    entry.key(),
                );
            }
        }

        for assignable in &assignment.mid_overlap {
            if let Assignable::Entry(entry) = assignable {
                assert!(*entry.key() >= meta.min_key);
            }
        }
    }

    Ok(())
}

#[test]
fn sub_segment_contained_in_gap_stays_whole() -> swaydb_core::Result<()> {
    let targets = vec![
        segment_of(&[put(&[10]), put(&[20])]),
        segment_of(&[put(&[100]), put(&[120])]),
    ];

    // Fits entirely between the two targets
    let sub = segment_of(&[put(&[40]), put(&[50])]);

    let assignments = assign([Assignable::Segment(sub)], &targets, true)?;

    assert!(matches!(
        assignments[0].tail_gap.as_slice(),
        [Assignable::Segment(_)],
    ));
    assert!(assignments[1].is_untouched());

    Ok(())
}
