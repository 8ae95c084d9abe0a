// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! In-memory Level 0 write buffer
//!
//! An ordered map from key to versioned value, kept well-formed under range
//! insertions: keys are distinct, ranges never overlap, and a fixed key lying
//! inside a range is represented as the from-value of a sub-range starting at
//! that key.
//!
//! Writes are serialised by the level's single writer; reads go through the
//! lock-free skiplist concurrently.

use crate::{
    function_store::FunctionStore,
    merge::stream::merge_streams,
    value::{Entry, RangeEntry, RangeValue, Value},
    Slice,
};
use crossbeam_skiplist::SkipMap;
use std::{
    ops::Bound,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

/// What the map stores per key: a fixed value, or the remainder of a range
/// entry whose `from_key` is the map key.
#[derive(Clone, Debug)]
enum Slot {
    Fixed(Value),
    Range {
        to_key: Slice,
        from_value: Option<Value>,
        range_value: RangeValue,
    },
}

impl Slot {
    fn to_entry(&self, key: &Slice) -> Entry {
        match self {
            Self::Fixed(value) => Entry::Fixed {
                key: key.clone(),
                value: value.clone(),
            },
            Self::Range {
                to_key,
                from_value,
                range_value,
            } => Entry::Range(RangeEntry {
                from_key: key.clone(),
                to_key: to_key.clone(),
                from_value: from_value.clone(),
                range_value: range_value.clone(),
            }),
        }
    }

    fn from_entry(entry: Entry) -> (Slice, Self) {
        match entry {
            Entry::Fixed { key, value } => (key, Self::Fixed(value)),
            Entry::Range(range) => (
                range.from_key,
                Self::Range {
                    to_key: range.to_key,
                    from_value: range.from_value,
                    range_value: range.range_value,
                },
            ),
        }
    }
}

/// The Level 0 map cache
pub struct LevelZeroMapCache {
    map: SkipMap<Slice, Slot>,

    functions: Arc<FunctionStore>,

    /// Approximate byte size of buffered entries.
    ///
    /// If this grows past the level's budget, a flush is triggered.
    approximate_size: AtomicU64,
}

impl LevelZeroMapCache {
    #[must_use]
    pub fn new(functions: Arc<FunctionStore>) -> Self {
        Self {
            map: SkipMap::new(),
            functions,
            approximate_size: AtomicU64::default(),
        }
    }

    /// Number of map slots (ranges count once).
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Gets approximate size of the buffer in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.approximate_size.load(Ordering::Acquire)
    }

    /// Writes one entry, splitting and merging whatever it overlaps.
    pub fn write(&self, entry: Entry) -> crate::Result<()> {
        let size = entry_size(&entry);

        let overlapped = self.take_overlapping(&entry);
        let merged = merge_streams([entry], overlapped, &self.functions)?;

        for piece in merged {
            let (key, slot) = Slot::from_entry(piece);
            self.map.insert(key, slot);
        }

        self.approximate_size.fetch_add(size, Ordering::AcqRel);

        Ok(())
    }

    /// Removes and returns every entry the incoming entry overlaps, in order.
    fn take_overlapping(&self, entry: &Entry) -> Vec<Entry> {
        let mut overlapped = Vec::new();

        let (from, until) = match entry {
            Entry::Fixed { key, .. } => (key, None),
            Entry::Range(range) => (&range.from_key, Some(&range.to_key)),
        };

        // A range starting below may still reach over `from`
        if let Some(floor) = self.map.upper_bound(Bound::Excluded(from.as_ref())) {
            if let Slot::Range { to_key, .. } = floor.value() {
                if *to_key > *from {
                    overlapped.push(floor.value().to_entry(floor.key()));
                    floor.remove();
                }
            }
        }

        match until {
            Some(until) => {
                for existing in self.map.range(from.clone()..until.clone()) {
                    overlapped.push(existing.value().to_entry(existing.key()));
                    existing.remove();
                }
            }
            None => {
                if let Some(existing) = self.map.get(from) {
                    overlapped.push(existing.value().to_entry(existing.key()));
                    existing.remove();
                }
            }
        }

        overlapped
    }

    /// The stored entry governing `key`: a fixed entry at the key, or the
    /// range containing it.
    #[must_use]
    pub fn get(&self, key: &Slice) -> Option<Entry> {
        let floor = self.map.upper_bound(Bound::Included(key.as_ref()))?;

        match floor.value() {
            Slot::Fixed(_) if *floor.key() == *key => Some(floor.value().to_entry(floor.key())),
            Slot::Range { to_key, .. } if *key < *to_key => {
                Some(floor.value().to_entry(floor.key()))
            }
            _ => None,
        }
    }

    /// The last entry at or below `key`.
    #[must_use]
    pub fn floor(&self, key: &Slice) -> Option<Entry> {
        self.map
            .upper_bound(Bound::Included(key.as_ref()))
            .map(|e| e.value().to_entry(e.key()))
    }

    /// The first entry strictly above `key`, or the range containing it.
    #[must_use]
    pub fn higher(&self, key: &Slice) -> Option<Entry> {
        if let Some(entry) = self.get(key) {
            if let Entry::Range(range) = &entry {
                if range.to_key > *key {
                    return Some(entry);
                }
            }
        }

        self.map
            .lower_bound(Bound::Excluded(key.as_ref()))
            .map(|e| e.value().to_entry(e.key()))
    }

    /// The last entry strictly below `key`.
    #[must_use]
    pub fn lower(&self, key: &Slice) -> Option<Entry> {
        self.map
            .upper_bound(Bound::Excluded(key.as_ref()))
            .map(|e| e.value().to_entry(e.key()))
    }

    /// Snapshot of all entries in key order.
    #[must_use]
    pub fn entries(&self) -> Vec<Entry> {
        self.map
            .iter()
            .map(|e| e.value().to_entry(e.key()))
            .collect()
    }
}

fn entry_size(entry: &Entry) -> u64 {
    let len = match entry {
        Entry::Fixed { key, value } => key.len() + value_size(value),
        Entry::Range(range) => {
            range.from_key.len()
                + range.to_key.len()
                + range.from_value.as_ref().map_or(0, value_size)
                + value_size(&range.range_value.to_value())
        }
    };

    len as u64
}

fn value_size(value: &Value) -> usize {
    match value {
        Value::Put(v) => v.value.as_ref().map_or(0, |v| v.len()),
        Value::Update(v) => v.value.as_ref().map_or(0, |v| v.len()),
        Value::Remove(_) | Value::Function(_) => 0,
        Value::PendingApply(pending) => pending
            .applies
            .iter()
            .map(|apply| value_size(&apply.to_value()))
            .sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        time::Time,
        value::{Remove, Update},
    };
    use test_log::test;

    fn cache() -> LevelZeroMapCache {
        LevelZeroMapCache::new(Arc::new(FunctionStore::new()))
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

    fn assert_no_overlaps(cache: &LevelZeroMapCache) {
        let entries = cache.entries();

        for pair in entries.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);

            assert!(a.key() < b.key(), "keys out of order");

            if let Entry::Range(range) = a {
                assert!(range.to_key <= *b.key(), "ranges overlap: {a:?} / {b:?}");
            }
        }
    }

    #[test]
    fn level_zero_fixed_overwrite() -> crate::Result<()> {
        let cache = cache();

        cache.write(Entry::fixed(*b"a", Value::put(*b"1", None, Time::from(1))))?;
        cache.write(Entry::fixed(*b"a", Value::put(*b"2", None, Time::from(2))))?;

        assert_eq!(1, cache.len());

        match cache.get(&Slice::from(*b"a")) {
            Some(Entry::Fixed { value, .. }) => {
                assert_eq!(Value::put(*b"2", None, Time::from(2)), value);
            }
            other => panic!("expected fixed entry, got {other:?}"),
        }

        Ok(())
    }

    #[test]
    fn level_zero_range_overwrite_splits_prior_range() -> crate::Result<()> {
        let cache = cache();

        cache.write(update_range(&[10], &[20], b"20", 1))?;
        cache.write(update_range(&[1], &[15], b"40", 2))?;

        let entries = cache.entries();
        assert_eq!(3, entries.len());
        assert_no_overlaps(&cache);

        let pieces: Vec<_> = entries
            .iter()
            .map(|kv| match kv {
                Entry::Range(r) => {
                    let value = match &r.range_value {
                        RangeValue::Update(u) => u.value.clone(),
                        other => panic!("expected update range, got {other:?}"),
                    };
                    (r.from_key.to_vec(), r.to_key.to_vec(), value)
                }
                Entry::Fixed { .. } => panic!("expected only ranges"),
            })
            .collect();

        assert_eq!(
            vec![
                (vec![1], vec![10], Some(Slice::from(*b"40"))),
                (vec![10], vec![15], Some(Slice::from(*b"40"))),
                (vec![15], vec![20], Some(Slice::from(*b"20"))),
            ],
            pieces,
        );

        Ok(())
    }

    #[test]
    fn level_zero_remove_range_clears_inner_fixed_entries() -> crate::Result<()> {
        let cache = cache();

        for i in 1u8..=10 {
            cache.write(Entry::fixed([i], Value::put([i], None, Time::from(u64::from(i)))))?;
        }

        cache.write(remove_range(&[2], &[5], 100))?;

        assert_no_overlaps(&cache);

        // Endpoint below the range keeps its put
        assert!(cache.get(&Slice::from([1])).is_some_and(|e| e.has_put()));

        // Keys covered by [2..5) resolve to tombstones
        for i in 2u8..5 {
            let entry = cache.get(&Slice::from([i])).expect("entry should exist");
            match entry {
                Entry::Range(range) => {
                    assert!(matches!(range.value_at(&[i]), Value::Remove(_)));
                }
                other => panic!("expected range piece, got {other:?}"),
            }
        }

        // The exclusive end bound keeps its put
        assert!(cache.get(&Slice::from([5])).is_some_and(|e| e.has_put()));
        assert!(cache.get(&Slice::from([10])).is_some_and(|e| e.has_put()));

        Ok(())
    }

    #[test]
    fn level_zero_fixed_inside_range_becomes_from_value() -> crate::Result<()> {
        let cache = cache();

        cache.write(update_range(&[1], &[9], b"u", 1))?;
        cache.write(Entry::fixed([5], Value::put(*b"p", None, Time::from(2))))?;

        assert_no_overlaps(&cache);

        let entry = cache.get(&Slice::from([5])).expect("entry should exist");
        match entry {
            Entry::Range(range) => {
                assert_eq!(range.from_key, [5]);
                assert!(matches!(range.from_value, Some(Value::Put(_))));
            }
            other => panic!("expected sub-range, got {other:?}"),
        }

        // The untouched left piece still covers [1..5)
        let left = cache.get(&Slice::from([3])).expect("entry should exist");
        match left {
            Entry::Range(range) => {
                assert_eq!(range.from_key, [1]);
                assert_eq!(range.to_key, [5]);
                assert!(range.from_value.is_none());
            }
            other => panic!("expected range piece, got {other:?}"),
        }

        Ok(())
    }

    #[test]
    fn level_zero_navigation() -> crate::Result<()> {
        let cache = cache();

        cache.write(Entry::fixed([2], Value::put(*b"a", None, Time::from(1))))?;
        cache.write(Entry::fixed([6], Value::put(*b"b", None, Time::from(2))))?;
        cache.write(update_range(&[10], &[20], b"u", 3))?;

        assert_eq!(
            Some(vec![6]),
            cache.higher(&Slice::from([2])).map(|e| e.key().to_vec()),
        );
        assert_eq!(
            Some(vec![2]),
            cache.lower(&Slice::from([6])).map(|e| e.key().to_vec()),
        );

        // A range containing the probe key counts as its own higher
        assert_eq!(
            Some(vec![10]),
            cache.higher(&Slice::from([15])).map(|e| e.key().to_vec()),
        );

        assert_eq!(
            Some(vec![10]),
            cache.floor(&Slice::from([12])).map(|e| e.key().to_vec()),
        );

        assert!(cache.get(&Slice::from([4])).is_none());

        Ok(())
    }
}
