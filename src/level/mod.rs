// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Multi-level read traversal
//!
//! Walks a stack of levels (Level 0 map on top, segment levels below),
//! resolving versioned values with the merger as it descends. A level
//! returns its raw stored entry; whether that answers the read or needs the
//! level below depends on the variant: puts answer directly, untimed removes
//! prove absence, everything else merges against the deeper result.

use crate::{
    deadline::Deadline,
    function_store::FunctionStore,
    level_zero::LevelZeroMapCache,
    merge,
    segment::{meta::SegmentMeta, read_state::ThreadReadState, Segment, SegmentRead},
    time::Time,
    value::{Entry, Put, Value},
    Slice,
};
use std::sync::Arc;

/// A user-visible resolved key-value
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LiveValue {
    pub key: Slice,
    pub value: Option<Slice>,
    pub deadline: Option<Deadline>,
    pub time: Time,
}

impl LiveValue {
    fn of(key: &Slice, put: &Put) -> Self {
        Self {
            key: key.clone(),
            value: put.value.clone(),
            deadline: put.deadline,
            time: put.time.clone(),
        }
    }

    fn to_put(&self) -> Value {
        Value::Put(Put {
            value: self.value.clone(),
            deadline: self.deadline,
            time: self.time.clone(),
        })
    }
}

/// One tier of the read stack
pub trait LevelReader {
    /// The raw stored entry governing `key` in this level.
    fn current(&self, key: &Slice, state: &mut ThreadReadState)
        -> crate::Result<Option<Entry>>;

    /// The first entry that can produce keys strictly above `key`.
    fn higher_entry(
        &self,
        key: &Slice,
        state: &mut ThreadReadState,
    ) -> crate::Result<Option<Entry>>;

    /// The last entry that can produce keys strictly below `key`.
    fn lower_entry(
        &self,
        key: &Slice,
        state: &mut ThreadReadState,
    ) -> crate::Result<Option<Entry>>;
}

impl LevelReader for LevelZeroMapCache {
    fn current(
        &self,
        key: &Slice,
        _state: &mut ThreadReadState,
    ) -> crate::Result<Option<Entry>> {
        Ok(self.get(key))
    }

    fn higher_entry(
        &self,
        key: &Slice,
        _state: &mut ThreadReadState,
    ) -> crate::Result<Option<Entry>> {
        Ok(self.higher(key))
    }

    fn lower_entry(
        &self,
        key: &Slice,
        _state: &mut ThreadReadState,
    ) -> crate::Result<Option<Entry>> {
        Ok(self.lower(key))
    }
}

/// A run of non-overlapping segments forming one level
pub struct SegmentLevel {
    segments: Vec<Arc<Segment>>,
    metas: Vec<SegmentMeta>,
}

impl SegmentLevel {
    pub fn new(segments: Vec<Arc<Segment>>) -> crate::Result<Self> {
        let metas = segments
            .iter()
            .map(|s| s.meta())
            .collect::<crate::Result<Vec<_>>>()?;

        debug_assert!(
            metas
                .windows(2)
                .all(|pair| pair[0].min_key < pair[1].min_key),
            "level segments must be sorted by min key",
        );

        Ok(Self { segments, metas })
    }

    #[must_use]
    pub fn segments(&self) -> &[Arc<Segment>] {
        &self.segments
    }

    fn floor_index(&self, key: &Slice) -> Option<usize> {
        let i = self.metas.partition_point(|m| m.min_key <= *key);
        i.checked_sub(1)
    }
}

impl LevelReader for SegmentLevel {
    fn current(&self, key: &Slice, state: &mut ThreadReadState) -> crate::Result<Option<Entry>> {
        let Some(idx) = self.floor_index(key) else {
            return Ok(None);
        };

        #[allow(clippy::expect_used)]
        let meta = self.metas.get(idx).expect("floor index is valid");

        if !meta.key_range().contains_key(key) {
            return Ok(None);
        }

        #[allow(clippy::expect_used)]
        self.segments
            .get(idx)
            .expect("floor index is valid")
            .get(key, state)
    }

    fn higher_entry(
        &self,
        key: &Slice,
        state: &mut ThreadReadState,
    ) -> crate::Result<Option<Entry>> {
        let start = self.floor_index(key).unwrap_or(0);

        for segment in self.segments.iter().skip(start) {
            if let Some(entry) = segment.higher(key, state)? {
                return Ok(Some(entry));
            }
        }

        Ok(None)
    }

    fn lower_entry(
        &self,
        key: &Slice,
        state: &mut ThreadReadState,
    ) -> crate::Result<Option<Entry>> {
        let i = self.metas.partition_point(|m| m.min_key < *key);

        let Some(start) = i.checked_sub(1) else {
            return Ok(None);
        };

        for idx in (0..=start).rev() {
            #[allow(clippy::expect_used)]
            let segment = self.segments.get(idx).expect("index is in bounds");

            if let Some(entry) = segment.lower(key, state)? {
                return Ok(Some(entry));
            }
        }

        Ok(None)
    }
}

/// Point read across the level stack.
pub fn get(
    levels: &[&dyn LevelReader],
    key: &Slice,
    functions: &FunctionStore,
    state: &mut ThreadReadState,
) -> crate::Result<Option<LiveValue>> {
    let Some((head, rest)) = levels.split_first() else {
        return Ok(None);
    };

    let Some(entry) = head.current(key, state)? else {
        return get(rest, key, functions, state);
    };

    let value = match &entry {
        Entry::Fixed { value, .. } => value.clone(),
        Entry::Range(range) => range.value_at(key),
    };

    resolve(&value, key, rest, functions, state)
}

/// Resolves a raw stored value against the levels below it.
fn resolve(
    current: &Value,
    key: &Slice,
    rest: &[&dyn LevelReader],
    functions: &FunctionStore,
    state: &mut ThreadReadState,
) -> crate::Result<Option<LiveValue>> {
    match current {
        Value::Put(put) => Ok(put.is_alive().then(|| LiveValue::of(key, put))),

        Value::Remove(remove) if remove.deadline.is_none() => Ok(None),

        // Timed removes, updates, functions and pending chains all depend on
        // what lives below
        _ => {
            let Some(deeper) = get(rest, key, functions, state)? else {
                // Nothing below: updates and functions degenerate, a timed
                // remove has nothing to expire
                return Ok(None);
            };

            let merged = merge::fixed(current, &deeper.to_put(), key, functions)?;

            match merged {
                Value::Put(put) if put.is_alive() => Ok(Some(LiveValue::of(key, &put))),
                _ => Ok(None),
            }
        }
    }
}

/// The smallest live key strictly above `key`, across all levels.
pub fn higher(
    levels: &[&dyn LevelReader],
    key: &Slice,
    functions: &FunctionStore,
    state: &mut ThreadReadState,
) -> crate::Result<Option<LiveValue>> {
    let Some((head, rest)) = levels.split_first() else {
        return Ok(None);
    };

    let mut k = key.clone();

    loop {
        let Some(current) = head.higher_entry(&k, state)? else {
            return higher(rest, &k, functions, state);
        };

        match current {
            Entry::Fixed {
                key: current_key,
                value,
            } => {
                if let Some(deeper) = higher(rest, &k, functions, state)? {
                    // Nothing in this level sits between k and the current
                    // entry, so a smaller deeper key wins outright
                    if deeper.key < current_key {
                        return Ok(Some(deeper));
                    }
                }

                if let Some(live) = resolve(&value, &current_key, rest, functions, state)? {
                    return Ok(Some(live));
                }

                k = current_key;
            }

            Entry::Range(range) => {
                if range.from_key > k {
                    if let Some(deeper) = higher(rest, &k, functions, state)? {
                        if deeper.key < range.from_key {
                            return Ok(Some(deeper));
                        }
                    }

                    let at_start = range.value_at(&range.from_key);

                    if let Some(live) =
                        resolve(&at_start, &range.from_key.clone(), rest, functions, state)?
                    {
                        return Ok(Some(live));
                    }
                }

                // Inside the interval, keys only exist where deeper levels
                // have them; the range value applies on top
                let mut scan = k.clone().max(range.from_key.clone());

                loop {
                    let Some(deeper) = higher(rest, &scan, functions, state)? else {
                        break;
                    };

                    if deeper.key >= range.to_key {
                        break;
                    }

                    let merged = merge::fixed(
                        &range.range_value.to_value(),
                        &deeper.to_put(),
                        &deeper.key,
                        functions,
                    )?;

                    if let Value::Put(put) = &merged {
                        if put.is_alive() {
                            return Ok(Some(LiveValue::of(&deeper.key, put)));
                        }
                    }

                    scan = deeper.key;
                }

                // The interval is exhausted; its exclusive end key is the
                // smallest candidate left and needs a full-stack read
                if let Some(live) = get(levels, &range.to_key, functions, state)? {
                    return Ok(Some(live));
                }

                k = range.to_key;
            }
        }
    }
}

/// The greatest live key strictly below `key`, across all levels.
pub fn lower(
    levels: &[&dyn LevelReader],
    key: &Slice,
    functions: &FunctionStore,
    state: &mut ThreadReadState,
) -> crate::Result<Option<LiveValue>> {
    let Some((head, rest)) = levels.split_first() else {
        return Ok(None);
    };

    let mut k = key.clone();

    loop {
        let Some(current) = head.lower_entry(&k, state)? else {
            return lower(rest, &k, functions, state);
        };

        match current {
            Entry::Fixed {
                key: current_key,
                value,
            } => {
                if let Some(deeper) = lower(rest, &k, functions, state)? {
                    if deeper.key > current_key {
                        return Ok(Some(deeper));
                    }
                }

                if let Some(live) = resolve(&value, &current_key, rest, functions, state)? {
                    return Ok(Some(live));
                }

                k = current_key;
            }

            Entry::Range(range) => {
                // The range covers [from_key, min(to_key, k))
                let top = range.to_key.clone().min(k.clone());

                if let Some(deeper) = lower(rest, &k, functions, state)? {
                    // Keys in [top, k) are covered by nothing in this level
                    if deeper.key >= top {
                        return Ok(Some(deeper));
                    }
                }

                let mut scan = top;

                loop {
                    let Some(deeper) = lower(rest, &scan, functions, state)? else {
                        break;
                    };

                    if deeper.key <= range.from_key {
                        break;
                    }

                    let merged = merge::fixed(
                        &range.range_value.to_value(),
                        &deeper.to_put(),
                        &deeper.key,
                        functions,
                    )?;

                    if let Value::Put(put) = &merged {
                        if put.is_alive() {
                            return Ok(Some(LiveValue::of(&deeper.key, put)));
                        }
                    }

                    scan = deeper.key;
                }

                // The from key itself is the greatest candidate left
                if let Some(live) = get(levels, &range.from_key, functions, state)? {
                    return Ok(Some(live));
                }

                k = range.from_key;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        function_store::{FunctionOutput, SwayFunction},
        time::Time,
        value::{RangeEntry, RangeValue, Remove, Update},
    };
    use test_log::test;

    fn l0(functions: &Arc<FunctionStore>) -> LevelZeroMapCache {
        LevelZeroMapCache::new(functions.clone())
    }

    #[test]
    fn traversal_get_falls_through_levels() -> crate::Result<()> {
        let functions = Arc::new(FunctionStore::new());
        let mut state = ThreadReadState::new();

        let upper = l0(&functions);
        let deeper = l0(&functions);

        deeper.write(Entry::fixed(*b"a", Value::put(*b"deep", None, Time::from(1))))?;
        upper.write(Entry::fixed(*b"b", Value::put(*b"up", None, Time::from(2))))?;

        let levels: Vec<&dyn LevelReader> = vec![&upper, &deeper];

        let a = get(&levels, &Slice::from(*b"a"), &functions, &mut state)?
            .expect("key should resolve");
        assert_eq!(Some(Slice::from(*b"deep")), a.value);

        let b = get(&levels, &Slice::from(*b"b"), &functions, &mut state)?
            .expect("key should resolve");
        assert_eq!(Some(Slice::from(*b"up")), b.value);

        assert!(get(&levels, &Slice::from(*b"c"), &functions, &mut state)?.is_none());

        Ok(())
    }

    #[test]
    fn traversal_update_needs_deeper_put() -> crate::Result<()> {
        let functions = Arc::new(FunctionStore::new());
        let mut state = ThreadReadState::new();

        let upper = l0(&functions);
        let deeper = l0(&functions);

        upper.write(Entry::fixed(*b"a", Value::update(*b"u", None, Time::from(5))))?;
        upper.write(Entry::fixed(*b"b", Value::update(*b"u", None, Time::from(5))))?;
        deeper.write(Entry::fixed(*b"a", Value::put(*b"p", None, Time::from(1))))?;

        let levels: Vec<&dyn LevelReader> = vec![&upper, &deeper];

        // Update over an existing put applies
        let a = get(&levels, &Slice::from(*b"a"), &functions, &mut state)?
            .expect("key should resolve");
        assert_eq!(Some(Slice::from(*b"u")), a.value);

        // Update without anything below degenerates
        assert!(get(&levels, &Slice::from(*b"b"), &functions, &mut state)?.is_none());

        Ok(())
    }

    #[test]
    fn traversal_function_applies_to_deeper_put() -> crate::Result<()> {
        let functions = Arc::new(FunctionStore::new());
        functions.put(
            *b"swap",
            SwayFunction::KeyValue(Arc::new(|_, _| FunctionOutput::Update {
                value: Some(Slice::from(*b"v2")),
                deadline: None,
            })),
        );

        let mut state = ThreadReadState::new();

        let upper = l0(&functions);
        let deeper = l0(&functions);

        upper.write(Entry::fixed(*b"k", Value::function(*b"swap", Time::from(10))))?;
        deeper.write(Entry::fixed(*b"k", Value::put(*b"v1", None, Time::from(5))))?;

        let levels: Vec<&dyn LevelReader> = vec![&upper, &deeper];

        let hit = get(&levels, &Slice::from(*b"k"), &functions, &mut state)?
            .expect("function should resolve against deeper put");

        assert_eq!(Some(Slice::from(*b"v2")), hit.value);
        assert_eq!(Time::from(10), hit.time);

        Ok(())
    }

    #[test]
    fn traversal_remove_range_hides_deeper_keys() -> crate::Result<()> {
        let functions = Arc::new(FunctionStore::new());
        let mut state = ThreadReadState::new();

        let upper = l0(&functions);
        let deeper = l0(&functions);

        for i in 1u8..=10 {
            deeper.write(Entry::fixed(
                [i],
                Value::put([i], None, Time::from(u64::from(i))),
            ))?;
        }

        upper.write(Entry::Range(RangeEntry::new(
            Slice::from([2]),
            Slice::from([5]),
            None,
            RangeValue::Remove(Remove {
                deadline: None,
                time: Time::from(100),
            }),
        )))?;

        let levels: Vec<&dyn LevelReader> = vec![&upper, &deeper];

        assert!(get(&levels, &Slice::from([1]), &functions, &mut state)?.is_some());
        for i in 2u8..5 {
            assert!(
                get(&levels, &Slice::from([i]), &functions, &mut state)?.is_none(),
                "key {i} should be removed",
            );
        }
        assert!(get(&levels, &Slice::from([5]), &functions, &mut state)?.is_some());

        Ok(())
    }

    #[test]
    fn traversal_higher_merges_levels() -> crate::Result<()> {
        let functions = Arc::new(FunctionStore::new());
        let mut state = ThreadReadState::new();

        let upper = l0(&functions);
        let deeper = l0(&functions);

        upper.write(Entry::fixed([4], Value::put(*b"u", None, Time::from(10))))?;
        deeper.write(Entry::fixed([2], Value::put(*b"d", None, Time::from(1))))?;
        deeper.write(Entry::fixed([6], Value::put(*b"d", None, Time::from(1))))?;

        let levels: Vec<&dyn LevelReader> = vec![&upper, &deeper];

        let h = higher(&levels, &Slice::from([1]), &functions, &mut state)?
            .expect("should find higher");
        assert_eq!(Slice::from([2]), h.key);

        let h = higher(&levels, &Slice::from([2]), &functions, &mut state)?
            .expect("should find higher");
        assert_eq!(Slice::from([4]), h.key);

        let h = higher(&levels, &Slice::from([4]), &functions, &mut state)?
            .expect("should find higher");
        assert_eq!(Slice::from([6]), h.key);

        assert!(higher(&levels, &Slice::from([6]), &functions, &mut state)?.is_none());

        Ok(())
    }

    #[test]
    fn traversal_higher_skips_removed_keys() -> crate::Result<()> {
        let functions = Arc::new(FunctionStore::new());
        let mut state = ThreadReadState::new();

        let upper = l0(&functions);
        let deeper = l0(&functions);

        deeper.write(Entry::fixed([2], Value::put(*b"d", None, Time::from(1))))?;
        deeper.write(Entry::fixed([4], Value::put(*b"d", None, Time::from(1))))?;
        upper.write(Entry::fixed([2], Value::remove(None, Time::from(10))))?;

        let levels: Vec<&dyn LevelReader> = vec![&upper, &deeper];

        let h = higher(&levels, &Slice::from([1]), &functions, &mut state)?
            .expect("should find higher");
        assert_eq!(Slice::from([4]), h.key);

        Ok(())
    }

    #[test]
    fn traversal_higher_applies_range_to_deeper_keys() -> crate::Result<()> {
        let functions = Arc::new(FunctionStore::new());
        let mut state = ThreadReadState::new();

        let upper = l0(&functions);
        let deeper = l0(&functions);

        deeper.write(Entry::fixed([3], Value::put(*b"old", None, Time::from(1))))?;
        deeper.write(Entry::fixed([4], Value::put(*b"old", None, Time::from(1))))?;

        // Update range over [2..4): key 3 shows the new value, key 4 the old
        upper.write(Entry::Range(RangeEntry::new(
            Slice::from([2]),
            Slice::from([4]),
            None,
            RangeValue::Update(Update {
                value: Some(Slice::from(*b"new")),
                deadline: None,
                time: Time::from(10),
            }),
        )))?;

        let levels: Vec<&dyn LevelReader> = vec![&upper, &deeper];

        let h = higher(&levels, &Slice::from([2]), &functions, &mut state)?
            .expect("should find higher");
        assert_eq!(Slice::from([3]), h.key);
        assert_eq!(Some(Slice::from(*b"new")), h.value);

        let h = higher(&levels, &Slice::from([3]), &functions, &mut state)?
            .expect("should find higher");
        assert_eq!(Slice::from([4]), h.key);
        assert_eq!(Some(Slice::from(*b"old")), h.value);

        Ok(())
    }

    #[test]
    fn traversal_lower_merges_levels() -> crate::Result<()> {
        let functions = Arc::new(FunctionStore::new());
        let mut state = ThreadReadState::new();

        let upper = l0(&functions);
        let deeper = l0(&functions);

        upper.write(Entry::fixed([4], Value::put(*b"u", None, Time::from(10))))?;
        deeper.write(Entry::fixed([2], Value::put(*b"d", None, Time::from(1))))?;
        deeper.write(Entry::fixed([6], Value::put(*b"d", None, Time::from(1))))?;

        let levels: Vec<&dyn LevelReader> = vec![&upper, &deeper];

        let l = lower(&levels, &Slice::from([9]), &functions, &mut state)?
            .expect("should find lower");
        assert_eq!(Slice::from([6]), l.key);

        let l = lower(&levels, &Slice::from([6]), &functions, &mut state)?
            .expect("should find lower");
        assert_eq!(Slice::from([4]), l.key);

        let l = lower(&levels, &Slice::from([4]), &functions, &mut state)?
            .expect("should find lower");
        assert_eq!(Slice::from([2]), l.key);

        assert!(lower(&levels, &Slice::from([2]), &functions, &mut state)?.is_none());

        Ok(())
    }

    #[test]
    fn traversal_lower_skips_range_tombstones() -> crate::Result<()> {
        let functions = Arc::new(FunctionStore::new());
        let mut state = ThreadReadState::new();

        let upper = l0(&functions);
        let deeper = l0(&functions);

        deeper.write(Entry::fixed([2], Value::put(*b"d", None, Time::from(1))))?;
        deeper.write(Entry::fixed([4], Value::put(*b"d", None, Time::from(1))))?;

        upper.write(Entry::Range(RangeEntry::new(
            Slice::from([3]),
            Slice::from([8]),
            None,
            RangeValue::Remove(Remove {
                deadline: None,
                time: Time::from(10),
            }),
        )))?;

        let levels: Vec<&dyn LevelReader> = vec![&upper, &deeper];

        let l = lower(&levels, &Slice::from([9]), &functions, &mut state)?
            .expect("should find lower");
        assert_eq!(Slice::from([2]), l.key);

        Ok(())
    }
}
