// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Persistent segments
//!
//! A segment is an immutable, sorted, self-describing container for a
//! contiguous key range. A [`SegmentRef`] reads one segment body through its
//! block cache and keeps a concurrent skiplist of recently accessed entries;
//! a [`SegmentMany`] multiplexes many child bodies behind a list segment.

pub mod binary_search_index;
pub mod block;
pub mod block_cache;
pub mod bloom;
pub mod config;
pub mod footer;
pub mod hash_index;
pub mod many;
pub mod meta;
pub mod read_state;
pub mod searcher;
pub mod sorted_index;
pub mod values;
pub mod writer;

use crate::{
    file::{SharedSource, Source},
    segment::{
        block_cache::{BlockPool, SegmentBlockCache},
        meta::SegmentMeta,
        read_state::ThreadReadState,
        sorted_index::IndexedEntry,
    },
    sweeper::MemorySweeper,
    value::Entry,
    Slice,
};
use crossbeam_skiplist::SkipMap;
use enum_dispatch::enum_dispatch;
use many::SegmentMany;
use std::{
    ops::Bound,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

/// Process-local segment identifier
pub type SegmentId = u64;

static NEXT_SEGMENT_ID: AtomicU64 = AtomicU64::new(0);

fn next_segment_id() -> SegmentId {
    NEXT_SEGMENT_ID.fetch_add(1, Ordering::Relaxed)
}

/// File format id of a one-segment file
pub const FORMAT_ONE: u8 = 0x01;

/// File format id of a many-segment file
pub const FORMAT_MANY: u8 = 0x7F;

/// Shared read interface of one- and many-segments
#[enum_dispatch]
pub trait SegmentRead {
    /// The entry governing `key`: an exact match or the range containing it.
    fn get(&self, key: &Slice, state: &mut ThreadReadState) -> crate::Result<Option<Entry>>;

    /// The first entry that can produce keys strictly above `key`.
    fn higher(&self, key: &Slice, state: &mut ThreadReadState) -> crate::Result<Option<Entry>>;

    /// The last entry that can produce keys strictly below `key`.
    fn lower(&self, key: &Slice, state: &mut ThreadReadState) -> crate::Result<Option<Entry>>;

    /// Bloom filter check; `true` when no filter exists.
    fn might_contain(&self, key: &Slice) -> crate::Result<bool>;

    /// Restartable iterator over all entries in key order.
    fn iter(&self) -> crate::Result<SegmentIter>;

    /// The segment's scalar statistics.
    fn meta(&self) -> crate::Result<SegmentMeta>;

    /// Approximate on-disk size in bytes.
    fn byte_size(&self) -> u64;

    /// Drops cached blocks and entries (memory pressure).
    fn clear_cached_data(&self);
}

/// A persistent segment
#[enum_dispatch(SegmentRead)]
pub enum Segment {
    One(SegmentRef),
    Many(SegmentMany),
}

impl Segment {
    /// Loads a segment file, dispatching on its format byte.
    pub fn load(
        source: SharedSource,
        pool: BlockPool,
        sweeper: Arc<dyn MemorySweeper>,
    ) -> crate::Result<Self> {
        let format = source.read(0, 1)?;

        match format.first() {
            Some(&FORMAT_ONE) => Ok(Self::One(SegmentRef::new(
                source.clone(),
                1,
                source.size() - 1,
                pool,
                sweeper,
            ))),
            Some(&FORMAT_MANY) => Ok(Self::Many(SegmentMany::load(source, pool, sweeper)?)),
            Some(&tag) => Err(crate::Error::InvalidTag(("SegmentFormat", tag))),
            None => Err(crate::Error::Corruption("empty segment file")),
        }
    }
}

/// Reads one segment body
///
/// Holds the lazily materialised block readers plus a concurrent skiplist of
/// recently returned entries. Cache inserts race insert-wins: a reader that
/// lost the race discards its local result and reuses the stored one, and the
/// memory sweeper is notified only for the winning insert.
pub struct SegmentRef {
    id: SegmentId,
    cache: SegmentBlockCache,
    skiplist: SkipMap<Slice, IndexedEntry>,
    sweeper: Arc<dyn MemorySweeper>,
}

impl SegmentRef {
    #[must_use]
    pub fn new(
        source: SharedSource,
        base: u64,
        body_len: u64,
        pool: BlockPool,
        sweeper: Arc<dyn MemorySweeper>,
    ) -> Self {
        Self {
            id: next_segment_id(),
            cache: SegmentBlockCache::new(source, base, body_len, pool),
            skiplist: SkipMap::new(),
            sweeper,
        }
    }

    #[must_use]
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Removes one cached entry; called by the memory sweeper.
    pub fn evict(&self, key: &[u8]) -> bool {
        self.skiplist.remove(key).is_some()
    }

    /// Number of cached entries.
    #[must_use]
    pub fn cached_entry_count(&self) -> usize {
        self.skiplist.len()
    }

    /// Inserts a found entry with insert-wins semantics and returns the
    /// authoritative (stored) entry.
    fn cache_entry(&self, found: IndexedEntry) -> IndexedEntry {
        let key = found.entry.key().clone();

        let mut won = false;

        let stored = self.skiplist.get_or_insert_with(key.clone(), || {
            won = true;
            found
        });

        let stored = stored.value().clone();

        if won {
            let byte_size = key.len() + entry_weight(&stored.entry);
            self.sweeper.add(byte_size, &key);
        }

        stored
    }

    /// The skiplist entry at or below `key`, as a `(floor, is_hit)` pair:
    /// `is_hit` is set when the floor itself answers a point lookup for
    /// `key`.
    fn cached_floor(&self, key: &Slice) -> (Option<IndexedEntry>, bool) {
        let Some(cached) = self.skiplist.upper_bound(Bound::Included(key.as_ref())) else {
            return (None, false);
        };

        let entry = cached.value().clone();

        let hit = match &entry.entry {
            Entry::Fixed { key: entry_key, .. } => entry_key == key,
            Entry::Range(range) => range.contains_key(key),
        };

        (Some(entry), hit)
    }

    fn cached_ceiling(&self, key: &Slice) -> Option<IndexedEntry> {
        self.skiplist
            .lower_bound(Bound::Excluded(key.as_ref()))
            .map(|e| e.value().clone())
    }

    fn entry_iter(&self) -> crate::Result<sorted_index::OwnedIter> {
        Ok(self.cache.sorted_index()?.iter_owned())
    }
}

fn entry_weight(entry: &Entry) -> usize {
    match entry {
        Entry::Fixed { key, value } => key.len() + value_weight(value),
        Entry::Range(range) => {
            range.from_key.len()
                + range.to_key.len()
                + range.from_value.as_ref().map_or(0, value_weight)
                + value_weight(&range.range_value.to_value())
        }
    }
}

fn value_weight(value: &crate::value::Value) -> usize {
    use crate::value::Value;

    match value {
        Value::Put(v) => v.value.as_ref().map_or(0, |v| v.len()),
        Value::Update(v) => v.value.as_ref().map_or(0, |v| v.len()),
        Value::Function(v) => v.function_id.len(),
        Value::Remove(_) => 0,
        Value::PendingApply(pending) => pending
            .applies
            .iter()
            .map(|apply| value_weight(&apply.to_value()))
            .sum(),
    }
}

impl SegmentRead for SegmentRef {
    fn get(&self, key: &Slice, state: &mut ThreadReadState) -> crate::Result<Option<Entry>> {
        let footer = self.cache.footer()?;

        if !footer.meta.key_range().contains_key(key) {
            return Ok(None);
        }

        if !self.might_contain(key)? {
            return Ok(None);
        }

        let (floor, hit) = self.cached_floor(key);

        if hit {
            return Ok(floor.map(|e| e.entry));
        }

        let ceiling = self.cached_ceiling(key);

        let start = state.start_hint(self.id, key.as_ref()).cloned().or(floor);

        let Some(found) = searcher::search(&self.cache, key, start.as_ref(), ceiling.as_ref())?
        else {
            return Ok(None);
        };

        let stored = self.cache_entry(found);
        state.remember(self.id, stored.clone());

        Ok(Some(stored.entry))
    }

    fn higher(&self, key: &Slice, state: &mut ThreadReadState) -> crate::Result<Option<Entry>> {
        let footer = self.cache.footer()?;

        // Nothing above the fixed max key can exist
        if let crate::key_range::MaxKey::Fixed(max) = &footer.meta.max_key {
            if max <= key {
                return Ok(None);
            }
        }

        let (floor, _) = self.cached_floor(key);

        if let Some(floor) = &floor {
            if let Entry::Range(range) = &floor.entry {
                if range.contains_key(key) {
                    return Ok(Some(floor.entry.clone()));
                }
            }
        }

        let ceiling = self.cached_ceiling(key);

        if let (Some(floor), Some(ceiling)) = (&floor, &ceiling) {
            // Adjacency fast path: nothing sits between the two cached
            // neighbours on disk
            if floor.next_offset == Some(ceiling.offset) {
                return Ok(Some(ceiling.entry.clone()));
            }
        }

        let Some(found) = searcher::search_higher(&self.cache, key, floor.as_ref())? else {
            return Ok(None);
        };

        let stored = self.cache_entry(found);
        state.remember(self.id, stored.clone());

        Ok(Some(stored.entry))
    }

    fn lower(&self, key: &Slice, state: &mut ThreadReadState) -> crate::Result<Option<Entry>> {
        let footer = self.cache.footer()?;

        if &footer.meta.min_key >= key {
            return Ok(None);
        }

        let candidate = self
            .skiplist
            .upper_bound(Bound::Excluded(key.as_ref()))
            .map(|e| e.value().clone());

        if let Some(candidate) = &candidate {
            if let Entry::Range(range) = &candidate.entry {
                // The range reaches (at least) up to the key, so nothing can
                // sit between it and the key
                if range.to_key >= *key {
                    return Ok(Some(candidate.entry.clone()));
                }
            }

            if candidate.next_offset.is_none() {
                return Ok(Some(candidate.entry.clone()));
            }

            if let Some(ceiling) = self
                .skiplist
                .lower_bound(Bound::Included(key.as_ref()))
                .map(|e| e.value().clone())
            {
                if candidate.next_offset == Some(ceiling.offset) {
                    return Ok(Some(candidate.entry.clone()));
                }
            }
        }

        let Some(found) = searcher::search_lower(&self.cache, key)? else {
            return Ok(None);
        };

        let stored = self.cache_entry(found);
        state.remember(self.id, stored.clone());

        Ok(Some(stored.entry))
    }

    fn might_contain(&self, key: &Slice) -> crate::Result<bool> {
        Ok(self
            .cache
            .bloom_filter()?
            .as_ref()
            .as_ref()
            .is_none_or(|bloom| bloom.might_contain(key)))
    }

    fn iter(&self) -> crate::Result<SegmentIter> {
        Ok(SegmentIter::One(OneIter {
            inner: self.entry_iter()?,
        }))
    }

    fn meta(&self) -> crate::Result<SegmentMeta> {
        Ok(self.cache.footer()?.meta.clone())
    }

    fn byte_size(&self) -> u64 {
        self.cache.body_len()
    }

    fn clear_cached_data(&self) {
        self.cache.clear();

        while self.skiplist.pop_front().is_some() {}
    }
}

/// Restartable iterator over a segment's entries
pub enum SegmentIter {
    One(OneIter),
    Many(many::ManyIter),
}

impl Iterator for SegmentIter {
    type Item = crate::Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::One(iter) => iter.next(),
            Self::Many(iter) => iter.next(),
        }
    }
}

/// Iterator over a one-segment
pub struct OneIter {
    inner: sorted_index::OwnedIter,
}

impl Iterator for OneIter {
    type Item = crate::Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.inner.next()?.map(|indexed| indexed.entry))
    }
}
