// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Many-segment files
//!
//! A many-segment file packs several child segment bodies behind a list
//! segment: an ordinary one-segment whose entries map each child's min key to
//! its `(offset, size)` handle and scalar statistics. Reads locate the child
//! through the list and delegate; children are materialised lazily and share
//! one block pool.

use crate::{
    coding::{Decode, Encode},
    deadline::Deadline,
    file::{SharedSource, Source},
    segment::{
        block::BlockHandle,
        block_cache::BlockPool,
        config::SegmentConfig,
        meta::SegmentMeta,
        read_state::ThreadReadState,
        sorted_index,
        writer::{TransientOne, Writer},
        SegmentId, SegmentIter, SegmentRead, SegmentRef, FORMAT_MANY,
    },
    sweeper::MemorySweeper,
    time::Time,
    value::{Entry, Value},
    Slice,
};
use rustc_hash::FxHashMap;
use std::{
    collections::VecDeque,
    io::Write as _,
    sync::{Arc, RwLock},
};
use varint_rs::{VarintReader, VarintWriter};

/// A child segment's position and statistics, decoded from the list segment
#[derive(Clone, Debug)]
pub struct ChildRef {
    /// Absolute position of the child body within the file
    pub handle: BlockHandle,

    pub meta: SegmentMeta,
}

/// A built-but-not-yet-committed many-segment file
#[derive(Clone, Debug)]
pub struct TransientMany {
    /// Full file bytes, including the leading format byte
    pub bytes: Slice,

    /// Statistics aggregated over all children
    pub meta: SegmentMeta,
}

/// Aggregates child statistics into the many-segment's own.
fn aggregate_meta(children: &[SegmentMeta]) -> Option<SegmentMeta> {
    let first = children.first()?;
    let last = children.last()?;

    let mut meta = SegmentMeta {
        key_value_count: 0,
        has_range: false,
        has_put: false,
        created_in_level: first.created_in_level,
        min_key: first.min_key.clone(),
        max_key: last.max_key.clone(),
        nearest_put_deadline: None,
        min_max_function_id: None,
    };

    for child in children {
        meta.key_value_count += child.key_value_count;
        meta.has_range |= child.has_range;
        meta.has_put |= child.has_put;
        meta.nearest_put_deadline =
            Deadline::earlier_of(meta.nearest_put_deadline, child.nearest_put_deadline);

        if let Some((min, max)) = &child.min_max_function_id {
            meta.min_max_function_id = match meta.min_max_function_id.take() {
                Some((acc_min, acc_max)) => {
                    Some((acc_min.min(min.clone()), acc_max.max(max.clone())))
                }
                None => Some((min.clone(), max.clone())),
            };
        }
    }

    Some(meta)
}

/// Packs child bodies into a many-segment file.
pub fn build_many(children: &[TransientOne]) -> crate::Result<TransientMany> {
    assert!(children.len() > 1, "a many-segment needs at least two children");

    // The list stores child offsets relative to the children region, which
    // sidesteps the circular dependency on the list's own encoded size
    let mut list_writer = Writer::new(
        SegmentConfig {
            hash_index: None,
            bloom_filter: None,
            separate_values: false,
            ..SegmentConfig::default()
        },
        children
            .first()
            .map_or(0, |c| c.footer.meta.created_in_level),
    );

    let mut rel_offset = 0u64;

    for child in children {
        let mut value = vec![];

        BlockHandle {
            offset: rel_offset,

            #[allow(clippy::cast_possible_truncation)]
            size: child.bytes.len() as u32,
        }
        .encode_into(&mut value)?;

        child.footer.meta.encode_into(&mut value)?;

        list_writer.add(&Entry::fixed(
            child.min_key().clone(),
            Value::put(value, None, Time::none()),
        ))?;

        rel_offset += child.bytes.len() as u64;
    }

    #[allow(clippy::expect_used)]
    let list = list_writer.finish()?.expect("list has at least one entry");

    let mut bytes = vec![FORMAT_MANY];

    #[allow(clippy::cast_possible_truncation)]
    bytes.write_u64_varint(list.bytes.len() as u64)?;
    bytes.write_all(&list.bytes)?;

    for child in children {
        bytes.write_all(&child.bytes)?;
    }

    let meta = aggregate_meta(
        &children
            .iter()
            .map(|c| c.footer.meta.clone())
            .collect::<Vec<_>>(),
    )
    .ok_or(crate::Error::Unrecoverable)?;

    Ok(TransientMany {
        bytes: bytes.into(),
        meta,
    })
}

/// Reads a many-segment file
pub struct SegmentMany {
    id: SegmentId,
    source: SharedSource,
    pool: BlockPool,
    sweeper: Arc<dyn MemorySweeper>,

    meta: SegmentMeta,

    /// Child positions in min-key order
    children: Vec<ChildRef>,

    /// Lazily materialised child readers, keyed by child index
    loaded: RwLock<FxHashMap<usize, Arc<SegmentRef>>>,
}

impl SegmentMany {
    /// Parses the list segment and aggregates child statistics; children
    /// themselves stay untouched until a read needs them.
    pub fn load(
        source: SharedSource,
        pool: BlockPool,
        sweeper: Arc<dyn MemorySweeper>,
    ) -> crate::Result<Self> {
        let prelude_len = source.size().min(11);
        let prelude = source.read(0, prelude_len as usize)?;

        if prelude.first() != Some(&FORMAT_MANY) {
            return Err(crate::Error::InvalidHeader("SegmentMany"));
        }

        let mut reader = &prelude[1..];
        let before = reader.len();
        let list_size = reader.read_u64_varint()?;
        let list_base = 1 + (before - reader.len()) as u64;

        let children_base = list_base + list_size;

        let list = SegmentRef::new(
            source.clone(),
            list_base,
            list_size,
            pool.clone(),
            sweeper.clone(),
        );

        let mut children = vec![];

        for entry in list.entry_iter()? {
            let indexed = entry?;

            let Entry::Fixed {
                value: Value::Put(put),
                ..
            } = &indexed.entry
            else {
                return Err(crate::Error::Corruption("malformed list segment entry"));
            };

            let value = put
                .value
                .as_ref()
                .ok_or(crate::Error::Corruption("list segment entry without handle"))?;

            let mut value_reader = &value[..];
            let rel_handle = BlockHandle::decode_from(&mut value_reader)?;
            let meta = SegmentMeta::decode_from(&mut value_reader)?;

            children.push(ChildRef {
                handle: BlockHandle {
                    offset: children_base + rel_handle.offset,
                    size: rel_handle.size,
                },
                meta,
            });
        }

        let meta = aggregate_meta(
            &children.iter().map(|c| c.meta.clone()).collect::<Vec<_>>(),
        )
        .ok_or(crate::Error::Corruption("many-segment without children"))?;

        log::trace!(
            "loaded many-segment: {} children, {} entries",
            children.len(),
            meta.key_value_count,
        );

        Ok(Self {
            id: super::next_segment_id(),
            source,
            pool,
            sweeper,
            meta,
            children,
            loaded: RwLock::new(FxHashMap::default()),
        })
    }

    #[must_use]
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Number of child segments.
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Materialises the child at `idx`.
    pub fn child(&self, idx: usize) -> crate::Result<Arc<SegmentRef>> {
        #[allow(clippy::expect_used)]
        if let Some(child) = self.loaded.read().expect("lock is not poisoned").get(&idx) {
            return Ok(child.clone());
        }

        let child_ref = self
            .children
            .get(idx)
            .ok_or(crate::Error::Unrecoverable)?;

        #[allow(clippy::expect_used)]
        let mut loaded = self.loaded.write().expect("lock is not poisoned");

        let child = loaded.entry(idx).or_insert_with(|| {
            Arc::new(SegmentRef::new(
                self.source.clone(),
                child_ref.handle.offset,
                u64::from(child_ref.handle.size),
                self.pool.clone(),
                self.sweeper.clone(),
            ))
        });

        Ok(child.clone())
    }

    /// All materialised children, in order (for iteration).
    fn all_children(&self) -> crate::Result<Vec<Arc<SegmentRef>>> {
        (0..self.children.len()).map(|i| self.child(i)).collect()
    }

    /// Index of the child whose range starts at or before `key`.
    fn child_index_floor(&self, key: &Slice) -> Option<usize> {
        let i = self.children.partition_point(|c| c.meta.min_key <= *key);
        i.checked_sub(1)
    }
}

impl SegmentRead for SegmentMany {
    fn get(&self, key: &Slice, state: &mut ThreadReadState) -> crate::Result<Option<Entry>> {
        let Some(idx) = self.child_index_floor(key) else {
            return Ok(None);
        };

        #[allow(clippy::expect_used)]
        let child_ref = self.children.get(idx).expect("floor index is valid");

        if !child_ref.meta.key_range().contains_key(key) {
            return Ok(None);
        }

        self.child(idx)?.get(key, state)
    }

    fn higher(&self, key: &Slice, state: &mut ThreadReadState) -> crate::Result<Option<Entry>> {
        let start = self.child_index_floor(key).unwrap_or(0);

        for idx in start..self.children.len() {
            if let Some(entry) = self.child(idx)?.higher(key, state)? {
                return Ok(Some(entry));
            }
        }

        Ok(None)
    }

    fn lower(&self, key: &Slice, state: &mut ThreadReadState) -> crate::Result<Option<Entry>> {
        let i = self.children.partition_point(|c| c.meta.min_key < *key);

        let Some(start) = i.checked_sub(1) else {
            return Ok(None);
        };

        for idx in (0..=start).rev() {
            if let Some(entry) = self.child(idx)?.lower(key, state)? {
                return Ok(Some(entry));
            }
        }

        Ok(None)
    }

    fn might_contain(&self, key: &Slice) -> crate::Result<bool> {
        let Some(idx) = self.child_index_floor(key) else {
            return Ok(false);
        };

        #[allow(clippy::expect_used)]
        let child_ref = self.children.get(idx).expect("floor index is valid");

        if !child_ref.meta.key_range().contains_key(key) {
            return Ok(false);
        }

        self.child(idx)?.might_contain(key)
    }

    fn iter(&self) -> crate::Result<SegmentIter> {
        Ok(SegmentIter::Many(ManyIter {
            children: self.all_children()?.into(),
            current: None,
        }))
    }

    fn meta(&self) -> crate::Result<SegmentMeta> {
        Ok(self.meta.clone())
    }

    fn byte_size(&self) -> u64 {
        self.source.size()
    }

    fn clear_cached_data(&self) {
        #[allow(clippy::expect_used)]
        let mut loaded = self.loaded.write().expect("lock is not poisoned");

        for child in loaded.values() {
            child.clear_cached_data();
        }

        loaded.clear();
        self.pool.clear();
    }
}

/// Iterator chaining all children of a many-segment
pub struct ManyIter {
    children: VecDeque<Arc<SegmentRef>>,
    current: Option<sorted_index::OwnedIter>,
}

impl Iterator for ManyIter {
    type Item = crate::Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(iter) = &mut self.current {
                match iter.next() {
                    Some(Ok(indexed)) => return Some(Ok(indexed.entry)),
                    Some(Err(e)) => return Some(Err(e)),
                    None => self.current = None,
                }
            }

            let child = self.children.pop_front()?;

            match child.entry_iter() {
                Ok(iter) => self.current = Some(iter),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
