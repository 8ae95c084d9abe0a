// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Per-segment block reader cache
//!
//! Lazily materialises typed block readers from a backing source region.
//! Each reader slot is initialised at most once (subsequent readers block on
//! the in-flight initialisation); decoded raw blocks additionally go through
//! a shared [`BlockPool`] so sibling segments inside a many-segment file
//! share their I/O. Everything is dropped again on memory pressure via
//! [`SegmentBlockCache::clear`].

use crate::{
    coding::Decode,
    file::{SharedSource, Source},
    segment::{
        binary_search_index, bloom,
        block::{Block, BlockHandle, BlockKind},
        footer::Footer,
        hash_index, sorted_index,
    },
};
use byteorder::{ReadBytesExt, LE};
use quick_cache::sync::Cache;
use std::sync::{Arc, RwLock};

/// Shared cache of decoded raw blocks, keyed by absolute block offset
#[derive(Clone)]
pub struct BlockPool(Arc<Cache<u64, Arc<Block>>>);

impl BlockPool {
    /// A pool holding up to `capacity` decoded blocks.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self(Arc::new(Cache::new(capacity.max(1))))
    }

    fn get_or_load(
        &self,
        source: &SharedSource,
        offset: u64,
        size: u32,
        kind: BlockKind,
    ) -> crate::Result<Arc<Block>> {
        self.0.get_or_insert_with(&offset, || {
            log::trace!("loading {kind:?} block at {offset} ({size} B)");

            let bytes = source.read(offset, size as usize)?;
            Block::decode(&bytes, kind).map(Arc::new)
        })
    }

    /// Drops all cached blocks.
    pub fn clear(&self) {
        self.0.clear();
    }
}

impl Default for BlockPool {
    fn default() -> Self {
        Self::with_capacity(64)
    }
}

/// A reader slot that initialises at most once and can be cleared
struct Slot<T>(RwLock<Option<Arc<T>>>);

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self(RwLock::new(None))
    }
}

impl<T> Slot<T> {
    fn get_or_try_init(
        &self,
        init: impl FnOnce() -> crate::Result<T>,
    ) -> crate::Result<Arc<T>> {
        #[allow(clippy::expect_used)]
        if let Some(value) = self.0.read().expect("lock is not poisoned").as_ref() {
            return Ok(value.clone());
        }

        #[allow(clippy::expect_used)]
        let mut guard = self.0.write().expect("lock is not poisoned");

        // Someone else may have initialised while we waited for the lock
        if let Some(value) = guard.as_ref() {
            return Ok(value.clone());
        }

        let value = Arc::new(init()?);
        *guard = Some(value.clone());

        Ok(value)
    }

    fn clear(&self) {
        #[allow(clippy::expect_used)]
        self.0.write().expect("lock is not poisoned").take();
    }
}

/// Lazily materialised block readers of one segment body
pub struct SegmentBlockCache {
    source: SharedSource,

    /// Absolute offset of the segment body inside the source
    base: u64,

    /// Length of the segment body, including the footer and its size marker
    body_len: u64,

    pool: BlockPool,

    footer: Slot<Footer>,
    sorted_index: Slot<sorted_index::Reader>,
    hash_index: Slot<Option<hash_index::Reader>>,
    binary_search_index: Slot<Option<binary_search_index::Reader>>,
    bloom_filter: Slot<Option<bloom::Reader>>,
}

impl SegmentBlockCache {
    #[must_use]
    pub fn new(source: SharedSource, base: u64, body_len: u64, pool: BlockPool) -> Self {
        Self {
            source,
            base,
            body_len,
            pool,
            footer: Slot::default(),
            sorted_index: Slot::default(),
            hash_index: Slot::default(),
            binary_search_index: Slot::default(),
            bloom_filter: Slot::default(),
        }
    }

    /// Length of the segment body in bytes.
    #[must_use]
    pub fn body_len(&self) -> u64 {
        self.body_len
    }

    fn block(&self, handle: BlockHandle, kind: BlockKind) -> crate::Result<Arc<Block>> {
        self.pool
            .get_or_load(&self.source, self.base + handle.offset, handle.size, kind)
    }

    /// The footer, located via the trailing size marker and decoded once.
    pub fn footer(&self) -> crate::Result<Arc<Footer>> {
        self.footer.get_or_try_init(|| {
            if self.body_len < 4 {
                return Err(crate::Error::Corruption("segment body too small"));
            }

            let marker = self.source.read(self.base + self.body_len - 4, 4)?;
            let footer_size = u64::from((&marker[..]).read_u32::<LE>()?);

            if footer_size + 4 > self.body_len {
                return Err(crate::Error::Corruption("footer size out of bounds"));
            }

            let footer_offset = self.body_len - 4 - footer_size;

            let block = Block::load(
                &*self.source,
                self.base,
                BlockHandle {
                    offset: footer_offset,

                    #[allow(clippy::cast_possible_truncation)]
                    size: footer_size as u32,
                },
                BlockKind::Footer,
            )?;

            Footer::decode_from(&mut &block.data[..])
        })
    }

    /// The sorted index reader, wired up with the values block if present.
    pub fn sorted_index(&self) -> crate::Result<Arc<sorted_index::Reader>> {
        self.sorted_index.get_or_try_init(|| {
            let footer = self.footer()?;

            let values = footer
                .values
                .map(|handle| self.block(handle, BlockKind::Values))
                .transpose()?
                .map(|block| block.data.clone());

            let block = self.block(footer.sorted_index, BlockKind::SortedIndex)?;

            sorted_index::Reader::new(block.data.clone(), values)
        })
    }

    pub fn hash_index(&self) -> crate::Result<Arc<Option<hash_index::Reader>>> {
        self.hash_index.get_or_try_init(|| {
            let footer = self.footer()?;

            footer
                .hash_index
                .map(|handle| {
                    let block = self.block(handle, BlockKind::HashIndex)?;
                    hash_index::Reader::new(&block.data)
                })
                .transpose()
        })
    }

    pub fn binary_search_index(
        &self,
    ) -> crate::Result<Arc<Option<binary_search_index::Reader>>> {
        self.binary_search_index.get_or_try_init(|| {
            let footer = self.footer()?;

            footer
                .binary_search_index
                .map(|handle| {
                    let block = self.block(handle, BlockKind::BinarySearchIndex)?;
                    binary_search_index::Reader::new(&block.data)
                })
                .transpose()
        })
    }

    pub fn bloom_filter(&self) -> crate::Result<Arc<Option<bloom::Reader>>> {
        self.bloom_filter.get_or_try_init(|| {
            let footer = self.footer()?;

            footer
                .bloom_filter
                .map(|handle| {
                    let block = self.block(handle, BlockKind::BloomFilter)?;
                    bloom::Reader::new(&block.data)
                })
                .transpose()
        })
    }

    /// Drops every cached reader and raw block (memory pressure).
    pub fn clear(&self) {
        self.sorted_index.clear();
        self.hash_index.clear();
        self.binary_search_index.clear();
        self.bloom_filter.clear();
        self.footer.clear();
        self.pool.clear();
    }
}
