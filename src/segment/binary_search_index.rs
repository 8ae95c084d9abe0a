// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Binary search index block
//!
//! A sorted array of fixed-width sorted-index offsets. With prefix
//! compression off, every entry is indexed and a lookup miss is authoritative;
//! otherwise only the directly addressable full-key entries are indexed and
//! the result narrows the window for a forward walk of the sorted index.

use crate::{segment::sorted_index::IndexedEntry, Slice};
use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use varint_rs::{VarintReader, VarintWriter};

/// Builds a binary search index payload
pub struct Builder {
    offsets: Vec<u32>,
    fully_indexed: bool,
}

impl Builder {
    #[must_use]
    pub fn new(fully_indexed: bool) -> Self {
        Self {
            offsets: vec![],
            fully_indexed,
        }
    }

    /// Registers the offset of the next indexed entry.
    pub fn insert(&mut self, offset: u32) {
        debug_assert!(
            self.offsets.last().is_none_or(|last| *last < offset),
            "offsets must be inserted in ascending order",
        );

        self.offsets.push(offset);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Encodes the payload.
    pub fn build(self) -> crate::Result<Vec<u8>> {
        let mut payload = vec![];

        payload.write_u8(u8::from(self.fully_indexed))?;

        #[allow(clippy::cast_possible_truncation)]
        payload.write_u32_varint(self.offsets.len() as u32)?;

        for offset in self.offsets {
            payload.write_u32::<LE>(offset)?;
        }

        Ok(payload)
    }
}

/// Outcome of bisecting for a key
#[derive(Debug)]
pub enum SearchResult {
    /// The key sits exactly at an indexed entry
    Exact(IndexedEntry),

    /// The key is not indexed; the neighbours bound where it could be
    Bounds {
        /// Closest indexed entry below the key
        lower: Option<IndexedEntry>,

        /// Closest indexed entry above the key
        higher: Option<IndexedEntry>,
    },
}

/// Reads a binary search index payload
pub struct Reader {
    offsets: Vec<u32>,
    fully_indexed: bool,
}

impl Reader {
    pub fn new(data: &Slice) -> crate::Result<Self> {
        let mut reader = &data[..];

        let fully_indexed = reader.read_u8()? == 1;
        let count = reader.read_u32_varint()? as usize;

        let mut offsets = Vec::with_capacity(count);
        for _ in 0..count {
            offsets.push(reader.read_u32::<LE>()?);
        }

        Ok(Self {
            offsets,
            fully_indexed,
        })
    }

    /// Returns `true` if every sorted-index entry is indexed, making a miss
    /// authoritative.
    #[must_use]
    pub fn is_fully_indexed(&self) -> bool {
        self.fully_indexed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    // NOTE: PERF: hand-rolled binary search because the predicate is fallible
    // (each comparison decodes a sorted-index entry)
    fn partition_point<F>(&self, mut pred: F) -> crate::Result<usize>
    where
        F: FnMut(u32) -> crate::Result<bool>,
    {
        let mut left = 0;
        let mut right = self.offsets.len();

        while left < right {
            let mid = (left + right) / 2;

            #[allow(clippy::expect_used)]
            let offset = *self.offsets.get(mid).expect("mid is in bounds");

            if pred(offset)? {
                left = mid + 1;
            } else {
                right = mid;
            }
        }

        Ok(left)
    }

    fn entry_at<F>(&self, idx: usize, resolve: &F) -> crate::Result<Option<IndexedEntry>>
    where
        F: Fn(u32) -> crate::Result<IndexedEntry>,
    {
        self.offsets.get(idx).map(|offset| resolve(*offset)).transpose()
    }

    /// Bisects for `key` within `[lower_bound, higher_bound]` (entry offsets
    /// of already-known neighbours, both optional).
    pub fn search<F>(
        &self,
        key: &Slice,
        lower_bound: Option<u32>,
        higher_bound: Option<u32>,
        resolve: F,
    ) -> crate::Result<SearchResult>
    where
        F: Fn(u32) -> crate::Result<IndexedEntry>,
    {
        let i = self.partition_point(|offset| {
            if lower_bound.is_some_and(|bound| offset <= bound) {
                return Ok(true);
            }
            if higher_bound.is_some_and(|bound| offset >= bound) {
                return Ok(false);
            }

            Ok(resolve(offset)?.entry.key() < key)
        })?;

        if let Some(entry) = self.entry_at(i, &resolve)? {
            if entry.entry.key() == key {
                return Ok(SearchResult::Exact(entry));
            }

            let lower = if i > 0 {
                self.entry_at(i - 1, &resolve)?
            } else {
                None
            };

            return Ok(SearchResult::Bounds {
                lower,
                higher: Some(entry),
            });
        }

        let lower = if i > 0 {
            self.entry_at(i - 1, &resolve)?
        } else {
            None
        };

        Ok(SearchResult::Bounds {
            lower,
            higher: None,
        })
    }

    /// The first indexed entry with a key strictly above `key`.
    pub fn search_higher<F>(
        &self,
        key: &Slice,
        resolve: F,
    ) -> crate::Result<Option<IndexedEntry>>
    where
        F: Fn(u32) -> crate::Result<IndexedEntry>,
    {
        let i = self.partition_point(|offset| Ok(resolve(offset)?.entry.key() <= key))?;
        self.entry_at(i, &resolve)
    }

    /// The last indexed entry with a key strictly below `key`.
    pub fn search_lower<F>(
        &self,
        key: &Slice,
        resolve: F,
    ) -> crate::Result<Option<IndexedEntry>>
    where
        F: Fn(u32) -> crate::Result<IndexedEntry>,
    {
        let i = self.partition_point(|offset| Ok(resolve(offset)?.entry.key() < key))?;

        if i == 0 {
            return Ok(None);
        }

        self.entry_at(i - 1, &resolve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        segment::sorted_index::{self, ValueSlot},
        time::Time,
        value::{Entry, Value},
    };
    use test_log::test;

    fn fixture() -> crate::Result<(sorted_index::Reader, Reader)> {
        let mut sorted = sorted_index::Writer::new(false, 1, false);
        let mut binary = Builder::new(true);

        for key in [&b"b"[..], b"d", b"f", b"h", b"j"] {
            let entry = Entry::fixed(key, Value::put(*b"v", None, Time::from(1)));
            let written = sorted.add(&entry, &ValueSlot::Inline(Slice::from(*b"v")))?;
            binary.insert(written.offset);
        }

        let sorted = sorted_index::Reader::new(sorted.finish()?.into(), None)?;
        let binary = Reader::new(&Slice::from(binary.build()?))?;

        Ok((sorted, binary))
    }

    #[test]
    fn binary_index_exact_hit() -> crate::Result<()> {
        let (sorted, binary) = fixture()?;
        let resolve = |offset| sorted.entry_at(offset, None);

        match binary.search(&Slice::from(*b"f"), None, None, resolve)? {
            SearchResult::Exact(entry) => assert_eq!(entry.entry.key(), &Slice::from(*b"f")),
            SearchResult::Bounds { .. } => panic!("expected exact hit"),
        }

        Ok(())
    }

    #[test]
    fn binary_index_miss_returns_neighbours() -> crate::Result<()> {
        let (sorted, binary) = fixture()?;
        let resolve = |offset| sorted.entry_at(offset, None);

        match binary.search(&Slice::from(*b"e"), None, None, resolve)? {
            SearchResult::Bounds { lower, higher } => {
                assert_eq!(
                    Some(Slice::from(*b"d")),
                    lower.map(|e| e.entry.key().clone()),
                );
                assert_eq!(
                    Some(Slice::from(*b"f")),
                    higher.map(|e| e.entry.key().clone()),
                );
            }
            SearchResult::Exact(_) => panic!("expected miss"),
        }

        Ok(())
    }

    #[test]
    fn binary_index_boundary_misses() -> crate::Result<()> {
        let (sorted, binary) = fixture()?;
        let resolve = |offset| sorted.entry_at(offset, None);

        match binary.search(&Slice::from(*b"a"), None, None, resolve)? {
            SearchResult::Bounds { lower, higher } => {
                assert!(lower.is_none());
                assert!(higher.is_some());
            }
            SearchResult::Exact(_) => panic!("expected miss"),
        }

        match binary.search(&Slice::from(*b"z"), None, None, resolve)? {
            SearchResult::Bounds { lower, higher } => {
                assert!(lower.is_some());
                assert!(higher.is_none());
            }
            SearchResult::Exact(_) => panic!("expected miss"),
        }

        Ok(())
    }

    #[test]
    fn binary_index_higher_and_lower() -> crate::Result<()> {
        let (sorted, binary) = fixture()?;
        let resolve = |offset| sorted.entry_at(offset, None);

        assert_eq!(
            Some(Slice::from(*b"f")),
            binary
                .search_higher(&Slice::from(*b"d"), resolve)?
                .map(|e| e.entry.key().clone()),
        );

        assert_eq!(
            Some(Slice::from(*b"b")),
            binary
                .search_lower(&Slice::from(*b"d"), resolve)?
                .map(|e| e.entry.key().clone()),
        );

        assert!(binary.search_lower(&Slice::from(*b"b"), resolve)?.is_none());
        assert!(binary.search_higher(&Slice::from(*b"j"), resolve)?.is_none());

        Ok(())
    }
}
