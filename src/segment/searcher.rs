// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Segment search pipeline
//!
//! Point lookups try the hash index first, then the binary search index
//! bounded by any neighbour hints, then a forward walk of the sorted index.
//! A perfect hash index (zero probe misses at build time) short-circuits a
//! lookup miss into proven absence, as long as the segment has no range
//! entries and the sorted index is not prefix-compressed.
//!
//! Hash candidates may point at garbage (byte-addressed slots can overlap an
//! unrelated entry's tail), so candidate resolution failures are treated as
//! probe collisions, not errors; real corruption surfaces on the fallback
//! path.

use crate::{
    segment::{
        binary_search_index::SearchResult,
        block_cache::SegmentBlockCache,
        hash_index::Candidate,
        sorted_index::{self, IndexedEntry},
    },
    value::Entry,
    Slice,
};

/// Point lookup for `key`, optionally bounded by already-resolved neighbour
/// entries.
pub fn search(
    cache: &SegmentBlockCache,
    key: &Slice,
    start: Option<&IndexedEntry>,
    end: Option<&IndexedEntry>,
) -> crate::Result<Option<IndexedEntry>> {
    let footer = cache.footer()?;
    let sorted = cache.sorted_index()?;

    if let Some(hash) = &*cache.hash_index()? {
        for candidate in hash.candidates(key) {
            let hit = match candidate {
                Candidate::Reference { offset } => sorted.search_seek_one(key, offset, None),
                Candidate::CopyKey {
                    key: stored_key,
                    offset,
                } => sorted.search_seek_one(key, offset, Some(&stored_key)),
            };

            if let Ok(Some(entry)) = hit {
                return Ok(Some(entry));
            }
        }

        if hash.is_perfect() && !sorted.has_prefix_compression() && !footer.meta.has_range {
            return Ok(None);
        }
    }

    if let Some(binary) = &*cache.binary_search_index()? {
        if !binary.is_empty() {
            let resolve = |offset| sorted.entry_at(offset, None);

            match binary.search(key, start.map(|e| e.offset), end.map(|e| e.offset), resolve)? {
                SearchResult::Exact(entry) => return Ok(Some(entry)),

                SearchResult::Bounds { lower, .. } => {
                    if let Some(lower) = &lower {
                        if let Entry::Range(range) = &lower.entry {
                            if range.contains_key(key) {
                                return Ok(Some(lower.clone()));
                            }
                        }
                    }

                    if binary.is_fully_indexed() {
                        return Ok(None);
                    }

                    return sorted.search(key, lower.as_ref());
                }
            }
        }
    }

    sorted.search(key, start)
}

/// The first entry that can produce keys strictly above `key`: a fixed entry
/// above it, or a range reaching past it.
pub fn search_higher(
    cache: &SegmentBlockCache,
    key: &Slice,
    start: Option<&IndexedEntry>,
) -> crate::Result<Option<IndexedEntry>> {
    let sorted = cache.sorted_index()?;

    if let Some(start) = start {
        if start.entry.key() <= key {
            return sorted.search_higher_seek_one(key, start);
        }
    }

    if let Some(binary) = &*cache.binary_search_index()? {
        if !binary.is_empty() {
            let resolve = |offset| sorted.entry_at(offset, None);

            match binary.search(key, None, None, resolve)? {
                SearchResult::Exact(entry) => {
                    if entry.entry.is_range() {
                        return Ok(Some(entry));
                    }

                    return sorted.search_higher_seek_one(key, &entry);
                }

                SearchResult::Bounds { lower, higher } => {
                    if let Some(lower) = &lower {
                        if let Entry::Range(range) = &lower.entry {
                            if range.to_key > *key {
                                return Ok(Some(lower.clone()));
                            }
                        }

                        return sorted.search_higher_seek_one(key, lower);
                    }

                    // No indexed entry below the key means the first block
                    // entry is the candidate
                    return Ok(higher);
                }
            }
        }
    }

    walk_higher(&sorted, key)
}

/// The last entry that can produce keys strictly below `key`.
pub fn search_lower(
    cache: &SegmentBlockCache,
    key: &Slice,
) -> crate::Result<Option<IndexedEntry>> {
    let sorted = cache.sorted_index()?;

    if let Some(binary) = &*cache.binary_search_index()? {
        if !binary.is_empty() {
            let resolve = |offset| sorted.entry_at(offset, None);

            if let Some(lower) = binary.search_lower(key, resolve)? {
                if binary.is_fully_indexed() {
                    return Ok(Some(lower));
                }

                return walk_lower_from(&sorted, lower, key);
            }

            return Ok(None);
        }
    }

    let mut iter = sorted.iter();

    let Some(first) = iter.next().transpose()? else {
        return Ok(None);
    };

    if first.entry.key() >= key {
        return Ok(None);
    }

    walk_lower_from(&sorted, first, key)
}

fn walk_higher(
    sorted: &sorted_index::Reader,
    key: &Slice,
) -> crate::Result<Option<IndexedEntry>> {
    for entry in sorted.iter() {
        let entry = entry?;

        if entry.entry.key() > key {
            return Ok(Some(entry));
        }

        if let Entry::Range(range) = &entry.entry {
            if range.to_key > *key {
                return Ok(Some(entry));
            }
        }
    }

    Ok(None)
}

fn walk_lower_from(
    sorted: &sorted_index::Reader,
    from: IndexedEntry,
    key: &Slice,
) -> crate::Result<Option<IndexedEntry>> {
    debug_assert!(from.entry.key() < key, "walk must start below the key");

    let mut current = from;

    loop {
        let Some(next_offset) = current.next_offset else {
            // The last entry of the segment; nothing above can shadow it
            return Ok(Some(current));
        };

        let mut iter = sorted.iter_from(next_offset, Some(current.entry.key().clone()));

        match iter.next().transpose()? {
            Some(next) if next.entry.key() < key => current = next,
            _ => return Ok(Some(current)),
        }
    }
}
