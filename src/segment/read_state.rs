// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::segment::{sorted_index::IndexedEntry, SegmentId};
use rustc_hash::FxHashMap;

/// Per-thread read scratchpad
///
/// Remembers, per segment, the most recently returned entry so a sequential
/// scan can start its next search right behind the previous hit instead of
/// consulting the indexes again. Never shared across threads.
#[derive(Default)]
pub struct ThreadReadState {
    segments: FxHashMap<SegmentId, IndexedEntry>,
}

impl ThreadReadState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The previous hit in this segment, if it can serve as a forward-walk
    /// start for `key`.
    #[must_use]
    pub fn start_hint(&self, segment: SegmentId, key: &[u8]) -> Option<&IndexedEntry> {
        self.segments
            .get(&segment)
            .filter(|entry| &**entry.entry.key() <= key)
    }

    /// Records a hit.
    pub fn remember(&mut self, segment: SegmentId, entry: IndexedEntry) {
        self.segments.insert(segment, entry);
    }

    /// Drops state for a segment (e.g. after it was deleted).
    pub fn forget(&mut self, segment: SegmentId) {
        self.segments.remove(&segment);
    }
}
