// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Segment assigner
//!
//! Routes a sorted stream of assignables (single entries or whole
//! sub-segments) onto a sorted run of target segments, producing per-target
//! `{head gap, mid overlap, tail gap}` buffers. Ranges are split at target
//! boundaries; sub-segments that reach onto a later target are expanded into
//! their entries and re-routed.

use crate::{
    key_range::MaxKey,
    segment::{Segment, SegmentRead},
    value::Entry,
    Slice,
};
use std::{collections::VecDeque, sync::Arc};

/// Anything that can be routed to a target segment
#[derive(Clone)]
pub enum Assignable {
    /// A single key-value or range entry
    Entry(Entry),

    /// A whole sub-segment
    Segment(Arc<Segment>),
}

impl Assignable {
    /// Expands into plain entries (sub-segments are read out).
    pub fn into_entries(self) -> crate::Result<Vec<Entry>> {
        match self {
            Self::Entry(entry) => Ok(vec![entry]),
            Self::Segment(segment) => segment.iter()?.collect(),
        }
    }
}

impl std::fmt::Debug for Assignable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Entry(entry) => write!(f, "Assignable::Entry({:?})", entry.key()),
            Self::Segment(_) => f.write_str("Assignable::Segment"),
        }
    }
}

/// One target segment's share of the incoming stream
pub struct Assignment {
    pub segment: Arc<Segment>,

    /// Assignables below the target's min key
    pub head_gap: Vec<Assignable>,

    /// Assignables overlapping the target's own key range
    pub mid_overlap: Vec<Assignable>,

    /// Assignables above the target but before the next one
    pub tail_gap: Vec<Assignable>,
}

impl Assignment {
    fn new(segment: Arc<Segment>) -> Self {
        Self {
            segment,
            head_gap: vec![],
            mid_overlap: vec![],
            tail_gap: vec![],
        }
    }

    /// Returns `true` if nothing was assigned to this target.
    #[must_use]
    pub fn is_untouched(&self) -> bool {
        self.head_gap.is_empty() && self.mid_overlap.is_empty() && self.tail_gap.is_empty()
    }
}

struct Incoming {
    assignable: Assignable,
    min_key: Slice,
    max_key: MaxKey,
}

impl Incoming {
    fn of(assignable: Assignable) -> crate::Result<Self> {
        let (min_key, max_key) = match &assignable {
            Assignable::Entry(entry) => (entry.key().clone(), entry.max_key()),
            Assignable::Segment(segment) => {
                let meta = segment.meta()?;
                (meta.min_key.clone(), meta.max_key.clone())
            }
        };

        Ok(Self {
            assignable,
            min_key,
            max_key,
        })
    }
}

/// Assigns a sorted stream of assignables to a sorted run of target segments.
///
/// With `gaps` disabled, everything lands in some target's mid overlap; with
/// it enabled, assignables outside the targets' own ranges accumulate in the
/// surrounding gap buffers instead.
///
/// # Panics
///
/// Panics when called without targets; routing a key-value nowhere is a
/// programmer error.
pub fn assign(
    assignables: impl IntoIterator<Item = Assignable>,
    targets: &[Arc<Segment>],
    gaps: bool,
) -> crate::Result<Vec<Assignment>> {
    assert!(!targets.is_empty(), "cannot assign without target segments");

    let mut assignments: Vec<Assignment> =
        targets.iter().map(|t| Assignment::new(t.clone())).collect();

    let target_metas = targets
        .iter()
        .map(|t| t.meta())
        .collect::<crate::Result<Vec<_>>>()?;

    debug_assert!(
        target_metas
            .windows(2)
            .all(|pair| pair[0].min_key < pair[1].min_key),
        "targets must be sorted by min key",
    );

    let mut queue: VecDeque<Assignable> = assignables.into_iter().collect();
    let mut current = 0usize;

    while let Some(assignable) = queue.pop_front() {
        let mut incoming = Incoming::of(assignable)?;

        // Advance the target cursor; a key exactly at the next target's min
        // key belongs to that target
        while let Some(next) = target_metas.get(current + 1) {
            if incoming.min_key >= next.min_key {
                current += 1;
            } else {
                break;
            }
        }

        // An assignable straddling the first target's min key splits at the
        // boundary so only the strictly-below part lands in the head gap
        if gaps && current == 0 {
            #[allow(clippy::expect_used)]
            let first_min = &target_metas.first().expect("targets are non-empty").min_key;

            if incoming.min_key < *first_min && incoming.max_key.spreads_onto(first_min) {
                match &incoming.assignable {
                    Assignable::Segment(segment) => {
                        let entries = segment.iter()?.collect::<crate::Result<Vec<_>>>()?;

                        for entry in entries.into_iter().rev() {
                            queue.push_front(Assignable::Entry(entry));
                        }

                        continue;
                    }
                    Assignable::Entry(Entry::Range(range)) => {
                        if range.to_key > **first_min {
                            let (left, right) = range.clone().split(first_min);

                            queue.push_front(Assignable::Entry(Entry::Range(right)));
                            incoming = Incoming::of(Assignable::Entry(Entry::Range(left)))?;
                        }
                    }
                    Assignable::Entry(Entry::Fixed { .. }) => {}
                }
            }
        }

        let next_min = target_metas.get(current + 1).map(|m| &m.min_key);

        if let Some(next_min) = next_min {
            match &incoming.assignable {
                // A sub-segment reaching onto the next target dissolves into
                // its entries and re-enters the stream
                Assignable::Segment(segment) => {
                    if incoming.max_key.spreads_onto(next_min) {
                        let entries = segment.iter()?.collect::<crate::Result<Vec<_>>>()?;

                        for entry in entries.into_iter().rev() {
                            queue.push_front(Assignable::Entry(entry));
                        }

                        continue;
                    }
                }

                Assignable::Entry(Entry::Range(range)) => {
                    // An equal boundary does not spread: ranges end exclusive
                    if range.to_key > **next_min {
                        let (left, right) = range.clone().split(next_min);

                        queue.push_front(Assignable::Entry(Entry::Range(right)));
                        incoming = Incoming::of(Assignable::Entry(Entry::Range(left)))?;
                    }
                }

                Assignable::Entry(Entry::Fixed { .. }) => {}
            }
        }

        #[allow(clippy::expect_used)]
        let assignment = assignments.get_mut(current).expect("cursor is in bounds");

        #[allow(clippy::expect_used)]
        let meta = target_metas.get(current).expect("cursor is in bounds");

        if !gaps {
            assignment.mid_overlap.push(incoming.assignable);
        } else if incoming.min_key < meta.min_key && current == 0 {
            assignment.head_gap.push(incoming.assignable);
        } else if !meta.max_key.covers(&incoming.min_key) {
            assignment.tail_gap.push(incoming.assignable);
        } else {
            assignment.mid_overlap.push(incoming.assignable);
        }
    }

    Ok(assignments)
}
