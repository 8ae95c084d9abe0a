// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Merging of two sorted entry streams
//!
//! The newer stream is merged onto the older one, splitting ranges wherever
//! they overlap, so the output is again sorted with non-overlapping ranges.
//! Defrag feeds it incoming assignables against a target segment's entries;
//! the Level 0 map feeds it a single write against whatever it overlapped.

use super::{fixed, range};
use crate::{
    function_store::FunctionStore,
    value::{Entry, RangeEntry, Value},
    Slice,
};
use std::collections::VecDeque;

/// Merges a newer sorted entry stream onto an older sorted entry stream.
pub fn merge_streams(
    newer: impl IntoIterator<Item = Entry>,
    older: impl IntoIterator<Item = Entry>,
    functions: &FunctionStore,
) -> crate::Result<Vec<Entry>> {
    let mut newer: VecDeque<Entry> = newer.into_iter().collect();
    let mut older: VecDeque<Entry> = older.into_iter().collect();
    let mut out = Vec::with_capacity(newer.len() + older.len());

    loop {
        let Some(new_head) = newer.pop_front() else {
            out.extend(older);
            return Ok(out);
        };

        let Some(old_head) = older.pop_front() else {
            out.push(new_head);
            out.extend(newer);
            return Ok(out);
        };

        match (new_head, old_head) {
            (
                Entry::Fixed {
                    key: new_key,
                    value: new_value,
                },
                Entry::Fixed {
                    key: old_key,
                    value: old_value,
                },
            ) => match new_key.cmp(&old_key) {
                std::cmp::Ordering::Less => {
                    out.push(Entry::Fixed {
                        key: new_key,
                        value: new_value,
                    });
                    older.push_front(Entry::Fixed {
                        key: old_key,
                        value: old_value,
                    });
                }
                std::cmp::Ordering::Greater => {
                    out.push(Entry::Fixed {
                        key: old_key,
                        value: old_value,
                    });
                    newer.push_front(Entry::Fixed {
                        key: new_key,
                        value: new_value,
                    });
                }
                std::cmp::Ordering::Equal => {
                    let merged = fixed(&new_value, &old_value, &new_key, functions)?;
                    out.push(Entry::Fixed {
                        key: new_key,
                        value: merged,
                    });
                }
            },

            (
                Entry::Fixed {
                    key: new_key,
                    value: new_value,
                },
                Entry::Range(old_range),
            ) => {
                if new_key < old_range.from_key {
                    out.push(Entry::Fixed {
                        key: new_key,
                        value: new_value,
                    });
                    older.push_front(Entry::Range(old_range));
                } else if new_key >= old_range.to_key {
                    out.push(Entry::Range(old_range));
                    newer.push_front(Entry::Fixed {
                        key: new_key,
                        value: new_value,
                    });
                } else {
                    let merged = fixed(
                        &new_value,
                        &old_range.value_at(&new_key),
                        &new_key,
                        functions,
                    )?;

                    if new_key > old_range.from_key {
                        let (left, right) = old_range.split(&new_key);
                        out.push(Entry::Range(left));
                        older.push_front(Entry::Range(RangeEntry {
                            from_value: Some(merged),
                            ..right
                        }));
                    } else {
                        older.push_front(Entry::Range(RangeEntry {
                            from_value: Some(merged),
                            ..old_range
                        }));
                    }
                }
            }

            (
                Entry::Range(new_range),
                Entry::Fixed {
                    key: old_key,
                    value: old_value,
                },
            ) => {
                if new_range.to_key <= old_key {
                    out.push(Entry::Range(new_range));
                    older.push_front(Entry::Fixed {
                        key: old_key,
                        value: old_value,
                    });
                } else if old_key < new_range.from_key {
                    out.push(Entry::Fixed {
                        key: old_key,
                        value: old_value,
                    });
                    newer.push_front(Entry::Range(new_range));
                } else if old_key > new_range.from_key {
                    // All older entries below the fixed key are exhausted,
                    // so the left piece is final
                    let (left, right) = new_range.split(&old_key);
                    out.push(Entry::Range(left));
                    newer.push_front(Entry::Range(right));
                    older.push_front(Entry::Fixed {
                        key: old_key,
                        value: old_value,
                    });
                } else {
                    let merged =
                        fixed(&new_range.value_at(&old_key), &old_value, &old_key, functions)?;
                    newer.push_front(Entry::Range(RangeEntry {
                        from_value: Some(merged),
                        ..new_range
                    }));
                }
            }

            (Entry::Range(new_range), Entry::Range(old_range)) => {
                if new_range.to_key <= old_range.from_key {
                    out.push(Entry::Range(new_range));
                    older.push_front(Entry::Range(old_range));
                } else if old_range.to_key <= new_range.from_key {
                    out.push(Entry::Range(old_range));
                    newer.push_front(Entry::Range(new_range));
                } else if new_range.from_key < old_range.from_key {
                    let (left, right) = new_range.split(&old_range.from_key);
                    out.push(Entry::Range(left));
                    newer.push_front(Entry::Range(right));
                    older.push_front(Entry::Range(old_range));
                } else if old_range.from_key < new_range.from_key {
                    let (left, right) = old_range.split(&new_range.from_key);
                    out.push(Entry::Range(left));
                    older.push_front(Entry::Range(right));
                    newer.push_front(Entry::Range(new_range));
                } else {
                    merge_aligned_ranges(new_range, old_range, &mut newer, &mut older, &mut out, functions)?;
                }
            }
        }
    }
}

/// Merges two ranges that start at the same key, emitting the overlapping
/// piece and pushing any remainder back for another round.
fn merge_aligned_ranges(
    new_range: RangeEntry,
    old_range: RangeEntry,
    newer: &mut VecDeque<Entry>,
    older: &mut VecDeque<Entry>,
    out: &mut Vec<Entry>,
    functions: &FunctionStore,
) -> crate::Result<()> {
    let from_key = new_range.from_key.clone();
    let end = new_range.to_key.clone().min(old_range.to_key.clone());

    let merged_range_value = range::range_value(&new_range.range_value, &old_range.range_value);

    let merged_from_value = if new_range.from_value.is_some() || old_range.from_value.is_some() {
        Some(fixed(
            &new_range.value_at(&from_key),
            &old_range.value_at(&from_key),
            &from_key,
            functions,
        )?)
    } else {
        None
    };

    push_remainder(newer, &new_range, &end);
    push_remainder(older, &old_range, &end);

    out.push(Entry::Range(RangeEntry {
        from_key,
        to_key: end,
        from_value: merged_from_value,
        range_value: merged_range_value,
    }));

    Ok(())
}

fn push_remainder(queue: &mut VecDeque<Entry>, source: &RangeEntry, end: &Slice) {
    if source.to_key > *end {
        queue.push_front(Entry::Range(RangeEntry {
            from_key: end.clone(),
            to_key: source.to_key.clone(),
            from_value: None,
            range_value: source.range_value.clone(),
        }));
    }
}

/// Reduces a merged entry to what the last level keeps.
///
/// With `remove_deletes` set (writing into the last level), anything that
/// cannot produce a live put for a reader is dropped: tombstones, expired
/// puts, updates and functions with nothing below them to mutate. Ranges
/// survive only through their from value.
#[must_use]
pub fn last_level_entry(entry: Entry) -> Option<Entry> {
    match entry {
        Entry::Fixed { key, value } => match value {
            Value::Put(ref put) if put.is_alive() => Some(Entry::Fixed { key, value }),
            _ => None,
        },
        Entry::Range(range) => match range.from_value {
            Some(Value::Put(put)) if put.is_alive() => Some(Entry::Fixed {
                key: range.from_key,
                value: Value::Put(put),
            }),
            _ => None,
        },
    }
}
