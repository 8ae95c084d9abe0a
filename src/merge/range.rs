// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Range-value merging
//!
//! A range value covers an interval, so there is no key to feed a function;
//! every pairing that would execute a function stashes a pending chain
//! instead. Resolution happens when the range later collapses onto concrete
//! keys.

use crate::value::{PendingApply, RangeValue, Remove, Update};

/// Merges a newer range value onto an older range value.
#[must_use]
pub fn range_value(newer: &RangeValue, older: &RangeValue) -> RangeValue {
    if newer.time() <= older.time() {
        return older.clone();
    }

    match (newer, older) {
        (RangeValue::Remove(remove), older) => merge_remove(remove, older),
        (RangeValue::Update(update), older) => merge_update(update, older),

        // No key available, defer execution
        (RangeValue::Function(_), RangeValue::Remove(old)) if old.deadline.is_none() => {
            // Every key in the interval is absent, there is nothing to mutate
            RangeValue::Remove(Remove {
                deadline: None,
                time: newer.time().clone(),
            })
        }
        (RangeValue::Function(_), older) => stash(older, newer),

        (RangeValue::PendingApply(pending), older) => {
            let mut merged = older.clone();
            for apply in &pending.applies {
                #[allow(clippy::expect_used)]
                let apply = RangeValue::from_value(&apply.to_value())
                    .expect("applies are never puts");
                merged = range_value(&apply, &merged);
            }
            merged
        }
    }
}

fn merge_remove(newer: &Remove, older: &RangeValue) -> RangeValue {
    let Some(deadline) = newer.deadline else {
        return RangeValue::Remove(Remove {
            deadline: None,
            time: newer.time.clone(),
        });
    };

    match older {
        RangeValue::Remove(old) => RangeValue::Remove(Remove {
            deadline: old.deadline.map(|_| deadline),
            time: newer.time.clone(),
        }),

        RangeValue::Update(old) => RangeValue::Update(Update {
            value: old.value.clone(),
            deadline: Some(deadline),
            time: newer.time.clone(),
        }),

        RangeValue::Function(_) | RangeValue::PendingApply(_) => {
            stash(older, &RangeValue::Remove(newer.clone()))
        }
    }
}

fn merge_update(newer: &Update, older: &RangeValue) -> RangeValue {
    match older {
        RangeValue::Remove(old) => {
            if old.deadline.is_some() {
                RangeValue::Update(Update {
                    value: newer.value.clone(),
                    deadline: newer.deadline.or(old.deadline),
                    time: newer.time.clone(),
                })
            } else {
                RangeValue::Remove(Remove {
                    deadline: None,
                    time: newer.time.clone(),
                })
            }
        }

        RangeValue::Update(old) => RangeValue::Update(Update {
            value: newer.value.clone(),
            deadline: newer.deadline.or(old.deadline),
            time: newer.time.clone(),
        }),

        RangeValue::Function(_) | RangeValue::PendingApply(_) => {
            stash(older, &RangeValue::Update(newer.clone()))
        }
    }
}

fn stash(older: &RangeValue, newer: &RangeValue) -> RangeValue {
    let mut applies = older.to_value().to_applies();
    applies.extend(newer.to_value().to_applies());
    RangeValue::PendingApply(PendingApply::new(applies))
}
