// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Versioned-value merge algebra
//!
//! [`fixed`] merges a newer mutation onto an older one for a single key. It is
//! pure: no I/O, no lower-level lookups. Whenever the outcome depends on data
//! the current layer does not carry, the merge stashes a
//! [`PendingApply`](crate::value::PendingApply) chain for traversal or a later
//! compaction to resolve.

pub mod range;
pub mod stream;

use crate::{
    function_store::{FunctionOutput, FunctionStore, SwayFunction},
    value::{Function, PendingApply, Put, Remove, Update, Value},
    Slice,
};

/// Merges a newer fixed value onto an older fixed value.
///
/// If `newer.time() <= older.time()`, the newer write was delayed and the
/// older value is kept verbatim; otherwise the result carries `newer.time()`.
pub fn fixed(
    newer: &Value,
    older: &Value,
    key: &Slice,
    functions: &FunctionStore,
) -> crate::Result<Value> {
    if newer.time() <= older.time() {
        return Ok(older.clone());
    }

    match (newer, older) {
        // A put fully overwrites whatever it lands on
        (Value::Put(put), _) => Ok(Value::Put(put.clone())),

        (Value::Remove(remove), older) => merge_remove(remove, older),
        (Value::Update(update), older) => merge_update(update, older),
        (Value::Function(function), older) => merge_function(function, older, key, functions),

        (Value::PendingApply(pending), older) => {
            // Replay the deferred chain, oldest first
            let mut merged = older.clone();
            for apply in &pending.applies {
                merged = fixed(&apply.to_value(), &merged, key, functions)?;
            }
            Ok(merged)
        }
    }
}

fn merge_remove(newer: &Remove, older: &Value) -> crate::Result<Value> {
    let Some(deadline) = newer.deadline else {
        // An untimed remove erases everything below it
        return Ok(Value::Remove(Remove {
            deadline: None,
            time: newer.time.clone(),
        }));
    };

    match older {
        // Timed removal: the key stays alive until the deadline fires
        Value::Put(put) => Ok(Value::Put(Put {
            value: put.value.clone(),
            deadline: Some(deadline),
            time: newer.time.clone(),
        })),

        Value::Remove(old) => Ok(Value::Remove(Remove {
            // Removing an already-removed key stays an untimed remove
            deadline: old.deadline.map(|_| deadline),
            time: newer.time.clone(),
        })),

        // Whether the update materialises depends on lower levels,
        // so the expiry rides along on the update
        Value::Update(old) => Ok(Value::Update(Update {
            value: old.value.clone(),
            deadline: Some(deadline),
            time: newer.time.clone(),
        })),

        Value::Function(_) | Value::PendingApply(_) => {
            Ok(stash(older, &Value::Remove(newer.clone())))
        }
    }
}

fn merge_update(newer: &Update, older: &Value) -> crate::Result<Value> {
    match older {
        Value::Put(put) => Ok(Value::Put(Put {
            value: newer.value.clone(),
            deadline: newer.deadline.or(put.deadline),
            time: newer.time.clone(),
        })),

        Value::Remove(remove) => {
            if remove.deadline.is_some() {
                // The removal may itself be superseded at lower levels,
                // keep the update alive for the next merge down
                Ok(Value::Update(Update {
                    value: newer.value.clone(),
                    deadline: newer.deadline.or(remove.deadline),
                    time: newer.time.clone(),
                }))
            } else {
                Ok(Value::Remove(Remove {
                    deadline: None,
                    time: newer.time.clone(),
                }))
            }
        }

        Value::Update(old) => Ok(Value::Update(Update {
            value: newer.value.clone(),
            deadline: newer.deadline.or(old.deadline),
            time: newer.time.clone(),
        })),

        Value::Function(_) | Value::PendingApply(_) => {
            Ok(stash(older, &Value::Update(newer.clone())))
        }
    }
}

fn merge_function(
    newer: &Function,
    older: &Value,
    key: &Slice,
    functions: &FunctionStore,
) -> crate::Result<Value> {
    match older {
        Value::Put(put) => {
            let output = run(newer, key, put.value.as_ref(), put.deadline, functions)?;

            Ok(match output {
                FunctionOutput::Nothing => Value::Put(Put {
                    value: put.value.clone(),
                    deadline: put.deadline,
                    time: newer.time.clone(),
                }),
                FunctionOutput::Remove => Value::Remove(Remove {
                    deadline: None,
                    time: newer.time.clone(),
                }),
                FunctionOutput::Expire(deadline) => Value::Put(Put {
                    value: put.value.clone(),
                    deadline: Some(deadline),
                    time: newer.time.clone(),
                }),
                FunctionOutput::Update { value, deadline } => Value::Put(Put {
                    value,
                    deadline: deadline.or(put.deadline),
                    time: newer.time.clone(),
                }),
            })
        }

        Value::Remove(remove) => {
            if remove.deadline.is_some() {
                // Whether the function sees a value depends on lower levels.
                // Stashed uniformly, even for key-only functions.
                Ok(stash(older, &Value::Function(newer.clone())))
            } else {
                // The key is definitely absent, there is nothing to mutate
                Ok(Value::Remove(Remove {
                    deadline: None,
                    time: newer.time.clone(),
                }))
            }
        }

        Value::Update(update) => {
            let function = lookup(newer, functions)?;

            if function.requires_deadline() && update.deadline.is_none() {
                // The effective deadline lives in a lower level
                return Ok(stash(older, &Value::Function(newer.clone())));
            }

            let output = function.run(key, update.value.as_ref(), update.deadline);

            Ok(match output {
                FunctionOutput::Nothing => Value::Update(Update {
                    value: update.value.clone(),
                    deadline: update.deadline,
                    time: newer.time.clone(),
                }),
                FunctionOutput::Remove => Value::Remove(Remove {
                    deadline: None,
                    time: newer.time.clone(),
                }),
                FunctionOutput::Expire(deadline) => Value::Update(Update {
                    value: update.value.clone(),
                    deadline: Some(deadline),
                    time: newer.time.clone(),
                }),
                // Existence still depends on lower levels, so the output
                // stays an update rather than becoming a put
                FunctionOutput::Update { value, deadline } => Value::Update(Update {
                    value,
                    deadline: deadline.or(update.deadline),
                    time: newer.time.clone(),
                }),
            })
        }

        Value::Function(_) | Value::PendingApply(_) => {
            Ok(stash(older, &Value::Function(newer.clone())))
        }
    }
}

/// Chains `older` and `newer` into a pending apply, oldest first.
fn stash(older: &Value, newer: &Value) -> Value {
    let mut applies = older.to_applies();
    applies.extend(newer.to_applies());
    Value::PendingApply(PendingApply::new(applies))
}

fn lookup(function: &Function, functions: &FunctionStore) -> crate::Result<SwayFunction> {
    functions
        .get(&function.function_id)
        .ok_or_else(|| crate::Error::FunctionNotFound(function.function_id.clone()))
}

fn run(
    function: &Function,
    key: &Slice,
    value: Option<&Slice>,
    deadline: Option<crate::deadline::Deadline>,
    functions: &FunctionStore,
) -> crate::Result<FunctionOutput> {
    Ok(lookup(function, functions)?.run(key, value, deadline))
}
