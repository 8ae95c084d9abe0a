// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{deadline::Deadline, Slice};
use rustc_hash::FxHashMap;
use std::sync::{Arc, RwLock};

/// What a registered function decided to do with a key-value
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FunctionOutput {
    /// Keep the existing key-value, bumping only its time
    Nothing,

    /// Remove the key
    Remove,

    /// Keep the value, expiring at the given deadline
    Expire(Deadline),

    /// Overwrite value and, if given, deadline
    Update {
        value: Option<Slice>,
        deadline: Option<Deadline>,
    },
}

type KeyFn = dyn Fn(&Slice) -> FunctionOutput + Send + Sync;
type KeyDeadlineFn = dyn Fn(&Slice, Option<Deadline>) -> FunctionOutput + Send + Sync;
type KeyValueFn = dyn Fn(&Slice, Option<&Slice>) -> FunctionOutput + Send + Sync;
type ValueFn = dyn Fn(Option<&Slice>) -> FunctionOutput + Send + Sync;
type ValueDeadlineFn = dyn Fn(Option<&Slice>, Option<Deadline>) -> FunctionOutput + Send + Sync;
type KeyValueDeadlineFn =
    dyn Fn(&Slice, Option<&Slice>, Option<Deadline>) -> FunctionOutput + Send + Sync;

/// A registered mutator function
///
/// Each variant advertises exactly the inputs it needs, so the merger can
/// decide whether it can run the function locally or has to stash a pending
/// chain until the missing inputs are known.
#[derive(Clone)]
pub enum SwayFunction {
    Key(Arc<KeyFn>),
    KeyDeadline(Arc<KeyDeadlineFn>),
    KeyValue(Arc<KeyValueFn>),
    Value(Arc<ValueFn>),
    ValueDeadline(Arc<ValueDeadlineFn>),
    KeyValueDeadline(Arc<KeyValueDeadlineFn>),
}

impl std::fmt::Debug for SwayFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Key(_) => "SwayFunction::Key",
            Self::KeyDeadline(_) => "SwayFunction::KeyDeadline",
            Self::KeyValue(_) => "SwayFunction::KeyValue",
            Self::Value(_) => "SwayFunction::Value",
            Self::ValueDeadline(_) => "SwayFunction::ValueDeadline",
            Self::KeyValueDeadline(_) => "SwayFunction::KeyValueDeadline",
        })
    }
}

impl SwayFunction {
    /// Returns `true` if the function reads the stored value.
    #[must_use]
    pub fn requires_value(&self) -> bool {
        matches!(
            self,
            Self::KeyValue(_) | Self::Value(_) | Self::ValueDeadline(_) | Self::KeyValueDeadline(_)
        )
    }

    /// Returns `true` if the function reads the stored deadline.
    #[must_use]
    pub fn requires_deadline(&self) -> bool {
        matches!(
            self,
            Self::KeyDeadline(_) | Self::ValueDeadline(_) | Self::KeyValueDeadline(_)
        )
    }

    /// Runs the function against the inputs it declared.
    #[must_use]
    pub fn run(
        &self,
        key: &Slice,
        value: Option<&Slice>,
        deadline: Option<Deadline>,
    ) -> FunctionOutput {
        match self {
            Self::Key(f) => f(key),
            Self::KeyDeadline(f) => f(key, deadline),
            Self::KeyValue(f) => f(key, value),
            Self::Value(f) => f(value),
            Self::ValueDeadline(f) => f(value, deadline),
            Self::KeyValueDeadline(f) => f(key, value, deadline),
        }
    }

    fn same_instance(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Key(a), Self::Key(b)) => Arc::ptr_eq(a, b),
            (Self::KeyDeadline(a), Self::KeyDeadline(b)) => Arc::ptr_eq(a, b),
            (Self::KeyValue(a), Self::KeyValue(b)) => Arc::ptr_eq(a, b),
            (Self::Value(a), Self::Value(b)) => Arc::ptr_eq(a, b),
            (Self::ValueDeadline(a), Self::ValueDeadline(b)) => Arc::ptr_eq(a, b),
            (Self::KeyValueDeadline(a), Self::KeyValueDeadline(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Process-wide, insert-only registry of named mutator functions
///
/// Function key-values reference entries in here by id. A lookup miss during a
/// merge is fatal for the affected read or compaction
/// ([`crate::Error::FunctionNotFound`]).
#[derive(Default)]
pub struct FunctionStore {
    functions: RwLock<FxHashMap<Slice, SwayFunction>>,
}

impl FunctionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a function.
    ///
    /// # Panics
    ///
    /// Panics if the id is already registered with a different function;
    /// callers assert uniqueness of function ids.
    pub fn put<I: Into<Slice>>(&self, function_id: I, function: SwayFunction) {
        let function_id = function_id.into();

        #[allow(clippy::expect_used)]
        let mut map = self.functions.write().expect("lock is not poisoned");

        if let Some(existing) = map.get(&function_id) {
            assert!(
                existing.same_instance(&function),
                "function id {:?} is already registered with a different function",
                String::from_utf8_lossy(&function_id),
            );
            return;
        }

        map.insert(function_id, function);
    }

    /// Looks up a function by id.
    #[must_use]
    pub fn get(&self, function_id: &[u8]) -> Option<SwayFunction> {
        #[allow(clippy::expect_used)]
        self.functions
            .read()
            .expect("lock is not poisoned")
            .get(function_id)
            .cloned()
    }

    /// Removes a function by id.
    pub fn remove(&self, function_id: &[u8]) -> Option<SwayFunction> {
        #[allow(clippy::expect_used)]
        self.functions
            .write()
            .expect("lock is not poisoned")
            .remove(function_id)
    }

    /// Returns `true` if the id is registered.
    #[must_use]
    pub fn contains(&self, function_id: &[u8]) -> bool {
        #[allow(clippy::expect_used)]
        self.functions
            .read()
            .expect("lock is not poisoned")
            .contains_key(function_id)
    }

    /// Number of registered functions.
    #[must_use]
    pub fn len(&self) -> usize {
        #[allow(clippy::expect_used)]
        self.functions.read().expect("lock is not poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn function_store_put_get_remove() {
        let store = FunctionStore::new();
        assert!(store.is_empty());

        let f = SwayFunction::Key(Arc::new(|_| FunctionOutput::Remove));
        store.put(*b"wipe", f.clone());

        assert!(store.contains(b"wipe"));
        assert!(store.get(b"wipe").is_some());
        assert!(store.get(b"missing").is_none());

        // Re-registering the same instance is a no-op
        store.put(*b"wipe", f);
        assert_eq!(1, store.len());

        assert!(store.remove(b"wipe").is_some());
        assert!(!store.contains(b"wipe"));
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn function_store_rejects_conflicting_id() {
        let store = FunctionStore::new();
        store.put(*b"f", SwayFunction::Key(Arc::new(|_| FunctionOutput::Nothing)));
        store.put(*b"f", SwayFunction::Key(Arc::new(|_| FunctionOutput::Remove)));
    }

    #[test]
    fn function_input_requirements() {
        let key_only = SwayFunction::Key(Arc::new(|_| FunctionOutput::Nothing));
        assert!(!key_only.requires_value());
        assert!(!key_only.requires_deadline());

        let kvd = SwayFunction::KeyValueDeadline(Arc::new(|_, _, _| FunctionOutput::Nothing));
        assert!(kvd.requires_value());
        assert!(kvd.requires_deadline());
    }
}
