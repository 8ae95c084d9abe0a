// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Storage core of an embedded, ordered, versioned key-value LSM engine.
//!
//! ##### NOTE
//!
//! > This crate only provides the storage core: the on-disk segment format
//! > and its readers, the in-memory Level 0 map, the versioned-value merge
//! > algebra, the segment assigner and the defragmentation pipeline.
//! > Process bootstrap, directory recovery, compaction scheduling and the
//! > outer database API live in surrounding layers.
//!
//! ##### About
//!
//! Writes buffer in the [`LevelZeroMapCache`], an ordered map that keeps
//! range mutations well-formed by splitting them on overlap. Once full, the
//! buffer is flushed into immutable, self-describing [`Segment`] files laid
//! out as sorted blocks with optional hash, binary-search and bloom
//! secondary indexes.
//!
//! A stored value is not just a blob: puts, removes, updates, registered
//! functions and deferred apply chains form an algebra resolved by the
//! merger, with an opaque monotone [`Time`] as the conflict tie-breaker and
//! optional [`Deadline`]s for expiration. Reads walk the level stack,
//! merging as they descend; compaction routes entries onto target segments
//! with the assigner and rewrites them through the defrag pipeline.
//!
//! ```
//! use std::sync::Arc;
//! use swaydb_core::{
//!     level::{self, LevelReader},
//!     segment::read_state::ThreadReadState,
//!     value::{Entry, Value},
//!     FunctionStore, LevelZeroMapCache, Slice, Time,
//! };
//!
//! let functions = Arc::new(FunctionStore::new());
//! let level_zero = LevelZeroMapCache::new(functions.clone());
//!
//! level_zero.write(Entry::fixed(
//!     "my_key",
//!     Value::put("my_value", None, Time::from(1)),
//! ))?;
//!
//! let levels: Vec<&dyn LevelReader> = vec![&level_zero];
//! let mut state = ThreadReadState::new();
//!
//! let hit = level::get(&levels, &Slice::from("my_key"), &functions, &mut state)?;
//! assert_eq!(
//!     Some(Slice::from("my_value")),
//!     hit.and_then(|live| live.value),
//! );
//! #
//! # Ok::<(), swaydb_core::Error>(())
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![warn(clippy::indexing_slicing)]
#![warn(missing_docs)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::module_name_repetitions)]

pub mod assigner;
mod checksum;
pub mod coding;
mod compression;
mod deadline;
pub mod defrag;
mod error;

#[doc(hidden)]
pub mod file;

mod function_store;
pub mod hash;
mod key_range;
pub mod level;
pub mod level_zero;
pub mod merge;
pub mod segment;
mod slice;

#[doc(hidden)]
pub mod stop_signal;

pub mod sweeper;
mod time;
pub mod value;

pub use {
    checksum::Checksum,
    compression::CompressionType,
    deadline::Deadline,
    error::{Error, Result},
    function_store::{FunctionOutput, FunctionStore, SwayFunction},
    key_range::{KeyRange, MaxKey},
    level_zero::LevelZeroMapCache,
    segment::{Segment, SegmentRead, SegmentRef},
    slice::Slice,
    time::Time,
};
