// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{segment::hash_index, CompressionType};

/// Bloom filter configuration
#[derive(Clone, Debug)]
pub struct BloomConfig {
    /// Target false-positive rate
    pub fp_rate: f32,

    /// Segments holding fewer unique fixed keys than this skip the filter
    pub minimum_keys: usize,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            fp_rate: 0.01,
            minimum_keys: 10,
        }
    }
}

/// Sorted index configuration
#[derive(Clone, Debug)]
pub struct SortedIndexConfig {
    pub prefix_compression: bool,

    /// With prefix compression, a full key is written every this many entries
    pub restart_interval: usize,
}

impl Default for SortedIndexConfig {
    fn default() -> Self {
        Self {
            prefix_compression: false,
            restart_interval: 16,
        }
    }
}

/// Whether defrag groups rewritten segments into many-segment files
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SegmentFormat {
    /// One segment per file
    One,

    /// Up to `max_children` segments share a file behind a list segment
    Many {
        max_children: usize,
    },
}

/// Configuration for writing segments
#[derive(Clone, Debug)]
pub struct SegmentConfig {
    pub sorted_index: SortedIndexConfig,

    /// `None` disables the hash index
    pub hash_index: Option<hash_index::Config>,

    pub binary_search_index: bool,

    /// `None` disables the bloom filter
    pub bloom_filter: Option<BloomConfig>,

    /// Store put/update values out-of-line in a values block
    pub separate_values: bool,

    pub compression: CompressionType,

    /// Target size of one segment body; defrag starts a new segment once
    /// the current one grows past this
    pub min_size: u64,

    pub format: SegmentFormat,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            sorted_index: SortedIndexConfig::default(),
            hash_index: Some(hash_index::Config::default()),
            binary_search_index: true,
            bloom_filter: Some(BloomConfig::default()),
            separate_values: true,
            compression: CompressionType::None,
            min_size: 2 * 1_024 * 1_024,
            format: SegmentFormat::One,
        }
    }
}
