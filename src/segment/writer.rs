// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Segment writer
//!
//! Folds a sorted entry stream into an encoded one-segment body: sorted
//! index, the configured secondary index blocks, values block and footer.
//! The result is a [`TransientOne`], a built-but-not-yet-committed segment.

use crate::{
    coding::Encode,
    segment::{
        binary_search_index, bloom,
        block::{Block, BlockHandle, BlockKind},
        config::SegmentConfig,
        footer::Footer,
        hash_index,
        meta::MetaCollector,
        sorted_index::{self, ValueSlot},
        values,
    },
    value::{Entry, Value},
    Slice,
};
use byteorder::{WriteBytesExt, LE};

/// A built-but-not-yet-committed one-segment body
#[derive(Clone, Debug)]
pub struct TransientOne {
    /// Encoded segment body (without the leading file format byte)
    pub bytes: Slice,

    pub footer: Footer,
}

impl TransientOne {
    #[must_use]
    pub fn min_key(&self) -> &Slice {
        &self.footer.meta.min_key
    }

    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.bytes.len()
    }
}

/// Builds one segment body from a sorted entry stream
pub struct Writer {
    config: SegmentConfig,

    sorted: sorted_index::Writer,
    values: values::Writer,
    hash: Option<hash_index::Builder>,
    binary: Option<binary_search_index::Builder>,

    /// Fixed keys buffered for the bloom filter, which is sized at finish
    bloom_keys: Vec<Slice>,

    meta: MetaCollector,
}

impl Writer {
    #[must_use]
    pub fn new(config: SegmentConfig, created_in_level: u32) -> Self {
        let sorted = sorted_index::Writer::new(
            config.sorted_index.prefix_compression,
            config.sorted_index.restart_interval,
            config.separate_values,
        );

        let hash = config.hash_index.as_ref().map(|_| hash_index::Builder::new());

        let binary = config
            .binary_search_index
            .then(|| binary_search_index::Builder::new(!config.sorted_index.prefix_compression));

        Self {
            config,
            sorted,
            values: values::Writer::new(),
            hash,
            binary,
            bloom_keys: vec![],
            meta: MetaCollector::new(created_in_level),
        }
    }

    /// Appends an entry; entries must arrive in strictly ascending key order.
    pub fn add(&mut self, entry: &Entry) -> crate::Result<()> {
        let value_slot = self.value_slot(entry);
        let written = self.sorted.add(entry, &value_slot)?;

        if let Entry::Fixed { key, .. } = entry {
            if let (Some(hash), Some(config)) = (&mut self.hash, &self.config.hash_index) {
                // Reference slots must point at standalone-decodable entries
                if written.full_key || config.format == hash_index::Format::CopyKey {
                    hash.insert(key.clone(), written.offset);
                }
            }

            self.bloom_keys.push(key.clone());
        }

        if let Some(binary) = &mut self.binary {
            if written.full_key {
                binary.insert(written.offset);
            }
        }

        self.meta.add(entry);

        Ok(())
    }

    fn value_slot(&mut self, entry: &Entry) -> ValueSlot {
        let value = match entry {
            Entry::Fixed { value, .. } => match value {
                Value::Put(put) => put.value.as_ref(),
                Value::Update(update) => update.value.as_ref(),
                _ => None,
            },
            Entry::Range(_) => None,
        };

        match value {
            None => ValueSlot::None,
            Some(value) if self.config.separate_values => {
                let (offset, len) = self.values.add(value);
                ValueSlot::External { offset, len }
            }
            Some(value) => ValueSlot::Inline(value.clone()),
        }
    }

    /// Number of entries added.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    /// Estimated body size so far; used to cut segments at their target size.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.sorted.byte_size() + self.values.byte_size()
    }

    /// Encodes all blocks and the footer; `None` if no entry was added.
    pub fn finish(self) -> crate::Result<Option<TransientOne>> {
        let Some(meta) = self.meta.finish() else {
            return Ok(None);
        };

        let compression = self.config.compression;
        let mut body: Vec<u8> = vec![];

        let next_handle = |body: &mut Vec<u8>, payload: &[u8], kind: BlockKind| {
            let offset = body.len() as u64;
            let size = Block::write_into(body, kind, payload, compression)?;
            Ok::<_, crate::Error>(BlockHandle { offset, size })
        };

        let sorted_index =
            next_handle(&mut body, &self.sorted.finish()?, BlockKind::SortedIndex)?;

        let hash_index = match (self.hash, &self.config.hash_index) {
            (Some(builder), Some(config)) => builder
                .build(config)
                .map(|payload| next_handle(&mut body, &payload, BlockKind::HashIndex))
                .transpose()?,
            _ => None,
        };

        let binary_search_index = self
            .binary
            .filter(|builder| !builder.is_empty())
            .map(|builder| -> crate::Result<_> {
                let payload = builder.build()?;
                next_handle(&mut body, &payload, BlockKind::BinarySearchIndex)
            })
            .transpose()?;

        // A range entry can shadow arbitrary keys, so a filter over fixed
        // keys would produce false absence verdicts
        let bloom_filter = match &self.config.bloom_filter {
            Some(config)
                if !meta.has_range && self.bloom_keys.len() >= config.minimum_keys =>
            {
                let mut builder = bloom::Builder::with_fp_rate(self.bloom_keys.len(), config.fp_rate);
                for key in &self.bloom_keys {
                    builder.set(key);
                }

                Some(next_handle(&mut body, &builder.build()?, BlockKind::BloomFilter)?)
            }
            _ => None,
        };

        let bloom_item_count = if bloom_filter.is_some() {
            self.bloom_keys.len()
        } else {
            0
        };

        let values = if self.values.is_empty() {
            None
        } else {
            Some(next_handle(&mut body, &self.values.finish(), BlockKind::Values)?)
        };

        let footer = Footer {
            meta,
            bloom_item_count,
            sorted_index,
            hash_index,
            binary_search_index,
            bloom_filter,
            values,
        };

        let footer_handle = next_handle(&mut body, &footer.encode_into_vec(), BlockKind::Footer)?;
        body.write_u32::<LE>(footer_handle.size)?;

        log::trace!(
            "wrote segment body: {} entries, {} B, level {}",
            footer.meta.key_value_count,
            body.len(),
            footer.meta.created_in_level,
        );

        Ok(Some(TransientOne {
            bytes: body.into(),
            footer,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Time;
    use test_log::test;

    #[test]
    fn segment_writer_emits_configured_blocks() -> crate::Result<()> {
        let mut writer = Writer::new(SegmentConfig::default(), 1);

        for i in 0..100u32 {
            let key = format!("key-{i:05}");
            writer.add(&Entry::fixed(
                Slice::from(key),
                Value::put(*b"value", None, Time::from(u64::from(i))),
            ))?;
        }

        let transient = writer.finish()?.expect("writer is non-empty");
        let footer = &transient.footer;

        assert_eq!(100, footer.meta.key_value_count);
        assert!(footer.hash_index.is_some());
        assert!(footer.binary_search_index.is_some());
        assert!(footer.bloom_filter.is_some());
        assert!(footer.values.is_some());
        assert_eq!(100, footer.bloom_item_count);
        assert!(!footer.meta.has_range);
        assert!(footer.meta.has_put);

        Ok(())
    }

    #[test]
    fn segment_writer_empty_yields_none() -> crate::Result<()> {
        let writer = Writer::new(SegmentConfig::default(), 1);
        assert!(writer.finish()?.is_none());
        Ok(())
    }

    #[test]
    fn segment_writer_skips_bloom_for_ranges() -> crate::Result<()> {
        use crate::value::{RangeEntry, RangeValue, Remove};

        let mut writer = Writer::new(
            SegmentConfig {
                bloom_filter: Some(crate::segment::config::BloomConfig {
                    minimum_keys: 1,
                    ..Default::default()
                }),
                ..Default::default()
            },
            1,
        );

        writer.add(&Entry::fixed(*b"a", Value::put(*b"v", None, Time::from(1))))?;
        writer.add(&Entry::Range(RangeEntry::new(
            Slice::from(*b"b"),
            Slice::from(*b"d"),
            None,
            RangeValue::Remove(Remove {
                deadline: None,
                time: Time::from(2),
            }),
        )))?;

        let transient = writer.finish()?.expect("writer is non-empty");

        assert!(transient.footer.bloom_filter.is_none());
        assert!(transient.footer.meta.has_range);

        Ok(())
    }
}
