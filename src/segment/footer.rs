// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Footer block
//!
//! The terminal block of a one-segment. Records the segment's scalar
//! statistics plus the handles of every other block, so a reader can
//! bootstrap from the footer alone. The segment body ends with a little
//! endian `u32` holding the footer block's total size, which is how the
//! footer is located from the end of the region.

use crate::{
    coding::{Decode, Encode},
    segment::{block::BlockHandle, meta::SegmentMeta},
};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use varint_rs::{VarintReader, VarintWriter};

/// Decoded footer payload
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Footer {
    pub meta: SegmentMeta,

    /// Number of keys registered in the bloom filter
    pub bloom_item_count: usize,

    pub sorted_index: BlockHandle,
    pub hash_index: Option<BlockHandle>,
    pub binary_search_index: Option<BlockHandle>,
    pub bloom_filter: Option<BlockHandle>,
    pub values: Option<BlockHandle>,
}

fn encode_optional_handle<W: Write>(
    writer: &mut W,
    handle: Option<BlockHandle>,
) -> crate::Result<()> {
    match handle {
        Some(handle) => {
            writer.write_u8(1)?;
            handle.encode_into(writer)
        }
        None => {
            writer.write_u8(0)?;
            Ok(())
        }
    }
}

fn decode_optional_handle<R: Read>(reader: &mut R) -> crate::Result<Option<BlockHandle>> {
    if reader.read_u8()? == 1 {
        Ok(Some(BlockHandle::decode_from(reader)?))
    } else {
        Ok(None)
    }
}

impl Encode for Footer {
    fn encode_into<W: Write>(&self, writer: &mut W) -> crate::Result<()> {
        self.meta.encode_into(writer)?;

        #[allow(clippy::cast_possible_truncation)]
        writer.write_u32_varint(self.bloom_item_count as u32)?;

        self.sorted_index.encode_into(writer)?;
        encode_optional_handle(writer, self.hash_index)?;
        encode_optional_handle(writer, self.binary_search_index)?;
        encode_optional_handle(writer, self.bloom_filter)?;
        encode_optional_handle(writer, self.values)?;

        Ok(())
    }
}

impl Decode for Footer {
    fn decode_from<R: Read>(reader: &mut R) -> crate::Result<Self> {
        let meta = SegmentMeta::decode_from(reader)?;
        let bloom_item_count = reader.read_u32_varint()? as usize;

        let sorted_index = BlockHandle::decode_from(reader)?;
        let hash_index = decode_optional_handle(reader)?;
        let binary_search_index = decode_optional_handle(reader)?;
        let bloom_filter = decode_optional_handle(reader)?;
        let values = decode_optional_handle(reader)?;

        Ok(Self {
            meta,
            bloom_item_count,
            sorted_index,
            hash_index,
            binary_search_index,
            bloom_filter,
            values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{key_range::MaxKey, time::Time, value::{Entry, Value}, Slice};
    use crate::segment::meta::MetaCollector;
    use test_log::test;

    #[test]
    fn footer_codec_roundtrip() -> crate::Result<()> {
        let mut collector = MetaCollector::new(2);
        collector.add(&Entry::fixed(*b"a", Value::put(*b"v", None, Time::from(1))));
        collector.add(&Entry::fixed(*b"z", Value::remove(None, Time::from(2))));

        let footer = Footer {
            meta: collector.finish().expect("collector is non-empty"),
            bloom_item_count: 2,
            sorted_index: BlockHandle { offset: 0, size: 100 },
            hash_index: Some(BlockHandle { offset: 100, size: 50 }),
            binary_search_index: None,
            bloom_filter: Some(BlockHandle { offset: 150, size: 30 }),
            values: None,
        };

        let bytes = footer.encode_into_vec();
        let decoded = Footer::decode_from(&mut &bytes[..])?;

        assert_eq!(footer, decoded);
        assert_eq!(decoded.meta.min_key, *b"a");
        assert_eq!(MaxKey::Fixed(Slice::from(*b"z")), decoded.meta.max_key);

        Ok(())
    }
}
