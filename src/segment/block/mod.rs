// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

pub mod header;

pub use header::Header;

use crate::{
    checksum::Checksum,
    coding::{Decode, Encode},
    file::Source,
    CompressionType, Slice,
};
use std::io::Write;
use varint_rs::{VarintReader, VarintWriter};

/// The kinds of block a segment file is made of
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BlockKind {
    SortedIndex,
    HashIndex,
    BinarySearchIndex,
    BloomFilter,
    Values,
    Footer,
}

impl From<BlockKind> for u8 {
    fn from(value: BlockKind) -> Self {
        match value {
            BlockKind::SortedIndex => 0,
            BlockKind::HashIndex => 1,
            BlockKind::BinarySearchIndex => 2,
            BlockKind::BloomFilter => 3,
            BlockKind::Values => 4,
            BlockKind::Footer => 5,
        }
    }
}

impl TryFrom<u8> for BlockKind {
    type Error = crate::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::SortedIndex),
            1 => Ok(Self::HashIndex),
            2 => Ok(Self::BinarySearchIndex),
            3 => Ok(Self::BloomFilter),
            4 => Ok(Self::Values),
            5 => Ok(Self::Footer),
            tag => Err(crate::Error::InvalidTag(("BlockKind", tag))),
        }
    }
}

/// Where a block lives inside its segment file
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct BlockHandle {
    /// Offset relative to the owning segment's start
    pub offset: u64,

    /// Total encoded size (header + payload)
    pub size: u32,
}

impl Encode for BlockHandle {
    fn encode_into<W: Write>(&self, writer: &mut W) -> crate::Result<()> {
        writer.write_u64_varint(self.offset)?;
        writer.write_u32_varint(self.size)?;
        Ok(())
    }
}

impl Decode for BlockHandle {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> crate::Result<Self> {
        let offset = reader.read_u64_varint()?;
        let size = reader.read_u32_varint()?;
        Ok(Self { offset, size })
    }
}

/// A decoded, self-contained block: typed header plus decompressed payload
#[derive(Clone, Debug)]
pub struct Block {
    pub header: Header,
    pub data: Slice,
}

impl Block {
    /// Encodes a payload as a block, returning the number of bytes written.
    pub fn write_into<W: Write>(
        writer: &mut W,
        kind: BlockKind,
        payload: &[u8],
        compression: CompressionType,
    ) -> crate::Result<u32> {
        let stored = compression.compress(payload);

        // Compression that does not pay for itself is skipped
        let (stored, compression) = if stored.len() < payload.len() {
            (stored, compression)
        } else {
            (payload.to_vec(), CompressionType::None)
        };

        let header = Header {
            kind,
            compression,
            checksum: Checksum::of(&stored),

            #[allow(clippy::cast_possible_truncation)]
            data_length: stored.len() as u32,

            #[allow(clippy::cast_possible_truncation)]
            uncompressed_length: payload.len() as u32,
        };

        header.encode_into(writer)?;
        writer.write_all(&stored)?;

        #[allow(clippy::cast_possible_truncation)]
        Ok(Header::serialized_len() as u32 + header.data_length)
    }

    /// Loads and verifies a block from a backing source.
    pub fn load(source: &dyn Source, base: u64, handle: BlockHandle, kind: BlockKind) -> crate::Result<Self> {
        let bytes = source.read(base + handle.offset, handle.size as usize)?;
        Self::decode(&bytes, kind)
    }

    /// Decodes and verifies a block from its raw bytes.
    pub fn decode(bytes: &Slice, kind: BlockKind) -> crate::Result<Self> {
        let mut reader = &bytes[..];
        let header = Header::decode_from(&mut reader)?;

        if header.kind != kind {
            return Err(crate::Error::Corruption("block kind mismatch"));
        }

        let payload_start = Header::serialized_len();
        let payload_end = payload_start + header.data_length as usize;

        if bytes.len() < payload_end {
            return Err(crate::Error::Corruption("block is truncated"));
        }

        let payload = bytes.slice(payload_start..payload_end);

        Checksum::of(&payload).check(header.checksum)?;

        let data = match header.compression {
            CompressionType::None => payload,

            #[cfg(feature = "lz4")]
            CompressionType::Lz4 => Slice::from(
                header
                    .compression
                    .decompress(&payload, header.uncompressed_length as usize)?,
            ),
        };

        if data.len() != header.uncompressed_length as usize {
            return Err(crate::Error::Corruption("block length mismatch"));
        }

        Ok(Self { header, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn block_write_then_decode() -> crate::Result<()> {
        let payload = b"some block payload".repeat(10);

        let mut bytes = vec![];
        let written =
            Block::write_into(&mut bytes, BlockKind::Values, &payload, CompressionType::None)?;

        assert_eq!(written as usize, bytes.len());

        let block = Block::decode(&Slice::from(bytes), BlockKind::Values)?;
        assert_eq!(block.data, payload);

        Ok(())
    }

    #[test]
    fn block_detects_bit_flip() -> crate::Result<()> {
        let payload = b"some block payload";

        let mut bytes = vec![];
        Block::write_into(&mut bytes, BlockKind::Values, payload, CompressionType::None)?;

        let last = bytes.len() - 1;
        *bytes.get_mut(last).expect("block is non-empty") ^= 0b1000_0000;

        assert!(matches!(
            Block::decode(&Slice::from(bytes), BlockKind::Values),
            Err(crate::Error::ChecksumMismatch { .. }),
        ));

        Ok(())
    }

    #[test]
    fn block_rejects_wrong_kind() -> crate::Result<()> {
        let mut bytes = vec![];
        Block::write_into(&mut bytes, BlockKind::Values, b"abc", CompressionType::None)?;

        assert!(matches!(
            Block::decode(&Slice::from(bytes), BlockKind::Footer),
            Err(crate::Error::Corruption(_)),
        ));

        Ok(())
    }

    #[test]
    #[cfg(feature = "lz4")]
    fn block_compressed_roundtrip() -> crate::Result<()> {
        let payload = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".repeat(32);

        let mut bytes = vec![];
        Block::write_into(&mut bytes, BlockKind::Values, &payload, CompressionType::Lz4)?;

        assert!(bytes.len() < payload.len());

        let block = Block::decode(&Slice::from(bytes), BlockKind::Values)?;
        assert_eq!(block.data, payload);

        Ok(())
    }
}
