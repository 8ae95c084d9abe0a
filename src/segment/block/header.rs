// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    checksum::Checksum,
    coding::{Decode, Encode},
    segment::block::BlockKind,
    CompressionType,
};
use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use std::io::{Read, Write};

/// Header of an encoded block
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Header {
    pub kind: BlockKind,

    /// Compression applied to the payload
    pub compression: CompressionType,

    /// Checksum over the stored (possibly compressed) payload
    pub checksum: Checksum,

    /// On-disk size of the payload
    pub data_length: u32,

    /// Size of the payload after decompression
    pub uncompressed_length: u32,
}

impl Header {
    #[must_use]
    pub const fn serialized_len() -> usize {
        // Block kind
        std::mem::size_of::<u8>()
            // Compression id
            + std::mem::size_of::<u8>()
            // On-disk payload size
            + std::mem::size_of::<u32>()
            // Uncompressed payload size
            + std::mem::size_of::<u32>()
            // Payload checksum
            + std::mem::size_of::<u64>()
    }
}

impl Encode for Header {
    fn encode_into<W: Write>(&self, writer: &mut W) -> crate::Result<()> {
        writer.write_u8(self.kind.into())?;
        writer.write_u8(self.compression.into())?;
        writer.write_u32::<LE>(self.data_length)?;
        writer.write_u32::<LE>(self.uncompressed_length)?;
        writer.write_u64::<LE>(self.checksum.into_u64())?;
        Ok(())
    }
}

impl Decode for Header {
    fn decode_from<R: Read>(reader: &mut R) -> crate::Result<Self> {
        let kind = BlockKind::try_from(reader.read_u8()?)?;
        let compression = CompressionType::try_from(reader.read_u8()?)?;
        let data_length = reader.read_u32::<LE>()?;
        let uncompressed_length = reader.read_u32::<LE>()?;
        let checksum = Checksum::from_raw(reader.read_u64::<LE>()?);

        Ok(Self {
            kind,
            compression,
            checksum,
            data_length,
            uncompressed_length,
        })
    }
}
