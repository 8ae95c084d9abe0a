// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::Slice;
use std::io::{Read, Write};
use varint_rs::{VarintReader, VarintWriter};

/// Trait to serialize stuff
pub trait Encode {
    /// Serializes into writer.
    fn encode_into<W: Write>(&self, writer: &mut W) -> crate::Result<()>;

    /// Serializes into vector.
    fn encode_into_vec(&self) -> Vec<u8> {
        let mut v = vec![];
        self.encode_into(&mut v).expect("cannot fail");
        v
    }
}

/// Trait to deserialize stuff
pub trait Decode {
    /// Deserializes from reader.
    fn decode_from<R: Read>(reader: &mut R) -> crate::Result<Self>
    where
        Self: Sized;
}

/// Writes a length-prefixed byte sequence.
pub fn encode_slice<W: Write>(writer: &mut W, bytes: &[u8]) -> crate::Result<()> {
    // NOTE: Keys and values are limited to 32-bit length
    #[allow(clippy::cast_possible_truncation)]
    writer.write_u32_varint(bytes.len() as u32)?;
    writer.write_all(bytes)?;
    Ok(())
}

/// Reads a length-prefixed byte sequence.
pub fn decode_slice<R: Read>(reader: &mut R) -> crate::Result<Slice> {
    let len = reader.read_u32_varint()? as usize;
    Ok(Slice::from_reader(reader, len)?)
}
