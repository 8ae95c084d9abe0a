// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{decode_slice, encode_slice, Decode, Encode},
    Slice,
};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// The upper bound of a segment's key range
///
/// A segment that ends in a fixed key-value has an inclusive max key; one that
/// ends in a range key-value has an exclusive max key (the range's `to_key`).
/// The distinction matters when deciding whether an assignable spreads onto
/// the next target segment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MaxKey {
    /// Inclusive upper bound (last entry is a fixed key-value)
    Fixed(Slice),

    /// Exclusive upper bound (last entry is a range key-value)
    Range(Slice),
}

impl MaxKey {
    /// The raw bound key.
    #[must_use]
    pub fn key(&self) -> &Slice {
        match self {
            Self::Fixed(key) | Self::Range(key) => key,
        }
    }

    /// Returns `true` if `key` is at or below this upper bound.
    #[must_use]
    pub fn covers(&self, key: &[u8]) -> bool {
        match self {
            Self::Fixed(max) => key <= &**max,
            Self::Range(to) => key < &**to,
        }
    }

    /// Returns `true` if a segment bounded by `self` reaches into a segment
    /// starting at `next_min_key`.
    #[must_use]
    pub fn spreads_onto(&self, next_min_key: &[u8]) -> bool {
        match self {
            Self::Fixed(max) => &**max >= next_min_key,
            Self::Range(to) => &**to > next_min_key,
        }
    }
}

impl Encode for MaxKey {
    fn encode_into<W: Write>(&self, writer: &mut W) -> crate::Result<()> {
        match self {
            Self::Fixed(key) => {
                writer.write_u8(0)?;
                encode_slice(writer, key)
            }
            Self::Range(key) => {
                writer.write_u8(1)?;
                encode_slice(writer, key)
            }
        }
    }
}

impl Decode for MaxKey {
    fn decode_from<R: Read>(reader: &mut R) -> crate::Result<Self> {
        let tag = reader.read_u8()?;
        let key = decode_slice(reader)?;

        match tag {
            0 => Ok(Self::Fixed(key)),
            1 => Ok(Self::Range(key)),
            tag => Err(crate::Error::InvalidTag(("MaxKey", tag))),
        }
    }
}

/// A segment's key range: inclusive min key plus a [`MaxKey`] upper bound
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyRange {
    min_key: Slice,
    max_key: MaxKey,
}

impl std::fmt::Display for KeyRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}<=>{}{}",
            String::from_utf8_lossy(&self.min_key),
            String::from_utf8_lossy(self.max_key.key()),
            match self.max_key {
                MaxKey::Fixed(_) => "]",
                MaxKey::Range(_) => ")",
            },
        )
    }
}

impl KeyRange {
    /// Creates a new key range.
    #[must_use]
    pub fn new(min_key: Slice, max_key: MaxKey) -> Self {
        Self { min_key, max_key }
    }

    /// Returns the lower bound.
    #[must_use]
    pub fn min_key(&self) -> &Slice {
        &self.min_key
    }

    /// Returns the upper bound.
    #[must_use]
    pub fn max_key(&self) -> &MaxKey {
        &self.max_key
    }

    /// Returns `true` if the key falls within this key range.
    #[must_use]
    pub fn contains_key(&self, key: &[u8]) -> bool {
        key >= &*self.min_key && self.max_key.covers(key)
    }

    /// Returns `true` if the `other` overlaps at least partially with this range.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.max_key.spreads_onto(other.min_key()) && other.max_key.spreads_onto(self.min_key())
    }
}

impl Encode for KeyRange {
    fn encode_into<W: Write>(&self, writer: &mut W) -> crate::Result<()> {
        encode_slice(writer, &self.min_key)?;
        self.max_key.encode_into(writer)
    }
}

impl Decode for KeyRange {
    fn decode_from<R: Read>(reader: &mut R) -> crate::Result<Self> {
        let min_key = decode_slice(reader)?;
        let max_key = MaxKey::decode_from(reader)?;
        Ok(Self { min_key, max_key })
    }
}
