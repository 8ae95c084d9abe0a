// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Hash index block
//!
//! An open-addressed byte table mapping key hashes to sorted-index offsets,
//! probed by double hashing over the two halves of the key's Murmur3 hash.
//!
//! Two slot formats exist: `Reference` stores just the offset (cheap, but the
//! referenced entry must be decodable standalone), `CopyKey` copies the full
//! key next to the offset plus a per-entry CRC so a hit can be verified
//! in-place even against a prefix-compressed sorted index.
//!
//! Slots are variable-length and byte-addressed; a zero marker byte precedes
//! every entry and free space is all-zero, so a writer claims a slot only if
//! the entry plus one trailing sentinel byte finds nothing but zeroes. Readers
//! re-derive the probe sequence and treat unparsable or mismatching slots as
//! collisions.

use crate::{checksum::Checksum, hash::KeyHash, Slice};
use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use std::io::Write;
use varint_rs::{VarintReader, VarintWriter};

/// Slot layout of a hash index
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Format {
    /// `[marker][varint sorted-index offset + 1]`
    Reference,

    /// `[marker][u32 crc][varint key len][key][varint sorted-index offset + 1]`
    CopyKey,
}

impl From<Format> for u8 {
    fn from(value: Format) -> Self {
        match value {
            Format::Reference => 0,
            Format::CopyKey => 1,
        }
    }
}

impl TryFrom<u8> for Format {
    type Error = crate::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Reference),
            1 => Ok(Self::CopyKey),
            tag => Err(crate::Error::InvalidTag(("HashIndexFormat", tag))),
        }
    }
}

/// Build-time configuration
#[derive(Clone)]
pub struct Config {
    pub format: Format,

    /// Probes attempted per key before giving up
    pub max_probe: usize,

    /// Indexes that land fewer hits than this are discarded
    pub minimum_hits: usize,

    /// Table bytes allocated per key
    pub size_per_key_multiplier: usize,

    /// Optional user override for the total table size.
    ///
    /// Receives `(item count, default size)`; returning `None` is treated as
    /// a configuration bug, logged, and falls back to the default sizing.
    #[allow(clippy::type_complexity)]
    pub allocate_space: Option<std::sync::Arc<dyn Fn(usize, usize) -> Option<usize> + Send + Sync>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            format: Format::Reference,
            max_probe: 2,
            minimum_hits: 2,
            size_per_key_multiplier: 2,
            allocate_space: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("format", &self.format)
            .field("max_probe", &self.max_probe)
            .field("minimum_hits", &self.minimum_hits)
            .field("size_per_key_multiplier", &self.size_per_key_multiplier)
            .field("allocate_space", &self.allocate_space.is_some())
            .finish()
    }
}

fn slot_payload(format: Format, key: &Slice, offset: u32) -> Vec<u8> {
    let mut payload = vec![0u8]; // marker

    match format {
        Format::Reference => {
            #[allow(clippy::expect_used)]
            payload
                .write_u64_varint(u64::from(offset) + 1)
                .expect("vec write cannot fail");
        }
        Format::CopyKey => {
            let crc = slot_crc(key, offset);

            #[allow(clippy::expect_used)]
            {
                payload
                    .write_u32::<LE>(crc)
                    .expect("vec write cannot fail");
                payload
                    .write_u32_varint(key.len() as u32)
                    .expect("vec write cannot fail");
                payload
                    .write_all(key)
                    .expect("vec write cannot fail");
                payload
                    .write_u64_varint(u64::from(offset) + 1)
                    .expect("vec write cannot fail");
            }
        }
    }

    payload
}

fn slot_crc(key: &Slice, offset: u32) -> u32 {
    let mut bytes = key.to_vec();
    bytes.extend_from_slice(&(u64::from(offset) + 1).to_le_bytes());
    Checksum::of(&bytes).into_u32()
}

/// Builds a hash index payload
///
/// Entries are buffered until [`Builder::build`], when all sorted-index
/// offsets and the largest slot size are known.
pub struct Builder {
    entries: Vec<(Slice, u32)>,
}

impl Builder {
    #[must_use]
    pub fn new() -> Self {
        Self { entries: vec![] }
    }

    /// Registers a key at its sorted-index offset.
    pub fn insert(&mut self, key: Slice, offset: u32) {
        self.entries.push((key, offset));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Probes all buffered entries into a table and encodes the payload.
    ///
    /// Returns `None` if the index did not reach `minimum_hits` and should
    /// not be written.
    #[must_use]
    pub fn build(self, config: &Config) -> Option<Vec<u8>> {
        if self.entries.is_empty() {
            return None;
        }

        let largest_slot = self
            .entries
            .iter()
            .map(|(key, offset)| slot_payload(config.format, key, *offset).len())
            .max()?;

        let default_size =
            self.entries.len() * config.size_per_key_multiplier.max(1) * (largest_slot + 1);

        let allocated = match &config.allocate_space {
            Some(allocate) => allocate(self.entries.len(), default_size).unwrap_or_else(|| {
                log::warn!(
                    "hash index allocator failed for {} items, falling back to {default_size} B",
                    self.entries.len(),
                );
                default_size
            }),
            None => default_size,
        };

        if allocated <= largest_slot + 1 {
            return None;
        }

        let mut table = vec![0u8; allocated];
        let probe_space = (allocated - largest_slot - 1) as u64;

        let mut hit = 0u64;
        let mut miss = 0u64;
        let mut minimum_crc = u64::MAX;

        for (key, offset) in &self.entries {
            let payload = slot_payload(config.format, key, *offset);
            let hash = KeyHash::of(key);

            let mut placed = false;

            for probe in 0..config.max_probe {
                let pos = hash
                    .h1
                    .wrapping_add((probe as u64).wrapping_mul(hash.h2))
                    % probe_space;
                let pos = pos as usize;

                #[allow(clippy::indexing_slicing)]
                let window = &mut table[pos..pos + payload.len() + 1];

                // The trailing sentinel keeps the next entry from clobbering
                // this slot's tail
                if window.iter().all(|byte| *byte == 0) {
                    #[allow(clippy::indexing_slicing)]
                    window[..payload.len()].copy_from_slice(&payload);

                    if config.format == Format::CopyKey {
                        minimum_crc = minimum_crc.min(u64::from(slot_crc(key, *offset)));
                    }

                    hit += 1;
                    placed = true;
                    break;
                }
            }

            if !placed {
                miss += 1;
            }
        }

        if hit < config.minimum_hits as u64 {
            log::warn!(
                "discarding hash index: {hit} hits below minimum of {}",
                config.minimum_hits,
            );
            return None;
        }

        let mut payload = vec![];

        #[allow(clippy::expect_used)]
        {
            payload
                .write_u64_varint(config.max_probe as u64)
                .expect("vec write cannot fail");
            payload.write_u64_varint(hit).expect("vec write cannot fail");
            payload.write_u64_varint(miss).expect("vec write cannot fail");
            payload
                .write_u64_varint(if minimum_crc == u64::MAX { 0 } else { minimum_crc })
                .expect("vec write cannot fail");
            payload
                .write_u64_varint(largest_slot as u64)
                .expect("vec write cannot fail");
            payload
                .write_u8(config.format.into())
                .expect("vec write cannot fail");
            payload
                .write_u64_varint(allocated as u64)
                .expect("vec write cannot fail");
            payload.extend(table);
        }

        Some(payload)
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

/// A probe result awaiting verification against the sorted index
#[derive(Clone, Debug)]
pub enum Candidate {
    /// Offset must be resolved and its key compared
    Reference { offset: u32 },

    /// Key already verified in-place; offset is authoritative
    CopyKey { key: Slice, offset: u32 },
}

/// Reads a hash index payload
pub struct Reader {
    table: Slice,
    format: Format,
    max_probe: usize,
    hit: u64,
    miss: u64,
    minimum_crc: u64,
    largest_slot: usize,
}

impl Reader {
    pub fn new(data: &Slice) -> crate::Result<Self> {
        let mut reader = &data[..];

        let max_probe = usize::try_from(reader.read_u64_varint()?)
            .map_err(|_| crate::Error::Corruption("hash index max probe overflow"))?;
        let hit = reader.read_u64_varint()?;
        let miss = reader.read_u64_varint()?;
        let minimum_crc = reader.read_u64_varint()?;
        let largest_slot = usize::try_from(reader.read_u64_varint()?)
            .map_err(|_| crate::Error::Corruption("hash index slot size overflow"))?;
        let format = Format::try_from(reader.read_u8()?)?;
        let allocated = usize::try_from(reader.read_u64_varint()?)
            .map_err(|_| crate::Error::Corruption("hash index size overflow"))?;

        let table_start = data.len() - reader.len();

        if table_start + allocated != data.len() || allocated <= largest_slot + 1 {
            return Err(crate::Error::Corruption("hash index table size mismatch"));
        }

        Ok(Self {
            table: data.slice(table_start..),
            format,
            max_probe,
            hit,
            miss,
            minimum_crc,
            largest_slot,
        })
    }

    /// A perfect index never lost a key to probing, so a lookup miss proves
    /// absence (as long as the segment has no ranges and the sorted index is
    /// not prefix-compressed).
    #[must_use]
    pub fn is_perfect(&self) -> bool {
        self.miss == 0
    }

    #[must_use]
    pub fn hit_count(&self) -> u64 {
        self.hit
    }

    #[must_use]
    pub fn miss_count(&self) -> u64 {
        self.miss
    }

    /// Walks the probe sequence for `key`, yielding verifiable candidates.
    #[must_use]
    pub fn candidates(&self, key: &Slice) -> Vec<Candidate> {
        let hash = KeyHash::of(key);
        let probe_space = (self.table.len() - self.largest_slot - 1) as u64;

        let mut candidates = vec![];

        for probe in 0..self.max_probe {
            let pos = hash
                .h1
                .wrapping_add((probe as u64).wrapping_mul(hash.h2))
                % probe_space;
            let pos = pos as usize;

            #[allow(clippy::indexing_slicing)]
            let mut slot = &self.table[pos..];

            // Marker byte; a non-zero first byte means we landed in the
            // middle of some other entry
            match slot.first() {
                Some(0) => {}
                _ => continue,
            }

            #[allow(clippy::indexing_slicing)]
            {
                slot = &slot[1..];
            }

            match self.format {
                Format::Reference => {
                    let Ok(offset_plus_one) = slot.read_u64_varint() else {
                        continue;
                    };

                    let Some(offset) = offset_plus_one.checked_sub(1) else {
                        // Empty (or zero-overlapped) slot; the key may still
                        // sit at a later probe position
                        continue;
                    };

                    let Ok(offset) = u32::try_from(offset) else {
                        continue;
                    };

                    candidates.push(Candidate::Reference { offset });
                }
                Format::CopyKey => {
                    let Ok(crc) = slot.read_u32::<LE>() else {
                        continue;
                    };

                    let Ok(key_len) = slot.read_u32_varint() else {
                        continue;
                    };

                    let key_len = key_len as usize;

                    if key_len != key.len() || slot.len() < key_len {
                        continue;
                    }

                    #[allow(clippy::indexing_slicing)]
                    let stored_key = &slot[..key_len];

                    if stored_key != &**key {
                        continue;
                    }

                    #[allow(clippy::indexing_slicing)]
                    {
                        slot = &slot[key_len..];
                    }

                    let Ok(offset_plus_one) = slot.read_u64_varint() else {
                        continue;
                    };

                    let Some(offset) = offset_plus_one.checked_sub(1) else {
                        continue;
                    };

                    let Ok(offset) = u32::try_from(offset) else {
                        continue;
                    };

                    if u64::from(slot_crc(key, offset)) < self.minimum_crc
                        || slot_crc(key, offset) != crc
                    {
                        continue;
                    }

                    candidates.push(Candidate::CopyKey {
                        key: key.clone(),
                        offset,
                    });
                }
            }
        }

        candidates
    }
}
