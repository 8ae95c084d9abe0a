// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Bloom filter block
//!
//! A standard k-hash bit array sized from the expected key count and a target
//! false-positive rate. Instead of k independent hash functions, the probe
//! bits derive from the two halves of the key's Murmur3 hash via double
//! hashing.

use crate::{hash::KeyHash, Slice};
use varint_rs::{VarintReader, VarintWriter};

const BIT_MASK: [u8; 8] = [1, 2, 4, 8, 16, 32, 64, 128];

fn enable_bit(bytes: &mut [u8], idx: usize) {
    let byte_idx = idx / 8;
    let bit_idx = idx % 8;

    if let Some(byte) = bytes.get_mut(byte_idx) {
        #[allow(clippy::indexing_slicing)]
        {
            *byte |= BIT_MASK[bit_idx];
        }
    }
}

fn get_bit(bytes: &[u8], idx: usize) -> bool {
    let byte_idx = idx / 8;
    let bit_idx = idx % 8;

    #[allow(clippy::indexing_slicing)]
    bytes
        .get(byte_idx)
        .is_some_and(|byte| byte & BIT_MASK[bit_idx] != 0)
}

/// Builds a bloom filter payload
pub struct Builder {
    bits: Vec<u8>,

    /// Bit count
    m: usize,

    /// Number of hash probes
    k: usize,
}

impl Builder {
    /// Sizes the filter for `n` keys at the given false-positive rate.
    #[must_use]
    pub fn with_fp_rate(n: usize, fp_rate: f32) -> Self {
        assert!(
            fp_rate > 0.0 && fp_rate < 1.0,
            "false-positive rate must be in (0, 1)",
        );

        let n = n.max(1);

        // Standard bloom filter sizing
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let m = ((-(n as f32) * fp_rate.ln()) / std::f32::consts::LN_2.powi(2)).ceil() as usize;

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let k = (((m as f32) / (n as f32)) * std::f32::consts::LN_2).ceil() as usize;

        let m = m.max(8);

        Self {
            bits: vec![0; m.div_ceil(8)],
            m,
            k: k.max(1),
        }
    }

    /// Adds a key.
    pub fn set(&mut self, key: &[u8]) {
        let hash = KeyHash::of(key);
        let mut h1 = hash.h1;
        let h2 = hash.h2;

        for _ in 0..self.k {
            enable_bit(&mut self.bits, (h1 % self.m as u64) as usize);
            h1 = h1.wrapping_add(h2);
        }
    }

    /// Encodes the payload.
    pub fn build(self) -> crate::Result<Vec<u8>> {
        let mut payload = vec![];

        #[allow(clippy::cast_possible_truncation)]
        {
            payload.write_u64_varint(self.m as u64)?;
            payload.write_u64_varint(self.k as u64)?;
        }

        payload.extend(self.bits);

        Ok(payload)
    }
}

/// Reads a bloom filter payload
pub struct Reader {
    bits: Slice,
    m: usize,
    k: usize,
}

impl Reader {
    pub fn new(data: &Slice) -> crate::Result<Self> {
        let mut reader = &data[..];

        let m = usize::try_from(reader.read_u64_varint()?)
            .map_err(|_| crate::Error::Corruption("bloom filter bit count overflow"))?;
        let k = usize::try_from(reader.read_u64_varint()?)
            .map_err(|_| crate::Error::Corruption("bloom filter probe count overflow"))?;

        let bits_start = data.len() - reader.len();

        if data.len() - bits_start < m.div_ceil(8) {
            return Err(crate::Error::Corruption("bloom filter is truncated"));
        }

        Ok(Self {
            bits: data.slice(bits_start..),
            m,
            k,
        })
    }

    /// Returns `true` if the key may be contained.
    ///
    /// Will never have a false negative.
    #[must_use]
    pub fn might_contain(&self, key: &[u8]) -> bool {
        let hash = KeyHash::of(key);
        let mut h1 = hash.h1;
        let h2 = hash.h2;

        for _ in 0..self.k {
            if !get_bit(&self.bits, (h1 % self.m as u64) as usize) {
                return false;
            }

            h1 = h1.wrapping_add(h2);
        }

        true
    }
}
