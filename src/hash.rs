// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Murmur3-x64-128 key hashing
//!
//! The hash index and bloom filter derive their probe sequences from the two
//! 64-bit halves of this hash, so the algorithm is part of the on-disk format
//! and cannot be swapped freely.

const C1: u64 = 0x87c3_7b91_1142_53d5;
const C2: u64 = 0x4cf5_ab62_694b_12e5;

/// A 128-bit key hash, split into the two halves used for double hashing.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct KeyHash {
    pub h1: u64,
    pub h2: u64,
}

impl KeyHash {
    /// Hashes a key with seed 0.
    #[must_use]
    pub fn of(key: &[u8]) -> Self {
        murmur3_x64_128(key, 0)
    }
}

#[inline]
const fn fmix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    k ^= k >> 33;
    k
}

#[inline]
fn read_u64_le(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

#[inline]
fn mix_k1(mut k1: u64) -> u64 {
    k1 = k1.wrapping_mul(C1);
    k1 = k1.rotate_left(31);
    k1.wrapping_mul(C2)
}

#[inline]
fn mix_k2(mut k2: u64) -> u64 {
    k2 = k2.wrapping_mul(C2);
    k2 = k2.rotate_left(33);
    k2.wrapping_mul(C1)
}

/// Computes the Murmur3-x64-128 hash of a byte slice.
#[must_use]
pub fn murmur3_x64_128(data: &[u8], seed: u64) -> KeyHash {
    let mut h1 = seed;
    let mut h2 = seed;

    let mut chunks = data.chunks_exact(16);

    for block in chunks.by_ref() {
        #[allow(clippy::indexing_slicing)]
        let k1 = read_u64_le(&block[..8]);

        #[allow(clippy::indexing_slicing)]
        let k2 = read_u64_le(&block[8..]);

        h1 ^= mix_k1(k1);
        h1 = h1.rotate_left(27);
        h1 = h1.wrapping_add(h2);
        h1 = h1.wrapping_mul(5).wrapping_add(0x52dc_e729);

        h2 ^= mix_k2(k2);
        h2 = h2.rotate_left(31);
        h2 = h2.wrapping_add(h1);
        h2 = h2.wrapping_mul(5).wrapping_add(0x3849_5ab5);
    }

    let tail = chunks.remainder();

    if !tail.is_empty() {
        let mut k1 = 0u64;
        let mut k2 = 0u64;

        for (i, byte) in tail.iter().enumerate().take(16) {
            if i < 8 {
                k1 |= u64::from(*byte) << (8 * i);
            } else {
                k2 |= u64::from(*byte) << (8 * (i - 8));
            }
        }

        if tail.len() > 8 {
            h2 ^= mix_k2(k2);
        }
        h1 ^= mix_k1(k1);
    }

    let len = data.len() as u64;
    h1 ^= len;
    h2 ^= len;

    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);

    h1 = fmix64(h1);
    h2 = fmix64(h2);

    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);

    KeyHash { h1, h2 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    // Reference vectors computed with the canonical C++ MurmurHash3_x64_128
    #[test]
    fn murmur3_reference_vectors() {
        let h = murmur3_x64_128(b"", 0);
        assert_eq!(0, h.h1);
        assert_eq!(0, h.h2);

        let h = murmur3_x64_128(b"hello", 0);
        assert_eq!(0xcbd8_a7b3_41bd_9b02, h.h1);
        assert_eq!(0x5b1e_906a_48ae_1d19, h.h2);

        let h = murmur3_x64_128(b"hello, world", 0);
        assert_eq!(0x342f_ac62_3a5e_bc8e, h.h1);
        assert_eq!(0x4cda_fd63_3e47_5a6a, h.h2);

        let h = murmur3_x64_128(b"The quick brown fox jumps over the lazy dog", 0);
        assert_eq!(0xe34b_bc7b_bc07_1b6c, h.h1);
        assert_eq!(0x7a43_3ca9_c49a_9347, h.h2);
    }

    #[test]
    fn murmur3_is_deterministic() {
        let a = KeyHash::of(b"some key");
        let b = KeyHash::of(b"some key");
        assert_eq!(a, b);

        let c = KeyHash::of(b"some other key");
        assert_ne!(a, c);
    }
}
