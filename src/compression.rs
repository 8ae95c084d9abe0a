// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// Compression algorithm to use for block payloads
///
/// Identified by a 1-byte id in the block header.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[allow(clippy::module_name_repetitions)]
pub enum CompressionType {
    /// No compression
    None,

    /// LZ4 compression
    ///
    /// Recommended for use cases with a focus
    /// on speed over compression ratio.
    #[cfg(feature = "lz4")]
    Lz4,
}

impl From<CompressionType> for u8 {
    fn from(value: CompressionType) -> Self {
        match value {
            CompressionType::None => 0,

            #[cfg(feature = "lz4")]
            CompressionType::Lz4 => 1,
        }
    }
}

impl TryFrom<u8> for CompressionType {
    type Error = crate::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),

            #[cfg(feature = "lz4")]
            1 => Ok(Self::Lz4),

            tag => Err(crate::Error::InvalidTag(("CompressionType", tag))),
        }
    }
}

impl CompressionType {
    /// Compresses a payload.
    pub fn compress(self, bytes: &[u8]) -> Vec<u8> {
        match self {
            Self::None => bytes.to_vec(),

            #[cfg(feature = "lz4")]
            Self::Lz4 => lz4_flex::compress(bytes),
        }
    }

    /// Decompresses a payload into `uncompressed_len` bytes.
    pub fn decompress(self, bytes: &[u8], uncompressed_len: usize) -> crate::Result<Vec<u8>> {
        match self {
            Self::None => Ok(bytes.to_vec()),

            #[cfg(feature = "lz4")]
            Self::Lz4 => lz4_flex::decompress(bytes, uncompressed_len)
                .map_err(|_| crate::Error::Corruption("lz4 payload did not decompress")),
        }
    }
}

impl std::fmt::Display for CompressionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::None => "no compression",

                #[cfg(feature = "lz4")]
                Self::Lz4 => "lz4",
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn compression_tag_roundtrip() -> crate::Result<()> {
        assert_eq!(
            CompressionType::None,
            CompressionType::try_from(u8::from(CompressionType::None))?,
        );

        #[cfg(feature = "lz4")]
        assert_eq!(
            CompressionType::Lz4,
            CompressionType::try_from(u8::from(CompressionType::Lz4))?,
        );

        Ok(())
    }

    #[test]
    #[cfg(feature = "lz4")]
    fn compression_lz4_roundtrip() -> crate::Result<()> {
        let payload = b"abcabcabcabcabcabcabcabc".repeat(50);
        let compressed = CompressionType::Lz4.compress(&payload);
        assert!(compressed.len() < payload.len());

        let back = CompressionType::Lz4.decompress(&compressed, payload.len())?;
        assert_eq!(payload, &*back);

        Ok(())
    }
}
