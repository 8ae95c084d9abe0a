// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{checksum::Checksum, Slice};

/// Represents errors that can occur in the storage core
#[derive(Debug)]
pub enum Error {
    /// I/O error
    ///
    /// Transient kinds (file not found, interrupted, closed handles) surface
    /// here as well; retry policy belongs to the caller.
    Io(std::io::Error),

    /// A block or file prelude did not start with the expected bytes
    InvalidHeader(&'static str),

    /// An enum tag on disk was unknown (type name, raw tag)
    InvalidTag((&'static str, u8)),

    /// Invalid checksum value (got, expected)
    ChecksumMismatch {
        /// Checksum computed over the read bytes
        got: Checksum,

        /// Checksum stored next to the data
        expected: Checksum,
    },

    /// A decoded structure was internally inconsistent
    ///
    /// Fatal for the affected segment; repair belongs to an external tool.
    Corruption(&'static str),

    /// A `Function` key-value referenced a function id that is not registered
    ///
    /// Fatal for the current read or compaction.
    FunctionNotFound(Slice),

    /// The underlying device wrote fewer bytes than requested
    ShortWrite {
        /// Number of bytes actually written
        written: usize,

        /// Number of bytes that should have been written
        expected: usize,
    },

    /// Some required segment could not be loaded
    Unrecoverable,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageError: {self:?}")
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Storage core result
pub type Result<T> = std::result::Result<T, Error>;
