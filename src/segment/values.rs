// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Values block
//!
//! Raw concatenated value payloads, addressed by the `(offset, len)`
//! references recorded in sorted-index entries. Absent when values are
//! inlined into the sorted index.

/// Accumulates value payloads during a segment write
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value, returning its `(offset, len)` reference.
    #[must_use]
    pub fn add(&mut self, value: &[u8]) -> (u32, u32) {
        #[allow(clippy::cast_possible_truncation)]
        let offset = self.buf.len() as u32;

        self.buf.extend_from_slice(value);

        #[allow(clippy::cast_possible_truncation)]
        (offset, value.len() as u32)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Accumulated payload size.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.buf.len()
    }

    /// The accumulated payload; the block body is the raw bytes themselves.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}
