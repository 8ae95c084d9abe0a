// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::Slice;
use std::{io::Write, path::Path, sync::Arc};

/// Random-access byte source backing a segment
///
/// Abstracts the file I/O collaborator so the block readers run unchanged
/// over a real file, a memory map, or an in-memory buffer.
pub trait Source: Send + Sync {
    /// Reads exactly `len` bytes at `offset`.
    fn read(&self, offset: u64, len: usize) -> crate::Result<Slice>;

    /// Total length in bytes.
    fn size(&self) -> u64;
}

impl Source for Slice {
    fn read(&self, offset: u64, len: usize) -> crate::Result<Slice> {
        let offset = usize::try_from(offset).map_err(|_| crate::Error::Unrecoverable)?;
        let end = offset + len;

        if end > self.as_ref().len() {
            return Err(crate::Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("read of {len} B at {offset} exceeds buffer"),
            )));
        }

        Ok(self.slice(offset..end))
    }

    fn size(&self) -> u64 {
        self.as_ref().len() as u64
    }
}

impl Source for std::fs::File {
    fn read(&self, offset: u64, len: usize) -> crate::Result<Slice> {
        let mut buf = vec![0; len];

        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.read_exact_at(&mut buf, offset)?;
        }

        #[cfg(windows)]
        {
            use std::os::windows::fs::FileExt;

            let mut read = 0;

            while read < len {
                #[allow(clippy::indexing_slicing)]
                let n = self.seek_read(&mut buf[read..], offset + read as u64)?;

                if n == 0 {
                    return Err(crate::Error::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("read of {len} B at {offset} hit EOF"),
                    )));
                }

                read += n;
            }
        }

        Ok(buf.into())
    }

    fn size(&self) -> u64 {
        self.metadata().map(|m| m.len()).unwrap_or_default()
    }
}

/// Atomically persists `content` at `path`: write to a temp file, fsync,
/// rename into place.
pub fn persist_atomic(path: &Path, content: &[u8]) -> crate::Result<()> {
    #[allow(clippy::expect_used)]
    let folder = path.parent().expect("file path should have a parent");

    let mut temp_file = tempfile::NamedTempFile::new_in(folder)?;
    temp_file.write_all(content)?;
    temp_file.flush()?;
    temp_file.as_file_mut().sync_all()?;

    let written = temp_file.as_file().metadata()?.len();
    if written != content.len() as u64 {
        return Err(crate::Error::ShortWrite {
            written: usize::try_from(written).unwrap_or_default(),
            expected: content.len(),
        });
    }

    temp_file
        .persist(path)
        .map_err(|e| crate::Error::Io(e.error))?;

    log::trace!("Persisted {} B at {path:?}", content.len());

    Ok(())
}

/// Shared handle to a segment's backing source.
pub type SharedSource = Arc<dyn Source>;
