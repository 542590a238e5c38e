//! Byte sources backing an opened file.
//!
//! Every read is positioned (`offset`, `len`) and returns an owned [`Bytes`] slice, so
//! concurrent decodes never share a read position.

use std::{fs::File, path::Path};

use bytes::Bytes;

use crate::error::SourceError;

pub trait ReadAt: Send + Sync + std::fmt::Debug {
    /// Total number of bytes available.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads exactly `len` bytes starting at `offset`.
    fn read_at(&self, offset: u64, len: usize) -> Result<Bytes, SourceError>;
}

impl ReadAt for Bytes {
    fn len(&self) -> u64 {
        Bytes::len(self) as u64
    }

    fn read_at(&self, offset: u64, len: usize) -> Result<Bytes, SourceError> {
        let out_of_bounds = || SourceError::OutOfBounds {
            offset,
            len: len as u64,
            source_len: Bytes::len(self) as u64,
        };
        let start = usize::try_from(offset).map_err(|_| out_of_bounds())?;
        let end = start.checked_add(len).ok_or_else(out_of_bounds)?;
        if end > Bytes::len(self) {
            return Err(out_of_bounds());
        }
        Ok(self.slice(start..end))
    }
}

/// A read-only memory map of a file on disk.
#[derive(Debug, Clone)]
pub struct MmapSource {
    bytes: Bytes,
}

impl MmapSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SourceError> {
        let file = File::open(path.as_ref())?;
        if file.metadata()?.len() == 0 {
            // Mapping an empty file fails on some platforms.
            return Ok(Self {
                bytes: Bytes::new(),
            });
        }
        // SAFETY: the map is read-only; files are treated as immutable while open.
        let map = unsafe { memmap2::Mmap::map(&file)? };
        Ok(Self {
            bytes: Bytes::from_owner(map),
        })
    }
}

impl ReadAt for MmapSource {
    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_at(&self, offset: u64, len: usize) -> Result<Bytes, SourceError> {
        ReadAt::read_at(&self.bytes, offset, len)
    }
}
