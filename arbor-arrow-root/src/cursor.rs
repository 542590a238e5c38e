//! Bounds-checked big-endian reads over a borrowed buffer.

use crate::error::CursorError;

/// Set on the leading word of a record that carries a byte count.
pub const BYTE_COUNT_MASK: u32 = 0x4000_0000;

/// Version and extent of a byte-counted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub version: i16,
    pub start: usize,
    /// Position one past the record, when the record carries a byte count.
    pub end: Option<usize>,
}

impl RecordHeader {
    /// Moves the cursor to the end of the record if its extent is known.
    pub fn finish(&self, cursor: &mut Cursor<'_>) -> Result<(), CursorError> {
        match self.end {
            Some(end) => cursor.seek(end),
            None => Ok(()),
        }
    }
}

macro_rules! read_be {
    ($($name:ident => $ty:ty),* $(,)?) => {
        $(
            pub fn $name(&mut self) -> Result<$ty, CursorError> {
                const WIDTH: usize = std::mem::size_of::<$ty>();
                let mut raw = [0u8; WIDTH];
                raw.copy_from_slice(self.bytes(WIDTH)?);
                Ok(<$ty>::from_be_bytes(raw))
            }
        )*
    };
}

#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
    origin: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self::with_origin(buf, 0)
    }

    /// `origin` is the displacement of `buf[0]` inside the record it was cut from. Objects
    /// stored under a key are addressed relative to the start of the key, so their
    /// payload cursors use the key length as origin.
    pub fn with_origin(buf: &'a [u8], origin: usize) -> Self {
        Self {
            buf,
            pos: 0,
            origin,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn displacement(&self) -> usize {
        self.pos + self.origin
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos == self.buf.len()
    }

    pub fn seek(&mut self, pos: usize) -> Result<(), CursorError> {
        if pos > self.buf.len() {
            return Err(CursorError::OutOfBounds {
                position: self.pos,
                wanted: pos.saturating_sub(self.pos),
                available: self.remaining(),
            });
        }
        self.pos = pos;
        Ok(())
    }

    pub fn skip(&mut self, n: usize) -> Result<(), CursorError> {
        self.bytes(n).map(|_| ())
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], CursorError> {
        if n > self.remaining() {
            return Err(CursorError::OutOfBounds {
                position: self.pos,
                wanted: n,
                available: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], CursorError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    read_be! {
        u8 => u8,
        i8 => i8,
        u16 => u16,
        i16 => i16,
        u32 => u32,
        i32 => i32,
        u64 => u64,
        i64 => i64,
        f32 => f32,
        f64 => f64,
    }

    pub fn bool(&mut self) -> Result<bool, CursorError> {
        Ok(self.u8()? != 0)
    }

    /// Reads a non-negative `i32` count, e.g. an array length.
    pub fn count(&mut self, what: &'static str) -> Result<usize, CursorError> {
        let position = self.pos;
        let value = self.i32()?;
        usize::try_from(value).map_err(|_| CursorError::Invalid {
            what,
            position,
            value: value as i64,
        })
    }

    /// Reads a 32-bit or 64-bit file offset.
    pub fn seek_pointer(&mut self, large: bool) -> Result<u64, CursorError> {
        let position = self.pos;
        let value = if large {
            self.i64()?
        } else {
            self.i32()? as i64
        };
        u64::try_from(value).map_err(|_| CursorError::Invalid {
            what: "file offset",
            position,
            value,
        })
    }

    /// A length-prefixed string: one length byte, or 255 followed by a 32-bit length.
    pub fn string_bytes(&mut self) -> Result<&'a [u8], CursorError> {
        let short = self.u8()?;
        let len = if short == 255 {
            self.u32()? as usize
        } else {
            short as usize
        };
        self.bytes(len)
    }

    pub fn string(&mut self) -> Result<String, CursorError> {
        Ok(String::from_utf8_lossy(self.string_bytes()?).into_owned())
    }

    /// A null-terminated string, as used for class names in object tags.
    pub fn cstring(&mut self) -> Result<String, CursorError> {
        let rest = &self.buf[self.pos..];
        let len = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or(CursorError::OutOfBounds {
                position: self.pos,
                wanted: rest.len() + 1,
                available: rest.len(),
            })?;
        let out = String::from_utf8_lossy(&rest[..len]).into_owned();
        self.pos += len + 1;
        Ok(out)
    }

    /// Reads a record header: an optional byte count followed by a 16-bit version.
    pub fn record(&mut self) -> Result<RecordHeader, CursorError> {
        let start = self.pos;
        // The flag sits in the first byte; without it only the version follows.
        let flagged = self
            .buf
            .get(start)
            .is_some_and(|b| (u32::from(*b) << 24) & BYTE_COUNT_MASK != 0);
        if flagged {
            let word = self.u32()?;
            let count = (word & !BYTE_COUNT_MASK) as usize;
            let end = start + 4 + count;
            if end > self.buf.len() {
                return Err(CursorError::OutOfBounds {
                    position: start,
                    wanted: 4 + count,
                    available: self.buf.len() - start,
                });
            }
            let version = self.i16()?;
            Ok(RecordHeader {
                version,
                start,
                end: Some(end),
            })
        } else {
            let version = self.i16()?;
            Ok(RecordHeader {
                version,
                start,
                end: None,
            })
        }
    }

    /// Skips a whole byte-counted record.
    pub fn skip_record(&mut self, what: &'static str) -> Result<RecordHeader, CursorError> {
        let header = self.record()?;
        match header.end {
            Some(end) => {
                self.seek(end)?;
                Ok(header)
            }
            None => Err(CursorError::Invalid {
                what,
                position: header.start,
                value: header.version as i64,
            }),
        }
    }
}
