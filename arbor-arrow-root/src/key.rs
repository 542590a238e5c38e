use crate::{cursor::Cursor, error::CursorError};

/// Key versions above this use 64-bit seek pointers.
pub const LARGE_KEY_VERSION: i16 = 1000;

/// The header written in front of every stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyHeader {
    /// Size of the key plus the (possibly compressed) payload.
    pub nbytes: u32,
    pub version: i16,
    /// Uncompressed payload size.
    pub objlen: u32,
    pub datime: u32,
    pub keylen: u16,
    pub cycle: i16,
    pub seek_key: u64,
    pub seek_pdir: u64,
    pub class_name: String,
    pub name: String,
    pub title: String,
}

impl KeyHeader {
    pub fn read(cursor: &mut Cursor<'_>) -> Result<Self, CursorError> {
        let nbytes = non_negative(cursor, "key size")?;
        let version = cursor.i16()?;
        let objlen = non_negative(cursor, "key object length")?;
        let datime = cursor.u32()?;
        let keylen_position = cursor.position();
        let keylen = cursor.i16()?;
        let keylen = u16::try_from(keylen).map_err(|_| CursorError::Invalid {
            what: "key length",
            position: keylen_position,
            value: keylen as i64,
        })?;
        let cycle = cursor.i16()?;
        let large = version > LARGE_KEY_VERSION;
        let seek_key = cursor.seek_pointer(large)?;
        let seek_pdir = cursor.seek_pointer(large)?;
        let class_name = cursor.string()?;
        let name = cursor.string()?;
        let title = cursor.string()?;
        Ok(Self {
            nbytes,
            version,
            objlen,
            datime,
            keylen,
            cycle,
            seek_key,
            seek_pdir,
            class_name,
            name,
            title,
        })
    }

    /// Bytes of payload stored after the key.
    pub fn stored_len(&self) -> usize {
        (self.nbytes as usize).saturating_sub(self.keylen as usize)
    }

    pub fn is_compressed(&self) -> bool {
        self.objlen as usize != self.stored_len()
    }
}

fn non_negative(cursor: &mut Cursor<'_>, what: &'static str) -> Result<u32, CursorError> {
    let position = cursor.position();
    let value = cursor.i32()?;
    u32::try_from(value).map_err(|_| CursorError::Invalid {
        what,
        position,
        value: value as i64,
    })
}
