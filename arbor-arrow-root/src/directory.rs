//! Directory records and the recursive key index.

use std::collections::HashSet;

use tracing::debug;

use crate::{
    cursor::Cursor,
    error::{CursorError, FormatError},
    file::FileHeader,
    key::KeyHeader,
    source::ReadAt,
};

/// Directory versions above this use 64-bit seek pointers.
pub const LARGE_DIRECTORY_VERSION: i16 = 1000;
/// Size of the largest directory record, excluding the trailing UUID.
pub const DIRECTORY_RECORD_LEN: usize = 42;

const DIRECTORY_CLASSES: [&str; 2] = ["TDirectory", "TDirectoryFile"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRecord {
    pub version: i16,
    pub nbytes_keys: u32,
    pub nbytes_name: u32,
    pub seek_dir: u64,
    pub seek_parent: u64,
    pub seek_keys: u64,
}

impl DirectoryRecord {
    pub fn read(cursor: &mut Cursor<'_>) -> Result<Self, CursorError> {
        let version = cursor.i16()?;
        let _created = cursor.u32()?;
        let _modified = cursor.u32()?;
        let nbytes_keys = cursor.count("directory key list size")? as u32;
        let nbytes_name = cursor.count("directory name size")? as u32;
        let large = version > LARGE_DIRECTORY_VERSION;
        let seek_dir = cursor.seek_pointer(large)?;
        let seek_parent = cursor.seek_pointer(large)?;
        let seek_keys = cursor.seek_pointer(large)?;
        Ok(Self {
            version,
            nbytes_keys,
            nbytes_name,
            seek_dir,
            seek_parent,
            seek_keys,
        })
    }
}

/// One key of the file, as listed by its directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Key name, qualified with its subdirectory path (`dir/name`).
    pub name: String,
    pub cycle: i16,
    pub class_name: String,
    pub title: String,
    pub seek_key: u64,
    pub key_len: u16,
    /// Key plus stored payload size.
    pub nbytes: u32,
    /// Uncompressed payload size.
    pub objlen: u32,
}

impl DirectoryEntry {
    fn from_key(prefix: &str, key: KeyHeader) -> Self {
        Self {
            name: format!("{}{}", prefix, key.name),
            cycle: key.cycle,
            class_name: key.class_name,
            title: key.title,
            seek_key: key.seek_key,
            key_len: key.keylen,
            nbytes: key.nbytes,
            objlen: key.objlen,
        }
    }

    pub fn is_directory(&self) -> bool {
        DIRECTORY_CLASSES.contains(&self.class_name.as_str())
    }

    pub fn is_tree(&self) -> bool {
        self.class_name == "TTree"
    }
}

/// Walks the directory hierarchy below `top`, returning every key in file order.
/// Key lists are visited at most once and must lie inside the file data.
pub(crate) struct DirectoryWalker<'a> {
    source: &'a dyn ReadAt,
    header: &'a FileHeader,
    max_depth: usize,
    visited: HashSet<u64>,
    entries: Vec<DirectoryEntry>,
}

impl<'a> DirectoryWalker<'a> {
    pub(crate) fn new(source: &'a dyn ReadAt, header: &'a FileHeader, max_depth: usize) -> Self {
        Self {
            source,
            header,
            max_depth,
            visited: HashSet::new(),
            entries: Vec::new(),
        }
    }

    pub(crate) fn walk(
        mut self,
        top: &DirectoryRecord,
    ) -> Result<Vec<DirectoryEntry>, FormatError> {
        self.walk_directory(top, "", 0)?;
        Ok(self.entries)
    }

    fn walk_directory(
        &mut self,
        record: &DirectoryRecord,
        prefix: &str,
        depth: usize,
    ) -> Result<(), FormatError> {
        if depth > self.max_depth {
            return Err(FormatError::DirectoryTooDeep(self.max_depth));
        }
        if record.seek_keys == 0 {
            // a directory that was never written has no key list
            return Ok(());
        }
        if !self.visited.insert(record.seek_keys) {
            return Err(FormatError::DirectoryCycle(record.seek_keys));
        }

        let bytes = self.read_checked(
            "directory key list",
            record.seek_keys,
            record.nbytes_keys as usize,
        )?;
        let mut cursor = Cursor::new(&bytes);
        let list_key = KeyHeader::read(&mut cursor)?;
        cursor.seek(list_key.keylen as usize)?;
        let nkeys = cursor.count("key count")?;
        debug!(
            directory = prefix,
            keys = nkeys,
            seek = record.seek_keys,
            "Reading directory key list"
        );

        let mut subdirectories = Vec::new();
        for _ in 0..nkeys {
            let key = KeyHeader::read(&mut cursor)?;
            let entry = DirectoryEntry::from_key(prefix, key);
            if entry.is_directory() {
                subdirectories.push(entry.clone());
            }
            self.entries.push(entry);
        }

        for entry in subdirectories {
            let record_len = (entry.objlen as usize).min(DIRECTORY_RECORD_LEN);
            let bytes = self.read_checked(
                "subdirectory record",
                entry.seek_key + entry.key_len as u64,
                record_len,
            )?;
            let record = DirectoryRecord::read(&mut Cursor::new(&bytes))?;
            self.walk_directory(&record, &format!("{}/", entry.name), depth + 1)?;
        }
        Ok(())
    }

    fn read_checked(
        &self,
        what: &'static str,
        offset: u64,
        len: usize,
    ) -> Result<bytes::Bytes, FormatError> {
        self.header.check_range(what, offset, len as u64)?;
        Ok(self.source.read_at(offset, len)?)
    }
}
