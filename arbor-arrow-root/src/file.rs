use std::{
    path::Path,
    sync::{Arc, OnceLock},
};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::{
    cache::{BasketCache, CacheStats},
    compression::{self, Codec},
    cursor::Cursor,
    directory::{DirectoryEntry, DirectoryRecord, DirectoryWalker, DIRECTORY_RECORD_LEN},
    error::{FormatError, RootError, RootResult},
    key::KeyHeader,
    objects::{streamers::StreamerRegistry, ObjectReader},
    source::{MmapSource, ReadAt},
    tree::Tree,
};

pub const MAGIC: [u8; 4] = *b"root";
/// Added to the format version of files that use 64-bit header pointers.
pub const LARGE_FILE_VERSION: i32 = 1_000_000;
pub const MIN_SUPPORTED_VERSION: i32 = 40_000;
pub const MAX_SUPPORTED_VERSION: i32 = 100_000;
/// Upper bound on the fixed header, including the UUID.
const HEADER_PROBE_LEN: u64 = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub version: i32,
    pub large: bool,
    pub begin: u64,
    pub end: u64,
    pub seek_free: u64,
    pub nbytes_free: u32,
    pub nfree: u32,
    pub nbytes_name: u32,
    pub units: u8,
    /// Compression setting, `algorithm * 100 + level`.
    pub compression: i32,
    pub seek_info: u64,
    pub nbytes_info: u32,
}

impl FileHeader {
    pub fn read(cursor: &mut Cursor<'_>) -> Result<Self, FormatError> {
        let magic = cursor.array::<4>()?;
        if magic != MAGIC {
            return Err(FormatError::BadMagic(magic));
        }
        let raw_version = cursor.i32()?;
        let large = raw_version >= LARGE_FILE_VERSION;
        let version = raw_version % LARGE_FILE_VERSION;
        if !(MIN_SUPPORTED_VERSION..MAX_SUPPORTED_VERSION).contains(&version) {
            return Err(FormatError::UnsupportedVersion(raw_version));
        }
        let begin = cursor.count("file begin")? as u64;
        let end = cursor.seek_pointer(large)?;
        let seek_free = cursor.seek_pointer(large)?;
        let nbytes_free = cursor.count("free segments size")? as u32;
        let nfree = cursor.count("free segments count")? as u32;
        let nbytes_name = cursor.count("file name size")? as u32;
        let units = cursor.u8()?;
        let compression = cursor.i32()?;
        let seek_info = cursor.seek_pointer(large)?;
        let nbytes_info = cursor.count("streamer record size")? as u32;
        Ok(Self {
            version,
            large,
            begin,
            end,
            seek_free,
            nbytes_free,
            nfree,
            nbytes_name,
            units,
            compression,
            seek_info,
            nbytes_info,
        })
    }

    /// Fails unless `[offset, offset + len)` lies inside `[begin, end)`.
    pub fn check_range(
        &self,
        what: &'static str,
        offset: u64,
        len: u64,
    ) -> Result<(), FormatError> {
        let inside = offset >= self.begin
            && offset
                .checked_add(len)
                .is_some_and(|record_end| record_end <= self.end);
        if inside {
            Ok(())
        } else {
            Err(FormatError::OutOfRange {
                what,
                offset,
                len,
                begin: self.begin,
                end: self.end,
            })
        }
    }

    pub fn codec(&self) -> Option<Codec> {
        Codec::from_setting(self.compression)
    }

    fn validate(&self, source_len: u64) -> Result<(), FormatError> {
        if self.end > source_len || self.begin >= self.end {
            return Err(FormatError::OutOfRange {
                what: "file data",
                offset: self.begin,
                len: self.end.saturating_sub(self.begin),
                begin: 0,
                end: source_len,
            });
        }
        if self.nbytes_info > 0 {
            self.check_range("streamer record", self.seek_info, self.nbytes_info as u64)?;
        }
        self.check_range("top directory", self.top_directory_offset(), 1)
    }

    fn top_directory_offset(&self) -> u64 {
        self.begin + self.nbytes_name as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderOptions {
    /// Decoded baskets kept in memory. Zero disables caching.
    pub basket_cache_size: usize,
    pub max_directory_depth: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            basket_cache_size: arbor_config::CONFIG.basket_cache_size,
            max_directory_depth: arbor_config::CONFIG.max_directory_depth,
        }
    }
}

/// An opened ROOT file. Cloning is cheap and clones share the basket cache.
#[derive(Debug, Clone)]
pub struct SourceFile {
    inner: Arc<FileInner>,
}

#[derive(Debug)]
struct FileInner {
    source: Arc<dyn ReadAt>,
    header: FileHeader,
    entries: Vec<DirectoryEntry>,
    streamers: OnceLock<Arc<StreamerRegistry>>,
    baskets: BasketCache,
}

impl SourceFile {
    pub fn open<P: AsRef<Path>>(path: P) -> RootResult<Self> {
        Self::open_with(path, ReaderOptions::default())
    }

    pub fn open_with<P: AsRef<Path>>(path: P, options: ReaderOptions) -> RootResult<Self> {
        let source = MmapSource::open(path.as_ref()).map_err(FormatError::from)?;
        debug!(path = %path.as_ref().display(), bytes = source.len(), "Mapped ROOT file");
        Self::from_source_with(Arc::new(source), options)
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> RootResult<Self> {
        Self::from_source(Arc::new(bytes.into()))
    }

    pub fn from_source(source: Arc<dyn ReadAt>) -> RootResult<Self> {
        Self::from_source_with(source, ReaderOptions::default())
    }

    pub fn from_source_with(source: Arc<dyn ReadAt>, options: ReaderOptions) -> RootResult<Self> {
        let probe_len = source.len().min(HEADER_PROBE_LEN) as usize;
        let probe = source.read_at(0, probe_len).map_err(FormatError::from)?;
        let header = FileHeader::read(&mut Cursor::new(&probe))?;
        header.validate(source.len())?;

        let top_offset = header.top_directory_offset();
        let top_len = (header.end - top_offset).min(DIRECTORY_RECORD_LEN as u64) as usize;
        let top_bytes = source
            .read_at(top_offset, top_len)
            .map_err(FormatError::from)?;
        let top = DirectoryRecord::read(&mut Cursor::new(&top_bytes)).map_err(FormatError::from)?;

        let entries =
            DirectoryWalker::new(source.as_ref(), &header, options.max_directory_depth).walk(&top)?;
        debug!(
            version = header.version,
            large = header.large,
            keys = entries.len(),
            "Indexed ROOT file"
        );

        Ok(Self {
            inner: Arc::new(FileInner {
                source,
                header,
                entries,
                streamers: OnceLock::new(),
                baskets: BasketCache::new(options.basket_cache_size),
            }),
        })
    }

    pub fn header(&self) -> &FileHeader {
        &self.inner.header
    }

    pub(crate) fn source(&self) -> &dyn ReadAt {
        self.inner.source.as_ref()
    }

    pub(crate) fn basket_cache(&self) -> &BasketCache {
        &self.inner.baskets
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.baskets.stats()
    }

    /// Every key of the file, subdirectory keys included, in file order.
    pub fn keys(&self) -> &[DirectoryEntry] {
        &self.inner.entries
    }

    /// Names of all stored trees, each listed once regardless of its cycles.
    pub fn list_trees(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for entry in self.keys().iter().filter(|entry| entry.is_tree()) {
            if !names.contains(&entry.name) {
                names.push(entry.name.clone());
            }
        }
        names
    }

    /// Finds a key by name. `name;cycle` selects a cycle, otherwise the highest cycle wins.
    pub fn lookup(&self, name: &str) -> RootResult<&DirectoryEntry> {
        let (base, cycle) = split_cycle(name);
        let mut candidates = self.keys().iter().filter(|entry| entry.name == base);
        let found = match cycle {
            Some(cycle) => candidates.find(|entry| entry.cycle == cycle),
            None => candidates.fold(None, |best: Option<&DirectoryEntry>, entry| match best {
                Some(best) if best.cycle >= entry.cycle => Some(best),
                _ => Some(entry),
            }),
        };
        found.ok_or_else(|| RootError::not_found("key", name))
    }

    pub fn get_tree(&self, name: &str) -> RootResult<Tree> {
        let entry = self
            .lookup(name)
            .map_err(|_| RootError::not_found("tree", name))?;
        if !entry.is_tree() {
            return Err(RootError::not_found("tree", name));
        }
        Tree::read(self.clone(), entry)
    }

    /// Reads the payload stored under `entry`, decompressing it if needed.
    pub fn read_object(&self, entry: &DirectoryEntry) -> RootResult<Bytes> {
        let header = self.header();
        header.check_range("key", entry.seek_key, entry.nbytes as u64)?;
        let raw = self
            .source()
            .read_at(entry.seek_key, entry.nbytes as usize)
            .map_err(FormatError::from)?;
        let key = KeyHeader::read(&mut Cursor::new(&raw)).map_err(FormatError::from)?;
        if key.keylen != entry.key_len || key.nbytes != entry.nbytes {
            return Err(FormatError::malformed(
                "key",
                format!(
                    "{} at offset {} disagrees with its directory entry",
                    entry.name, entry.seek_key
                ),
            )
            .into());
        }

        let stored = raw.slice(key.keylen as usize..);
        if !key.is_compressed() {
            return Ok(stored);
        }
        compression::decompress(&stored, key.objlen as usize, header.codec())
            .map(Bytes::from)
            .map_err(|e| {
                FormatError::Payload {
                    name: entry.name.clone(),
                    source: Box::new(e),
                }
                .into()
            })
    }

    /// Class layouts described by the file, parsed on first use.
    pub fn streamers(&self) -> Arc<StreamerRegistry> {
        self.inner
            .streamers
            .get_or_init(|| match self.load_streamers() {
                Ok(registry) => Arc::new(registry),
                Err(e) => {
                    warn!("Failed to read streamer records: {}", e);
                    Arc::new(StreamerRegistry::unavailable(e.to_string()))
                }
            })
            .clone()
    }

    fn load_streamers(&self) -> RootResult<StreamerRegistry> {
        let header = self.header();
        if header.seek_info == 0 || header.nbytes_info == 0 {
            return Ok(StreamerRegistry::default());
        }
        header.check_range("streamer record", header.seek_info, header.nbytes_info as u64)?;
        let raw = self
            .source()
            .read_at(header.seek_info, header.nbytes_info as usize)
            .map_err(FormatError::from)?;
        let key = KeyHeader::read(&mut Cursor::new(&raw)).map_err(FormatError::from)?;
        let entry = DirectoryEntry {
            name: key.name.clone(),
            cycle: key.cycle,
            class_name: key.class_name.clone(),
            title: key.title.clone(),
            seek_key: header.seek_info,
            key_len: key.keylen,
            nbytes: key.nbytes,
            objlen: key.objlen,
        };
        let payload = self.read_object(&entry)?;
        let mut reader = ObjectReader::new(Cursor::with_origin(&payload, key.keylen as usize));
        let registry = StreamerRegistry::read(&mut reader)?;
        debug!(classes = registry.len(), "Read streamer records");
        Ok(registry)
    }
}

fn split_cycle(name: &str) -> (&str, Option<i16>) {
    match name.rsplit_once(';') {
        Some((base, cycle)) => match cycle.parse::<i16>() {
            Ok(cycle) => (base, Some(cycle)),
            Err(_) => (name, None),
        },
        None => (name, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{BranchDef, DirectoryBuilder, FileBuilder, TreeBuilder};

    fn two_cycle_file() -> Vec<u8> {
        FileBuilder::new()
            .tree(
                TreeBuilder::new("events")
                    .cycle(1)
                    .branch(BranchDef::scalar("x", &[1i32, 2])),
            )
            .tree(
                TreeBuilder::new("events")
                    .cycle(2)
                    .branch(BranchDef::scalar("x", &[1i32, 2, 3])),
            )
            .tree(TreeBuilder::new("other").branch(BranchDef::scalar("y", &[0.5f64])))
            .build()
    }

    #[test]
    fn cycle_suffix_parsing() {
        assert_eq!(split_cycle("events"), ("events", None));
        assert_eq!(split_cycle("events;2"), ("events", Some(2)));
        assert_eq!(split_cycle("odd;name"), ("odd;name", None));
    }

    #[test]
    fn header_fields_are_parsed() {
        let file = SourceFile::from_bytes(two_cycle_file()).unwrap();
        let header = file.header();
        assert!(!header.large);
        assert_eq!(header.begin, 100);
        assert!(MIN_SUPPORTED_VERSION <= header.version);
        assert!(header.seek_info > header.begin);
    }

    #[test]
    fn highest_cycle_wins() {
        let file = SourceFile::from_bytes(two_cycle_file()).unwrap();
        assert_eq!(file.lookup("events").unwrap().cycle, 2);
        assert_eq!(file.lookup("events;1").unwrap().cycle, 1);
        assert!(matches!(
            file.lookup("events;7"),
            Err(RootError::NotFound { kind: "key", .. })
        ));
        assert_eq!(file.get_tree("events").unwrap().entry_count(), 3);
        assert_eq!(file.get_tree("events;1").unwrap().entry_count(), 2);
    }

    #[test]
    fn trees_are_listed_once() {
        let file = SourceFile::from_bytes(two_cycle_file()).unwrap();
        assert_eq!(file.list_trees(), vec!["events".to_string(), "other".to_string()]);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = two_cycle_file();
        bytes[..4].copy_from_slice(b"ROOT");
        assert!(matches!(
            SourceFile::from_bytes(bytes),
            Err(RootError::Format(FormatError::BadMagic(_)))
        ));
    }

    #[test]
    fn unsupported_versions_are_rejected() {
        let mut bytes = two_cycle_file();
        bytes[4..8].copy_from_slice(&30_000i32.to_be_bytes());
        assert!(matches!(
            SourceFile::from_bytes(bytes),
            Err(RootError::Format(FormatError::UnsupportedVersion(30_000)))
        ));
    }

    #[test]
    fn truncated_files_are_rejected() {
        let bytes = two_cycle_file();
        let truncated = bytes[..bytes.len() - 10].to_vec();
        assert!(matches!(
            SourceFile::from_bytes(truncated),
            Err(RootError::Format(FormatError::OutOfRange { .. }))
        ));
        assert!(SourceFile::from_bytes(&b"ro"[..]).is_err());
    }

    #[test]
    fn large_files_use_wide_pointers() {
        let bytes = FileBuilder::new()
            .large(true)
            .tree(TreeBuilder::new("t").branch(BranchDef::scalar("v", &[1u16, 2, 3])))
            .build();
        let file = SourceFile::from_bytes(bytes).unwrap();
        assert!(file.header().large);
        assert_eq!(file.get_tree("t").unwrap().entry_count(), 3);
    }

    #[test]
    fn subdirectory_keys_are_path_qualified() {
        let bytes = FileBuilder::new()
            .directory(
                "calib",
                DirectoryBuilder::new()
                    .tree(TreeBuilder::new("gains").branch(BranchDef::scalar("g", &[1.0f32])))
                    .directory(
                        "deep",
                        DirectoryBuilder::new().tree(
                            TreeBuilder::new("t").branch(BranchDef::scalar("g", &[2.0f32])),
                        ),
                    ),
            )
            .build();
        let file = SourceFile::from_bytes(bytes).unwrap();
        assert_eq!(
            file.list_trees(),
            vec!["calib/gains".to_string(), "calib/deep/t".to_string()]
        );
        assert!(file.lookup("calib").unwrap().is_directory());
        assert_eq!(file.get_tree("calib/deep/t").unwrap().entry_count(), 1);
    }

    #[test]
    fn directory_loops_are_rejected() {
        let bytes = FileBuilder::new()
            .directory("loop", DirectoryBuilder::looping_to_parent())
            .build();
        assert!(matches!(
            SourceFile::from_bytes(bytes),
            Err(RootError::Format(FormatError::DirectoryCycle(_)))
        ));
    }

    #[test]
    fn dangling_directories_are_rejected() {
        let bytes = FileBuilder::new()
            .directory("lost", DirectoryBuilder::dangling(1 << 30))
            .build();
        assert!(matches!(
            SourceFile::from_bytes(bytes),
            Err(RootError::Format(FormatError::OutOfRange { .. }))
        ));
    }

    #[test]
    fn depth_limit_is_enforced() {
        let mut dir = DirectoryBuilder::new();
        for _ in 0..4 {
            dir = DirectoryBuilder::new().directory("d", dir);
        }
        let bytes = FileBuilder::new().directory("d", dir).build();
        let options = ReaderOptions {
            basket_cache_size: 0,
            max_directory_depth: 2,
        };
        assert!(matches!(
            SourceFile::from_source_with(Arc::new(Bytes::from(bytes.clone())), options),
            Err(RootError::Format(FormatError::DirectoryTooDeep(2)))
        ));
        assert!(SourceFile::from_bytes(bytes).is_ok());
    }

    #[test]
    fn missing_streamer_record_yields_an_empty_registry() {
        let file = SourceFile::from_bytes(two_cycle_file()).unwrap();
        assert!(file.streamers().is_empty());
    }
}
