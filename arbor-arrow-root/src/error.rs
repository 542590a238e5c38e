use arrow::error::ArrowError;

pub type RootResult<T> = std::result::Result<T, RootError>;

#[derive(Debug, thiserror::Error)]
pub enum RootError {
    #[error("Invalid ROOT file: {0}")]
    Format(#[from] FormatError),
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },
    #[error(transparent)]
    UnsupportedType(#[from] UnsupportedType),
    #[error("Failed to decode column data: {0}")]
    Decode(#[from] DecodeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RootError {
    pub(crate) fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        RootError::NotFound {
            kind,
            name: name.into(),
        }
    }
}

/// Failures of bounds-checked reads from an in-memory buffer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CursorError {
    #[error("Unexpected end of buffer: wanted {wanted} bytes at position {position}, {available} available")]
    OutOfBounds {
        position: usize,
        wanted: usize,
        available: usize,
    },
    #[error("Invalid {what} at position {position}: {value}")]
    Invalid {
        what: &'static str,
        position: usize,
        value: i64,
    },
}

/// Failures of positioned reads against the underlying byte source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Read of {len} bytes at offset {offset} is outside the source ({source_len} bytes)")]
    OutOfBounds { offset: u64, len: u64, source_len: u64 },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("Bad magic bytes {0:?}, expected \"root\"")]
    BadMagic([u8; 4]),
    #[error("Unsupported file format version {0}")]
    UnsupportedVersion(i32),
    #[error("Source error: {0}")]
    Source(#[from] SourceError),
    #[error("Truncated record: {0}")]
    Truncated(#[from] CursorError),
    #[error("{what} at offset {offset} ({len} bytes) lies outside the file data [{begin}, {end})")]
    OutOfRange {
        what: &'static str,
        offset: u64,
        len: u64,
        begin: u64,
        end: u64,
    },
    #[error("Directory key list at offset {0} is referenced more than once")]
    DirectoryCycle(u64),
    #[error("Directory nesting exceeds {0} levels")]
    DirectoryTooDeep(usize),
    #[error("Malformed {record} record: {reason}")]
    Malformed { record: &'static str, reason: String },
    #[error("Unsupported {class} version {version}")]
    UnsupportedClassVersion { class: &'static str, version: i16 },
    #[error("Failed to read payload of {name}: {source}")]
    Payload {
        name: String,
        #[source]
        source: Box<DecodeError>,
    },
}

impl FormatError {
    pub(crate) fn malformed(record: &'static str, reason: impl Into<String>) -> Self {
        FormatError::Malformed {
            record,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Unknown compression tag {0:?}")]
    UnknownCodec([u8; 2]),
    #[error("Compression codec {0} is recognized but not supported")]
    UnsupportedCodec(&'static str),
    #[error("Failed to decompress {codec} frame: {reason}")]
    Decompression { codec: &'static str, reason: String },
    #[error("Malformed compression frame: {0}")]
    MalformedFrame(String),
    #[error("Decompressed length mismatch: declared {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("Basket size mismatch: branch declares {declared} bytes, basket key declares {actual}")]
    SizeMismatch { declared: u64, actual: u64 },
    #[error("Entry count mismatch: expected {expected}, basket holds {actual}")]
    EntryCount { expected: u64, actual: u64 },
    #[error("Malformed basket payload: {0}")]
    MalformedPayload(String),
    #[error("Entry offsets are required for this column layout but the basket has none")]
    MissingEntryOffsets,
    #[error("Basket coverage: {0}")]
    Coverage(String),
    #[error("Jagged element count mismatch: counts sum to {counted}, decoded {decoded} values")]
    CountMismatch { counted: u64, decoded: u64 },
    #[error("Entry range {start}..{end} is outside 0..{entries}")]
    InvalidRange { start: u64, end: u64, entries: u64 },
    #[error("Source error: {0}")]
    Source(#[from] SourceError),
    #[error(transparent)]
    Cursor(#[from] CursorError),
    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),
    #[error("Basket {index} of column {column}: {source}")]
    Basket {
        column: String,
        index: usize,
        #[source]
        source: Box<DecodeError>,
    },
    #[error("Count column {column}: {source}")]
    CountColumn {
        column: String,
        #[source]
        source: Box<RootError>,
    },
}

impl DecodeError {
    pub(crate) fn in_basket(self, column: &str, index: usize) -> Self {
        DecodeError::Basket {
            column: column.to_string(),
            index,
            source: Box::new(self),
        }
    }
}

/// A column whose stored type cannot be decoded safely. Cached per column, hence `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported type {class_name} for column {column}: {reason}")]
pub struct UnsupportedType {
    pub column: String,
    pub class_name: String,
    pub reason: String,
}

impl UnsupportedType {
    pub fn new(
        column: impl Into<String>,
        class_name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            column: column.into(),
            class_name: class_name.into(),
            reason: reason.into(),
        }
    }
}
