use std::path::PathBuf;

use arbor_arrow_root::RootError;
use arrow::error::ArrowError;
use parquet::errors::ParquetError;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Destination {0} already exists and overwriting is disabled")]
    DestinationExists(PathBuf),
    #[error("No exportable columns")]
    NoColumns,
    #[error("Failed to export column {column}: {source}")]
    Column {
        column: String,
        #[source]
        source: RootError,
    },
    #[error("Column {column} has {rows} rows, the tree has {expected}")]
    RowCountMismatch {
        column: String,
        rows: usize,
        expected: u64,
    },
    #[error("Unknown compression {0:?}, expected fast, balanced or high-ratio")]
    UnknownCompression(String),
    #[error("Schema error: {0}")]
    Schema(#[from] ArrowError),
    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
