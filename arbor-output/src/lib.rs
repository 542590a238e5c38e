//! Exports decoded tree columns to Parquet files.

use std::{fmt, path::PathBuf, str::FromStr};

use arbor_arrow_root::{DecodedColumn, Tree};
use arrow::{array::ArrayRef, datatypes::Field};
use tracing::{info, warn};

mod error;
mod parquet;
mod schema;

pub use error::ExportError;
pub use schema::{export_field, prepare_column};

/// Parquet page compression, named by intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Compression {
    #[serde(alias = "lz4")]
    Fast,
    #[serde(alias = "snappy")]
    Balanced,
    #[default]
    #[serde(alias = "zstd")]
    HighRatio,
}

impl Compression {
    /// The configured default. An unrecognized configured name falls back to `HighRatio`.
    pub fn from_config() -> Self {
        let configured = &arbor_config::CONFIG.export_compression;
        configured.parse().unwrap_or_else(|e| {
            warn!("{}; using high-ratio", e);
            Compression::HighRatio
        })
    }

    pub fn parquet(self) -> ::parquet::basic::Compression {
        use ::parquet::basic::{Compression as Codec, ZstdLevel};
        match self {
            Compression::Fast => Codec::LZ4_RAW,
            Compression::Balanced => Codec::SNAPPY,
            Compression::HighRatio => Codec::ZSTD(ZstdLevel::default()),
        }
    }
}

impl FromStr for Compression {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" | "lz4" => Ok(Compression::Fast),
            "balanced" | "snappy" => Ok(Compression::Balanced),
            "high-ratio" | "high_ratio" | "zstd" => Ok(Compression::HighRatio),
            _ => Err(ExportError::UnknownCompression(s.to_string())),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Compression::Fast => "fast",
            Compression::Balanced => "balanced",
            Compression::HighRatio => "high-ratio",
        })
    }
}

fn default_batch_size() -> usize {
    arbor_config::CONFIG.export_batch_size
}

fn default_compression() -> Compression {
    Compression::from_config()
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ExportOptions {
    /// Columns to export, in order. All columns of the tree when `None`.
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    pub destination: PathBuf,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default = "default_compression")]
    pub compression: Compression,
    /// Fail on the first column that cannot be exported instead of skipping it.
    #[serde(default)]
    pub all_or_nothing: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl ExportOptions {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            columns: None,
            destination: destination.into(),
            overwrite: false,
            compression: default_compression(),
            all_or_nothing: false,
            batch_size: default_batch_size(),
        }
    }

    pub fn columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn all_or_nothing(mut self, all_or_nothing: bool) -> Self {
        self.all_or_nothing = all_or_nothing;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SkippedColumn {
    pub column: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ExportReport {
    pub destination: PathBuf,
    pub rows: u64,
    /// Exported columns, in file order.
    pub columns: Vec<String>,
    pub skipped: Vec<SkippedColumn>,
}

/// Writes the columns of `tree` selected by `options` to a Parquet file.
pub fn export(tree: &Tree, options: &ExportOptions) -> Result<ExportReport, ExportError> {
    let destination = options.destination.as_path();
    if destination.exists() && !options.overwrite {
        return Err(ExportError::DestinationExists(destination.to_path_buf()));
    }

    let names: Vec<String> = match &options.columns {
        Some(columns) => columns.clone(),
        None => tree.column_names().into_iter().map(String::from).collect(),
    };
    let expected = tree.entry_count();

    let mut collected = Collected::with_capacity(names.len());
    for name in names {
        let result = materialize(tree, &name, expected);
        if let Err(e) = &result {
            if !options.all_or_nothing {
                warn!(column = %name, tree = tree.name(), "Skipping column: {}", e);
            }
        }
        collected.add(name, result, options.all_or_nothing)?;
    }
    let Collected {
        fields,
        arrays,
        skipped,
    } = collected;
    if fields.is_empty() {
        return Err(ExportError::NoColumns);
    }

    let columns: Vec<String> = fields.iter().map(|field| field.name().clone()).collect();
    parquet::write_columns(
        destination,
        fields,
        arrays,
        expected as usize,
        options.compression,
        options.batch_size,
        options.overwrite,
    )?;
    info!(
        tree = tree.name(),
        destination = %destination.display(),
        rows = expected,
        columns = columns.len(),
        skipped = skipped.len(),
        compression = %options.compression,
        "Exported tree"
    );

    Ok(ExportReport {
        destination: destination.to_path_buf(),
        rows: expected,
        columns,
        skipped,
    })
}

/// Decodes the full column and checks it against the tree's row count.
fn materialize(tree: &Tree, name: &str, expected: u64) -> Result<DecodedColumn, ExportError> {
    let decoded = tree
        .column(name)
        .and_then(|column| column.to_array(None))
        .map_err(|source| ExportError::Column {
            column: name.to_string(),
            source,
        })?;
    if decoded.len() as u64 != expected {
        return Err(ExportError::RowCountMismatch {
            column: name.to_string(),
            rows: decoded.len(),
            expected,
        });
    }
    Ok(decoded)
}

/// Columns accepted for export so far, and the ones left out.
struct Collected {
    fields: Vec<Field>,
    arrays: Vec<ArrayRef>,
    skipped: Vec<SkippedColumn>,
}

impl Collected {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
            arrays: Vec::with_capacity(capacity),
            skipped: Vec::new(),
        }
    }

    /// Takes a decoded column, or records why it is missing. Failures are only
    /// returned when `all_or_nothing` is set.
    fn add(
        &mut self,
        column: String,
        result: Result<DecodedColumn, ExportError>,
        all_or_nothing: bool,
    ) -> Result<(), ExportError> {
        match result {
            Ok(decoded) => {
                let (field, array) = prepare_column(decoded);
                self.fields.push(field);
                self.arrays.push(array);
                Ok(())
            }
            Err(e) if all_or_nothing => Err(e),
            Err(e) => {
                let reason = match e {
                    ExportError::Column { source, .. } => source.to_string(),
                    other => other.to_string(),
                };
                self.skipped.push(SkippedColumn { column, reason });
                Ok(())
            }
        }
    }
}

/// `tree.export(&options)` for [`Tree`].
pub trait TreeExport {
    fn export(&self, options: &ExportOptions) -> Result<ExportReport, ExportError>;
}

impl TreeExport for Tree {
    fn export(&self, options: &ExportOptions) -> Result<ExportReport, ExportError> {
        export(self, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compression_names_parse() {
        assert_eq!("fast".parse::<Compression>().unwrap(), Compression::Fast);
        assert_eq!("LZ4".parse::<Compression>().unwrap(), Compression::Fast);
        assert_eq!("snappy".parse::<Compression>().unwrap(), Compression::Balanced);
        assert_eq!("high-ratio".parse::<Compression>().unwrap(), Compression::HighRatio);
        assert_eq!(" zstd ".parse::<Compression>().unwrap(), Compression::HighRatio);
        assert!(matches!(
            "brotli".parse::<Compression>(),
            Err(ExportError::UnknownCompression(_))
        ));
    }

    #[test]
    fn compression_maps_to_parquet_codecs() {
        use ::parquet::basic::Compression as Codec;
        assert_eq!(Compression::Fast.parquet(), Codec::LZ4_RAW);
        assert_eq!(Compression::Balanced.parquet(), Codec::SNAPPY);
        assert!(matches!(Compression::HighRatio.parquet(), Codec::ZSTD(_)));
    }

    fn rows(name: &str, n: i32) -> DecodedColumn {
        use arbor_arrow_root::TypeDescriptor;
        use arrow::array::Int32Array;
        use std::sync::Arc;
        let array = Int32Array::from_iter_values(0..n);
        DecodedColumn::new(name, TypeDescriptor::Int32, 0..n as u64, Arc::new(array))
    }

    #[test]
    fn short_columns_are_skipped_unless_all_or_nothing() {
        let expected = 5;
        let mut collected = Collected::with_capacity(2);
        collected
            .add("full".to_string(), Ok(rows("full", 5)), false)
            .unwrap();
        let short = ExportError::RowCountMismatch {
            column: "short".to_string(),
            rows: 3,
            expected,
        };
        collected.add("short".to_string(), Err(short), false).unwrap();
        assert_eq!(collected.fields.len(), 1);
        assert_eq!(collected.fields[0].name(), "full");
        assert_eq!(collected.skipped.len(), 1);
        assert_eq!(collected.skipped[0].column, "short");
        assert!(collected.skipped[0].reason.contains("3 rows"));

        let short = ExportError::RowCountMismatch {
            column: "short".to_string(),
            rows: 3,
            expected,
        };
        assert!(matches!(
            collected.add("short".to_string(), Err(short), true),
            Err(ExportError::RowCountMismatch { rows: 3, .. })
        ));
        assert_eq!(collected.skipped.len(), 1);
    }

    #[test]
    fn display_round_trips_through_parsing() {
        for compression in [Compression::Fast, Compression::Balanced, Compression::HighRatio] {
            assert_eq!(compression.to_string().parse::<Compression>().unwrap(), compression);
        }
    }
}
