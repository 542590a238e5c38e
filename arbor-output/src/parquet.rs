use std::{io::ErrorKind, path::Path, sync::Arc};

use arrow::{
    array::ArrayRef,
    datatypes::{Field, Schema},
    record_batch::RecordBatch,
};
use parquet::{arrow::ArrowWriter, file::properties::WriterProperties};
use tracing::debug;

use crate::{error::ExportError, Compression};

/// Writes equally long columns to `destination`.
///
/// Data goes to a temporary file next to the destination, which is renamed into place once
/// the writer is closed. Without `overwrite` the rename refuses to replace an existing file.
pub(crate) fn write_columns(
    destination: &Path,
    fields: Vec<Field>,
    arrays: Vec<ArrayRef>,
    rows: usize,
    compression: Compression,
    batch_size: usize,
    overwrite: bool,
) -> Result<(), ExportError> {
    let schema = Arc::new(Schema::new(fields));
    let directory = destination
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::Builder::new()
        .prefix(".arbor-")
        .suffix(".parquet.tmp")
        .tempfile_in(directory)?;

    let properties = WriterProperties::builder()
        .set_compression(compression.parquet())
        .build();
    let mut writer = ArrowWriter::try_new(temp.as_file_mut(), schema.clone(), Some(properties))?;
    let batch_size = batch_size.max(1);
    let mut offset = 0;
    while offset < rows {
        let len = batch_size.min(rows - offset);
        let columns = arrays.iter().map(|array| array.slice(offset, len)).collect();
        let batch = RecordBatch::try_new(schema.clone(), columns)?;
        writer.write(&batch)?;
        debug!(offset, rows = len, "Wrote record batch");
        offset += len;
    }
    writer.close()?;

    if overwrite {
        temp.persist(destination).map_err(|e| e.error)?;
    } else {
        temp.persist_noclobber(destination).map_err(|e| {
            if e.error.kind() == ErrorKind::AlreadyExists {
                ExportError::DestinationExists(destination.to_path_buf())
            } else {
                ExportError::Io(e.error)
            }
        })?;
    }
    Ok(())
}
