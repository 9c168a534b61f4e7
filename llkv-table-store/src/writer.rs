//! Parquet encoding of data files.

use arrow::record_batch::RecordBatch;
use llkv_result::{Error, Result};
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;

/// Write record batches to an in-memory Parquet file.
///
/// Returns the serialized Parquet bytes ready to store in the pager.
pub fn write_parquet_to_memory(
    batches: &[RecordBatch],
    props: WriterProperties,
) -> Result<Vec<u8>> {
    let schema = batches
        .first()
        .map(|b| b.schema())
        .ok_or_else(|| Error::Internal("cannot write an empty data file".into()))?;

    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, schema, Some(props))
        .map_err(|e| Error::Internal(format!("failed to create Parquet writer: {}", e)))?;

    for batch in batches {
        writer.write(batch).map_err(|e| {
            Error::Internal(format!("failed to write RecordBatch to Parquet: {}", e))
        })?;
    }

    writer
        .close()
        .map_err(|e| Error::Internal(format!("failed to close Parquet writer: {}", e)))?;

    Ok(buffer)
}
