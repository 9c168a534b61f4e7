//! Parquet decoding of data files.

use bytes::Bytes;
use llkv_result::{Error, Result};
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};

/// Open a streaming reader over in-memory Parquet bytes.
pub fn open_parquet_reader(bytes: Bytes, batch_rows: usize) -> Result<ParquetRecordBatchReader> {
    ParquetRecordBatchReaderBuilder::try_new(bytes)
        .map_err(|e| Error::Internal(format!("failed to create Parquet reader: {}", e)))?
        .with_batch_size(batch_rows.max(1))
        .build()
        .map_err(|e| Error::Internal(format!("failed to build Parquet reader: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::TableOptions;
    use crate::writer::write_parquet_to_memory;
    use arrow::array::{RecordBatch, StringArray, UInt64Array};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn sample() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::UInt64, false),
            Field::new("name", DataType::Utf8, false),
        ]));

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(UInt64Array::from(vec![1, 2, 3])),
                Arc::new(StringArray::from(vec!["a", "b", "c"])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_streaming_reader_respects_batch_size() {
        let batch = sample();
        let bytes = write_parquet_to_memory(
            std::slice::from_ref(&batch),
            TableOptions::default().writer_properties(),
        )
        .unwrap();

        let sizes: Vec<usize> = open_parquet_reader(Bytes::from(bytes), 2)
            .unwrap()
            .map(|b| b.unwrap().num_rows())
            .collect();
        assert_eq!(sizes, vec![2, 1]);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(open_parquet_reader(Bytes::from_static(b"not parquet"), 10).is_err());
    }
}
