//! Shared helpers for LLKV test binaries.

use arrow::record_batch::RecordBatch;
use arrow::util::display::{ArrayFormatter, FormatOptions};
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize tracing for test binaries. Safe to call multiple times.
pub fn init_tracing_for_tests() {
    INIT.call_once(|| {
        use tracing_subscriber::filter::EnvFilter;
        use tracing_subscriber::fmt;
        let env = std::env::var("RUST_LOG").ok();
        let filter = match env {
            Some(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            None => EnvFilter::new("info"),
        };
        let _ = fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_test_writer()
            .try_init();
    });
}

/// Render every row of `batches` as `+I[v1, v2, ...]`, nulls as `NULL`.
///
/// Reads only ever return inserted rows, so every line carries the `+I` prefix.
pub fn format_rows(batches: &[RecordBatch]) -> Vec<String> {
    let options = FormatOptions::default().with_null("NULL");
    let mut rows = Vec::new();
    for batch in batches {
        let formatters: Vec<ArrayFormatter<'_>> = batch
            .columns()
            .iter()
            .map(|column| {
                ArrayFormatter::try_new(column.as_ref(), &options)
                    .expect("column type must be displayable")
            })
            .collect();
        for row in 0..batch.num_rows() {
            let values: Vec<String> = formatters
                .iter()
                .map(|f| f.value(row).to_string())
                .collect();
            rows.push(format!("+I[{}]", values.join(", ")));
        }
    }
    rows
}

/// [`format_rows`] sorted, for order-insensitive comparisons.
pub fn format_rows_sorted(batches: &[RecordBatch]) -> Vec<String> {
    let mut rows = format_rows(batches);
    rows.sort();
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int32Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    #[test]
    fn test_format_rows() {
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![
                Field::new("a", DataType::Int32, false),
                Field::new("b", DataType::Utf8, true),
            ])),
            vec![
                Arc::new(Int32Array::from(vec![2, 1])),
                Arc::new(StringArray::from(vec![None, Some("x")])),
            ],
        )
        .unwrap();

        assert_eq!(format_rows(&[batch.clone()]), vec!["+I[2, NULL]", "+I[1, x]"]);
        assert_eq!(format_rows_sorted(&[batch]), vec!["+I[1, x]", "+I[2, NULL]"]);
    }
}
