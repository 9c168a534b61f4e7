//! The write path: buffering rows per (partition, bucket) and flushing them into
//! immutable data files.

use crate::commit::ChangeSet;
use crate::manifest::{DataFileMeta, ManifestEntry};
use crate::merge::{KeyEncoder, sort_by_key_and_sequence};
use crate::partition::Partition;
use crate::scan::live_entries_of;
use crate::table::FileStoreTable;
use crate::types::{BucketId, RowKind, SEQUENCE_NUMBER_COLUMN, SnapshotId, now_millis};
use crate::writer::write_parquet_to_memory;
use arrow::array::{ArrayRef, AsArray, Int8Array, RecordBatch, UInt32Array, UInt64Array};
use arrow::compute::{concat_batches, take_record_batch};
use arrow::datatypes::UInt64Type;
use llkv_result::{Error, Result};
use llkv_storage::pager::Pager;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use xxhash_rust::xxh3::xxh3_64;

type BucketKey = (Partition, BucketId);

/// Writes sorted runs of file-schema batches as data files.
pub(crate) struct DataFileWriter<'a, P: Pager> {
    table: &'a FileStoreTable<P>,
}

impl<'a, P: Pager> DataFileWriter<'a, P> {
    pub(crate) fn new(table: &'a FileStoreTable<P>) -> Self {
        Self { table }
    }

    /// Write `batches` (file schema) as one data file and return its manifest entry.
    ///
    /// Primary-key rows are sorted by (key, sequence number) first.
    pub(crate) fn write_file(
        &self,
        partition: Partition,
        bucket: BucketId,
        batches: &[RecordBatch],
    ) -> Result<ManifestEntry> {
        let schema = self.table.schema();
        let mut batch = concat_batches(schema.file_schema(), batches)?;
        if batch.num_rows() == 0 {
            return Err(Error::Internal("refusing to write an empty data file".into()));
        }

        let (min_key, max_key) = if schema.has_primary_key() {
            let encoder = KeyEncoder::for_primary_key(schema)?;
            batch = sort_by_key_and_sequence(&batch, &encoder)?;
            let keys = encoder.encode(&batch)?;
            (
                keys.row(0).as_ref().to_vec(),
                keys.row(keys.num_rows() - 1).as_ref().to_vec(),
            )
        } else {
            (Vec::new(), Vec::new())
        };

        let sequences = batch
            .column(schema.file_schema().index_of(SEQUENCE_NUMBER_COLUMN)?)
            .as_primitive::<UInt64Type>();
        let min_sequence_number = arrow::compute::min(sequences).unwrap_or(0);
        let max_sequence_number = arrow::compute::max(sequences).unwrap_or(0);

        let bytes = write_parquet_to_memory(
            std::slice::from_ref(&batch),
            schema.options().writer_properties(),
        )?;
        let file_name = self.table.names().new_data_file_name();
        let key = self
            .table
            .layout()
            .data_file_key(schema, &partition, bucket, &file_name);
        let meta = DataFileMeta {
            file_name,
            file_size: bytes.len() as u64,
            row_count: batch.num_rows() as u64,
            min_key,
            max_key,
            min_sequence_number,
            max_sequence_number,
            schema_id: schema.id(),
            creation_time_millis: now_millis(),
        };
        self.table.pager().put(&key, bytes)?;

        tracing::debug!(
            table = self.table.path(),
            %partition,
            bucket,
            file = %meta.file_name,
            rows = meta.row_count,
            "flushed data file"
        );
        Ok(ManifestEntry::add(partition, bucket, meta))
    }
}

#[derive(Default)]
struct WriteBuffer {
    batches: Vec<RecordBatch>,
    rows: usize,
}

/// Buffers incoming rows and turns them into data files.
///
/// Nothing becomes visible until the [`ChangeSet`] from
/// [`TableWrite::prepare_commit`] is committed. Dropping a `TableWrite` discards
/// its buffers; files it already spilled stay unreferenced until garbage
/// collection.
pub struct TableWrite<P: Pager> {
    table: FileStoreTable<P>,
    commit_user: String,
    bucket_encoder: KeyEncoder,
    buffers: BTreeMap<BucketKey, WriteBuffer>,
    next_sequence: FxHashMap<BucketKey, u64>,
    /// Latest snapshot `committed_sequence` was read from; `None` until the first write.
    committed_at: Option<Option<SnapshotId>>,
    committed_sequence: FxHashMap<BucketKey, u64>,
    flushed: Vec<ManifestEntry>,
}

impl<P: Pager> TableWrite<P> {
    pub(crate) fn new(table: FileStoreTable<P>, commit_user: String) -> Result<Self> {
        let bucket_encoder = KeyEncoder::for_bucket_key(table.schema())?;
        Ok(Self {
            table,
            commit_user,
            bucket_encoder,
            buffers: BTreeMap::new(),
            next_sequence: FxHashMap::default(),
            committed_at: None,
            committed_sequence: FxHashMap::default(),
            flushed: Vec::new(),
        })
    }

    pub fn commit_user(&self) -> &str {
        &self.commit_user
    }

    /// Buffer `batch` as inserts.
    pub fn write(&mut self, batch: &RecordBatch) -> Result<()> {
        let kinds = vec![RowKind::Insert; batch.num_rows()];
        self.write_with_kinds(batch, &kinds)
    }

    /// Buffer `batch` with an explicit row kind per row.
    pub fn write_with_kinds(&mut self, batch: &RecordBatch, kinds: &[RowKind]) -> Result<()> {
        if kinds.len() != batch.num_rows() {
            return Err(Error::InvalidArgumentError(format!(
                "{} row kinds for {} rows",
                kinds.len(),
                batch.num_rows()
            )));
        }
        self.table.merge_policy().validate_kinds(kinds)?;
        if batch.num_rows() == 0 {
            return Ok(());
        }
        let batch = self.conform(batch)?;
        self.refresh_committed_sequences()?;

        let table = self.table.clone();
        let schema = table.schema();
        let partition_columns: Vec<ArrayRef> = schema
            .partition_indices()
            .iter()
            .map(|&idx| batch.column(idx).clone())
            .collect();
        let bucket_keys = self.bucket_encoder.encode(&batch)?;
        let bucket_count = schema.options().bucket as u64;

        let mut groups: BTreeMap<BucketKey, Vec<u32>> = BTreeMap::new();
        for row in 0..batch.num_rows() {
            let partition = Partition::from_columns(&partition_columns, row)?;
            let bucket = bucket_for(bucket_keys.row(row).as_ref(), bucket_count);
            groups.entry((partition, bucket)).or_default().push(row as u32);
        }

        for (key, rows) in groups {
            let indices = UInt32Array::from(rows);
            let user_rows = take_record_batch(&batch, &indices)?;
            let group_kinds: Vec<i8> = indices
                .values()
                .iter()
                .map(|&i| kinds[i as usize].to_byte())
                .collect();

            let start = self.next_sequence_for(&key);
            let count = user_rows.num_rows() as u64;
            self.next_sequence.insert(key.clone(), start + count);

            let mut columns = user_rows.columns().to_vec();
            columns.push(Arc::new(UInt64Array::from_iter_values(start..start + count)));
            columns.push(Arc::new(Int8Array::from(group_kinds)));
            let file_batch = RecordBatch::try_new(schema.file_schema().clone(), columns)?;

            let buffer = self.buffers.entry(key.clone()).or_default();
            buffer.rows += file_batch.num_rows();
            buffer.batches.push(file_batch);
            if buffer.rows as u64 >= schema.options().write_buffer_rows {
                self.spill(key)?;
            }
        }
        Ok(())
    }

    /// Flush every buffer and return the APPEND change set covering all files
    /// written since the previous call.
    pub fn prepare_commit(&mut self) -> Result<ChangeSet> {
        let buffers: Vec<(BucketKey, WriteBuffer)> = std::mem::take(&mut self.buffers)
            .into_iter()
            .filter(|(_, b)| b.rows > 0)
            .collect();

        let writer = DataFileWriter::new(&self.table);
        let written = buffers
            .into_par_iter()
            .map(|((partition, bucket), buffer)| {
                writer.write_file(partition, bucket, &buffer.batches)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut added = std::mem::take(&mut self.flushed);
        added.extend(written);
        Ok(ChangeSet::append(added))
    }

    fn spill(&mut self, key: BucketKey) -> Result<()> {
        let Some(buffer) = self.buffers.remove(&key) else {
            return Ok(());
        };
        let (partition, bucket) = key;
        let entry = DataFileWriter::new(&self.table).write_file(partition, bucket, &buffer.batches)?;
        self.flushed.push(entry);
        Ok(())
    }

    /// Check names and types against the table schema and rebuild the batch with it.
    fn conform(&self, batch: &RecordBatch) -> Result<RecordBatch> {
        let expected = self.table.schema().arrow_schema();
        let actual = batch.schema();
        if actual.fields().len() != expected.fields().len() {
            return Err(Error::InvalidArgumentError(format!(
                "expected {} columns, got {}",
                expected.fields().len(),
                actual.fields().len()
            )));
        }
        for (want, got) in expected.fields().iter().zip(actual.fields()) {
            if want.name() != got.name() || want.data_type() != got.data_type() {
                return Err(Error::InvalidArgumentError(format!(
                    "column '{}: {}' does not match table field '{}: {}'",
                    got.name(),
                    got.data_type(),
                    want.name(),
                    want.data_type()
                )));
            }
        }
        RecordBatch::try_new(expected.clone(), batch.columns().to_vec()).map_err(|e| {
            Error::InvalidArgumentError(format!("batch does not fit table schema: {e}"))
        })
    }

    /// First free sequence number in a bucket: past both this writer's own rows
    /// and everything committed to the bucket as of the latest snapshot.
    fn next_sequence_for(&self, key: &BucketKey) -> u64 {
        let own = self.next_sequence.get(key).copied().unwrap_or(0);
        let committed = self.committed_sequence.get(key).map_or(0, |max| max + 1);
        own.max(committed)
    }

    /// Reload the committed per-bucket maxima when another commit has landed
    /// since they were last read.
    fn refresh_committed_sequences(&mut self) -> Result<()> {
        let latest = self.table.snapshot_manager().latest_snapshot_id()?;
        if self.committed_at == Some(latest) {
            return Ok(());
        }
        self.committed_sequence = match latest {
            Some(id) => self.restore_sequences(id)?,
            None => FxHashMap::default(),
        };
        self.committed_at = Some(latest);
        Ok(())
    }

    /// Highest committed sequence number per bucket in snapshot `id`.
    fn restore_sequences(&self, id: SnapshotId) -> Result<FxHashMap<BucketKey, u64>> {
        let snapshot = self.table.snapshot_manager().snapshot(id)?;
        let mut max_sequence = FxHashMap::default();
        for entry in live_entries_of(&self.table, &snapshot)? {
            let slot = max_sequence
                .entry((entry.partition, entry.bucket))
                .or_insert(0u64);
            *slot = (*slot).max(entry.file.max_sequence_number);
        }
        tracing::trace!(
            table = self.table.path(),
            snapshot_id = id,
            buckets = max_sequence.len(),
            "restored sequence numbers"
        );
        Ok(max_sequence)
    }
}

/// Bucket of a row from its encoded bucket key.
///
/// Bucket assignment is persisted in the file layout, so the hash must give the
/// same value on every host.
pub(crate) fn bucket_for(key: &[u8], bucket_count: u64) -> BucketId {
    (xxh3_64(key) % bucket_count.max(1)) as BucketId
}
