//! Merge policies and the sorted-run merge used by primary-key tables.
//!
//! Primary keys are compared through Arrow's row format: the same [`KeyEncoder`]
//! sorts buffers before flush, records min/max keys in file metadata, and orders
//! the k-way merge at read time. The merge consumes each data file as a stream of
//! batches.

use crate::schema::TableSchema;
use crate::types::{ROW_KIND_COLUMN, RowKind, SEQUENCE_NUMBER_COLUMN};
use arrow::array::{Array, ArrayRef, AsArray, Int8Array, RecordBatch, UInt32Array, UInt64Array};
use arrow::compute::{interleave, take_record_batch};
use arrow::datatypes::{Int8Type, UInt64Type};
use arrow::row::{OwnedRow, RowConverter, Rows, SortField};
use llkv_result::{Error, Result};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// How rows of one (partition, bucket) combine into the visible result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Every written row is visible; duplicates are kept.
    AppendOnly,
    /// Last write wins per primary key; deletes remove the key.
    Deduplicate,
}

impl MergePolicy {
    pub fn for_schema(schema: &TableSchema) -> Self {
        if schema.has_primary_key() {
            MergePolicy::Deduplicate
        } else {
            MergePolicy::AppendOnly
        }
    }

    /// Whether rows of `kind` may be written under this policy.
    pub fn accepts(&self, kind: RowKind) -> bool {
        match self {
            MergePolicy::AppendOnly => kind == RowKind::Insert,
            MergePolicy::Deduplicate => true,
        }
    }

    pub fn validate_kinds(&self, kinds: &[RowKind]) -> Result<()> {
        if let Some(kind) = kinds.iter().find(|k| !self.accepts(**k)) {
            return Err(Error::InvalidArgumentError(format!(
                "append-only tables only accept {} rows, got {kind}",
                RowKind::Insert
            )));
        }
        Ok(())
    }
}

/// Encodes primary-key columns into byte-comparable rows.
pub struct KeyEncoder {
    converter: RowConverter,
    indices: Vec<usize>,
}

impl KeyEncoder {
    pub fn for_primary_key(schema: &TableSchema) -> Result<Self> {
        Self::new(schema, schema.primary_key_indices())
    }

    pub fn for_bucket_key(schema: &TableSchema) -> Result<Self> {
        Self::new(schema, schema.bucket_key_indices())
    }

    fn new(schema: &TableSchema, indices: &[usize]) -> Result<Self> {
        let fields = indices
            .iter()
            .map(|&idx| SortField::new(schema.arrow_schema().field(idx).data_type().clone()))
            .collect();
        Ok(Self {
            converter: RowConverter::new(fields)?,
            indices: indices.to_vec(),
        })
    }

    /// Encode the key columns of `batch`. Key columns are addressed by their
    /// position in the user schema, which is a prefix of the file schema.
    pub fn encode(&self, batch: &RecordBatch) -> Result<Rows> {
        let columns: Vec<ArrayRef> = self
            .indices
            .iter()
            .map(|&idx| batch.column(idx).clone())
            .collect();
        Ok(self.converter.convert_columns(&columns)?)
    }
}

fn sequence_column(batch: &RecordBatch) -> Result<&UInt64Array> {
    let idx = batch.schema().index_of(SEQUENCE_NUMBER_COLUMN)?;
    batch
        .column(idx)
        .as_primitive_opt::<UInt64Type>()
        .ok_or_else(|| Error::Internal(format!("{SEQUENCE_NUMBER_COLUMN} is not UInt64")))
}

fn row_kind_column(batch: &RecordBatch) -> Result<&Int8Array> {
    let idx = batch.schema().index_of(ROW_KIND_COLUMN)?;
    batch
        .column(idx)
        .as_primitive_opt::<Int8Type>()
        .ok_or_else(|| Error::Internal(format!("{ROW_KIND_COLUMN} is not Int8")))
}

/// Stable sort of a file-schema batch by (primary key, sequence number).
pub fn sort_by_key_and_sequence(batch: &RecordBatch, encoder: &KeyEncoder) -> Result<RecordBatch> {
    let keys = encoder.encode(batch)?;
    let sequences = sequence_column(batch)?;
    let mut order: Vec<u32> = (0..batch.num_rows() as u32).collect();
    order.sort_by(|&a, &b| {
        keys.row(a as usize)
            .cmp(&keys.row(b as usize))
            .then_with(|| sequences.value(a as usize).cmp(&sequences.value(b as usize)))
    });
    if order.iter().enumerate().all(|(i, &o)| i as u32 == o) {
        return Ok(batch.clone());
    }
    Ok(take_record_batch(batch, &UInt32Array::from(order))?)
}

/// Batches of one data file, in file order. Each run is sorted by
/// (primary key, sequence number) across batch boundaries.
pub type RunSource = Box<dyn Iterator<Item = Result<RecordBatch>> + Send>;

/// A decoded batch of some run, with its encoded keys.
struct LoadedBatch {
    batch: RecordBatch,
    keys: Rows,
}

struct RunState {
    source: RunSource,
    /// Slot in `MergeIterator::loaded` of the batch the run's cursor points into.
    slot: Option<usize>,
}

#[derive(Debug)]
struct Cursor {
    key: OwnedRow,
    sequence: u64,
    run: usize,
    slot: usize,
    row: usize,
}

impl PartialEq for Cursor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Cursor {}

impl PartialOrd for Cursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cursor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then(self.sequence.cmp(&other.sequence))
            .then(self.run.cmp(&other.run))
            .then(self.row.cmp(&other.row))
    }
}

/// K-way merge over sorted runs with last-write-wins collapse.
///
/// For each key the version with the highest sequence number wins, and between
/// equal sequence numbers the later run wins. A winning `-U`/`-D` removes the key.
/// Output batches keep the file schema (system columns included) and hold at most
/// `batch_rows` rows.
///
/// Runs are pulled one batch at a time. Besides the batch each run is positioned
/// in, only batches still referenced by the output being assembled stay loaded.
pub struct MergeIterator {
    encoder: KeyEncoder,
    runs: Vec<RunState>,
    loaded: Vec<LoadedBatch>,
    heap: BinaryHeap<Reverse<Cursor>>,
    batch_rows: usize,
    failed: bool,
}

impl MergeIterator {
    pub fn new(sources: Vec<RunSource>, encoder: KeyEncoder, batch_rows: usize) -> Result<Self> {
        let mut merge = Self {
            encoder,
            runs: sources
                .into_iter()
                .map(|source| RunState { source, slot: None })
                .collect(),
            loaded: Vec::new(),
            heap: BinaryHeap::new(),
            batch_rows: batch_rows.max(1),
            failed: false,
        };
        for run in 0..merge.runs.len() {
            merge.load_next(run)?;
        }
        Ok(merge)
    }

    /// Pull the next non-empty batch of `run` and put its first row on the heap.
    fn load_next(&mut self, run: usize) -> Result<()> {
        self.runs[run].slot = None;
        while let Some(batch) = self.runs[run].source.next() {
            let batch = batch?;
            if batch.num_rows() == 0 {
                continue;
            }
            let keys = self.encoder.encode(&batch)?;
            let slot = self.loaded.len();
            self.loaded.push(LoadedBatch { batch, keys });
            self.runs[run].slot = Some(slot);
            let cursor = self.cursor(run, slot, 0)?;
            self.heap.push(Reverse(cursor));
            break;
        }
        Ok(())
    }

    fn cursor(&self, run: usize, slot: usize, row: usize) -> Result<Cursor> {
        let loaded = &self.loaded[slot];
        Ok(Cursor {
            key: loaded.keys.row(row).owned(),
            sequence: sequence_column(&loaded.batch)?.value(row),
            run,
            slot,
            row,
        })
    }

    fn advance(&mut self, cursor: &Cursor) -> Result<()> {
        let next = cursor.row + 1;
        if next < self.loaded[cursor.slot].batch.num_rows() {
            let next = self.cursor(cursor.run, cursor.slot, next)?;
            self.heap.push(Reverse(next));
            Ok(())
        } else {
            self.load_next(cursor.run)
        }
    }

    /// Pop every version of the smallest key and return the winner as
    /// (slot, row).
    fn next_winner(&mut self) -> Result<Option<(usize, usize)>> {
        while let Some(Reverse(first)) = self.heap.pop() {
            let mut winner = (first.slot, first.row);
            self.advance(&first)?;
            while let Some(Reverse(top)) = self.heap.peek() {
                if top.key != first.key {
                    break;
                }
                let Some(Reverse(same)) = self.heap.pop() else {
                    break;
                };
                winner = (same.slot, same.row);
                self.advance(&same)?;
            }

            let kinds = row_kind_column(&self.loaded[winner.0].batch)?;
            if RowKind::from_byte(kinds.value(winner.1))?.is_add() {
                return Ok(Some(winner));
            }
        }
        Ok(None)
    }

    fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        let mut picks = Vec::with_capacity(self.batch_rows.min(1024));
        while picks.len() < self.batch_rows {
            match self.next_winner()? {
                Some(pick) => picks.push(pick),
                None => break,
            }
        }
        if picks.is_empty() {
            self.loaded.clear();
            return Ok(None);
        }

        let schema = self.loaded[picks[0].0].batch.schema();
        let mut columns = Vec::with_capacity(schema.fields().len());
        for col in 0..schema.fields().len() {
            let sources: Vec<&dyn Array> = self
                .loaded
                .iter()
                .map(|loaded| loaded.batch.column(col).as_ref())
                .collect();
            columns.push(interleave(&sources, &picks)?);
        }
        let output = RecordBatch::try_new(schema, columns)?;
        self.release_consumed();
        Ok(Some(output))
    }

    /// Drop loaded batches no run is positioned in any more and renumber the rest.
    fn release_consumed(&mut self) {
        let mut remap = vec![None; self.loaded.len()];
        let mut kept = Vec::with_capacity(self.runs.len());
        let mut loaded: Vec<Option<LoadedBatch>> =
            std::mem::take(&mut self.loaded).into_iter().map(Some).collect();
        for run in &mut self.runs {
            if let Some(slot) = run.slot
                && let Some(batch) = loaded[slot].take()
            {
                remap[slot] = Some(kept.len());
                run.slot = Some(kept.len());
                kept.push(batch);
            }
        }
        self.loaded = kept;
        self.heap = std::mem::take(&mut self.heap)
            .into_iter()
            .filter_map(|Reverse(mut cursor)| {
                cursor.slot = remap[cursor.slot]?;
                Some(Reverse(cursor))
            })
            .collect();
    }
}

impl Iterator for MergeIterator {
    type Item = Result<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_batch() {
            Ok(batch) => batch.map(Ok),
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}
