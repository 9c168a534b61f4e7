//! Reading splits into logical rows.

use crate::merge::{KeyEncoder, MergeIterator, MergePolicy, RunSource};
use crate::reader::open_parquet_reader;
use crate::scan::DataSplit;
use crate::table::FileStoreTable;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use llkv_result::{Error, Result};
use llkv_storage::PhysicalKey;
use llkv_storage::pager::{BatchGet, GetResult, Pager};
use parquet::arrow::arrow_reader::ParquetRecordBatchReader;
use std::collections::VecDeque;
use std::vec;

pub struct TableRead<P: Pager> {
    table: FileStoreTable<P>,
}

impl<P: Pager> TableRead<P> {
    pub(crate) fn new(table: FileStoreTable<P>) -> Self {
        Self { table }
    }

    /// Lazily read one split, consuming it.
    pub fn create_reader(&self, split: DataSplit) -> Result<SplitReader<P>> {
        self.reader(split, false)
    }

    /// Reader that keeps the system columns, for rewriting files.
    pub(crate) fn create_raw_reader(&self, split: DataSplit) -> Result<SplitReader<P>> {
        self.reader(split, true)
    }

    fn reader(&self, split: DataSplit, keep_system_columns: bool) -> Result<SplitReader<P>> {
        let schema = self.table.schema();
        let output_schema = if keep_system_columns {
            schema.file_schema().clone()
        } else {
            schema.arrow_schema().clone()
        };
        let batch_rows = schema.options().read_batch_rows as usize;
        let keys: Vec<PhysicalKey> = split
            .files
            .iter()
            .map(|f| {
                self.table
                    .layout()
                    .data_file_key(schema, &split.partition, split.bucket, &f.file_name)
            })
            .collect();

        let source = match self.table.merge_policy() {
            MergePolicy::AppendOnly => Source::Append {
                pending: keys.into(),
                current: None,
            },
            MergePolicy::Deduplicate => {
                let encoder = KeyEncoder::for_primary_key(schema)?;
                let runs = self
                    .fetch_all(&keys)?
                    .into_iter()
                    .map(|bytes| {
                        let reader = open_parquet_reader(bytes, batch_rows)?;
                        Ok(Box::new(reader.map(|batch| batch.map_err(Error::from))) as RunSource)
                    })
                    .collect::<Result<Vec<_>>>()?;
                Source::Merge(MergeIterator::new(runs, encoder, batch_rows)?)
            }
        };

        Ok(SplitReader {
            table: self.table.clone(),
            source,
            output_schema,
            batch_rows,
            done: false,
        })
    }

    fn fetch_all(&self, keys: &[PhysicalKey]) -> Result<Vec<bytes::Bytes>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let gets: Vec<BatchGet> = keys
            .iter()
            .map(|key| BatchGet::Raw { key: key.clone() })
            .collect();
        self.table
            .pager()
            .batch_get(&gets)?
            .into_iter()
            .map(|result| match result {
                GetResult::Raw { bytes, .. } => Ok(bytes.into()),
                GetResult::Missing { key } => Err(Error::NotFound(format!("data file '{key}'"))),
            })
            .collect()
    }

    /// Lazily read splits one after another, consuming them.
    pub fn read_splits(&self, splits: Vec<DataSplit>) -> PlanReader<P> {
        PlanReader {
            read: TableRead::new(self.table.clone()),
            splits: splits.into_iter(),
            current: None,
            failed: false,
        }
    }

    /// Plan the latest snapshot and collect every visible row.
    pub fn read_all(&self) -> Result<Vec<RecordBatch>> {
        let plan = self.table.new_scan().plan()?;
        self.read_splits(plan.splits).collect()
    }
}

enum Source {
    Append {
        pending: VecDeque<PhysicalKey>,
        current: Option<ParquetRecordBatchReader>,
    },
    Merge(MergeIterator),
}

/// Lazy, finite iterator over the visible rows of one split.
pub struct SplitReader<P: Pager> {
    table: FileStoreTable<P>,
    source: Source,
    output_schema: SchemaRef,
    batch_rows: usize,
    done: bool,
}

impl<P: Pager> SplitReader<P> {
    pub fn schema(&self) -> &SchemaRef {
        &self.output_schema
    }

    fn next_raw(&mut self) -> Result<Option<RecordBatch>> {
        match &mut self.source {
            Source::Merge(merge) => merge.next().transpose(),
            Source::Append { pending, current } => loop {
                if let Some(reader) = current {
                    match reader.next() {
                        Some(batch) => return Ok(Some(batch?)),
                        None => *current = None,
                    }
                }
                let Some(key) = pending.pop_front() else {
                    return Ok(None);
                };
                let bytes = self.table.read_file_bytes(&key)?;
                *current = Some(open_parquet_reader(bytes, self.batch_rows)?);
            },
        }
    }

    fn project(&self, batch: RecordBatch) -> Result<RecordBatch> {
        let width = self.output_schema.fields().len();
        let columns = batch.columns()[..width].to_vec();
        Ok(RecordBatch::try_new(self.output_schema.clone(), columns)?)
    }
}

impl<P: Pager> Iterator for SplitReader<P> {
    type Item = Result<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.next_raw() {
                Ok(Some(batch)) if batch.num_rows() == 0 => continue,
                Ok(Some(batch)) => return Some(self.project(batch)),
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

/// Lazy iterator over several splits in order.
pub struct PlanReader<P: Pager> {
    read: TableRead<P>,
    splits: vec::IntoIter<DataSplit>,
    current: Option<SplitReader<P>>,
    failed: bool,
}

impl<P: Pager> Iterator for PlanReader<P> {
    type Item = Result<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Some(reader) = &mut self.current {
                match reader.next() {
                    Some(Ok(batch)) => return Some(Ok(batch)),
                    Some(Err(err)) => {
                        self.failed = true;
                        return Some(Err(err));
                    }
                    None => self.current = None,
                }
            }
            let split = self.splits.next()?;
            match self.read.create_reader(split) {
                Ok(reader) => self.current = Some(reader),
                Err(err) => {
                    self.failed = true;
                    return Some(Err(err));
                }
            }
        }
    }
}
