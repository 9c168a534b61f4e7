//! Compaction: rewriting the files of a split into one file holding the same
//! visible rows.
//!
//! Primary-key splits are merged with last-write-wins, so superseded versions and
//! deletes are dropped while surviving rows keep their sequence numbers.
//! Append-only splits are concatenated in file order.

use crate::commit::ChangeSet;
use crate::partition::PartitionPredicate;
use crate::scan::DataSplit;
use crate::snapshot::Snapshot;
use crate::table::FileStoreTable;
use crate::write::DataFileWriter;
use llkv_result::Result;
use llkv_storage::pager::Pager;
use rayon::prelude::*;

/// Which splits to compact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionStrategy {
    /// Every split with more than one file.
    Full,

    /// Splits with at least this many files.
    FileCountThreshold(usize),

    /// Splits with at least two files smaller than this many bytes.
    SizeThreshold(u64),
}

impl CompactionStrategy {
    pub fn should_compact(&self, split: &DataSplit) -> bool {
        match *self {
            CompactionStrategy::Full => split.files.len() > 1,
            CompactionStrategy::FileCountThreshold(n) => {
                split.files.len() > 1 && split.files.len() >= n
            }
            CompactionStrategy::SizeThreshold(bytes) => {
                split.files.iter().filter(|f| f.file_size < bytes).count() > 1
            }
        }
    }
}

pub struct TableCompaction<P: Pager> {
    table: FileStoreTable<P>,
    strategy: CompactionStrategy,
    partition_filter: Option<PartitionPredicate>,
    commit_user: String,
}

impl<P: Pager> TableCompaction<P> {
    pub fn new(table: &FileStoreTable<P>, strategy: CompactionStrategy) -> Self {
        Self {
            table: table.clone(),
            strategy,
            partition_filter: None,
            commit_user: "compaction".to_string(),
        }
    }

    pub fn with_partition_filter(mut self, predicate: PartitionPredicate) -> Self {
        self.partition_filter = Some(predicate);
        self
    }

    pub fn with_commit_user(mut self, commit_user: impl Into<String>) -> Self {
        self.commit_user = commit_user.into();
        self
    }

    /// Compact eligible splits of the latest snapshot and commit the result.
    ///
    /// Returns `None` when nothing qualified.
    pub fn compact(&self) -> Result<Option<Snapshot>> {
        let Some(latest) = self.table.snapshot_manager().latest_snapshot_id()? else {
            return Ok(None);
        };
        let mut scan = self.table.new_scan().with_snapshot(latest);
        if let Some(predicate) = &self.partition_filter {
            scan = scan.with_partition_filter(predicate.clone());
        }
        let (_, entries) = scan.live_entries()?;
        let plan = scan.plan()?;

        let splits: Vec<DataSplit> = plan
            .splits
            .into_iter()
            .filter(|s| self.strategy.should_compact(s))
            .collect();
        if splits.is_empty() {
            return Ok(None);
        }

        let removed = entries
            .into_iter()
            .filter(|e| {
                splits.iter().any(|s| {
                    s.partition == e.partition
                        && s.bucket == e.bucket
                        && s.files.iter().any(|f| f.file_name == e.file.file_name)
                })
            })
            .collect();

        let added = splits
            .into_par_iter()
            .map(|split| self.rewrite(split))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect();

        let snapshot = self
            .table
            .new_commit(self.commit_user.clone())
            .commit(ChangeSet::compact(removed, added), Some(latest))?;
        tracing::debug!(
            table = self.table.path(),
            snapshot_id = snapshot.id(),
            "compacted"
        );
        Ok(Some(snapshot))
    }

    fn rewrite(&self, split: DataSplit) -> Result<Option<crate::manifest::ManifestEntry>> {
        let partition = split.partition.clone();
        let bucket = split.bucket;
        let batches = self
            .table
            .new_read()
            .create_raw_reader(split)?
            .collect::<Result<Vec<_>>>()?;
        if batches.iter().all(|b| b.num_rows() == 0) {
            // Every key was deleted.
            return Ok(None);
        }
        DataFileWriter::new(&self.table)
            .write_file(partition, bucket, &batches)
            .map(Some)
    }
}
