//! Scan planning: a pinned snapshot plus filters, resolved to per-bucket splits.

use crate::manifest::{DataFileMeta, ManifestEntry, ManifestFileMeta, merge_entries};
use crate::partition::{Partition, PartitionPredicate};
use crate::snapshot::Snapshot;
use crate::table::FileStoreTable;
use crate::types::{BucketId, SnapshotId};
use llkv_result::Result;
use llkv_storage::pager::Pager;
use std::collections::BTreeMap;

/// All live files of one (partition, bucket) at a pinned snapshot.
///
/// Files are ordered by ascending minimum sequence number, then manifest order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSplit {
    pub snapshot_id: SnapshotId,
    pub partition: Partition,
    pub bucket: BucketId,
    pub files: Vec<DataFileMeta>,
}

impl DataSplit {
    pub fn row_count(&self) -> u64 {
        self.files.iter().map(|f| f.row_count).sum()
    }
}

/// Result of planning a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Snapshot the plan was pinned to; `None` for a table without snapshots.
    pub snapshot_id: Option<SnapshotId>,
    /// Ordered by (partition, bucket).
    pub splits: Vec<DataSplit>,
}

/// Manifests that together describe the live files of `snapshot`.
pub(crate) fn snapshot_manifests<P: Pager>(
    table: &FileStoreTable<P>,
    snapshot: &Snapshot,
) -> Result<Vec<ManifestFileMeta>> {
    let store = table.manifest_store();
    let mut manifests = store.read_manifest_list(snapshot.base_manifest_list())?;
    manifests.extend(store.read_manifest_list(snapshot.delta_manifest_list())?);
    Ok(manifests)
}

/// Live files of `snapshot`, in the order they were added.
pub(crate) fn live_entries_of<P: Pager>(
    table: &FileStoreTable<P>,
    snapshot: &Snapshot,
) -> Result<Vec<ManifestEntry>> {
    let manifests = snapshot_manifests(table, snapshot)?;
    merge_entries(table.manifest_store().read_entries(&manifests)?)
}

pub struct TableScan<P: Pager> {
    table: FileStoreTable<P>,
    snapshot_id: Option<SnapshotId>,
    partition_filter: Option<PartitionPredicate>,
    bucket: Option<BucketId>,
}

impl<P: Pager> TableScan<P> {
    pub(crate) fn new(table: FileStoreTable<P>) -> Self {
        Self {
            table,
            snapshot_id: None,
            partition_filter: None,
            bucket: None,
        }
    }

    /// Pin the scan to snapshot `id` instead of the latest.
    pub fn with_snapshot(mut self, id: SnapshotId) -> Self {
        self.snapshot_id = Some(id);
        self
    }

    pub fn with_partition_filter(mut self, predicate: PartitionPredicate) -> Self {
        self.partition_filter = Some(predicate);
        self
    }

    pub fn with_bucket(mut self, bucket: BucketId) -> Self {
        self.bucket = Some(bucket);
        self
    }

    fn resolve_snapshot(&self) -> Result<Option<Snapshot>> {
        let manager = self.table.snapshot_manager();
        match self.snapshot_id {
            Some(id) => Ok(Some(manager.snapshot(id)?)),
            None => manager.latest_snapshot(),
        }
    }

    fn keep(&self, entry: &ManifestEntry) -> bool {
        self.bucket.is_none_or(|b| entry.bucket == b)
            && self
                .partition_filter
                .as_ref()
                .is_none_or(|p| p.matches(&entry.partition))
    }

    /// Live manifest entries selected by the filters, with the snapshot they were
    /// read from.
    pub fn live_entries(&self) -> Result<(Option<SnapshotId>, Vec<ManifestEntry>)> {
        let Some(snapshot) = self.resolve_snapshot()? else {
            return Ok((None, Vec::new()));
        };
        let mut entries = live_entries_of(&self.table, &snapshot)?;
        entries.retain(|e| self.keep(e));
        Ok((Some(snapshot.id()), entries))
    }

    /// Live files selected by the filters.
    pub fn live_files(&self) -> Result<Vec<DataFileMeta>> {
        Ok(self.live_entries()?.1.into_iter().map(|e| e.file).collect())
    }

    pub fn plan(&self) -> Result<Plan> {
        let (snapshot_id, entries) = self.live_entries()?;
        let Some(snapshot_id) = snapshot_id else {
            return Ok(Plan::default());
        };

        let mut grouped: BTreeMap<(Partition, BucketId), Vec<DataFileMeta>> = BTreeMap::new();
        for entry in entries {
            grouped
                .entry((entry.partition, entry.bucket))
                .or_default()
                .push(entry.file);
        }

        let splits: Vec<DataSplit> = grouped
            .into_iter()
            .map(|((partition, bucket), mut files)| {
                files.sort_by_key(|f| f.min_sequence_number);
                DataSplit {
                    snapshot_id,
                    partition,
                    bucket,
                    files,
                }
            })
            .collect();

        tracing::trace!(
            table = self.table.path(),
            snapshot_id,
            splits = splits.len(),
            "planned scan"
        );
        Ok(Plan {
            snapshot_id: Some(snapshot_id),
            splits,
        })
    }
}
