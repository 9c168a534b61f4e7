//! The snapshot chain and read access to it.
//!
//! Snapshot `n` is published by creating `snapshot/snapshot-n` with
//! [`Pager::put_if_absent`], so at most one writer wins each id and readers only
//! ever see complete snapshots. The `LATEST` / `EARLIEST` blobs are hints that may
//! lag behind the chain.

use crate::layout::{FileLayout, SNAPSHOT_PREFIX, parse_id_suffix};
use crate::types::{CommitKind, SchemaId, SnapshotId};
use llkv_result::{Error, Result};
use llkv_storage::PhysicalKey;
use llkv_storage::pager::Pager;
use std::sync::Arc;

/// Immutable record of the table state after one commit.
#[derive(Debug, Clone, PartialEq, Eq, bitcode::Encode, bitcode::Decode)]
pub struct Snapshot {
    pub(crate) id: SnapshotId,
    pub(crate) schema_id: SchemaId,
    pub(crate) base_manifest_list: PhysicalKey,
    pub(crate) delta_manifest_list: PhysicalKey,
    pub(crate) commit_user: String,
    pub(crate) commit_identifier: u64,
    pub(crate) commit_kind: CommitKind,
    pub(crate) time_millis: u64,
    pub(crate) total_record_count: u64,
    pub(crate) delta_record_count: i64,
}

impl Snapshot {
    pub fn id(&self) -> SnapshotId {
        self.id
    }

    pub fn schema_id(&self) -> SchemaId {
        self.schema_id
    }

    /// Manifest list describing every file live in the parent snapshot.
    pub fn base_manifest_list(&self) -> &str {
        &self.base_manifest_list
    }

    /// Manifest list holding this snapshot's own change set.
    pub fn delta_manifest_list(&self) -> &str {
        &self.delta_manifest_list
    }

    pub fn commit_user(&self) -> &str {
        &self.commit_user
    }

    pub fn commit_identifier(&self) -> u64 {
        self.commit_identifier
    }

    pub fn commit_kind(&self) -> CommitKind {
        self.commit_kind
    }

    pub fn time_millis(&self) -> u64 {
        self.time_millis
    }

    /// Rows in all live files, counting every stored row version.
    pub fn total_record_count(&self) -> u64 {
        self.total_record_count
    }

    /// Rows added minus rows removed by this commit.
    pub fn delta_record_count(&self) -> i64 {
        self.delta_record_count
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        bitcode::encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bitcode::decode(bytes).map_err(|e| Error::internal("decode snapshot", e))
    }
}

/// Read-only view over the snapshot chain, plus publication for the committer.
pub struct SnapshotManager<P: Pager> {
    pager: Arc<P>,
    layout: FileLayout,
}

impl<P: Pager> Clone for SnapshotManager<P> {
    fn clone(&self) -> Self {
        Self {
            pager: Arc::clone(&self.pager),
            layout: self.layout.clone(),
        }
    }
}

impl<P: Pager> SnapshotManager<P> {
    pub fn new(pager: Arc<P>, layout: FileLayout) -> Self {
        Self { pager, layout }
    }

    pub fn snapshot_exists(&self, id: SnapshotId) -> Result<bool> {
        self.pager.contains_key(&self.layout.snapshot_key(id))
    }

    /// Load snapshot `id`; `NotFound` if it was never committed.
    pub fn snapshot(&self, id: SnapshotId) -> Result<Snapshot> {
        let key = self.layout.snapshot_key(id);
        let blob = self
            .pager
            .get(&key)?
            .ok_or_else(|| Error::NotFound(format!("snapshot {id} of '{}'", self.layout.root())))?;
        Snapshot::from_bytes(blob.as_ref())
    }

    /// Highest committed snapshot id, `None` for an empty table.
    pub fn latest_snapshot_id(&self) -> Result<Option<SnapshotId>> {
        if let Some(hint) = self.read_hint(&self.layout.latest_hint_key())?
            && self.snapshot_exists(hint)?
        {
            let mut id = hint;
            while self.snapshot_exists(id + 1)? {
                id += 1;
            }
            return Ok(Some(id));
        }
        Ok(self.list_ids()?.into_iter().max())
    }

    /// Lowest retained snapshot id, `None` for an empty table.
    pub fn earliest_snapshot_id(&self) -> Result<Option<SnapshotId>> {
        if let Some(hint) = self.read_hint(&self.layout.earliest_hint_key())?
            && self.snapshot_exists(hint)?
        {
            return Ok(Some(hint));
        }
        Ok(self.list_ids()?.into_iter().min())
    }

    pub fn latest_snapshot(&self) -> Result<Option<Snapshot>> {
        match self.latest_snapshot_id()? {
            Some(id) => Ok(Some(self.snapshot(id)?)),
            None => Ok(None),
        }
    }

    /// Every retained snapshot, ascending by id.
    pub fn snapshots(&self) -> Result<impl Iterator<Item = Result<Snapshot>> + '_> {
        let mut ids = self.list_ids()?;
        ids.sort_unstable();
        Ok(ids.into_iter().map(move |id| self.snapshot(id)))
    }

    /// Attempt to publish `snapshot` as the next link of the chain.
    ///
    /// Returns `false` when another commit already took the id.
    pub(crate) fn try_publish(&self, snapshot: &Snapshot) -> Result<bool> {
        let key = self.layout.snapshot_key(snapshot.id);
        if !self.pager.put_if_absent(&key, snapshot.to_bytes())? {
            return Ok(false);
        }
        self.write_hint(&self.layout.latest_hint_key(), snapshot.id);
        if snapshot.id == 1 {
            self.write_hint(&self.layout.earliest_hint_key(), snapshot.id);
        }
        Ok(true)
    }

    fn list_ids(&self) -> Result<Vec<SnapshotId>> {
        Ok(self
            .pager
            .enumerate_keys(&self.layout.snapshot_prefix())?
            .iter()
            .filter_map(|key| parse_id_suffix(key, SNAPSHOT_PREFIX))
            .collect())
    }

    fn read_hint(&self, key: &str) -> Result<Option<SnapshotId>> {
        let Some(blob) = self.pager.get(key)? else {
            return Ok(None);
        };
        Ok(std::str::from_utf8(blob.as_ref())
            .ok()
            .and_then(|text| text.trim().parse().ok()))
    }

    fn write_hint(&self, key: &str, id: SnapshotId) {
        if let Err(err) = self.pager.put(key, id.to_string().into_bytes()) {
            tracing::warn!(key, snapshot_id = id, error = %err, "failed to update snapshot hint");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llkv_storage::pager::MemPager;

    fn snapshot(id: SnapshotId) -> Snapshot {
        Snapshot {
            id,
            schema_id: 0,
            base_manifest_list: format!("t/manifest/base-{id}"),
            delta_manifest_list: format!("t/manifest/delta-{id}"),
            commit_user: "tester".into(),
            commit_identifier: id,
            commit_kind: CommitKind::Append,
            time_millis: 0,
            total_record_count: id,
            delta_record_count: 1,
        }
    }

    #[test]
    fn test_empty_chain() {
        let manager = SnapshotManager::new(Arc::new(MemPager::new()), FileLayout::new("t"));
        assert_eq!(manager.latest_snapshot_id().unwrap(), None);
        assert_eq!(manager.earliest_snapshot_id().unwrap(), None);
        assert!(manager.latest_snapshot().unwrap().is_none());
        assert!(matches!(manager.snapshot(1), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_publish_is_exclusive_per_id() {
        let manager = SnapshotManager::new(Arc::new(MemPager::new()), FileLayout::new("t"));
        assert!(manager.try_publish(&snapshot(1)).unwrap());
        assert!(!manager.try_publish(&snapshot(1)).unwrap());
        assert!(manager.try_publish(&snapshot(2)).unwrap());

        assert_eq!(manager.latest_snapshot_id().unwrap(), Some(2));
        assert_eq!(manager.earliest_snapshot_id().unwrap(), Some(1));
        let ids: Vec<_> = manager
            .snapshots()
            .unwrap()
            .map(|s| s.unwrap().id())
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_latest_walks_past_stale_hint() {
        let pager = Arc::new(MemPager::new());
        let layout = FileLayout::new("t");
        let manager = SnapshotManager::new(Arc::clone(&pager), layout.clone());
        for id in 1..=3 {
            manager.try_publish(&snapshot(id)).unwrap();
        }
        pager.put(&layout.latest_hint_key(), b"1".to_vec()).unwrap();
        assert_eq!(manager.latest_snapshot_id().unwrap(), Some(3));

        pager
            .free_many(&[layout.latest_hint_key(), layout.earliest_hint_key()])
            .unwrap();
        assert_eq!(manager.latest_snapshot_id().unwrap(), Some(3));
        assert_eq!(manager.earliest_snapshot_id().unwrap(), Some(1));
    }
}
