//! Commit coordination: publishing change sets as snapshots.
//!
//! Data files and manifests are written under fresh unique names first; the only
//! step that can race is creating `snapshot-<id>`. A commit that loses the race
//! re-reads the latest snapshot, re-validates its change set against it, and tries
//! the next id.

use crate::manifest::{FileIdentifier, ManifestEntry, ManifestFileMeta};
use crate::scan::snapshot_manifests;
use crate::snapshot::Snapshot;
use crate::table::FileStoreTable;
use crate::types::{BATCH_COMMIT_IDENTIFIER, CommitKind, SnapshotId, now_millis};
use llkv_result::{Error, Result};
use llkv_storage::PhysicalKey;
use llkv_storage::pager::Pager;
use rustc_hash::FxHashSet;

/// Files added and removed by one commit.
///
/// Entries are always the `Add` form of the file; the committer records removals
/// as deletions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    commit_kind: CommitKind,
    added: Vec<ManifestEntry>,
    removed: Vec<ManifestEntry>,
    commit_identifier: u64,
}

impl ChangeSet {
    pub fn append(added: Vec<ManifestEntry>) -> Self {
        Self {
            commit_kind: CommitKind::Append,
            added,
            removed: Vec::new(),
            commit_identifier: BATCH_COMMIT_IDENTIFIER,
        }
    }

    pub fn overwrite(removed: Vec<ManifestEntry>, added: Vec<ManifestEntry>) -> Self {
        Self {
            commit_kind: CommitKind::Overwrite,
            added,
            removed,
            commit_identifier: BATCH_COMMIT_IDENTIFIER,
        }
    }

    pub fn compact(removed: Vec<ManifestEntry>, added: Vec<ManifestEntry>) -> Self {
        Self {
            commit_kind: CommitKind::Compact,
            added,
            removed,
            commit_identifier: BATCH_COMMIT_IDENTIFIER,
        }
    }

    /// Tag the commit with a caller-chosen identifier, e.g. a checkpoint id.
    pub fn with_commit_identifier(mut self, identifier: u64) -> Self {
        self.commit_identifier = identifier;
        self
    }

    pub fn commit_kind(&self) -> CommitKind {
        self.commit_kind
    }

    pub fn added(&self) -> &[ManifestEntry] {
        &self.added
    }

    pub fn removed(&self) -> &[ManifestEntry] {
        &self.removed
    }

    pub fn commit_identifier(&self) -> u64 {
        self.commit_identifier
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    fn validate(&self) -> Result<()> {
        let shape_error = |msg: &str| {
            Err(Error::InvalidArgumentError(format!(
                "{} commit {msg}",
                self.commit_kind
            )))
        };
        match self.commit_kind {
            CommitKind::Append if self.added.is_empty() => shape_error("adds no files"),
            CommitKind::Append if !self.removed.is_empty() => shape_error("cannot remove files"),
            CommitKind::Overwrite if self.is_empty() => shape_error("changes nothing"),
            CommitKind::Compact if self.removed.is_empty() => shape_error("removes no files"),
            _ => Ok(()),
        }
    }

    fn delta_entries(&self) -> Vec<ManifestEntry> {
        self.removed
            .iter()
            .map(ManifestEntry::to_delete)
            .chain(self.added.iter().cloned())
            .collect()
    }

    fn delta_record_count(&self) -> i64 {
        let added: u64 = self.added.iter().map(|e| e.file.row_count).sum();
        let removed: u64 = self.removed.iter().map(|e| e.file.row_count).sum();
        added as i64 - removed as i64
    }
}

/// Publishes change sets for one commit user.
pub struct TableCommit<P: Pager> {
    table: FileStoreTable<P>,
    commit_user: String,
}

impl<P: Pager> TableCommit<P> {
    pub(crate) fn new(table: FileStoreTable<P>, commit_user: String) -> Self {
        Self { table, commit_user }
    }

    pub fn commit_user(&self) -> &str {
        &self.commit_user
    }

    /// Commit an APPEND change set against whatever snapshot is latest.
    ///
    /// Returns `None` without touching storage when there is nothing to add.
    pub fn commit_append(&self, change_set: ChangeSet) -> Result<Option<Snapshot>> {
        if change_set.is_empty() {
            tracing::debug!(table = self.table.path(), "skipping empty append");
            return Ok(None);
        }
        let base = self.table.snapshot_manager().latest_snapshot_id()?;
        self.commit(change_set, base).map(Some)
    }

    /// Publish `change_set` as the next snapshot.
    ///
    /// `expected_base` is the snapshot the change set was computed against. If a
    /// different snapshot is latest by now, APPEND rebases onto it, COMPACT rebases
    /// only while every file it removes is still live, and OVERWRITE fails with
    /// [`Error::CommitConflict`].
    pub fn commit(
        &self,
        change_set: ChangeSet,
        expected_base: Option<SnapshotId>,
    ) -> Result<Snapshot> {
        change_set.validate()?;

        let manager = self.table.snapshot_manager();
        let store = self.table.manifest_store();
        let options = self.table.options();
        let max_attempts = options.commit_max_retries as usize + 1;

        let delta = store.write_manifest(&change_set.delta_entries())?;

        for attempt in 0..max_attempts {
            let latest = manager.latest_snapshot()?;
            let latest_id = latest.as_ref().map(Snapshot::id);

            if latest_id != expected_base {
                match change_set.commit_kind {
                    CommitKind::Overwrite => {
                        store.discard(std::slice::from_ref(&delta.key));
                        return Err(Error::CommitConflict(format!(
                            "OVERWRITE computed against snapshot {expected_base:?} but latest is {latest_id:?}"
                        )));
                    }
                    _ => tracing::trace!(
                        ?expected_base,
                        ?latest_id,
                        kind = %change_set.commit_kind,
                        "rebasing commit"
                    ),
                }
            }

            let base_manifests = match &latest {
                Some(snapshot) => snapshot_manifests(&self.table, snapshot)?,
                None => Vec::new(),
            };
            let live = crate::manifest::merge_entries(store.read_entries(&base_manifests)?)?;
            if let Err(err) = check_against(&change_set, &live) {
                store.discard(std::slice::from_ref(&delta.key));
                return Err(err);
            }

            let mut unpublished: Vec<PhysicalKey> = Vec::new();
            let attempt_result = self.try_commit_once(
                &change_set,
                latest.as_ref(),
                base_manifests,
                &live,
                &delta,
                &mut unpublished,
            );
            match attempt_result {
                Ok(Some(snapshot)) => {
                    tracing::debug!(
                        table = self.table.path(),
                        snapshot_id = snapshot.id(),
                        kind = %snapshot.commit_kind(),
                        user = %self.commit_user,
                        added = change_set.added.len(),
                        removed = change_set.removed.len(),
                        attempt,
                        "committed snapshot"
                    );
                    return Ok(snapshot);
                }
                Ok(None) => {
                    tracing::warn!(
                        table = self.table.path(),
                        base = ?latest_id,
                        attempt,
                        "lost snapshot race, retrying"
                    );
                    store.discard(&unpublished);
                }
                Err(err) => {
                    store.discard(&unpublished);
                    store.discard(std::slice::from_ref(&delta.key));
                    return Err(err);
                }
            }
        }

        store.discard(std::slice::from_ref(&delta.key));
        Err(Error::CommitConflict(format!(
            "gave up after {max_attempts} attempts racing concurrent commits"
        )))
    }

    /// Write manifest lists for one attempt and try to publish. `Ok(None)` means
    /// another commit took the id.
    fn try_commit_once(
        &self,
        change_set: &ChangeSet,
        latest: Option<&Snapshot>,
        mut base_manifests: Vec<ManifestFileMeta>,
        live: &[ManifestEntry],
        delta: &ManifestFileMeta,
        unpublished: &mut Vec<PhysicalKey>,
    ) -> Result<Option<Snapshot>> {
        let store = self.table.manifest_store();
        let options = self.table.options();

        if base_manifests.len() >= options.manifest_merge_min_count as usize {
            let before = base_manifests.len();
            base_manifests = if live.is_empty() {
                Vec::new()
            } else {
                let merged = store.write_manifest(live)?;
                unpublished.push(merged.key.clone());
                vec![merged]
            };
            tracing::debug!(
                table = self.table.path(),
                before,
                after = base_manifests.len(),
                "merged manifests"
            );
        }

        let base_manifest_list = store.write_manifest_list(&base_manifests)?;
        unpublished.push(base_manifest_list.clone());
        let delta_manifest_list = store.write_manifest_list(std::slice::from_ref(delta))?;
        unpublished.push(delta_manifest_list.clone());

        let live_rows: u64 = live.iter().map(|e| e.file.row_count).sum();
        let delta_record_count = change_set.delta_record_count();
        let snapshot = Snapshot {
            id: latest.map_or(1, |s| s.id() + 1),
            schema_id: self.table.schema().id(),
            base_manifest_list,
            delta_manifest_list,
            commit_user: self.commit_user.clone(),
            commit_identifier: change_set.commit_identifier,
            commit_kind: change_set.commit_kind,
            time_millis: now_millis(),
            total_record_count: (live_rows as i64 + delta_record_count).max(0) as u64,
            delta_record_count,
        };

        if self.table.snapshot_manager().try_publish(&snapshot)? {
            Ok(Some(snapshot))
        } else {
            Ok(None)
        }
    }
}

/// Removed files must be live in the base; added files must not be.
fn check_against(change_set: &ChangeSet, live: &[ManifestEntry]) -> Result<()> {
    let live_ids: FxHashSet<FileIdentifier> = live.iter().map(ManifestEntry::identifier).collect();
    if let Some(missing) = change_set
        .removed
        .iter()
        .find(|e| !live_ids.contains(&e.identifier()))
    {
        return Err(Error::CommitConflict(format!(
            "{} commit removes '{}' which is no longer live",
            change_set.commit_kind, missing.file.file_name
        )));
    }
    if let Some(duplicate) = change_set
        .added
        .iter()
        .find(|e| live_ids.contains(&e.identifier()))
    {
        return Err(Error::CommitConflict(format!(
            "{} commit adds '{}' which is already live",
            change_set.commit_kind, duplicate.file.file_name
        )));
    }
    Ok(())
}
