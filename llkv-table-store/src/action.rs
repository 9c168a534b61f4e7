//! Partition-scoped rewrites: dropping partitions.

use crate::commit::ChangeSet;
use crate::partition::{Partition, PartitionPredicate};
use crate::snapshot::Snapshot;
use crate::table::FileStoreTable;
use crate::types::SnapshotId;
use llkv_result::{Error, Result};
use llkv_storage::pager::Pager;
use std::collections::{BTreeSet, HashMap};

/// Commit user recorded by actions that were not given one.
pub const DEFAULT_ACTION_USER: &str = "action";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropPartitionOutcome {
    /// An OVERWRITE snapshot removed every file of `partitions`.
    Dropped {
        snapshot: Snapshot,
        partitions: Vec<Partition>,
    },
    /// No live file matched; no snapshot was created.
    NoMatch { latest: Option<SnapshotId> },
}

impl DropPartitionOutcome {
    pub fn snapshot(&self) -> Option<&Snapshot> {
        match self {
            DropPartitionOutcome::Dropped { snapshot, .. } => Some(snapshot),
            DropPartitionOutcome::NoMatch { .. } => None,
        }
    }
}

/// Empties every partition matched by a list of partition specifications.
///
/// Partitions not matched keep exactly the files they had. Concurrent commits
/// that land between planning and committing make the action re-plan against the
/// new latest snapshot.
pub struct DropPartitionAction<P: Pager> {
    table: FileStoreTable<P>,
    specs: Vec<HashMap<String, String>>,
    commit_user: String,
}

impl<P: Pager> DropPartitionAction<P> {
    pub fn new(table: &FileStoreTable<P>, specs: Vec<HashMap<String, String>>) -> Self {
        Self {
            table: table.clone(),
            specs,
            commit_user: DEFAULT_ACTION_USER.to_string(),
        }
    }

    pub fn with_commit_user(mut self, commit_user: impl Into<String>) -> Self {
        self.commit_user = commit_user.into();
        self
    }

    pub fn run(&self) -> Result<DropPartitionOutcome> {
        let predicate = PartitionPredicate::from_specs(self.table.schema(), &self.specs)?;
        let commit = self.table.new_commit(self.commit_user.clone());
        let max_attempts = self.table.options().commit_max_retries as usize + 1;

        let mut last_conflict = None;
        for attempt in 0..max_attempts {
            let Some(latest) = self.table.snapshot_manager().latest_snapshot_id()? else {
                return Ok(DropPartitionOutcome::NoMatch { latest: None });
            };

            let (_, removed) = self
                .table
                .new_scan()
                .with_snapshot(latest)
                .with_partition_filter(predicate.clone())
                .live_entries()?;
            if removed.is_empty() {
                tracing::debug!(table = self.table.path(), latest, "drop partition matched nothing");
                return Ok(DropPartitionOutcome::NoMatch {
                    latest: Some(latest),
                });
            }

            let partitions: Vec<Partition> = removed
                .iter()
                .map(|e| e.partition.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();

            match commit.commit(ChangeSet::overwrite(removed, Vec::new()), Some(latest)) {
                Ok(snapshot) => {
                    tracing::debug!(
                        table = self.table.path(),
                        snapshot_id = snapshot.id(),
                        partitions = partitions.len(),
                        "dropped partitions"
                    );
                    return Ok(DropPartitionOutcome::Dropped {
                        snapshot,
                        partitions,
                    });
                }
                Err(Error::CommitConflict(msg)) => {
                    tracing::warn!(table = self.table.path(), attempt, %msg, "drop partition conflicted, re-planning");
                    last_conflict = Some(msg);
                }
                Err(err) => return Err(err),
            }
        }

        Err(Error::CommitConflict(format!(
            "drop partition gave up after {max_attempts} attempts: {}",
            last_conflict.unwrap_or_default()
        )))
    }
}
