//! Table handle tying storage, schema, and the engine components together.

use crate::action::{DropPartitionAction, DropPartitionOutcome};
use crate::commit::TableCommit;
use crate::compaction::{CompactionStrategy, TableCompaction};
use crate::layout::{FileLayout, FileNameFactory};
use crate::manifest::ManifestStore;
use crate::merge::MergePolicy;
use crate::options::TableOptions;
use crate::read::TableRead;
use crate::scan::TableScan;
use crate::schema::{SchemaManager, TableSchema};
use crate::snapshot::{Snapshot, SnapshotManager};
use crate::write::TableWrite;
use bytes::Bytes;
use llkv_result::{Error, Result};
use llkv_storage::pager::Pager;
use std::collections::HashMap;
use std::sync::Arc;

struct TableInner<P: Pager> {
    pager: Arc<P>,
    layout: FileLayout,
    schema: TableSchema,
    merge_policy: MergePolicy,
    names: Arc<FileNameFactory>,
}

/// A versioned, partitioned table stored through a [`Pager`].
///
/// Cheap to clone; clones share the pager and schema.
pub struct FileStoreTable<P: Pager> {
    inner: Arc<TableInner<P>>,
}

impl<P: Pager> Clone for FileStoreTable<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Pager> FileStoreTable<P> {
    /// Create a new table at `path`. Fails if a table already exists there.
    pub fn create(pager: Arc<P>, path: &str, schema: TableSchema) -> Result<Self> {
        let layout = FileLayout::new(path);
        if layout.root().is_empty() {
            return Err(Error::InvalidArgumentError("table path must not be empty".into()));
        }
        SchemaManager::new(Arc::clone(&pager), layout.clone()).create(&schema)?;
        Ok(Self::from_parts(pager, layout, schema))
    }

    /// Open an existing table; `NotFound` if nothing was created at `path`.
    pub fn open(pager: Arc<P>, path: &str) -> Result<Self> {
        let layout = FileLayout::new(path);
        let schema = SchemaManager::new(Arc::clone(&pager), layout.clone()).latest()?;
        tracing::debug!(table = layout.root(), schema_id = schema.id(), "opened table");
        Ok(Self::from_parts(pager, layout, schema))
    }

    fn from_parts(pager: Arc<P>, layout: FileLayout, schema: TableSchema) -> Self {
        let merge_policy = MergePolicy::for_schema(&schema);
        Self {
            inner: Arc::new(TableInner {
                pager,
                layout,
                schema,
                merge_policy,
                names: Arc::new(FileNameFactory::new()),
            }),
        }
    }

    pub fn path(&self) -> &str {
        self.inner.layout.root()
    }

    pub fn schema(&self) -> &TableSchema {
        &self.inner.schema
    }

    pub fn options(&self) -> &TableOptions {
        self.inner.schema.options()
    }

    pub fn merge_policy(&self) -> MergePolicy {
        self.inner.merge_policy
    }

    pub fn pager(&self) -> &Arc<P> {
        &self.inner.pager
    }

    pub fn layout(&self) -> &FileLayout {
        &self.inner.layout
    }

    pub(crate) fn names(&self) -> &Arc<FileNameFactory> {
        &self.inner.names
    }

    pub fn snapshot_manager(&self) -> SnapshotManager<P> {
        SnapshotManager::new(Arc::clone(&self.inner.pager), self.inner.layout.clone())
    }

    pub(crate) fn manifest_store(&self) -> ManifestStore<P> {
        ManifestStore::new(
            Arc::clone(&self.inner.pager),
            self.inner.layout.clone(),
            Arc::clone(&self.inner.names),
        )
    }

    pub fn new_scan(&self) -> TableScan<P> {
        TableScan::new(self.clone())
    }

    pub fn new_read(&self) -> TableRead<P> {
        TableRead::new(self.clone())
    }

    pub fn new_write(&self, commit_user: impl Into<String>) -> Result<TableWrite<P>> {
        TableWrite::new(self.clone(), commit_user.into())
    }

    pub fn new_commit(&self, commit_user: impl Into<String>) -> TableCommit<P> {
        TableCommit::new(self.clone(), commit_user.into())
    }

    /// Drop every partition matched by `specs` in one OVERWRITE commit.
    pub fn drop_partitions(
        &self,
        specs: Vec<HashMap<String, String>>,
    ) -> Result<DropPartitionOutcome> {
        DropPartitionAction::new(self, specs).run()
    }

    /// Rewrite multi-file splits into single files.
    pub fn compact(&self, strategy: CompactionStrategy) -> Result<Option<Snapshot>> {
        TableCompaction::new(self, strategy).compact()
    }

    /// Free files under the table path that no retained snapshot references.
    pub fn garbage_collect(&self) -> Result<usize> {
        crate::gc::garbage_collect(self)
    }

    /// Read a data file's bytes.
    pub(crate) fn read_file_bytes(&self, key: &str) -> Result<Bytes> {
        let blob = self
            .inner
            .pager
            .get(key)?
            .ok_or_else(|| Error::NotFound(format!("data file '{key}'")))?;
        Ok(blob.into())
    }
}
