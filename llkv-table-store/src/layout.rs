//! Key layout of a table in the pager namespace.
//!
//! ```text
//! <table>/schema/schema-<id>
//! <table>/snapshot/snapshot-<id>
//! <table>/snapshot/LATEST            (hint, may lag)
//! <table>/snapshot/EARLIEST          (hint, may lag)
//! <table>/manifest/manifest-<uuid>-<n>
//! <table>/manifest/manifest-list-<uuid>-<n>
//! <table>/<k1>=<v1>/.../bucket-<b>/data-<uuid>-<n>.parquet
//! ```

use crate::partition::Partition;
use crate::schema::TableSchema;
use crate::types::{BucketId, SchemaId, SnapshotId};
use llkv_storage::{PhysicalKey, join_key};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

const SNAPSHOT_DIR: &str = "snapshot";
const SCHEMA_DIR: &str = "schema";
const MANIFEST_DIR: &str = "manifest";

pub(crate) const SNAPSHOT_PREFIX: &str = "snapshot-";
pub(crate) const SCHEMA_PREFIX: &str = "schema-";
const MANIFEST_PREFIX: &str = "manifest-";
const MANIFEST_LIST_PREFIX: &str = "manifest-list-";
const LATEST_HINT: &str = "LATEST";
const EARLIEST_HINT: &str = "EARLIEST";
const BUCKET_PREFIX: &str = "bucket-";
const DATA_FILE_PREFIX: &str = "data-";
const DATA_FILE_SUFFIX: &str = ".parquet";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLayout {
    root: PhysicalKey,
}

impl FileLayout {
    pub fn new(table_path: &str) -> Self {
        Self {
            root: join_key([table_path]),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn snapshot_dir(&self) -> PhysicalKey {
        join_key([self.root.as_str(), SNAPSHOT_DIR])
    }

    pub fn snapshot_key(&self, id: SnapshotId) -> PhysicalKey {
        join_key([
            self.root.as_str(),
            SNAPSHOT_DIR,
            &format!("{SNAPSHOT_PREFIX}{id}"),
        ])
    }

    /// Prefix matched by every snapshot key.
    pub fn snapshot_prefix(&self) -> PhysicalKey {
        format!("{}/{SNAPSHOT_PREFIX}", self.snapshot_dir())
    }

    pub fn latest_hint_key(&self) -> PhysicalKey {
        join_key([self.root.as_str(), SNAPSHOT_DIR, LATEST_HINT])
    }

    pub fn earliest_hint_key(&self) -> PhysicalKey {
        join_key([self.root.as_str(), SNAPSHOT_DIR, EARLIEST_HINT])
    }

    pub fn schema_key(&self, id: SchemaId) -> PhysicalKey {
        join_key([self.root.as_str(), SCHEMA_DIR, &format!("{SCHEMA_PREFIX}{id}")])
    }

    pub fn schema_prefix(&self) -> PhysicalKey {
        format!(
            "{}/{SCHEMA_PREFIX}",
            join_key([self.root.as_str(), SCHEMA_DIR])
        )
    }

    pub fn manifest_dir(&self) -> PhysicalKey {
        join_key([self.root.as_str(), MANIFEST_DIR])
    }

    /// Directory holding the data files of one bucket of one partition.
    pub fn bucket_dir(
        &self,
        schema: &TableSchema,
        partition: &Partition,
        bucket: BucketId,
    ) -> PhysicalKey {
        let segments = partition.path_segments(
            schema.partition_keys(),
            &schema.options().partition_default_name,
        );
        let mut key = join_key(std::iter::once(self.root.clone()).chain(segments));
        if !key.is_empty() {
            key.push('/');
        }
        key.push_str(&format!("{BUCKET_PREFIX}{bucket}"));
        key
    }

    pub fn data_file_key(
        &self,
        schema: &TableSchema,
        partition: &Partition,
        bucket: BucketId,
        file_name: &str,
    ) -> PhysicalKey {
        join_key([self.bucket_dir(schema, partition, bucket), file_name.to_string()])
    }

    /// Whether `key` (relative to the table root) names a data file.
    pub(crate) fn is_data_file(key: &str) -> bool {
        key.rsplit('/').next().is_some_and(|name| {
            name.starts_with(DATA_FILE_PREFIX) && name.ends_with(DATA_FILE_SUFFIX)
        })
    }
}

/// Generates unique names for files written by one writer.
///
/// Names embed a per-factory UUID plus a counter, so two writers never collide
/// even when they target the same bucket.
#[derive(Debug)]
pub struct FileNameFactory {
    uuid: Uuid,
    counter: AtomicU64,
}

impl Default for FileNameFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl FileNameFactory {
    pub fn new() -> Self {
        Self {
            uuid: Uuid::new_v4(),
            counter: AtomicU64::new(0),
        }
    }

    fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    pub fn new_data_file_name(&self) -> String {
        format!(
            "{DATA_FILE_PREFIX}{}-{}{DATA_FILE_SUFFIX}",
            self.uuid,
            self.next()
        )
    }

    pub fn new_manifest_key(&self, layout: &FileLayout) -> PhysicalKey {
        join_key([
            layout.manifest_dir(),
            format!("{MANIFEST_PREFIX}{}-{}", self.uuid, self.next()),
        ])
    }

    pub fn new_manifest_list_key(&self, layout: &FileLayout) -> PhysicalKey {
        join_key([
            layout.manifest_dir(),
            format!("{MANIFEST_LIST_PREFIX}{}-{}", self.uuid, self.next()),
        ])
    }
}

/// Parse the numeric suffix of `<prefix><id>` from the last path segment of `key`.
pub(crate) fn parse_id_suffix(key: &str, prefix: &str) -> Option<u64> {
    key.rsplit('/')
        .next()
        .and_then(|name| name.strip_prefix(prefix))
        .and_then(|id| id.parse().ok())
}
