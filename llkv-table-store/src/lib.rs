//! Versioned, partitioned table storage for LLKV.
//!
//! Rows are stored as immutable Apache Parquet files grouped by partition and
//! bucket, written as blobs through the [`llkv-storage`] pager abstraction. Table
//! state advances through an append-only chain of snapshots; every write, drop,
//! or compaction publishes exactly one new snapshot or nothing at all.
//!
//! # Architecture
//!
//! - [`FileStoreTable`]: the table handle, created or opened on a pager path
//! - [`TableWrite`]: buffers rows per (partition, bucket) and flushes data files
//! - [`TableCommit`]: publishes a [`ChangeSet`] as the next [`Snapshot`] using
//!   optimistic concurrency over [`Pager::put_if_absent`](llkv_storage::pager::Pager::put_if_absent)
//! - [`TableScan`] / [`TableRead`]: plan a pinned snapshot into [`DataSplit`]s and
//!   read them back through the table's [`MergePolicy`]
//! - [`DropPartitionAction`]: OVERWRITE commit that empties matched partitions
//! - [`TableCompaction`] and [`garbage_collect`] for maintenance
//!
//! Tables with a primary key deduplicate by key (last write wins, deletes remove
//! the key). Tables without one are append-only.
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use llkv_table_store::{FileStoreTable, TableOptions, TableSchema};
//! use llkv_storage::pager::MemPager;
//! use arrow::array::{Int32Array, StringArray};
//! use arrow::datatypes::{DataType, Field, Schema};
//! use arrow::record_batch::RecordBatch;
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! # fn main() -> llkv_result::Result<()> {
//! let fields = Arc::new(Schema::new(vec![
//!     Field::new("dt", DataType::Utf8, false),
//!     Field::new("id", DataType::Int32, false),
//!     Field::new("name", DataType::Utf8, true),
//! ]));
//! let schema = TableSchema::new(
//!     fields.clone(),
//!     vec!["dt".into()],
//!     vec!["dt".into(), "id".into()],
//!     TableOptions::default(),
//! )?;
//! let table = FileStoreTable::create(Arc::new(MemPager::new()), "db/users", schema)?;
//!
//! let batch = RecordBatch::try_new(
//!     fields,
//!     vec![
//!         Arc::new(StringArray::from(vec!["2023-01-17", "2023-01-18"])),
//!         Arc::new(Int32Array::from(vec![1, 2])),
//!         Arc::new(StringArray::from(vec!["a", "b"])),
//!     ],
//! )?;
//! let mut write = table.new_write("loader")?;
//! write.write(&batch)?;
//! table.new_commit("loader").commit_append(write.prepare_commit()?)?;
//!
//! table.drop_partitions(vec![HashMap::from([("dt".to_string(), "2023-01-17".to_string())])])?;
//! let rows = table.new_read().read_all()?;
//! # Ok(())
//! # }
//! ```

mod action;
mod commit;
mod compaction;
mod gc;
mod layout;
mod manifest;
mod merge;
mod options;
mod partition;
mod read;
mod reader;
mod scan;
mod schema;
mod snapshot;
mod table;
mod types;
mod write;
mod writer;

pub use action::{DEFAULT_ACTION_USER, DropPartitionAction, DropPartitionOutcome};
pub use commit::{ChangeSet, TableCommit};
pub use compaction::{CompactionStrategy, TableCompaction};
pub use gc::{collect_reachable_keys, garbage_collect};
pub use layout::{FileLayout, FileNameFactory};
pub use manifest::{
    DataFileMeta, FileIdentifier, FileKind, ManifestEntry, ManifestFileMeta, ManifestStore,
    merge_entries,
};
pub use merge::{KeyEncoder, MergeIterator, MergePolicy, RunSource};
pub use options::{DEFAULT_PARTITION_NAME, FileCompression, TableOptions};
pub use partition::{Partition, PartitionPredicate, PartitionValue, escape_path_name};
pub use read::{PlanReader, SplitReader, TableRead};
pub use scan::{DataSplit, Plan, TableScan};
pub use schema::{SchemaManager, TableSchema};
pub use snapshot::{Snapshot, SnapshotManager};
pub use table::FileStoreTable;
pub use types::{
    BATCH_COMMIT_IDENTIFIER, BucketId, CommitKind, ROW_KIND_COLUMN, RowKind,
    SEQUENCE_NUMBER_COLUMN, SchemaId, SnapshotId,
};
pub use write::TableWrite;

// Re-export common types for convenience
pub use arrow::datatypes::SchemaRef;
pub use arrow::record_batch::RecordBatch;
