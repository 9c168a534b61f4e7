//! Garbage collection of files no snapshot references.
//!
//! Data files from abandoned writers, manifests from lost commit races, and
//! files replaced by compaction or dropped partitions stay in storage until
//! collected here. Collection must not run concurrently with writers: files a
//! writer flushed but has not yet committed look unreachable.

use crate::layout::FileLayout;
use crate::scan::{live_entries_of, snapshot_manifests};
use crate::table::FileStoreTable;
use llkv_result::Result;
use llkv_storage::PhysicalKey;
use llkv_storage::pager::Pager;
use rustc_hash::FxHashSet;

/// Collect every key under the table path referenced by a retained snapshot.
///
/// This includes:
/// - schema versions and the snapshot hints
/// - every snapshot, its manifest lists and their manifests
/// - every data file live in any snapshot
pub fn collect_reachable_keys<P: Pager>(table: &FileStoreTable<P>) -> Result<FxHashSet<PhysicalKey>> {
    let layout = table.layout();
    let schema = table.schema();
    let mut reachable = FxHashSet::default();

    reachable.extend(table.pager().enumerate_keys(&layout.schema_prefix())?);
    reachable.insert(layout.latest_hint_key());
    reachable.insert(layout.earliest_hint_key());

    let manager = table.snapshot_manager();
    for snapshot in manager.snapshots()? {
        let snapshot = snapshot?;
        reachable.insert(layout.snapshot_key(snapshot.id()));
        reachable.insert(snapshot.base_manifest_list().to_string());
        reachable.insert(snapshot.delta_manifest_list().to_string());
        for manifest in snapshot_manifests(table, &snapshot)? {
            reachable.insert(manifest.key);
        }
        for entry in live_entries_of(table, &snapshot)? {
            reachable.insert(layout.data_file_key(
                schema,
                &entry.partition,
                entry.bucket,
                &entry.file.file_name,
            ));
        }
    }

    Ok(reachable)
}

/// Identify and free all unreferenced blobs under the table path.
///
/// Returns the number of keys freed.
pub fn garbage_collect<P: Pager>(table: &FileStoreTable<P>) -> Result<usize> {
    let prefix = format!("{}/", table.layout().root());
    let all_keys = table.pager().enumerate_keys(&prefix)?;
    let reachable = collect_reachable_keys(table)?;

    let unreferenced: Vec<PhysicalKey> = all_keys
        .into_iter()
        .filter(|key| !reachable.contains(key))
        .collect();

    let count = unreferenced.len();
    if !unreferenced.is_empty() {
        let data_files = unreferenced
            .iter()
            .filter(|k| FileLayout::is_data_file(k))
            .count();
        tracing::debug!(
            table = table.path(),
            freed = count,
            data_files,
            "garbage collected unreferenced files"
        );
        table.pager().free_many(&unreferenced)?;
    }

    Ok(count)
}
