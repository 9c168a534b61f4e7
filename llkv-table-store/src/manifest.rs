//! Manifests: the persistent record of which data files each snapshot sees.
//!
//! A manifest is a list of [`ManifestEntry`] values, each adding or deleting one
//! data file. A manifest list names manifests in order. A snapshot points at a base
//! list (everything up to its parent) and a delta list (its own change set), so
//! replaying both lists in order yields the live file set.

use crate::layout::{FileLayout, FileNameFactory};
use crate::partition::Partition;
use crate::types::{BucketId, SchemaId};
use llkv_result::{Error, Result};
use llkv_storage::PhysicalKey;
use llkv_storage::pager::{BatchGet, GetResult, Pager};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Metadata of one immutable data file.
#[derive(Debug, Clone, PartialEq, Eq, bitcode::Encode, bitcode::Decode)]
pub struct DataFileMeta {
    /// File name within its bucket directory.
    pub file_name: String,
    pub file_size: u64,
    pub row_count: u64,
    /// Comparable encoding of the smallest primary key; empty for append-only tables.
    pub min_key: Vec<u8>,
    pub max_key: Vec<u8>,
    pub min_sequence_number: u64,
    pub max_sequence_number: u64,
    pub schema_id: SchemaId,
    pub creation_time_millis: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, bitcode::Encode, bitcode::Decode)]
pub enum FileKind {
    Add,
    Delete,
}

/// One file addition or deletion, tagged with the file's partition and bucket.
#[derive(Debug, Clone, PartialEq, Eq, bitcode::Encode, bitcode::Decode)]
pub struct ManifestEntry {
    pub kind: FileKind,
    pub partition: Partition,
    pub bucket: BucketId,
    pub file: DataFileMeta,
}

impl ManifestEntry {
    pub fn add(partition: Partition, bucket: BucketId, file: DataFileMeta) -> Self {
        Self {
            kind: FileKind::Add,
            partition,
            bucket,
            file,
        }
    }

    /// The matching deletion of a live file.
    pub fn to_delete(&self) -> Self {
        Self {
            kind: FileKind::Delete,
            ..self.clone()
        }
    }

    pub fn identifier(&self) -> FileIdentifier {
        FileIdentifier {
            partition: self.partition.clone(),
            bucket: self.bucket,
            file_name: self.file.file_name.clone(),
        }
    }
}

/// Identity of a data file across manifests.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileIdentifier {
    pub partition: Partition,
    pub bucket: BucketId,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, bitcode::Encode, bitcode::Decode)]
pub struct ManifestFileMeta {
    pub key: PhysicalKey,
    pub num_added_files: u64,
    pub num_deleted_files: u64,
}

/// Replay entries in order and return the live additions in the order they were
/// added.
///
/// A deletion cancels the earlier addition of the same file. Adding a live file
/// twice, or deleting a file that is not live, means the chain is corrupt.
pub fn merge_entries(entries: impl IntoIterator<Item = ManifestEntry>) -> Result<Vec<ManifestEntry>> {
    let mut slots: Vec<Option<ManifestEntry>> = Vec::new();
    let mut index: FxHashMap<FileIdentifier, usize> = FxHashMap::default();

    for entry in entries {
        let id = entry.identifier();
        match entry.kind {
            FileKind::Add => {
                if index.contains_key(&id) {
                    return Err(Error::Internal(format!(
                        "data file '{}' added twice",
                        id.file_name
                    )));
                }
                index.insert(id, slots.len());
                slots.push(Some(entry));
            }
            FileKind::Delete => {
                let slot = index.remove(&id).ok_or_else(|| {
                    Error::Internal(format!(
                        "data file '{}' deleted but not live",
                        id.file_name
                    ))
                })?;
                slots[slot] = None;
            }
        }
    }

    Ok(slots.into_iter().flatten().collect())
}

/// Reads and writes manifests and manifest lists.
pub struct ManifestStore<P: Pager> {
    pager: Arc<P>,
    layout: FileLayout,
    names: Arc<FileNameFactory>,
}

impl<P: Pager> ManifestStore<P> {
    pub fn new(pager: Arc<P>, layout: FileLayout, names: Arc<FileNameFactory>) -> Self {
        Self {
            pager,
            layout,
            names,
        }
    }

    pub fn write_manifest(&self, entries: &[ManifestEntry]) -> Result<ManifestFileMeta> {
        let key = self.names.new_manifest_key(&self.layout);
        let num_added_files = entries.iter().filter(|e| e.kind == FileKind::Add).count() as u64;
        let meta = ManifestFileMeta {
            key,
            num_added_files,
            num_deleted_files: entries.len() as u64 - num_added_files,
        };
        self.pager.put(&meta.key, bitcode::encode(&entries.to_vec()))?;
        tracing::trace!(key = %meta.key, entries = entries.len(), "wrote manifest");
        Ok(meta)
    }

    pub fn read_manifest(&self, key: &str) -> Result<Vec<ManifestEntry>> {
        let blob = self
            .pager
            .get(key)?
            .ok_or_else(|| Error::NotFound(format!("manifest '{key}'")))?;
        bitcode::decode(blob.as_ref()).map_err(|e| Error::internal("decode manifest", e))
    }

    pub fn write_manifest_list(&self, manifests: &[ManifestFileMeta]) -> Result<PhysicalKey> {
        let key = self.names.new_manifest_list_key(&self.layout);
        self.pager.put(&key, bitcode::encode(&manifests.to_vec()))?;
        Ok(key)
    }

    pub fn read_manifest_list(&self, key: &str) -> Result<Vec<ManifestFileMeta>> {
        let blob = self
            .pager
            .get(key)?
            .ok_or_else(|| Error::NotFound(format!("manifest list '{key}'")))?;
        bitcode::decode(blob.as_ref()).map_err(|e| Error::internal("decode manifest list", e))
    }

    /// All entries of the given manifests, in manifest order.
    pub fn read_entries(&self, manifests: &[ManifestFileMeta]) -> Result<Vec<ManifestEntry>> {
        if manifests.is_empty() {
            return Ok(Vec::new());
        }
        let gets: Vec<BatchGet> = manifests
            .iter()
            .map(|m| BatchGet::Raw { key: m.key.clone() })
            .collect();
        let mut entries = Vec::new();
        for result in self.pager.batch_get(&gets)? {
            match result {
                GetResult::Raw { bytes, .. } => {
                    let decoded: Vec<ManifestEntry> = bitcode::decode(bytes.as_ref())
                        .map_err(|e| Error::internal("decode manifest", e))?;
                    entries.extend(decoded);
                }
                GetResult::Missing { key } => {
                    return Err(Error::NotFound(format!("manifest '{key}'")));
                }
            }
        }
        Ok(entries)
    }

    /// Best-effort removal of metadata written by a failed commit attempt.
    pub(crate) fn discard(&self, keys: &[PhysicalKey]) {
        if keys.is_empty() {
            return;
        }
        if let Err(err) = self.pager.free_many(keys) {
            tracing::warn!(error = %err, "failed to discard unpublished manifests");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::PartitionValue;
    use llkv_storage::pager::MemPager;

    fn file(name: &str, rows: u64) -> DataFileMeta {
        DataFileMeta {
            file_name: name.to_string(),
            file_size: 10,
            row_count: rows,
            min_key: vec![],
            max_key: vec![],
            min_sequence_number: 0,
            max_sequence_number: rows.saturating_sub(1),
            schema_id: 0,
            creation_time_millis: 0,
        }
    }

    fn entry(name: &str, part: i64) -> ManifestEntry {
        ManifestEntry::add(
            Partition::new(vec![PartitionValue::Int(part)]),
            0,
            file(name, 1),
        )
    }

    #[test]
    fn test_merge_entries_cancels_deletes_and_keeps_order() {
        let a = entry("a", 0);
        let b = entry("b", 1);
        let c = entry("c", 0);
        let live = merge_entries(vec![a.clone(), b.clone(), c.clone(), a.to_delete()]).unwrap();
        assert_eq!(live, vec![b, c]);
    }

    #[test]
    fn test_merge_entries_detects_corruption() {
        let a = entry("a", 0);
        assert!(merge_entries(vec![a.clone(), a.clone()]).is_err());
        assert!(merge_entries(vec![entry("x", 0).to_delete()]).is_err());
    }

    #[test]
    fn test_manifest_roundtrip_through_pager() {
        let pager = Arc::new(MemPager::new());
        let store = ManifestStore::new(
            Arc::clone(&pager),
            FileLayout::new("t"),
            Arc::new(FileNameFactory::new()),
        );

        let entries = vec![entry("a", 0), entry("b", 1).to_delete()];
        let meta = store.write_manifest(&entries).unwrap();
        assert_eq!(meta.num_added_files, 1);
        assert_eq!(meta.num_deleted_files, 1);

        let list_key = store.write_manifest_list(std::slice::from_ref(&meta)).unwrap();
        let list = store.read_manifest_list(&list_key).unwrap();
        assert_eq!(list, vec![meta]);
        assert_eq!(store.read_entries(&list).unwrap(), entries);

        assert!(matches!(
            store.read_manifest("t/manifest/missing"),
            Err(Error::NotFound(_))
        ));
    }
}
