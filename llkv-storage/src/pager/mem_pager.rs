use super::*;
use crate::types::PhysicalKey;
use bytes::Bytes;
use llkv_result::{Error, Result};
use rustc_hash::FxHashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// In-memory pager used for tests and benchmarks.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Default)]
pub struct MemPager {
    blobs: RwLock<FxHashMap<PhysicalKey, Bytes>>,
}

impl MemPager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs currently stored.
    pub fn len(&self) -> usize {
        self.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, FxHashMap<PhysicalKey, Bytes>>> {
        self.blobs
            .read()
            .map_err(|_| Error::Internal("MemPager blobs read lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, FxHashMap<PhysicalKey, Bytes>>> {
        self.blobs
            .write()
            .map_err(|_| Error::Internal("MemPager blobs write lock poisoned".into()))
    }
}

impl Pager for MemPager {
    type Blob = Bytes;

    fn batch_put(&self, puts: &[BatchPut]) -> Result<()> {
        let mut map = self.write()?;
        for p in puts {
            match p {
                BatchPut::Raw { key, bytes } => {
                    map.insert(key.clone(), Bytes::copy_from_slice(bytes));
                }
            }
        }
        Ok(())
    }

    fn put_if_absent(&self, key: &str, bytes: Vec<u8>) -> Result<bool> {
        // The write lock makes check-and-insert a single step.
        let mut map = self.write()?;
        if map.contains_key(key) {
            return Ok(false);
        }
        map.insert(key.to_string(), Bytes::from(bytes));
        Ok(true)
    }

    fn batch_get(&self, gets: &[BatchGet]) -> Result<Vec<GetResult<Self::Blob>>> {
        let map = self.read()?;
        let mut out = Vec::with_capacity(gets.len());
        for g in gets {
            match g {
                BatchGet::Raw { key } => {
                    if let Some(b) = map.get(key) {
                        out.push(GetResult::Raw {
                            key: key.clone(),
                            bytes: b.clone(),
                        });
                    } else {
                        out.push(GetResult::Missing { key: key.clone() });
                    }
                }
            }
        }
        Ok(out)
    }

    fn free_many(&self, keys: &[PhysicalKey]) -> Result<()> {
        let mut map = self.write()?;
        for k in keys {
            map.remove(k);
        }
        Ok(())
    }

    fn enumerate_keys(&self, prefix: &str) -> Result<Vec<PhysicalKey>> {
        let map = self.read()?;
        let mut keys: Vec<PhysicalKey> = map
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}
