//! Minimal pager trait plus in-memory, filesystem, and instrumented implementations.
//!
//! Blobs convert into `bytes::Bytes` without copying, so the Parquet reader can
//! decode them in place.
//!
//! The only primitive with concurrency semantics is [`Pager::put_if_absent`]: it
//! must create the key with its complete contents or not at all, and at most one
//! caller may win for a given key. The snapshot commit protocol is built on it.

use crate::types::PhysicalKey;
use llkv_result::Result;

pub mod instrumented_pager;
pub use instrumented_pager::*;

pub mod mem_pager;
pub use mem_pager::*;

pub mod fs_pager;
pub use fs_pager::*;

#[derive(Clone, Debug)]
pub enum BatchPut {
    Raw { key: PhysicalKey, bytes: Vec<u8> },
}

#[derive(Clone, Debug)]
pub enum BatchGet {
    Raw { key: PhysicalKey },
}

#[derive(Clone, Debug)]
pub enum GetResult<B> {
    Raw { key: PhysicalKey, bytes: B },
    Missing { key: PhysicalKey },
}

pub trait Pager: Send + Sync + 'static {
    type Blob: AsRef<[u8]> + Clone + Into<bytes::Bytes> + Send + Sync + 'static;

    /// Batch get blobs; returns one `GetResult` per request in order.
    fn batch_get(&self, gets: &[BatchGet]) -> Result<Vec<GetResult<Self::Blob>>>;

    /// Batch put blobs at fixed keys, replacing existing contents.
    ///
    /// Each individual blob becomes visible atomically; the batch as a whole does not.
    fn batch_put(&self, puts: &[BatchPut]) -> Result<()>;

    /// Create `key` holding `bytes` only if it does not exist yet.
    ///
    /// Returns `Ok(false)` when another writer already created the key. Readers never
    /// observe a partially written blob.
    fn put_if_absent(&self, key: &str, bytes: Vec<u8>) -> Result<bool>;

    /// Batch free keys (best-effort). Unknown keys are ignored.
    fn free_many(&self, keys: &[PhysicalKey]) -> Result<()>;

    /// List every key that starts with `prefix`, sorted ascending.
    fn enumerate_keys(&self, prefix: &str) -> Result<Vec<PhysicalKey>>;

    /// Fetch a single blob.
    fn get(&self, key: &str) -> Result<Option<Self::Blob>> {
        let result = self
            .batch_get(&[BatchGet::Raw {
                key: key.to_string(),
            }])?
            .pop();
        Ok(match result {
            Some(GetResult::Raw { bytes, .. }) => Some(bytes),
            _ => None,
        })
    }

    /// Store a single blob, replacing existing contents.
    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.batch_put(&[BatchPut::Raw {
            key: key.to_string(),
            bytes,
        }])
    }

    fn contains_key(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}
