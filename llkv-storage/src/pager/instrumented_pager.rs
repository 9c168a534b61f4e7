use crate::pager::{BatchGet, BatchPut, GetResult, Pager};
use crate::types::PhysicalKey;
use llkv_result::{Error, Result};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A thread-safe container for I/O statistics.
#[derive(Debug, Default)]
pub struct IoStats {
    // --- Total individual items ---
    pub physical_gets: AtomicU64,
    pub physical_puts: AtomicU64,
    pub physical_frees: AtomicU64,
    pub put_bytes: AtomicU64,

    // --- Total batch operations (i.e., calls to the pager) ---
    pub get_batches: AtomicU64,
    pub put_batches: AtomicU64,
    pub free_batches: AtomicU64,

    // --- Conditional creates ---
    pub conditional_puts: AtomicU64,
    pub conditional_put_losses: AtomicU64,

    pub injected_failures: AtomicU64,
}

impl IoStats {
    /// Capture a point-in-time snapshot of the accumulated metrics.
    pub fn snapshot(&self) -> IoStatsSnapshot {
        IoStatsSnapshot {
            physical_gets: self.physical_gets.load(Ordering::Relaxed),
            physical_puts: self.physical_puts.load(Ordering::Relaxed),
            physical_frees: self.physical_frees.load(Ordering::Relaxed),
            put_bytes: self.put_bytes.load(Ordering::Relaxed),
            get_batches: self.get_batches.load(Ordering::Relaxed),
            put_batches: self.put_batches.load(Ordering::Relaxed),
            free_batches: self.free_batches.load(Ordering::Relaxed),
            conditional_puts: self.conditional_puts.load(Ordering::Relaxed),
            conditional_put_losses: self.conditional_put_losses.load(Ordering::Relaxed),
            injected_failures: self.injected_failures.load(Ordering::Relaxed),
        }
    }
}

/// Immutable copy of [`IoStats`] counters captured at a specific moment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoStatsSnapshot {
    pub physical_gets: u64,
    pub physical_puts: u64,
    pub physical_frees: u64,
    pub put_bytes: u64,
    pub get_batches: u64,
    pub put_batches: u64,
    pub free_batches: u64,
    pub conditional_puts: u64,
    pub conditional_put_losses: u64,
    pub injected_failures: u64,
}

impl IoStatsSnapshot {
    /// Compute the delta between two snapshots (`newer - older`). Saturates at zero.
    pub fn delta_since(&self, older: &Self) -> Self {
        macro_rules! delta {
            ($field:ident) => {
                self.$field.saturating_sub(older.$field)
            };
        }

        Self {
            physical_gets: delta!(physical_gets),
            physical_puts: delta!(physical_puts),
            physical_frees: delta!(physical_frees),
            put_bytes: delta!(put_bytes),
            get_batches: delta!(get_batches),
            put_batches: delta!(put_batches),
            free_batches: delta!(free_batches),
            conditional_puts: delta!(conditional_puts),
            conditional_put_losses: delta!(conditional_put_losses),
            injected_failures: delta!(injected_failures),
        }
    }
}

/// A wrapper around any Pager implementation that counts I/O operations and can
/// inject write failures for keys under a given prefix.
#[derive(Debug)]
pub struct InstrumentedPager<P: Pager> {
    inner: P,
    stats: Arc<IoStats>,
    fail_writes_under: Mutex<Option<String>>,
}

impl<P> InstrumentedPager<P>
where
    P: Pager,
{
    /// Wraps a Pager and returns the instrumented version along with a handle
    /// to its statistics.
    pub fn new(inner: P) -> (Self, Arc<IoStats>) {
        let stats = Arc::new(IoStats::default());
        (
            Self {
                inner,
                stats: Arc::clone(&stats),
                fail_writes_under: Mutex::new(None),
            },
            stats,
        )
    }

    /// Make every subsequent write (put or conditional create) to a key starting with
    /// `prefix` fail with an I/O error. `None` clears the fault.
    pub fn fail_writes_under(&self, prefix: Option<&str>) {
        if let Ok(mut guard) = self.fail_writes_under.lock() {
            *guard = prefix.map(str::to_string);
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    fn check_fault(&self, key: &str) -> Result<()> {
        let guard = self
            .fail_writes_under
            .lock()
            .map_err(|_| Error::Internal("fault injection lock poisoned".into()))?;
        match guard.as_deref() {
            Some(prefix) if key.starts_with(prefix) => {
                self.stats.injected_failures.fetch_add(1, Ordering::Relaxed);
                Err(Error::Io(io::Error::other(format!(
                    "injected write failure for '{key}'"
                ))))
            }
            _ => Ok(()),
        }
    }
}

impl<P> Pager for InstrumentedPager<P>
where
    P: Pager,
{
    type Blob = P::Blob;

    fn batch_get(&self, gets: &[BatchGet]) -> Result<Vec<GetResult<Self::Blob>>> {
        self.stats
            .physical_gets
            .fetch_add(gets.len() as u64, Ordering::Relaxed);
        self.stats.get_batches.fetch_add(1, Ordering::Relaxed);
        self.inner.batch_get(gets)
    }

    fn batch_put(&self, puts: &[BatchPut]) -> Result<()> {
        self.stats.put_batches.fetch_add(1, Ordering::Relaxed);
        for put in puts {
            match put {
                BatchPut::Raw { key, bytes } => {
                    self.check_fault(key)?;
                    self.stats
                        .put_bytes
                        .fetch_add(bytes.len() as u64, Ordering::Relaxed);
                }
            }
        }
        self.stats
            .physical_puts
            .fetch_add(puts.len() as u64, Ordering::Relaxed);
        self.inner.batch_put(puts)
    }

    fn put_if_absent(&self, key: &str, bytes: Vec<u8>) -> Result<bool> {
        self.check_fault(key)?;
        self.stats.conditional_puts.fetch_add(1, Ordering::Relaxed);
        self.stats
            .put_bytes
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        let created = self.inner.put_if_absent(key, bytes)?;
        if !created {
            self.stats
                .conditional_put_losses
                .fetch_add(1, Ordering::Relaxed);
        }
        Ok(created)
    }

    fn free_many(&self, keys: &[PhysicalKey]) -> Result<()> {
        self.stats
            .physical_frees
            .fetch_add(keys.len() as u64, Ordering::Relaxed);
        self.stats.free_batches.fetch_add(1, Ordering::Relaxed);
        self.inner.free_many(keys)
    }

    fn enumerate_keys(&self, prefix: &str) -> Result<Vec<PhysicalKey>> {
        self.inner.enumerate_keys(prefix)
    }
}
