//! [`DekCache`]: bounded LRU of decrypted DEKs keyed by their encrypted form.

use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::OnceCell;
use zeroize::Zeroize;

use crate::crypto::KEY_LEN;

/// Errors produced by the DEK layer.
#[derive(Debug, Error)]
pub enum DekError {
    /// The decrypted key material has an unexpected length.
    #[error("DEK has invalid length: expected {KEY_LEN} bytes, got {0}")]
    InvalidLength(usize),
}

/// Fixed-size key buffer that holds exactly [`KEY_LEN`] bytes.
///
/// Cloned out of the cache into transform call stacks when needed. The
/// buffer is zeroed on drop.
#[derive(Clone)]
pub struct DekBytes(Box<[u8; KEY_LEN]>);

impl DekBytes {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(Box::new(bytes))
    }

    /// Copy key material returned by a KMS plugin.
    ///
    /// # Errors
    ///
    /// Returns [`DekError::InvalidLength`] if the slice has the wrong length.
    pub fn from_slice(key_bytes: &[u8]) -> Result<Self, DekError> {
        if key_bytes.len() != KEY_LEN {
            return Err(DekError::InvalidLength(key_bytes.len()));
        }
        let mut buf = Box::new([0u8; KEY_LEN]);
        buf.copy_from_slice(key_bytes);
        Ok(Self(buf))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }
}

impl Drop for DekBytes {
    fn drop(&mut self) {
        self.0.as_mut().zeroize();
    }
}

impl std::fmt::Debug for DekBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DekBytes([REDACTED])")
    }
}

type InFlight = Arc<OnceCell<DekBytes>>;

struct CacheInner {
    capacity: usize,
    /// `None` when caching is disabled (capacity 0).
    entries: Option<Mutex<LruCache<Vec<u8>, DekBytes>>>,
    /// Remote fetches currently running, keyed by encrypted DEK.
    in_flight: Mutex<HashMap<Vec<u8>, InFlight>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Thread-safe LRU cache of decrypted DEKs.
///
/// Locks are held only for the map operation itself, never across an await,
/// so a slow KMS call never blocks other readers. Concurrent misses for the
/// same encrypted DEK share a single fetch; a failed fetch is not remembered.
#[derive(Clone)]
pub struct DekCache {
    inner: Arc<CacheInner>,
}

impl DekCache {
    /// Create a cache holding at most `capacity` DEKs; 0 disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                capacity,
                entries: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
                in_flight: Mutex::new(HashMap::new()),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.entries.is_some()
    }

    /// Number of DEKs currently cached.
    pub fn len(&self) -> usize {
        self.inner.entries.as_ref().map_or(0, |e| e.lock().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.inner.hits.load(Ordering::Relaxed),
            self.inner.misses.load(Ordering::Relaxed),
        )
    }

    /// Look up a DEK, marking it most recently used.
    pub fn get(&self, encrypted: &[u8]) -> Option<DekBytes> {
        let found = self
            .inner
            .entries
            .as_ref()
            .and_then(|e| e.lock().get(encrypted).cloned());
        let counter = if found.is_some() {
            &self.inner.hits
        } else {
            &self.inner.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Insert a DEK, evicting the least recently used entry when full.
    pub fn insert(&self, encrypted: &[u8], dek: DekBytes) {
        if let Some(entries) = &self.inner.entries {
            entries.lock().put(encrypted.to_vec(), dek);
        }
    }

    /// Return the cached DEK for `encrypted`, or run `fetch` to obtain it.
    ///
    /// Callers missing on the same key at the same time wait on one `fetch`.
    /// Only a successful result is cached; after a failure the next caller
    /// runs its own `fetch`.
    pub async fn get_or_try_fetch<F, Fut, E>(&self, encrypted: &[u8], fetch: F) -> Result<DekBytes, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<DekBytes, E>>,
    {
        if let Some(dek) = self.get(encrypted) {
            return Ok(dek);
        }

        let cell: InFlight = self
            .inner
            .in_flight
            .lock()
            .entry(encrypted.to_vec())
            .or_default()
            .clone();
        // Clears the in-flight entry even if this future is dropped mid-wait.
        let _guard = InFlightGuard {
            in_flight: &self.inner.in_flight,
            key: encrypted,
            cell: &cell,
        };

        let result = cell.get_or_try_init(fetch).await.cloned();
        if let Ok(dek) = &result {
            self.insert(encrypted, dek.clone());
        }
        result
    }
}

/// Removes a finished or abandoned fetch from the in-flight map.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashMap<Vec<u8>, InFlight>>,
    key: &'a [u8],
    cell: &'a InFlight,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock();
        let Some(current) = in_flight.get(self.key) else {
            return;
        };
        if !Arc::ptr_eq(current, self.cell) {
            return;
        }
        // An unfinished fetch stays registered while other callers wait on it:
        // the map and this caller hold the only two references otherwise.
        if self.cell.initialized() || Arc::strong_count(self.cell) <= 2 {
            in_flight.remove(self.key);
        }
    }
}

impl std::fmt::Debug for DekCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DekCache")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("hits", &self.inner.hits.load(Ordering::Relaxed))
            .field("misses", &self.inner.misses.load(Ordering::Relaxed))
            .finish()
    }
}
