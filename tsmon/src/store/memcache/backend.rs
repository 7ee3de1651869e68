use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;

/// Opaque token returned by [`MemcacheClient::gets`] and checked by [`MemcacheClient::cas`].
pub type CasToken = u64;

/// Errors returned by a memcache client or a metric index.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The backend could not be reached or refused the request.
    #[error("backend unavailable: {reason}")]
    Unavailable {
        /// Details about the failure.
        reason: String,
    },
}

impl BackendError {
    fn injected() -> Self {
        BackendError::Unavailable { reason: "failure injected".to_string() }
    }
}

/// A namespaced key/value cache with compare-and-set.
pub trait MemcacheClient: fmt::Debug + Send + Sync {
    /// Reads a value together with the token needed to replace it.
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot be reached.
    fn gets(&self, namespace: &str, key: &str) -> Result<Option<(Bytes, CasToken)>, BackendError>;

    /// Stores a value only if the key is absent. Returns `false` if it was present.
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot be reached.
    fn add(&self, namespace: &str, key: &str, value: Bytes) -> Result<bool, BackendError>;

    /// Replaces a value only if it has not changed since `token` was read. Returns `false` if it has.
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot be reached.
    fn cas(&self, namespace: &str, key: &str, value: Bytes, token: CasToken) -> Result<bool, BackendError>;

    /// Reads several keys at once. Absent keys are left out of the result.
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot be reached.
    fn get_multi(&self, namespace: &str, keys: &[String]) -> Result<HashMap<String, Bytes>, BackendError>;

    /// Removes a key.
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot be reached.
    fn delete(&self, namespace: &str, key: &str) -> Result<(), BackendError>;
}

/// One row of the metric catalog: a metric written by some instance of a job.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricIndexEntry {
    /// Job whose namespace holds the metric.
    pub job_name: String,
    /// Name of the metric.
    pub metric_name: String,
}

impl MetricIndexEntry {
    /// Creates a new `MetricIndexEntry`.
    pub fn new<J, M>(job_name: J, metric_name: M) -> Self
    where
        J: Into<String>,
        M: Into<String>,
    {
        Self { job_name: job_name.into(), metric_name: metric_name.into() }
    }
}

/// The catalog of every metric ever written, used to enumerate metrics without scanning the cache.
pub trait MetricIndex: fmt::Debug + Send + Sync {
    /// Records an entry. Recording an existing entry is a no-op.
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot be reached.
    fn insert(&self, entry: MetricIndexEntry) -> Result<(), BackendError>;

    /// Returns every entry.
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot be reached.
    fn entries(&self) -> Result<Vec<MetricIndexEntry>, BackendError>;
}

#[derive(Debug, Default)]
struct CacheInner {
    values: Mutex<HashMap<(String, String), (Bytes, CasToken)>>,
    next_token: AtomicU64,
    fail_writes: AtomicBool,
    fail_all: AtomicBool,
    write_attempts: AtomicUsize,
}

/// A [`MemcacheClient`] living in this process.
///
/// Clones share the same cache. Failures can be injected to exercise the retry path.
#[derive(Clone, Debug, Default)]
pub struct InMemoryMemcache {
    inner: Arc<CacheInner>,
}

impl InMemoryMemcache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `add` and `cas` fail while set.
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::Release);
    }

    /// Makes every operation fail while set.
    pub fn set_fail_all(&self, fail: bool) {
        self.inner.fail_all.store(fail, Ordering::Release);
    }

    /// Number of `add` and `cas` calls made so far.
    pub fn write_attempts(&self) -> usize {
        self.inner.write_attempts.load(Ordering::Acquire)
    }

    /// Stores a raw value, bypassing compare-and-set.
    pub fn put_raw(&self, namespace: &str, key: &str, value: Bytes) {
        let token = self.next_token();
        self.inner.values.lock().insert((namespace.to_string(), key.to_string()), (value, token));
    }

    fn next_token(&self) -> CasToken {
        self.inner.next_token.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn check_available(&self) -> Result<(), BackendError> {
        if self.inner.fail_all.load(Ordering::Acquire) {
            return Err(BackendError::injected());
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<(), BackendError> {
        self.inner.write_attempts.fetch_add(1, Ordering::AcqRel);
        self.check_available()?;
        if self.inner.fail_writes.load(Ordering::Acquire) {
            return Err(BackendError::injected());
        }
        Ok(())
    }
}

impl MemcacheClient for InMemoryMemcache {
    fn gets(&self, namespace: &str, key: &str) -> Result<Option<(Bytes, CasToken)>, BackendError> {
        self.check_available()?;
        Ok(self.inner.values.lock().get(&(namespace.to_string(), key.to_string())).cloned())
    }

    fn add(&self, namespace: &str, key: &str, value: Bytes) -> Result<bool, BackendError> {
        self.check_writable()?;
        let token = self.next_token();
        let mut values = self.inner.values.lock();
        let key = (namespace.to_string(), key.to_string());
        if values.contains_key(&key) {
            return Ok(false);
        }
        values.insert(key, (value, token));
        Ok(true)
    }

    fn cas(&self, namespace: &str, key: &str, value: Bytes, token: CasToken) -> Result<bool, BackendError> {
        self.check_writable()?;
        let new_token = self.next_token();
        let mut values = self.inner.values.lock();
        match values.get_mut(&(namespace.to_string(), key.to_string())) {
            Some(current) if current.1 == token => {
                *current = (value, new_token);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn get_multi(&self, namespace: &str, keys: &[String]) -> Result<HashMap<String, Bytes>, BackendError> {
        self.check_available()?;
        let values = self.inner.values.lock();
        Ok(keys
            .iter()
            .filter_map(|key| {
                values.get(&(namespace.to_string(), key.clone())).map(|(value, _)| (key.clone(), value.clone()))
            })
            .collect())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<(), BackendError> {
        self.check_available()?;
        self.inner.values.lock().remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }
}

#[derive(Debug, Default)]
struct IndexInner {
    entries: Mutex<BTreeSet<MetricIndexEntry>>,
    failing: AtomicBool,
    inserts: AtomicUsize,
}

/// A [`MetricIndex`] living in this process.
///
/// Clones share the same catalog.
#[derive(Clone, Debug, Default)]
pub struct InMemoryIndex {
    inner: Arc<IndexInner>,
}

impl InMemoryIndex {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every operation fail while set.
    pub fn set_failing(&self, fail: bool) {
        self.inner.failing.store(fail, Ordering::Release);
    }

    /// Number of `insert` calls made so far.
    pub fn inserts(&self) -> usize {
        self.inner.inserts.load(Ordering::Acquire)
    }

    fn check_available(&self) -> Result<(), BackendError> {
        if self.inner.failing.load(Ordering::Acquire) {
            return Err(BackendError::injected());
        }
        Ok(())
    }
}

impl MetricIndex for InMemoryIndex {
    fn insert(&self, entry: MetricIndexEntry) -> Result<(), BackendError> {
        self.inner.inserts.fetch_add(1, Ordering::AcqRel);
        self.check_available()?;
        self.inner.entries.lock().insert(entry);
        Ok(())
    }

    fn entries(&self) -> Result<Vec<MetricIndexEntry>, BackendError> {
        self.check_available()?;
        Ok(self.inner.entries.lock().iter().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::{InMemoryIndex, InMemoryMemcache, MemcacheClient, MetricIndex, MetricIndexEntry};

    #[test]
    fn add_only_when_absent() {
        let cache = InMemoryMemcache::new();
        assert!(cache.add("ns", "k", Bytes::from_static(b"a")).unwrap());
        assert!(!cache.add("ns", "k", Bytes::from_static(b"b")).unwrap());
        assert!(cache.add("other", "k", Bytes::from_static(b"c")).unwrap());

        let (value, _) = cache.gets("ns", "k").unwrap().unwrap();
        assert_eq!(value, Bytes::from_static(b"a"));
    }

    #[test]
    fn cas_detects_concurrent_writes() {
        let cache = InMemoryMemcache::new();
        cache.add("ns", "k", Bytes::from_static(b"a")).unwrap();

        let (_, token) = cache.gets("ns", "k").unwrap().unwrap();
        let (_, same_token) = cache.gets("ns", "k").unwrap().unwrap();
        assert!(cache.cas("ns", "k", Bytes::from_static(b"b"), token).unwrap());
        assert!(!cache.cas("ns", "k", Bytes::from_static(b"c"), same_token).unwrap());
        assert!(!cache.cas("ns", "missing", Bytes::from_static(b"c"), token).unwrap());

        let (value, _) = cache.gets("ns", "k").unwrap().unwrap();
        assert_eq!(value, Bytes::from_static(b"b"));
        assert_eq!(cache.write_attempts(), 4);
    }

    #[test]
    fn get_multi_and_delete() {
        let cache = InMemoryMemcache::new();
        cache.put_raw("ns", "a", Bytes::from_static(b"1"));
        cache.put_raw("ns", "b", Bytes::from_static(b"2"));

        let found = cache.get_multi("ns", &["a".to_string(), "b".to_string(), "c".to_string()]).unwrap();
        assert_eq!(found.len(), 2);

        cache.delete("ns", "a").unwrap();
        assert!(cache.gets("ns", "a").unwrap().is_none());
    }

    #[test]
    fn injected_failures() {
        let cache = InMemoryMemcache::new();
        cache.set_fail_writes(true);
        assert!(cache.add("ns", "k", Bytes::new()).is_err());
        assert!(cache.gets("ns", "k").is_ok());

        cache.set_fail_all(true);
        assert!(cache.gets("ns", "k").is_err());
    }

    #[test]
    fn index_deduplicates() {
        let index = InMemoryIndex::new();
        index.insert(MetricIndexEntry::new("job", "m")).unwrap();
        index.insert(MetricIndexEntry::new("job", "m")).unwrap();
        index.insert(MetricIndexEntry::new("job2", "m")).unwrap();
        assert_eq!(index.entries().unwrap().len(), 2);
        assert_eq!(index.inserts(), 3);

        index.set_failing(true);
        assert!(index.entries().is_err());
    }
}
