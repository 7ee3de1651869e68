//! Sinks for serialized metrics collections.
use std::{
    fmt,
    fs::{File, OpenOptions},
    io::{self, Write as _},
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::proto::MetricsCollection;

/// Errors that can occur while sending a collection.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Writing the collection failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The sink rejected the collection.
    #[error("monitor rejected the collection: {reason}")]
    Rejected {
        /// Why the collection was rejected.
        reason: String,
    },
}

/// A sink that transports metrics collections to a collector.
pub trait Monitor: fmt::Debug + Send + Sync {
    /// Sends a single collection.
    ///
    /// # Errors
    ///
    /// If the collection could not be delivered, an error describing the problem is returned.
    fn send(&self, collection: &MetricsCollection) -> Result<(), MonitorError>;
}

impl<M: Monitor + ?Sized> Monitor for Arc<M> {
    fn send(&self, collection: &MetricsCollection) -> Result<(), MonitorError> {
        (**self).send(collection)
    }
}

/// A monitor that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullMonitor;

impl Monitor for NullMonitor {
    fn send(&self, _collection: &MetricsCollection) -> Result<(), MonitorError> {
        Ok(())
    }
}

/// A monitor that appends a human-readable dump of every collection to a local file.
#[derive(Debug)]
pub struct DiskMonitor {
    path: PathBuf,
    file: Mutex<File>,
}

impl DiskMonitor {
    /// Opens `path` for appending, creating it if needed.
    ///
    /// # Errors
    ///
    /// If the file cannot be opened, an error is returned.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, MonitorError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file: Mutex::new(file) })
    }

    /// Path of the file collections are written to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Monitor for DiskMonitor {
    fn send(&self, collection: &MetricsCollection) -> Result<(), MonitorError> {
        let mut file = self.file.lock();
        writeln!(file, "{collection:#?}")?;
        file.flush()?;
        debug!(path = %self.path.display(), records = collection.data.len(), "Wrote metrics collection to disk.");
        Ok(())
    }
}

/// A monitor that keeps every collection it is sent in memory.
///
/// Intended for tests: clones share the same captured collections.
#[derive(Clone, Debug, Default)]
pub struct DebuggingMonitor {
    inner: Arc<DebuggingInner>,
}

#[derive(Debug, Default)]
struct DebuggingInner {
    collections: Mutex<Vec<MetricsCollection>>,
    failing: Mutex<bool>,
}

impl DebuggingMonitor {
    /// Creates a new `DebuggingMonitor`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every collection sent so far.
    pub fn collections(&self) -> Vec<MetricsCollection> {
        self.inner.collections.lock().clone()
    }

    /// Returns and forgets every collection sent so far.
    pub fn take(&self) -> Vec<MetricsCollection> {
        std::mem::take(&mut *self.inner.collections.lock())
    }

    /// Makes subsequent sends fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        *self.inner.failing.lock() = failing;
    }
}

impl Monitor for DebuggingMonitor {
    fn send(&self, collection: &MetricsCollection) -> Result<(), MonitorError> {
        if *self.inner.failing.lock() {
            return Err(MonitorError::Rejected { reason: "failure injected".to_string() });
        }

        self.inner.collections.lock().push(collection.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{DebuggingMonitor, DiskMonitor, Monitor, NullMonitor};
    use crate::proto::{MetricsCollection, MetricsData};

    fn collection(name: &str) -> MetricsCollection {
        MetricsCollection {
            data: vec![MetricsData { name: name.to_string(), ..Default::default() }],
            start_timestamp_us: Some(1),
        }
    }

    #[test]
    fn null_monitor_accepts_everything() {
        assert!(NullMonitor.send(&collection("foo")).is_ok());
    }

    #[test]
    fn disk_monitor_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.log");

        let monitor = DiskMonitor::new(&path).unwrap();
        monitor.send(&collection("first_metric")).unwrap();
        monitor.send(&collection("second_metric")).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("first_metric"));
        assert!(contents.contains("second_metric"));
        assert_eq!(monitor.path(), path.as_path());
    }

    #[test]
    fn disk_monitor_fails_on_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DiskMonitor::new(dir.path().join("missing").join("metrics.log")).is_err());
    }

    #[test]
    fn debugging_monitor_captures_and_fails() {
        let monitor = DebuggingMonitor::new();
        let handle = monitor.clone();

        monitor.send(&collection("foo")).unwrap();
        assert_eq!(handle.collections().len(), 1);

        handle.set_failing(true);
        assert!(monitor.send(&collection("bar")).is_err());
        handle.set_failing(false);

        let taken = handle.take();
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].data[0].name, "foo");
        assert!(handle.collections().is_empty());
    }
}
