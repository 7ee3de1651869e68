//! A store shared by every instance of a job through memcache.
//!
//! Each metric is one blob in the job's namespace, holding the values of every instance (hostname and task number)
//! so that instances never overwrite each other. Writes are compare-and-set loops with a bounded number of attempts:
//! under heavy contention or a failing backend an update is dropped and logged instead of blocking the caller.
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{apply_incr, apply_set, check_delta, MetricSnapshot, MetricStore, ModifyFn};
use crate::{
    clock::Clock,
    errors::Error,
    field::FieldTuple,
    metric::{MetricDef, MetricValue},
    target::Target,
};

mod backend;
pub use self::backend::{
    BackendError, CasToken, InMemoryIndex, InMemoryMemcache, MemcacheClient, MetricIndex, MetricIndexEntry,
};

mod codec;
use self::codec::{Entry, InstanceKey};

/// Number of compare-and-set attempts made for one update before it is dropped.
pub const CAS_RETRIES: usize = 10;

const NAMESPACE_PREFIX: &str = "ts_mon_py_";

/// Returns the memcache namespace holding the metrics of a job.
pub fn namespace_for(job_name: &str) -> String {
    format!("{NAMESPACE_PREFIX}{job_name}")
}

/// A [`MetricStore`] backed by memcache, shared by every instance of a job.
#[derive(Debug)]
pub struct MemcacheMetricStore {
    clock: Arc<dyn Clock>,
    client: Arc<dyn MemcacheClient>,
    index: Arc<dyn MetricIndex>,
    target: Target,
    namespace: String,
    indexed: Mutex<HashSet<String>>,
    dropped_updates: AtomicU64,
}

impl MemcacheMetricStore {
    /// Creates a store for the instance identified by `target`.
    ///
    /// Values are kept in the namespace of the target's job, under the target's hostname and task number.
    pub fn new(
        clock: Arc<dyn Clock>,
        client: Arc<dyn MemcacheClient>,
        index: Arc<dyn MetricIndex>,
        target: Target,
    ) -> Self {
        let namespace = namespace_for(target.job_name());
        Self {
            clock,
            client,
            index,
            target,
            namespace,
            indexed: Mutex::new(HashSet::new()),
            dropped_updates: AtomicU64::new(0),
        }
    }

    /// Namespace this instance writes to.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Number of updates dropped because every compare-and-set attempt failed.
    pub fn dropped_updates(&self) -> u64 {
        self.dropped_updates.load(Ordering::Relaxed)
    }

    fn instance_key(&self) -> InstanceKey {
        (self.target.hostname().to_string(), self.target.task_num())
    }

    fn read_entry(&self, name: &str) -> Option<Entry> {
        match self.client.gets(&self.namespace, name) {
            Ok(Some((bytes, _))) => decode_or_warn(name, &bytes),
            Ok(None) => None,
            Err(e) => {
                warn!(metric = name, error = %e, "Failed to read metric from memcache.");
                None
            }
        }
    }

    fn own_values(&self, name: &str) -> Option<HashMap<FieldTuple, MetricValue>> {
        self.read_entry(name).and_then(|mut entry| entry.instances.remove(&self.instance_key()))
    }

    /// Runs `update` against the current value of one time series and writes the result with compare-and-set.
    ///
    /// Errors from `update` are returned immediately. Backend failures and lost races use up one attempt each; once
    /// every attempt is used the update is dropped and `false` is returned.
    fn update<U>(&self, def: &MetricDef, fields: FieldTuple, update: U) -> Result<bool, Error>
    where
        U: Fn(Option<&MetricValue>) -> Result<MetricValue, Error>,
    {
        let name = def.name();
        let instance = self.instance_key();

        for attempt in 0..CAS_RETRIES {
            let current = match self.client.gets(&self.namespace, name) {
                Ok(current) => current,
                Err(e) => {
                    debug!(metric = name, attempt, error = %e, "Failed to read metric for update.");
                    continue;
                }
            };

            let (entry, token) = match current {
                Some((bytes, token)) => (decode_or_warn(name, &bytes), Some(token)),
                None => (None, None),
            };
            let mut entry = entry.unwrap_or_else(|| Entry::new(def.start_time().unwrap_or_else(|| self.clock.now())));

            let cells = entry.instances.entry(instance.clone()).or_default();
            let new = update(cells.get(&fields))?;
            cells.insert(fields.clone(), new);

            let blob = codec::encode(&entry);
            let written = match token {
                Some(token) => self.client.cas(&self.namespace, name, blob, token),
                None => self.client.add(&self.namespace, name, blob),
            };
            match written {
                Ok(true) => {
                    self.ensure_indexed(name);
                    return Ok(true);
                }
                Ok(false) => debug!(metric = name, attempt, "Lost compare-and-set race."),
                Err(e) => debug!(metric = name, attempt, error = %e, "Failed to write metric."),
            }
        }

        self.dropped_updates.fetch_add(1, Ordering::Relaxed);
        warn!(metric = name, retries = CAS_RETRIES, "Dropping metric update after too many compare-and-set failures.");
        Ok(false)
    }

    fn ensure_indexed(&self, name: &str) {
        if self.indexed.lock().contains(name) {
            return;
        }
        match self.index.insert(MetricIndexEntry::new(self.target.job_name(), name)) {
            Ok(()) => {
                self.indexed.lock().insert(name.to_string());
            }
            Err(e) => warn!(metric = name, error = %e, "Failed to record metric in index."),
        }
    }
}

fn decode_or_warn(name: &str, bytes: &[u8]) -> Option<Entry> {
    match codec::decode(bytes) {
        Ok(entry) => Some(entry),
        Err(e) => {
            warn!(metric = name, error = %e, "Ignoring corrupted metric value in memcache.");
            None
        }
    }
}

impl MetricStore for MemcacheMetricStore {
    fn get(&self, name: &str, fields: &FieldTuple) -> Option<MetricValue> {
        self.own_values(name).and_then(|mut values| values.remove(fields))
    }

    fn field_values(&self, name: &str) -> Vec<(FieldTuple, MetricValue)> {
        self.own_values(name).map(|values| values.into_iter().collect()).unwrap_or_default()
    }

    fn get_all(&self) -> Vec<MetricSnapshot> {
        let entries = match self.index.entries() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Failed to read metric index.");
                return Vec::new();
            }
        };

        let mut names_by_job: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for entry in entries {
            names_by_job.entry(entry.job_name).or_default().push(entry.metric_name);
        }

        let end_time = self.clock.now();
        let mut snapshots = Vec::new();
        for (job_name, names) in names_by_job {
            let blobs = match self.client.get_multi(&namespace_for(&job_name), &names) {
                Ok(blobs) => blobs,
                Err(e) => {
                    warn!(job = %job_name, error = %e, "Failed to read metrics of job.");
                    continue;
                }
            };

            for (name, bytes) in blobs {
                let Some(entry) = decode_or_warn(&name, &bytes) else { continue };
                for ((hostname, task_num), values) in entry.instances {
                    snapshots.push(MetricSnapshot {
                        name: name.clone(),
                        target: Some(self.target.with_instance(job_name.as_str(), hostname, task_num)),
                        start_time: entry.start_time,
                        end_time,
                        values: values.into_iter().collect(),
                    });
                }
            }
        }
        snapshots
    }

    fn set(&self, def: &MetricDef, fields: FieldTuple, value: MetricValue, enforce_ge: bool) -> Result<(), Error> {
        self.update(def, fields, |old| apply_set(def, old, value.clone(), enforce_ge)).map(drop)
    }

    fn incr(
        &self,
        def: &MetricDef,
        fields: FieldTuple,
        delta: MetricValue,
        modify_fn: Option<ModifyFn<'_>>,
    ) -> Result<(), Error> {
        check_delta(def, &delta)?;
        self.update(def, fields, |old| apply_incr(def, old, &delta, modify_fn)).map(drop)
    }

    fn reset_for_unittest(&self, name: Option<&str>) {
        let names = match name {
            Some(name) => vec![name.to_string()],
            None => match self.index.entries() {
                Ok(entries) => entries
                    .into_iter()
                    .filter(|entry| entry.job_name == self.target.job_name())
                    .map(|entry| entry.metric_name)
                    .collect(),
                Err(e) => {
                    warn!(error = %e, "Failed to read metric index.");
                    Vec::new()
                }
            },
        };

        for name in names {
            if let Err(e) = self.client.delete(&self.namespace, &name) {
                warn!(metric = %name, error = %e, "Failed to delete metric from memcache.");
            }
        }
    }
}
