//! Registry of live metrics and the flush path.
use std::{
    collections::HashMap,
    fmt,
    str::FromStr,
    sync::{Arc, Weak},
    time::Duration,
};

use parking_lot::{Mutex, RwLock};
use thiserror::Error as ThisError;
use tracing::{debug, error};

use crate::{
    clock::{Clock, SystemClock},
    errors::Error,
    flush::FlushThread,
    metric::{to_microseconds, MetricDef},
    monitor::Monitor,
    proto::MetricsCollection,
    store::{InProcessMetricStore, MetricSnapshot, MetricStore},
    target::Target,
};

/// Maximum number of data records sent in one collection.
pub const METRICS_DATA_LENGTH_LIMIT: usize = 1000;

/// Default prefix prepended to every metric name on the wire.
pub const DEFAULT_METRIC_NAME_PREFIX: &str = "/chrome/infra/";

/// Default interval between automatic flushes.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// When values are sent to the monitor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FlushMode {
    /// Every mutation sends the mutated metric immediately.
    All,

    /// Values are only sent when [`State::flush`] is called.
    #[default]
    Manual,

    /// A background thread flushes on a fixed interval.
    Auto,
}

impl FlushMode {
    /// Returns the name of the mode as used on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushMode::All => "all",
            FlushMode::Manual => "manual",
            FlushMode::Auto => "auto",
        }
    }
}

impl fmt::Display for FlushMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown flush mode.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("unknown flush mode '{0}' (expected 'all', 'manual' or 'auto')")]
pub struct ParseFlushModeError(String);

impl FromStr for FlushMode {
    type Err = ParseFlushModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(FlushMode::All),
            "manual" => Ok(FlushMode::Manual),
            "auto" => Ok(FlushMode::Auto),
            other => Err(ParseFlushModeError(other.to_string())),
        }
    }
}

/// Process-wide monitoring state: the registered metrics, where their values live, and where they are sent.
///
/// A `State` is an explicit context object: metrics are registered against one, and tests can create as many
/// isolated states as they need.
pub struct State {
    registry: RwLock<HashMap<String, Arc<MetricDef>>>,
    store: Arc<dyn MetricStore>,
    monitor: RwLock<Option<Arc<dyn Monitor>>>,
    target: RwLock<Option<Target>>,
    flush_mode: RwLock<FlushMode>,
    metric_name_prefix: String,
    clock: Arc<dyn Clock>,
    flush_thread: Mutex<Option<FlushThread>>,
}

impl State {
    /// Registers a metric definition.
    ///
    /// Registering the same definition twice is a no-op.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::DuplicateRegistration`] if a different definition with the same name is registered.
    pub fn register(&self, def: &Arc<MetricDef>) -> Result<(), Error> {
        let mut registry = self.registry.write();
        match registry.get(def.name()) {
            Some(existing) if Arc::ptr_eq(existing, def) => Ok(()),
            Some(_) => Err(Error::DuplicateRegistration { metric: def.name().to_string() }),
            None => {
                registry.insert(def.name().to_string(), Arc::clone(def));
                Ok(())
            }
        }
    }

    /// Removes a metric definition. Its values stay in the store but are no longer flushed.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotRegistered`] if this definition is not the one registered under its name.
    pub fn unregister(&self, def: &Arc<MetricDef>) -> Result<(), Error> {
        let mut registry = self.registry.write();
        match registry.get(def.name()) {
            Some(existing) if Arc::ptr_eq(existing, def) => {
                registry.remove(def.name());
                Ok(())
            }
            _ => Err(Error::NotRegistered { metric: def.name().to_string() }),
        }
    }

    /// Returns every registered metric definition.
    pub fn metrics(&self) -> Vec<Arc<MetricDef>> {
        self.registry.read().values().cloned().collect()
    }

    /// Returns the registered definition with the given name.
    pub fn metric(&self, name: &str) -> Option<Arc<MetricDef>> {
        self.registry.read().get(name).cloned()
    }

    /// Store holding every value.
    pub fn store(&self) -> &Arc<dyn MetricStore> {
        &self.store
    }

    /// Clock used to stamp collections.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Prefix prepended to metric names on the wire.
    pub fn metric_name_prefix(&self) -> &str {
        &self.metric_name_prefix
    }

    /// Default target attached to metrics that have none of their own.
    pub fn target(&self) -> Option<Target> {
        self.target.read().clone()
    }

    /// Replaces the default target.
    pub fn set_target(&self, target: Option<Target>) {
        *self.target.write() = target;
    }

    /// Replaces the monitor.
    pub fn set_monitor(&self, monitor: Option<Arc<dyn Monitor>>) {
        *self.monitor.write() = monitor;
    }

    /// Current flush mode.
    pub fn flush_mode(&self) -> FlushMode {
        *self.flush_mode.read()
    }

    /// Changes when values are sent.
    ///
    /// Switching modes does not start or stop the flush thread; that only happens in [`StateBuilder::build`] and
    /// [`State::close`].
    pub fn set_flush_mode(&self, mode: FlushMode) {
        *self.flush_mode.write() = mode;
    }

    /// Returns `true` if a background flush thread is running.
    pub fn is_flushing_in_background(&self) -> bool {
        self.flush_thread.lock().is_some()
    }

    /// Serializes every registered metric held by the store and sends it to the monitor.
    ///
    /// Collections hold at most [`METRICS_DATA_LENGTH_LIMIT`] records each. A final collection is always sent, even
    /// when it is empty.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NoConfiguredMonitor`] if there is no monitor, with [`Error::NoConfiguredTarget`] if a
    /// metric has no target, and with [`Error::Monitor`] if a send fails.
    pub fn flush(&self) -> Result<(), Error> {
        let monitor = self.monitor.read().clone().ok_or(Error::NoConfiguredMonitor)?;
        let registry = self.registry.read().clone();
        self.send_snapshots(monitor.as_ref(), &registry, self.store.get_all())
    }

    /// Sends one metric immediately when the flush mode is [`FlushMode::All`]. Otherwise does nothing.
    ///
    /// # Errors
    ///
    /// In [`FlushMode::All`], fails like [`State::flush`].
    pub fn send(&self, def: &MetricDef) -> Result<(), Error> {
        if self.flush_mode() != FlushMode::All {
            return Ok(());
        }

        let monitor = self.monitor.read().clone().ok_or(Error::NoConfiguredMonitor)?;
        let Some(registered) = self.metric(def.name()) else {
            return Ok(());
        };
        let snapshots = self.store.get_all().into_iter().filter(|s| s.name == def.name()).collect();
        let registry = HashMap::from([(def.name().to_string(), registered)]);
        self.send_snapshots(monitor.as_ref(), &registry, snapshots)
    }

    fn send_snapshots(
        &self,
        monitor: &dyn Monitor,
        registry: &HashMap<String, Arc<MetricDef>>,
        snapshots: Vec<MetricSnapshot>,
    ) -> Result<(), Error> {
        let default_target = self.target();
        let mut collection = self.new_collection();
        let mut collections_sent = 0usize;
        let mut records = 0usize;

        for snapshot in snapshots {
            let Some(def) = registry.get(&snapshot.name) else {
                continue;
            };
            let target = snapshot.target.as_ref().or(default_target.as_ref());

            for (fields, value) in &snapshot.values {
                if collection.data.len() >= METRICS_DATA_LENGTH_LIMIT {
                    monitor.send(&collection)?;
                    collections_sent += 1;
                    collection = self.new_collection();
                }
                def.serialize_to(
                    &mut collection,
                    &self.metric_name_prefix,
                    snapshot.start_time,
                    fields,
                    value,
                    target,
                )?;
                records += 1;
            }
        }

        monitor.send(&collection)?;
        collections_sent += 1;
        debug!(collections_sent, records, "Finished sending metrics.");
        Ok(())
    }

    fn new_collection(&self) -> MetricsCollection {
        MetricsCollection { data: Vec::new(), start_timestamp_us: Some(to_microseconds(self.clock.now())) }
    }

    /// Stops the background flush thread, if any, after one final flush.
    pub fn close(&self) {
        let flush_thread = self.flush_thread.lock().take();
        if let Some(flush_thread) = flush_thread {
            if flush_thread.is_current() {
                return;
            }
            flush_thread.stop();
        }
    }
}

impl Drop for State {
    fn drop(&mut self) {
        if let Some(flush_thread) = self.flush_thread.get_mut().take() {
            // The thread only holds a weak reference, so its final flush is a no-op by now.
            flush_thread.stop();
            if let Err(e) = self.flush() {
                error!(error = %e, "Failed to flush metrics.");
            }
        }
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("metrics", &self.registry.read().len())
            .field("store", &self.store)
            .field("monitor", &self.monitor.read())
            .field("target", &self.target.read())
            .field("flush_mode", &self.flush_mode())
            .field("metric_name_prefix", &self.metric_name_prefix)
            .finish_non_exhaustive()
    }
}

/// Builder for creating and configuring a [`State`].
pub struct StateBuilder {
    store: Option<Arc<dyn MetricStore>>,
    monitor: Option<Arc<dyn Monitor>>,
    target: Option<Target>,
    flush_mode: FlushMode,
    flush_interval: Duration,
    metric_name_prefix: String,
    clock: Arc<dyn Clock>,
}

impl StateBuilder {
    /// Creates a new `StateBuilder` with default values.
    ///
    /// Values are kept in an [`InProcessMetricStore`], there is no monitor or target, and values are only sent on
    /// explicit flushes.
    pub fn new() -> Self {
        Self {
            store: None,
            monitor: None,
            target: None,
            flush_mode: FlushMode::default(),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            metric_name_prefix: DEFAULT_METRIC_NAME_PREFIX.to_string(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Set the store holding metric values.
    ///
    /// Defaults to an [`InProcessMetricStore`] using the builder's clock.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn MetricStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the monitor values are sent to.
    #[must_use]
    pub fn with_monitor(mut self, monitor: Arc<dyn Monitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Set the default target.
    #[must_use]
    pub fn with_target(mut self, target: Target) -> Self {
        self.target = Some(target);
        self
    }

    /// Set the flush mode.
    ///
    /// Defaults to [`FlushMode::Manual`].
    #[must_use]
    pub fn with_flush_mode(mut self, mode: FlushMode) -> Self {
        self.flush_mode = mode;
        self
    }

    /// Set the interval between automatic flushes.
    ///
    /// Defaults to 60 seconds.
    #[must_use]
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Set the prefix prepended to metric names on the wire.
    ///
    /// Defaults to `/chrome/infra/`.
    #[must_use]
    pub fn with_metric_name_prefix<P: Into<String>>(mut self, prefix: P) -> Self {
        self.metric_name_prefix = prefix.into();
        self
    }

    /// Set the clock.
    ///
    /// Defaults to the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Builds the state, spawning the flush thread if the flush mode is [`FlushMode::Auto`].
    ///
    /// # Errors
    ///
    /// If the flush thread cannot be spawned, an error is returned.
    pub fn build(self) -> Result<Arc<State>, std::io::Error> {
        let store = self.store.unwrap_or_else(|| Arc::new(InProcessMetricStore::new(Arc::clone(&self.clock))));
        let state = Arc::new(State {
            registry: RwLock::new(HashMap::new()),
            store,
            monitor: RwLock::new(self.monitor),
            target: RwLock::new(self.target),
            flush_mode: RwLock::new(self.flush_mode),
            metric_name_prefix: self.metric_name_prefix,
            clock: Arc::clone(&self.clock),
            flush_thread: Mutex::new(None),
        });

        if self.flush_mode == FlushMode::Auto {
            let weak: Weak<State> = Arc::downgrade(&state);
            let flush_thread = FlushThread::spawn(self.flush_interval, self.clock, move || match weak.upgrade() {
                Some(state) => state.flush(),
                None => Ok(()),
            })?;
            *state.flush_thread.lock() = Some(flush_thread);
        }

        Ok(state)
    }
}

impl Default for StateBuilder {
    fn default() -> Self {
        Self::new()
    }
}
