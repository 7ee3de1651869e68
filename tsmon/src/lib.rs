//! Time-series monitoring metrics.
//!
//! `tsmon` defines typed metrics (counters, gauges, floats, strings, booleans and distributions), keeps their values
//! in a thread-safe store, and periodically serializes everything into collections sent to a monitoring collector.
//!
//! # Usage
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use tsmon::{Field, MetricBuilder, NullMonitor, StateBuilder, Target};
//! // A `State` holds the registered metrics and decides where and when their values are sent.
//! let state = StateBuilder::new()
//!     .with_monitor(Arc::new(NullMonitor))
//!     .with_target(Target::task("service", "job", "region", "host", 0))
//!     .build()
//!     .expect("failed to build state");
//!
//! // Metrics are defined once and registered against a state.
//! let requests = MetricBuilder::new("frontend/requests", "Number of requests served.")
//!     .with_field(Field::int("status"))
//!     .counter(&state)
//!     .expect("failed to define metric");
//!
//! requests.increment([("status", 200)]).expect("failed to increment");
//! state.flush().expect("failed to flush");
//! ```
//!
//! # Metric kinds
//!
//! Counters, cumulative floats and cumulative distributions only ever grow. Trying to set them to a smaller value, or
//! to increment them by a negative amount, fails with [`Error::DecreasingValue`]. Their serialized values carry the
//! time at which accumulation started, which stays fixed until the metric is reset.
//!
//! Every metric declares up to [`MAX_FIELDS`] typed fields. Each distinct combination of field values is a separate
//! time series.
//!
//! # Stores
//!
//! Values live in a [`MetricStore`]. The [`InProcessMetricStore`] keeps them in memory behind a single lock. The
//! [`MemcacheMetricStore`] shares them between every instance of a job, and drops (and logs) updates it cannot apply
//! after [`store::memcache::CAS_RETRIES`] compare-and-set attempts instead of failing the caller.
//!
//! # Flushing
//!
//! In [`FlushMode::Manual`], values are sent by calling [`State::flush`]. In [`FlushMode::Auto`], a background thread
//! flushes on a fixed interval and once more when the state is closed. In [`FlushMode::All`], every mutation sends the
//! mutated metric immediately.
#![deny(clippy::all)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod bucketer;
pub use self::bucketer::{
    default_growth_factor, Bucketer, BucketerError, DEFAULT_NUM_FINITE_BUCKETS, MAX_NUM_FINITE_BUCKETS,
};

mod clock;
pub use self::clock::{Clock, MockClock, SystemClock};

pub mod config;

mod distribution;
pub use self::distribution::Distribution;

mod errors;
pub use self::errors::Error;

mod field;
pub use self::field::{
    is_valid_field_name, Field, FieldSpec, FieldTuple, FieldType, FieldValue, IntoFields, MAX_FIELDS,
};

mod flush;
pub use self::flush::{next_timeout, FlushThread};

pub mod metric;
pub use self::metric::{
    BooleanMetric, CounterMetric, CumulativeDistributionMetric, CumulativeMetric, FloatMetric, GaugeMetric, Metric,
    MetricBuilder, MetricDef, MetricKind, MetricValue, NonCumulativeDistributionMetric, StringMetric,
};

mod monitor;
pub use self::monitor::{DebuggingMonitor, DiskMonitor, Monitor, MonitorError, NullMonitor};

pub mod proto;

mod state;
pub use self::state::{
    FlushMode, ParseFlushModeError, State, StateBuilder, DEFAULT_FLUSH_INTERVAL, DEFAULT_METRIC_NAME_PREFIX,
    METRICS_DATA_LENGTH_LIMIT,
};

pub mod store;
pub use self::store::{InProcessMetricStore, MemcacheMetricStore, MetricSnapshot, MetricStore};

mod target;
pub use self::target::Target;

mod units;
pub use self::units::Units;
