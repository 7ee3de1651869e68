//! Storage of metric values.
//!
//! A [`MetricStore`] is the single source of truth for every value: metrics validate their inputs and then hand
//! the write to the store, which owns all locking. The rules shared by every backend (monotonic sets, increments,
//! start-time stamping) live here so each backend only has to provide atomicity.
use std::fmt;

use crate::{
    errors::Error,
    field::FieldTuple,
    metric::{MetricDef, MetricValue},
    target::Target,
};

mod in_process;
pub use self::in_process::InProcessMetricStore;

pub mod memcache;
pub use self::memcache::MemcacheMetricStore;

/// Combines the current value of a time series (if any) with a delta into the new value.
///
/// It may be called more than once for one increment, so it must not have side effects.
pub type ModifyFn<'a> = &'a dyn Fn(Option<&MetricValue>, &MetricValue) -> Result<MetricValue, Error>;

/// Every value of one metric, as seen by one instance.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricSnapshot {
    /// Name of the metric.
    pub name: String,
    /// Instance the values belong to, when the store holds values for more than this process.
    pub target: Option<Target>,
    /// Start of the accumulation window, in seconds since the UNIX epoch.
    pub start_time: f64,
    /// Time the snapshot was taken, in seconds since the UNIX epoch.
    pub end_time: f64,
    /// Value of every time series.
    pub values: Vec<(FieldTuple, MetricValue)>,
}

/// A store of metric values.
///
/// Implementations must be safe to share between threads: each method is atomic with respect to the time series it
/// touches, and a snapshot never exposes a value in the middle of a mutation.
pub trait MetricStore: fmt::Debug + Send + Sync {
    /// Returns the value of one time series of this process, if it has been written.
    fn get(&self, name: &str, fields: &FieldTuple) -> Option<MetricValue>;

    /// Returns every time series of one metric held for this process.
    fn field_values(&self, name: &str) -> Vec<(FieldTuple, MetricValue)>;

    /// Returns a snapshot of every metric.
    fn get_all(&self) -> Vec<MetricSnapshot>;

    /// Stores a value.
    ///
    /// # Errors
    ///
    /// If `enforce_ge` is set and the current value is greater than `value`, fails with [`Error::DecreasingValue`]
    /// and leaves the stored value unchanged.
    fn set(&self, def: &MetricDef, fields: FieldTuple, value: MetricValue, enforce_ge: bool) -> Result<(), Error>;

    /// Combines the current value with `delta`.
    ///
    /// Without a `modify_fn`, numeric deltas are added to the current value, or to zero if there is none.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::DecreasingValue`] if `delta` is a negative number, and with whatever `modify_fn` returns.
    fn incr(
        &self,
        def: &MetricDef,
        fields: FieldTuple,
        delta: MetricValue,
        modify_fn: Option<ModifyFn<'_>>,
    ) -> Result<(), Error>;

    /// Clears the values of one metric, or of every metric. Only meant for tests.
    fn reset_for_unittest(&self, name: Option<&str>);
}

/// Adds a numeric `delta` to `old`, treating a missing value as zero.
///
/// # Errors
///
/// Fails with [`Error::InvalidValueType`] if either value is not a number of the metric's type, and with
/// [`Error::ValueOverflow`] if an integer sum does not fit in an `i64`.
pub fn add_values(def: &MetricDef, old: Option<&MetricValue>, delta: &MetricValue) -> Result<MetricValue, Error> {
    match (old, delta) {
        (None, MetricValue::Int(d)) => Ok(MetricValue::Int(*d)),
        (None, MetricValue::Float(d)) => Ok(MetricValue::Float(*d)),
        (Some(MetricValue::Int(o)), MetricValue::Int(d)) => o
            .checked_add(*d)
            .map(MetricValue::Int)
            .ok_or_else(|| Error::ValueOverflow { metric: def.name().to_string(), old: *o, delta: *d }),
        (Some(MetricValue::Float(o)), MetricValue::Float(d)) => Ok(MetricValue::Float(o + d)),
        (Some(MetricValue::Float(o)), MetricValue::Int(d)) => Ok(MetricValue::Float(o + *d as f64)),
        (_, delta) => Err(Error::invalid_value(def.name(), delta.type_name())),
    }
}

/// Checks a set against the current value, returning the value to store.
///
/// An unset value counts as the kind's default, so a counter cannot be set below zero.
pub(crate) fn apply_set(
    def: &MetricDef,
    old: Option<&MetricValue>,
    value: MetricValue,
    enforce_ge: bool,
) -> Result<MetricValue, Error> {
    if !enforce_ge {
        return Ok(value);
    }

    let default = def.kind().default_value();
    if let Some(old) = old.or(default.as_ref()) {
        if value.is_less_than(old) {
            return Err(Error::DecreasingValue {
                metric: def.name().to_string(),
                old: Some(old.to_string()),
                new: value.to_string(),
            });
        }
    }
    Ok(value)
}

/// Rejects negative deltas before any value is read.
pub(crate) fn check_delta(def: &MetricDef, delta: &MetricValue) -> Result<(), Error> {
    if delta.is_negative() {
        return Err(Error::DecreasingValue { metric: def.name().to_string(), old: None, new: delta.to_string() });
    }
    Ok(())
}

/// Applies an increment to the current value.
pub(crate) fn apply_incr(
    def: &MetricDef,
    old: Option<&MetricValue>,
    delta: &MetricValue,
    modify_fn: Option<ModifyFn<'_>>,
) -> Result<MetricValue, Error> {
    match modify_fn {
        Some(modify_fn) => modify_fn(old, delta),
        None => add_values(def, old, delta),
    }
}
