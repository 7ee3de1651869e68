use thiserror::Error;

use crate::{field::FieldValue, monitor::MonitorError};

/// Errors raised by metric definitions, mutations, registration and sends.
///
/// All of these are raised synchronously at the offending call. Telemetry delivery problems that must not
/// reach the application (compare-and-set exhaustion, failures inside the background flush thread) are logged
/// instead of being returned.
#[derive(Debug, Error)]
pub enum Error {
    /// A metric was defined with an invalid name, description or field spec.
    #[error("invalid definition for metric '{metric}': {reason}")]
    MetricDefinition {
        /// Name of the metric being defined.
        metric: String,
        /// What was wrong with the definition.
        reason: String,
    },

    /// A metric was defined with more fields than the collector accepts.
    #[error("metric '{metric}' has {} fields, the limit is {limit}", fields.len())]
    TooManyFields {
        /// Name of the metric.
        metric: String,
        /// Names of every field the definition asked for.
        fields: Vec<String>,
        /// Maximum number of fields.
        limit: usize,
    },

    /// A value of the wrong type was given to a metric.
    #[error("metric '{metric}' does not accept {value} values")]
    InvalidValueType {
        /// Name of the metric.
        metric: String,
        /// Description of the rejected value.
        value: String,
    },

    /// A field value did not match the declared type of its field.
    #[error("invalid value {value} for {expected} field '{field}' of metric '{metric}'")]
    InvalidFieldType {
        /// Name of the metric.
        metric: String,
        /// Name of the field.
        field: String,
        /// Declared type of the field.
        expected: &'static str,
        /// The rejected value.
        value: FieldValue,
    },

    /// A cumulative metric was asked to go backwards.
    #[error("metric '{metric}' is cumulative and cannot decrease (old value: {}, new value: {new})", old.as_deref().unwrap_or("unset"))]
    DecreasingValue {
        /// Name of the metric.
        metric: String,
        /// The stored value, when there was one.
        old: Option<String>,
        /// The rejected value or delta.
        new: String,
    },

    /// An increment would take an integer value past the range of `i64`.
    #[error("incrementing metric '{metric}' by {delta} overflows its value {old}")]
    ValueOverflow {
        /// Name of the metric.
        metric: String,
        /// The stored value.
        old: i64,
        /// The rejected delta.
        delta: i64,
    },

    /// An increment was attempted on a metric that has no value yet and no default.
    #[error("metric '{metric}' was incremented before a value was set")]
    IncrementUnsetValue {
        /// Name of the metric.
        metric: String,
    },

    /// The fields given at mutation time do not match the metric's field spec.
    #[error("metric '{metric}' expects fields [{}] but was given [{}]", expected.join(", "), got.join(", "))]
    WrongFields {
        /// Name of the metric.
        metric: String,
        /// Field names declared by the metric.
        expected: Vec<String>,
        /// Field names supplied by the caller.
        got: Vec<String>,
    },

    /// A different metric object with the same name is already registered.
    #[error("a different metric named '{metric}' is already registered")]
    DuplicateRegistration {
        /// Name of the metric.
        metric: String,
    },

    /// The metric being unregistered was never registered.
    #[error("metric '{metric}' is not registered")]
    NotRegistered {
        /// Name of the metric.
        metric: String,
    },

    /// `set` was called on a cumulative distribution, which only supports `add`.
    #[error("cannot set() cumulative distribution metric '{metric}' (use add() instead)")]
    SetCumulativeDistribution {
        /// Name of the metric.
        metric: String,
    },

    /// A send or flush was requested but no monitor is configured.
    #[error("no monitor is configured")]
    NoConfiguredMonitor,

    /// A metric was serialized without either its own target or a default target.
    #[error("no target is configured for metric '{metric}'")]
    NoConfiguredTarget {
        /// Name of the metric.
        metric: String,
    },

    /// The monitor failed to deliver a collection.
    #[error("failed to send metrics collection: {0}")]
    Monitor(#[from] MonitorError),
}

impl Error {
    pub(crate) fn definition<M, R>(metric: M, reason: R) -> Self
    where
        M: Into<String>,
        R: Into<String>,
    {
        Error::MetricDefinition { metric: metric.into(), reason: reason.into() }
    }

    pub(crate) fn invalid_value<M, V>(metric: M, value: V) -> Self
    where
        M: Into<String>,
        V: Into<String>,
    {
        Error::InvalidValueType { metric: metric.into(), value: value.into() }
    }

    /// Returns `true` if this error was caused by a cumulative value being asked to decrease.
    pub fn is_decreasing_value(&self) -> bool {
        matches!(self, Error::DecreasingValue { .. })
    }
}
