use std::ops::Deref;

use super::{Metric, MetricValue};
use crate::{errors::Error, field::IntoFields, store};

/// A metric whose value is a monotonically increasing integer.
///
/// Unset time series read as zero, so a counter can be incremented straight away.
#[derive(Clone, Debug)]
pub struct CounterMetric {
    metric: Metric,
}

impl CounterMetric {
    pub(crate) fn from_metric(metric: Metric) -> Self {
        Self { metric }
    }

    /// The untyped handle of this metric.
    pub fn metric(&self) -> &Metric {
        &self.metric
    }

    /// Sets the value.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::DecreasingValue`] if `value` is below the current value, and if the fields do not match.
    pub fn set<F: IntoFields>(&self, value: i64, fields: F) -> Result<(), Error> {
        self.metric.set(value, fields)
    }

    /// Adds one to the value.
    ///
    /// # Errors
    ///
    /// Fails if the fields do not match.
    pub fn increment<F: IntoFields>(&self, fields: F) -> Result<(), Error> {
        self.increment_by(1, fields)
    }

    /// Adds `step` to the value.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::DecreasingValue`] if `step` is negative, and if the fields do not match.
    pub fn increment_by<F: IntoFields>(&self, step: i64, fields: F) -> Result<(), Error> {
        self.metric.incr(fields, MetricValue::Int(step), None)
    }

    /// Returns the value, or zero if it has not been set.
    ///
    /// # Errors
    ///
    /// Fails if the fields do not match.
    pub fn get<F: IntoFields>(&self, fields: F) -> Result<i64, Error> {
        Ok(self.metric.get(fields)?.and_then(|v| v.as_int()).unwrap_or(0))
    }
}

impl Deref for CounterMetric {
    type Target = Metric;

    fn deref(&self) -> &Metric {
        &self.metric
    }
}

/// A metric whose value is an integer that can go up and down.
#[derive(Clone, Debug)]
pub struct GaugeMetric {
    metric: Metric,
}

impl GaugeMetric {
    pub(crate) fn from_metric(metric: Metric) -> Self {
        Self { metric }
    }

    /// The untyped handle of this metric.
    pub fn metric(&self) -> &Metric {
        &self.metric
    }

    /// Sets the value.
    ///
    /// # Errors
    ///
    /// Fails if the fields do not match.
    pub fn set<F: IntoFields>(&self, value: i64, fields: F) -> Result<(), Error> {
        self.metric.set(value, fields)
    }

    /// Adds one to the value.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::IncrementUnsetValue`] if the value has not been set, and if the fields do not match.
    pub fn increment<F: IntoFields>(&self, fields: F) -> Result<(), Error> {
        self.increment_by(1, fields)
    }

    /// Adds `step` to the value.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::IncrementUnsetValue`] if the value has not been set, with [`Error::DecreasingValue`] if
    /// `step` is negative, and if the fields do not match.
    pub fn increment_by<F: IntoFields>(&self, step: i64, fields: F) -> Result<(), Error> {
        let def = self.metric.definition();
        let add_to_set_value = |old: Option<&MetricValue>, delta: &MetricValue| match old {
            Some(_) => store::add_values(def, old, delta),
            None => Err(Error::IncrementUnsetValue { metric: def.name().to_string() }),
        };
        self.metric.incr(fields, MetricValue::Int(step), Some(&add_to_set_value))
    }

    /// Returns the value, if it has been set.
    ///
    /// # Errors
    ///
    /// Fails if the fields do not match.
    pub fn get<F: IntoFields>(&self, fields: F) -> Result<Option<i64>, Error> {
        Ok(self.metric.get(fields)?.and_then(|v| v.as_int()))
    }
}

impl Deref for GaugeMetric {
    type Target = Metric;

    fn deref(&self) -> &Metric {
        &self.metric
    }
}

/// A metric whose value is a monotonically increasing float.
#[derive(Clone, Debug)]
pub struct CumulativeMetric {
    metric: Metric,
}

impl CumulativeMetric {
    pub(crate) fn from_metric(metric: Metric) -> Self {
        Self { metric }
    }

    /// The untyped handle of this metric.
    pub fn metric(&self) -> &Metric {
        &self.metric
    }

    /// Sets the value.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::DecreasingValue`] if `value` is below the current value, and if the fields do not match.
    pub fn set<F: IntoFields>(&self, value: f64, fields: F) -> Result<(), Error> {
        self.metric.set(value, fields)
    }

    /// Adds one to the value.
    ///
    /// # Errors
    ///
    /// Fails if the fields do not match.
    pub fn increment<F: IntoFields>(&self, fields: F) -> Result<(), Error> {
        self.increment_by(1.0, fields)
    }

    /// Adds `step` to the value.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::DecreasingValue`] if `step` is negative, and if the fields do not match.
    pub fn increment_by<F: IntoFields>(&self, step: f64, fields: F) -> Result<(), Error> {
        self.metric.incr(fields, MetricValue::Float(step), None)
    }

    /// Returns the value, or zero if it has not been set.
    ///
    /// # Errors
    ///
    /// Fails if the fields do not match.
    pub fn get<F: IntoFields>(&self, fields: F) -> Result<f64, Error> {
        Ok(self.metric.get(fields)?.and_then(|v| v.as_float()).unwrap_or(0.0))
    }
}

impl Deref for CumulativeMetric {
    type Target = Metric;

    fn deref(&self) -> &Metric {
        &self.metric
    }
}

/// A metric whose value is a float that can go up and down.
#[derive(Clone, Debug)]
pub struct FloatMetric {
    metric: Metric,
}

impl FloatMetric {
    pub(crate) fn from_metric(metric: Metric) -> Self {
        Self { metric }
    }

    /// The untyped handle of this metric.
    pub fn metric(&self) -> &Metric {
        &self.metric
    }

    /// Sets the value.
    ///
    /// # Errors
    ///
    /// Fails if the fields do not match.
    pub fn set<F: IntoFields>(&self, value: f64, fields: F) -> Result<(), Error> {
        self.metric.set(value, fields)
    }

    /// Adds `step` to the value.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::IncrementUnsetValue`] if the value has not been set, with [`Error::DecreasingValue`] if
    /// `step` is negative, and if the fields do not match.
    pub fn increment_by<F: IntoFields>(&self, step: f64, fields: F) -> Result<(), Error> {
        let def = self.metric.definition();
        let add_to_set_value = |old: Option<&MetricValue>, delta: &MetricValue| match old {
            Some(_) => store::add_values(def, old, delta),
            None => Err(Error::IncrementUnsetValue { metric: def.name().to_string() }),
        };
        self.metric.incr(fields, MetricValue::Float(step), Some(&add_to_set_value))
    }

    /// Returns the value, if it has been set.
    ///
    /// # Errors
    ///
    /// Fails if the fields do not match.
    pub fn get<F: IntoFields>(&self, fields: F) -> Result<Option<f64>, Error> {
        Ok(self.metric.get(fields)?.and_then(|v| v.as_float()))
    }
}

impl Deref for FloatMetric {
    type Target = Metric;

    fn deref(&self) -> &Metric {
        &self.metric
    }
}
