use std::ops::Deref;

use super::{Metric, MetricValue};
use crate::{errors::Error, field::IntoFields};

/// A metric whose value is a string.
#[derive(Clone, Debug)]
pub struct StringMetric {
    metric: Metric,
}

impl StringMetric {
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
    pub fn set<V, F>(&self, value: V, fields: F) -> Result<(), Error>
    where
        V: Into<String>,
        F: IntoFields,
    {
        self.metric.set(MetricValue::String(value.into()), fields)
    }

    /// Returns the value, if it has been set.
    ///
    /// # Errors
    ///
    /// Fails if the fields do not match.
    pub fn get<F: IntoFields>(&self, fields: F) -> Result<Option<String>, Error> {
        Ok(self.metric.get(fields)?.and_then(|v| v.as_str().map(str::to_string)))
    }
}

impl Deref for StringMetric {
    type Target = Metric;

    fn deref(&self) -> &Metric {
        &self.metric
    }
}

/// A metric whose value is a boolean.
#[derive(Clone, Debug)]
pub struct BooleanMetric {
    metric: Metric,
}

impl BooleanMetric {
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
    pub fn set<F: IntoFields>(&self, value: bool, fields: F) -> Result<(), Error> {
        self.metric.set(value, fields)
    }

    /// Flips the value. An unset value becomes `true`.
    ///
    /// The read and the write happen atomically in the store.
    ///
    /// # Errors
    ///
    /// Fails if the fields do not match.
    pub fn toggle<F: IntoFields>(&self, fields: F) -> Result<(), Error> {
        let name = self.metric.name();
        let flip = |old: Option<&MetricValue>, _delta: &MetricValue| match old {
            None => Ok(MetricValue::Bool(true)),
            Some(MetricValue::Bool(b)) => Ok(MetricValue::Bool(!b)),
            Some(other) => Err(Error::invalid_value(name, other.type_name())),
        };
        self.metric.incr(fields, MetricValue::Bool(true), Some(&flip))
    }

    /// Returns the value, if it has been set.
    ///
    /// # Errors
    ///
    /// Fails if the fields do not match.
    pub fn get<F: IntoFields>(&self, fields: F) -> Result<Option<bool>, Error> {
        Ok(self.metric.get(fields)?.and_then(|v| v.as_bool()))
    }
}

impl Deref for BooleanMetric {
    type Target = Metric;

    fn deref(&self) -> &Metric {
        &self.metric
    }
}
