//! Metric definitions and the typed handles used to update them.
use std::{fmt, sync::Arc};

use crate::{
    bucketer::Bucketer,
    distribution::Distribution,
    errors::Error,
    field::{Field, FieldSpec, FieldTuple, IntoFields},
    state::State,
    store::ModifyFn,
    target::Target,
    units::Units,
};

mod distribution;
pub use self::distribution::{CumulativeDistributionMetric, NonCumulativeDistributionMetric};

mod numeric;
pub use self::numeric::{CounterMetric, CumulativeMetric, FloatMetric, GaugeMetric};

mod scalar;
pub use self::scalar::{BooleanMetric, StringMetric};

mod serialize;
pub use self::serialize::{distribution_from_proto, distribution_to_proto, run_length_encode};
pub(crate) use self::serialize::to_microseconds;

/// A metric value.
#[derive(Clone, Debug, PartialEq)]
pub enum MetricValue {
    /// A boolean.
    Bool(bool),
    /// An integer.
    Int(i64),
    /// A float.
    Float(f64),
    /// A string.
    String(String),
    /// A distribution.
    Distribution(Distribution),
}

impl MetricValue {
    /// Name of the value's type, as used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            MetricValue::Bool(_) => "boolean",
            MetricValue::Int(_) => "integer",
            MetricValue::Float(_) => "float",
            MetricValue::String(_) => "string",
            MetricValue::Distribution(_) => "distribution",
        }
    }

    /// Returns `true` if this is a numeric value below zero.
    pub fn is_negative(&self) -> bool {
        match self {
            MetricValue::Int(i) => *i < 0,
            MetricValue::Float(f) => *f < 0.0,
            _ => false,
        }
    }

    /// Returns `true` if both values are numeric and `self` is strictly smaller than `other`.
    pub fn is_less_than(&self, other: &MetricValue) -> bool {
        match (self, other) {
            (MetricValue::Int(a), MetricValue::Int(b)) => a < b,
            (MetricValue::Float(a), MetricValue::Float(b)) => a < b,
            (MetricValue::Int(a), MetricValue::Float(b)) => (*a as f64) < *b,
            (MetricValue::Float(a), MetricValue::Int(b)) => *a < *b as f64,
            _ => false,
        }
    }

    /// Returns the boolean, if this is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetricValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer, if this is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            MetricValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the value as a float, if it is numeric.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            MetricValue::Float(f) => Some(*f),
            MetricValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Returns the string, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetricValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the distribution, if this is one.
    pub fn as_distribution(&self) -> Option<&Distribution> {
        match self {
            MetricValue::Distribution(d) => Some(d),
            _ => None,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Bool(b) => write!(f, "{b}"),
            MetricValue::Int(i) => write!(f, "{i}"),
            MetricValue::Float(v) => write!(f, "{v}"),
            MetricValue::String(s) => write!(f, "{s:?}"),
            MetricValue::Distribution(d) => write!(f, "distribution(count={}, sum={})", d.count(), d.sum()),
        }
    }
}

impl From<bool> for MetricValue {
    fn from(value: bool) -> Self {
        MetricValue::Bool(value)
    }
}

impl From<i64> for MetricValue {
    fn from(value: i64) -> Self {
        MetricValue::Int(value)
    }
}

impl From<i32> for MetricValue {
    fn from(value: i32) -> Self {
        MetricValue::Int(i64::from(value))
    }
}

impl From<u32> for MetricValue {
    fn from(value: u32) -> Self {
        MetricValue::Int(i64::from(value))
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Float(value)
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        MetricValue::String(value.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(value: String) -> Self {
        MetricValue::String(value)
    }
}

impl From<Distribution> for MetricValue {
    fn from(value: Distribution) -> Self {
        MetricValue::Distribution(value)
    }
}

/// Kind of a metric: which values it holds and how they may change.
#[derive(Clone, Debug, PartialEq)]
pub enum MetricKind {
    /// Arbitrary strings.
    String,
    /// Booleans.
    Boolean,
    /// Integers that never decrease.
    Counter,
    /// Integers.
    Gauge,
    /// Floats that never decrease.
    Cumulative,
    /// Floats.
    Float,
    /// Distributions of samples.
    Distribution {
        /// How samples are assigned to buckets.
        bucketer: Arc<Bucketer>,
        /// Whether samples accumulate since the start time, or the distribution is replaced wholesale.
        cumulative: bool,
    },
}

impl MetricKind {
    /// Returns `true` if values of this kind never decrease and are reported with a start time.
    pub fn is_cumulative(&self) -> bool {
        match self {
            MetricKind::Counter | MetricKind::Cumulative => true,
            MetricKind::Distribution { cumulative, .. } => *cumulative,
            _ => false,
        }
    }

    /// Value reported for a time series that has not been written yet.
    pub fn default_value(&self) -> Option<MetricValue> {
        match self {
            MetricKind::Counter => Some(MetricValue::Int(0)),
            MetricKind::Cumulative => Some(MetricValue::Float(0.0)),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            MetricKind::String => "string",
            MetricKind::Boolean => "boolean",
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Cumulative => "cumulative",
            MetricKind::Float => "float",
            MetricKind::Distribution { cumulative: true, .. } => "cumulative distribution",
            MetricKind::Distribution { cumulative: false, .. } => "non-cumulative distribution",
        }
    }
}

/// The immutable definition of a metric.
///
/// This is what a [`State`] registers and what a store is handed on every write. Two definitions are the same
/// metric only if they are the same allocation.
#[derive(Debug)]
pub struct MetricDef {
    name: String,
    description: String,
    field_spec: FieldSpec,
    kind: MetricKind,
    units: Units,
    target: Option<Target>,
    start_time: Option<f64>,
}

impl MetricDef {
    /// Name of the metric, without leading slashes.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Declared fields.
    pub fn field_spec(&self) -> &FieldSpec {
        &self.field_spec
    }

    /// Kind of the metric.
    pub fn kind(&self) -> &MetricKind {
        &self.kind
    }

    /// Units of the metric's values.
    pub fn units(&self) -> Units {
        self.units
    }

    /// Target overriding the process target, if any.
    pub fn target(&self) -> Option<&Target> {
        self.target.as_ref()
    }

    /// Start time overriding the store's clock, if any.
    pub fn start_time(&self) -> Option<f64> {
        self.start_time
    }

    /// Returns `true` if the metric's values never decrease.
    pub fn is_cumulative(&self) -> bool {
        self.kind.is_cumulative()
    }

    /// Checks that `value` can be stored in this metric, returning the value in its stored form.
    ///
    /// Integers given to float metrics are converted.
    pub(crate) fn check_value(&self, value: MetricValue) -> Result<MetricValue, Error> {
        match (&self.kind, value) {
            (MetricKind::String, value @ MetricValue::String(_))
            | (MetricKind::Boolean, value @ MetricValue::Bool(_))
            | (MetricKind::Counter | MetricKind::Gauge, value @ MetricValue::Int(_))
            | (MetricKind::Cumulative | MetricKind::Float, value @ MetricValue::Float(_)) => Ok(value),
            (MetricKind::Cumulative | MetricKind::Float, MetricValue::Int(i)) => Ok(MetricValue::Float(i as f64)),
            (MetricKind::Distribution { cumulative: true, .. }, _) => {
                Err(Error::SetCumulativeDistribution { metric: self.name.clone() })
            }
            (MetricKind::Distribution { cumulative: false, .. }, value @ MetricValue::Distribution(_)) => Ok(value),
            (_, value) => Err(Error::invalid_value(&self.name, value.type_name())),
        }
    }
}

/// Builder for a metric.
///
/// The terminal methods (`counter`, `gauge`, ...) validate the definition, register it with a [`State`] and return a
/// typed handle.
#[derive(Debug)]
pub struct MetricBuilder {
    name: String,
    description: String,
    fields: Vec<Field>,
    units: Units,
    target: Option<Target>,
    start_time: Option<f64>,
    bucketer: Option<Bucketer>,
}

impl MetricBuilder {
    /// Creates a new `MetricBuilder`.
    ///
    /// Leading slashes are stripped from `name`.
    pub fn new<N, D>(name: N, description: D) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Self {
            name: name.into(),
            description: description.into(),
            fields: Vec::new(),
            units: Units::Unknown,
            target: None,
            start_time: None,
            bucketer: None,
        }
    }

    /// Adds a field.
    #[must_use]
    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Adds several fields, in order.
    #[must_use]
    pub fn with_fields<I>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = Field>,
    {
        self.fields.extend(fields);
        self
    }

    /// Sets the units of the metric's values.
    ///
    /// Defaults to [`Units::Unknown`].
    #[must_use]
    pub fn with_units(mut self, units: Units) -> Self {
        self.units = units;
        self
    }

    /// Reports this metric under `target` instead of the process target.
    #[must_use]
    pub fn with_target(mut self, target: Target) -> Self {
        self.target = Some(target);
        self
    }

    /// Uses a fixed start time, in seconds since the UNIX epoch, instead of the time of the first write.
    #[must_use]
    pub fn with_start_time(mut self, start_time: f64) -> Self {
        self.start_time = Some(start_time);
        self
    }

    /// Sets the bucketer of a distribution metric.
    ///
    /// Defaults to [`Bucketer::default`].
    #[must_use]
    pub fn with_bucketer(mut self, bucketer: Bucketer) -> Self {
        self.bucketer = Some(bucketer);
        self
    }

    /// Builds and registers a [`StringMetric`].
    ///
    /// # Errors
    ///
    /// If the definition is invalid, or a different metric with the same name is registered, an error is returned.
    pub fn string(self, state: &Arc<State>) -> Result<StringMetric, Error> {
        self.register(state, MetricKind::String).map(StringMetric::from_metric)
    }

    /// Builds and registers a [`BooleanMetric`].
    ///
    /// # Errors
    ///
    /// If the definition is invalid, or a different metric with the same name is registered, an error is returned.
    pub fn boolean(self, state: &Arc<State>) -> Result<BooleanMetric, Error> {
        self.register(state, MetricKind::Boolean).map(BooleanMetric::from_metric)
    }

    /// Builds and registers a [`CounterMetric`].
    ///
    /// # Errors
    ///
    /// If the definition is invalid, or a different metric with the same name is registered, an error is returned.
    pub fn counter(self, state: &Arc<State>) -> Result<CounterMetric, Error> {
        self.register(state, MetricKind::Counter).map(CounterMetric::from_metric)
    }

    /// Builds and registers a [`GaugeMetric`].
    ///
    /// # Errors
    ///
    /// If the definition is invalid, or a different metric with the same name is registered, an error is returned.
    pub fn gauge(self, state: &Arc<State>) -> Result<GaugeMetric, Error> {
        self.register(state, MetricKind::Gauge).map(GaugeMetric::from_metric)
    }

    /// Builds and registers a [`CumulativeMetric`].
    ///
    /// # Errors
    ///
    /// If the definition is invalid, or a different metric with the same name is registered, an error is returned.
    pub fn cumulative(self, state: &Arc<State>) -> Result<CumulativeMetric, Error> {
        self.register(state, MetricKind::Cumulative).map(CumulativeMetric::from_metric)
    }

    /// Builds and registers a [`FloatMetric`].
    ///
    /// # Errors
    ///
    /// If the definition is invalid, or a different metric with the same name is registered, an error is returned.
    pub fn float(self, state: &Arc<State>) -> Result<FloatMetric, Error> {
        self.register(state, MetricKind::Float).map(FloatMetric::from_metric)
    }

    /// Builds and registers a [`CumulativeDistributionMetric`].
    ///
    /// # Errors
    ///
    /// If the definition is invalid, or a different metric with the same name is registered, an error is returned.
    pub fn cumulative_distribution(mut self, state: &Arc<State>) -> Result<CumulativeDistributionMetric, Error> {
        let bucketer = Arc::new(self.bucketer.take().unwrap_or_default());
        self.register(state, MetricKind::Distribution { bucketer, cumulative: true })
            .map(CumulativeDistributionMetric::from_metric)
    }

    /// Builds and registers a [`NonCumulativeDistributionMetric`].
    ///
    /// # Errors
    ///
    /// If the definition is invalid, or a different metric with the same name is registered, an error is returned.
    pub fn non_cumulative_distribution(
        mut self,
        state: &Arc<State>,
    ) -> Result<NonCumulativeDistributionMetric, Error> {
        let bucketer = Arc::new(self.bucketer.take().unwrap_or_default());
        self.register(state, MetricKind::Distribution { bucketer, cumulative: false })
            .map(NonCumulativeDistributionMetric::from_metric)
    }

    /// Validates the definition without registering it.
    ///
    /// # Errors
    ///
    /// If the name or description is empty, the fields are invalid, or a bucketer was given for a kind that does not
    /// use one, an error is returned.
    pub fn build(self, kind: MetricKind) -> Result<MetricDef, Error> {
        let name = self.name.trim_start_matches('/').to_string();
        if name.is_empty() {
            return Err(Error::definition(self.name, "metric name must not be empty"));
        }
        if self.description.is_empty() {
            return Err(Error::definition(name, "metric description must be a non-empty string"));
        }
        if self.bucketer.is_some() && !matches!(kind, MetricKind::Distribution { .. }) {
            return Err(Error::definition(name, format!("a {} metric does not take a bucketer", kind.as_str())));
        }

        let field_spec = FieldSpec::new(&name, self.fields)?;
        Ok(MetricDef {
            name,
            description: self.description,
            field_spec,
            kind,
            units: self.units,
            target: self.target,
            start_time: self.start_time,
        })
    }

    fn register(self, state: &Arc<State>, kind: MetricKind) -> Result<Metric, Error> {
        let def = Arc::new(self.build(kind)?);
        state.register(&def)?;
        Ok(Metric { def, state: Arc::clone(state) })
    }
}

/// A registered metric.
///
/// This is the untyped handle shared by every typed metric: values are checked at runtime against the metric's kind.
/// Clones refer to the same metric.
#[derive(Clone)]
pub struct Metric {
    def: Arc<MetricDef>,
    state: Arc<State>,
}

impl Metric {
    /// Name of the metric.
    pub fn name(&self) -> &str {
        self.def.name()
    }

    /// Definition of the metric.
    pub fn definition(&self) -> &Arc<MetricDef> {
        &self.def
    }

    /// State the metric is registered with.
    pub fn state(&self) -> &Arc<State> {
        &self.state
    }

    /// Returns `true` if the metric's values never decrease.
    pub fn is_cumulative(&self) -> bool {
        self.def.is_cumulative()
    }

    /// Sets the value of one time series.
    ///
    /// # Errors
    ///
    /// Fails if the value or the fields do not match the metric, if a cumulative value would decrease, or if the
    /// state is configured to send on every write and the send fails.
    pub fn set<V, F>(&self, value: V, fields: F) -> Result<(), Error>
    where
        V: Into<MetricValue>,
        F: IntoFields,
    {
        let value = self.def.check_value(value.into())?;
        let fields = self.normalize(fields)?;
        self.state.store().set(&self.def, fields, value, self.def.is_cumulative())?;
        self.state.send(&self.def)
    }

    /// Returns the value of one time series, or the kind's default if it has not been written.
    ///
    /// # Errors
    ///
    /// Fails if the fields do not match the metric.
    pub fn get<F: IntoFields>(&self, fields: F) -> Result<Option<MetricValue>, Error> {
        let fields = self.normalize(fields)?;
        Ok(self.state.store().get(self.def.name(), &fields).or_else(|| self.def.kind().default_value()))
    }

    /// Returns every time series of this metric the store holds for this process.
    pub fn get_all(&self) -> Vec<(FieldTuple, MetricValue)> {
        self.state.store().field_values(self.def.name())
    }

    /// Clears every value of this metric.
    pub fn reset(&self) {
        self.state.store().reset_for_unittest(Some(self.def.name()));
    }

    /// Removes the metric from its state. Its values are no longer flushed.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotRegistered`] if the metric is not registered.
    pub fn unregister(&self) -> Result<(), Error> {
        self.state.unregister(&self.def)
    }

    pub(crate) fn incr<F: IntoFields>(
        &self,
        fields: F,
        delta: MetricValue,
        modify_fn: Option<ModifyFn<'_>>,
    ) -> Result<(), Error> {
        let fields = self.normalize(fields)?;
        self.state.store().incr(&self.def, fields, delta, modify_fn)?;
        self.state.send(&self.def)
    }

    fn normalize<F: IntoFields>(&self, fields: F) -> Result<FieldTuple, Error> {
        self.def.field_spec().normalize(self.def.name(), fields.into_fields())
    }
}

impl fmt::Debug for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metric").field("def", &self.def).finish_non_exhaustive()
    }
}
