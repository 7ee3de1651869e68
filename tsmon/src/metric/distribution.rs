use std::{ops::Deref, sync::Arc};

use super::{Metric, MetricKind, MetricValue};
use crate::{bucketer::Bucketer, distribution::Distribution, errors::Error, field::IntoFields};

fn bucketer_of(metric: &Metric) -> Arc<Bucketer> {
    match metric.definition().kind() {
        MetricKind::Distribution { bucketer, .. } => Arc::clone(bucketer),
        _ => Arc::new(Bucketer::default()),
    }
}

fn add_sample<F: IntoFields>(metric: &Metric, value: f64, fields: F) -> Result<(), Error> {
    let name = metric.name();
    let sample = Distribution::from_sample(bucketer_of(metric), value);
    // A stored distribution keeps its own bucketer, which may differ from the metric's after a set.
    let merge = |old: Option<&MetricValue>, delta: &MetricValue| match old {
        None => Ok(delta.clone()),
        Some(MetricValue::Distribution(old)) => {
            let mut updated = old.clone();
            updated.add(value);
            Ok(MetricValue::Distribution(updated))
        }
        Some(other) => Err(Error::invalid_value(name, other.type_name())),
    };
    metric.incr(fields, MetricValue::Distribution(sample), Some(&merge))
}

fn get_distribution<F: IntoFields>(metric: &Metric, fields: F) -> Result<Option<Distribution>, Error> {
    Ok(metric.get(fields)?.and_then(|v| match v {
        MetricValue::Distribution(d) => Some(d),
        _ => None,
    }))
}

/// A distribution metric whose samples accumulate since its start time.
///
/// Samples can only be added: the distribution is never replaced.
#[derive(Clone, Debug)]
pub struct CumulativeDistributionMetric {
    metric: Metric,
}

impl CumulativeDistributionMetric {
    pub(crate) fn from_metric(metric: Metric) -> Self {
        Self { metric }
    }

    /// The untyped handle of this metric.
    pub fn metric(&self) -> &Metric {
        &self.metric
    }

    /// The bucketer samples are assigned with.
    pub fn bucketer(&self) -> Arc<Bucketer> {
        bucketer_of(&self.metric)
    }

    /// Adds a sample.
    ///
    /// # Errors
    ///
    /// Fails if the fields do not match.
    pub fn add<F: IntoFields>(&self, value: f64, fields: F) -> Result<(), Error> {
        add_sample(&self.metric, value, fields)
    }

    /// Returns the distribution, if any sample has been added.
    ///
    /// # Errors
    ///
    /// Fails if the fields do not match.
    pub fn get<F: IntoFields>(&self, fields: F) -> Result<Option<Distribution>, Error> {
        get_distribution(&self.metric, fields)
    }
}

impl Deref for CumulativeDistributionMetric {
    type Target = Metric;

    fn deref(&self) -> &Metric {
        &self.metric
    }
}

/// A distribution metric that is replaced wholesale, or added to, at will.
#[derive(Clone, Debug)]
pub struct NonCumulativeDistributionMetric {
    metric: Metric,
}

impl NonCumulativeDistributionMetric {
    pub(crate) fn from_metric(metric: Metric) -> Self {
        Self { metric }
    }

    /// The untyped handle of this metric.
    pub fn metric(&self) -> &Metric {
        &self.metric
    }

    /// The bucketer samples are assigned with.
    pub fn bucketer(&self) -> Arc<Bucketer> {
        bucketer_of(&self.metric)
    }

    /// Adds a sample.
    ///
    /// # Errors
    ///
    /// Fails if the fields do not match.
    pub fn add<F: IntoFields>(&self, value: f64, fields: F) -> Result<(), Error> {
        add_sample(&self.metric, value, fields)
    }

    /// Replaces the distribution.
    ///
    /// # Errors
    ///
    /// Fails if the fields do not match.
    pub fn set<F: IntoFields>(&self, value: Distribution, fields: F) -> Result<(), Error> {
        self.metric.set(value, fields)
    }

    /// Returns the distribution, if it has been set or added to.
    ///
    /// # Errors
    ///
    /// Fails if the fields do not match.
    pub fn get<F: IntoFields>(&self, fields: F) -> Result<Option<Distribution>, Error> {
        get_distribution(&self.metric, fields)
    }
}

impl Deref for NonCumulativeDistributionMetric {
    type Target = Metric;

    fn deref(&self) -> &Metric {
        &self.metric
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{
        bucketer::Bucketer,
        distribution::Distribution,
        errors::Error,
        field::Field,
        metric::MetricBuilder,
        state::StateBuilder,
    };

    #[test]
    fn cumulative_add() {
        let state = StateBuilder::new().build().unwrap();
        let metric = MetricBuilder::new("d", "desc")
            .with_bucketer(Bucketer::fixed_width(10.0, 10).unwrap())
            .cumulative_distribution(&state)
            .unwrap();
        assert!(metric.get(()).unwrap().is_none());
        assert!(metric.is_cumulative());

        for v in [5.0, 15.0, 35.0, 65.0] {
            metric.add(v, ()).unwrap();
        }

        let dist = metric.get(()).unwrap().unwrap();
        assert_eq!(dist.sum(), 120.0);
        assert_eq!(dist.count(), 4);
        assert_eq!(dist.buckets().iter().map(|(i, n)| (*i, *n)).collect::<Vec<_>>(), vec![
            (1, 1),
            (2, 1),
            (4, 1),
            (7, 1)
        ]);
    }

    #[test]
    fn cumulative_set_is_rejected() {
        let state = StateBuilder::new().build().unwrap();
        let metric = MetricBuilder::new("d", "desc").cumulative_distribution(&state).unwrap();
        let dist = Distribution::new(metric.bucketer());

        assert!(matches!(metric.metric().set(dist, ()), Err(Error::SetCumulativeDistribution { .. })));
        assert!(metric.get(()).unwrap().is_none());
    }

    #[test]
    fn default_bucketer() {
        let state = StateBuilder::new().build().unwrap();
        let metric = MetricBuilder::new("d", "desc").cumulative_distribution(&state).unwrap();
        assert_eq!(*metric.bucketer(), Bucketer::default());
    }

    #[test]
    fn negative_samples_land_in_underflow() {
        let state = StateBuilder::new().build().unwrap();
        let metric = MetricBuilder::new("d", "desc").cumulative_distribution(&state).unwrap();
        metric.add(-3.0, ()).unwrap();

        let dist = metric.get(()).unwrap().unwrap();
        assert_eq!(dist.bucket(0), 1);
        assert_eq!(dist.sum(), -3.0);
    }

    #[test]
    fn non_cumulative_set_and_add() {
        let state = StateBuilder::new().build().unwrap();
        let bucketer = Arc::new(Bucketer::fixed_width(10.0, 5).unwrap());
        let metric = MetricBuilder::new("d", "desc")
            .with_field(Field::string("kind"))
            .with_bucketer((*bucketer).clone())
            .non_cumulative_distribution(&state)
            .unwrap();
        assert!(!metric.is_cumulative());

        let mut dist = Distribution::new(Arc::clone(&bucketer));
        dist.add(1.0);
        dist.add(2.0);
        metric.set(dist.clone(), [("kind", "a")]).unwrap();
        assert_eq!(metric.get([("kind", "a")]).unwrap(), Some(dist));

        metric.add(12.0, [("kind", "a")]).unwrap();
        let dist = metric.get([("kind", "a")]).unwrap().unwrap();
        assert_eq!(dist.count(), 3);
        assert_eq!(dist.bucket(2), 1);

        let mut replacement = Distribution::new(bucketer);
        replacement.add(45.0);
        metric.set(replacement, [("kind", "a")]).unwrap();
        assert_eq!(metric.get([("kind", "a")]).unwrap().unwrap().count(), 1);

        assert!(matches!(metric.metric().set(1.5, [("kind", "a")]), Err(Error::InvalidValueType { .. })));
    }

    #[test]
    fn add_after_set_uses_the_stored_bucketer() {
        let state = StateBuilder::new().build().unwrap();
        let metric = MetricBuilder::new("d", "desc")
            .with_bucketer(Bucketer::fixed_width(10.0, 5).unwrap())
            .non_cumulative_distribution(&state)
            .unwrap();

        let narrow = Arc::new(Bucketer::fixed_width(1.0, 100).unwrap());
        metric.set(Distribution::new(Arc::clone(&narrow)), ()).unwrap();
        metric.add(5.0, ()).unwrap();

        let dist = metric.get(()).unwrap().unwrap();
        assert_eq!(**dist.bucketer(), *narrow);
        assert_eq!(dist.count(), 1);
        assert_eq!(dist.bucket(6), 1);
        assert_eq!(dist.bucket(1), 0);
    }
}
