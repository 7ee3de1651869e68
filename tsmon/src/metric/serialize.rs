use std::sync::Arc;

use super::{MetricDef, MetricKind, MetricValue};
use crate::{
    bucketer::{default_growth_factor, Bucketer, BucketerError},
    distribution::Distribution,
    errors::Error,
    field::{FieldTuple, FieldValue},
    proto::{MetricsCollection, MetricsData, MetricsField, MetricsFieldType, PrecomputedDistribution, SpecType},
    target::Target,
};

const MICROSECONDS_PER_SECOND: f64 = 1_000_000.0;

pub(crate) fn to_microseconds(secs: f64) -> u64 {
    (secs * MICROSECONDS_PER_SECOND) as u64
}

impl MetricDef {
    /// Appends one data record for a time series of this metric to `collection`.
    ///
    /// The record is reported under the metric's own target if it has one, and under `default_target` otherwise.
    /// Cumulative kinds carry `start_time` (seconds since the UNIX epoch) as their start timestamp.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NoConfiguredTarget`] if there is no target to report under, and with
    /// [`Error::InvalidValueType`] if `value` does not match the metric's kind.
    pub fn serialize_to(
        &self,
        collection: &mut MetricsCollection,
        metric_name_prefix: &str,
        start_time: f64,
        fields: &FieldTuple,
        value: &MetricValue,
        default_target: Option<&Target>,
    ) -> Result<(), Error> {
        let target = self
            .target()
            .or(default_target)
            .ok_or_else(|| Error::NoConfiguredTarget { metric: self.name().to_string() })?;

        let mut data = MetricsData {
            name: self.name().to_string(),
            metric_name_prefix: Some(metric_name_prefix.to_string()),
            description: Some(self.description().to_string()),
            units: Some(self.units() as i32),
            ..Default::default()
        };

        self.populate_value(&mut data, value)?;
        if self.is_cumulative() {
            data.start_timestamp_us = Some(to_microseconds(start_time));
        }

        data.fields = self
            .field_spec()
            .zip(fields)
            .map(|(field, value)| populate_field(field.name(), value))
            .collect();

        target.populate(&mut data);
        collection.data.push(data);
        Ok(())
    }

    fn populate_value(&self, data: &mut MetricsData, value: &MetricValue) -> Result<(), Error> {
        match (self.kind(), value) {
            (MetricKind::String, MetricValue::String(s)) => data.string_value = Some(s.clone()),
            (MetricKind::Boolean, MetricValue::Bool(b)) => data.boolean_value = Some(*b),
            (MetricKind::Counter, MetricValue::Int(i)) => data.counter = Some(*i),
            (MetricKind::Gauge, MetricValue::Int(i)) => data.gauge = Some(*i),
            (MetricKind::Cumulative, value @ (MetricValue::Float(_) | MetricValue::Int(_))) => {
                data.cumulative_double_value = value.as_float();
            }
            (MetricKind::Float, value @ (MetricValue::Float(_) | MetricValue::Int(_))) => {
                data.noncumulative_double_value = value.as_float();
            }
            (MetricKind::Distribution { cumulative, .. }, MetricValue::Distribution(dist)) => {
                data.distribution = Some(distribution_to_proto(dist, *cumulative));
            }
            (_, value) => return Err(Error::invalid_value(self.name(), value.type_name())),
        }
        Ok(())
    }
}

fn populate_field(name: &str, value: &FieldValue) -> MetricsField {
    let mut field = MetricsField { name: name.to_string(), ..Default::default() };
    match value {
        FieldValue::Str(s) => {
            field.set_type(MetricsFieldType::String);
            field.string_value = Some(s.clone());
        }
        FieldValue::Int(i) => {
            field.set_type(MetricsFieldType::Int);
            field.int_value = Some(*i);
        }
        FieldValue::Bool(b) => {
            field.set_type(MetricsFieldType::Bool);
            field.bool_value = Some(*b);
        }
    }
    field
}

fn canonical_spec_type(bucketer: &Bucketer) -> Option<SpecType> {
    if bucketer.width() != 0.0 || bucketer.scale() != 1.0 {
        return None;
    }

    let growth_factor = bucketer.growth_factor();
    if growth_factor == 2.0 {
        Some(SpecType::CanonicalPowersOf2)
    } else if growth_factor == default_growth_factor() {
        Some(SpecType::CanonicalPowersOf10P02)
    } else if growth_factor == 10.0 {
        Some(SpecType::CanonicalPowersOf10)
    } else {
        None
    }
}

/// Compresses runs of zeros into a single negative count.
///
/// Trailing zeros are dropped, so `[1, 0, 0, 0, 2, 0]` becomes `[1, -3, 2]`.
pub fn run_length_encode<I>(counts: I) -> Vec<i64>
where
    I: IntoIterator<Item = u64>,
{
    let mut encoded = Vec::new();
    let mut zeros = 0i64;
    for count in counts {
        if count == 0 {
            zeros += 1;
        } else {
            if zeros != 0 {
                encoded.push(-zeros);
                zeros = 0;
            }
            encoded.push(count as i64);
        }
    }
    encoded
}

/// Converts a distribution to its wire form.
pub fn distribution_to_proto(dist: &Distribution, cumulative: bool) -> PrecomputedDistribution {
    let bucketer = dist.bucketer();
    let mut pb = PrecomputedDistribution {
        is_cumulative: Some(cumulative),
        num_buckets: Some(bucketer.num_finite_buckets() as i32),
        ..Default::default()
    };

    match canonical_spec_type(bucketer) {
        Some(spec_type) => pb.set_spec_type(spec_type),
        None => {
            pb.set_spec_type(SpecType::CustomParameterized);
            pb.width = Some(bucketer.width());
            pb.growth_factor = Some(bucketer.growth_factor());
        }
    }

    // Finite buckets only; underflow and overflow have their own slots.
    pb.bucket = run_length_encode((1..=bucketer.num_finite_buckets()).map(|i| dist.bucket(i)));

    let underflow = bucketer.underflow_bucket();
    if let Some(n) = dist.buckets().get(&underflow) {
        pb.underflow = Some(*n as i64);
    }
    let overflow = bucketer.overflow_bucket();
    if let Some(n) = dist.buckets().get(&overflow) {
        pb.overflow = Some(*n as i64);
    }

    pb.mean = dist.mean();
    pb
}

/// Rebuilds a distribution from its wire form.
///
/// The count is the total of every bucket and the sum is recovered from the mean.
///
/// # Errors
///
/// Fails if the bucket layout does not describe a valid bucketer, or if the bucket counts run past its finite
/// buckets.
pub fn distribution_from_proto(pb: &PrecomputedDistribution) -> Result<Distribution, BucketerError> {
    let num_finite_buckets = pb.num_buckets.map_or(crate::bucketer::DEFAULT_NUM_FINITE_BUCKETS, |n| n.max(0) as usize);
    let bucketer = match pb.spec_type() {
        SpecType::CanonicalPowersOf2 => Bucketer::geometric(2.0, num_finite_buckets)?,
        SpecType::CanonicalPowersOf10P02 => Bucketer::geometric(default_growth_factor(), num_finite_buckets)?,
        SpecType::CanonicalPowersOf10 => Bucketer::geometric(10.0, num_finite_buckets)?,
        SpecType::CustomParameterized => {
            Bucketer::new(pb.width(), pb.growth_factor(), num_finite_buckets, 1.0)?
        }
    };

    let mut buckets = Vec::new();
    if let Some(n) = pb.underflow {
        buckets.push((bucketer.underflow_bucket(), n.max(0) as u64));
    }
    let overflow = bucketer.overflow_bucket();
    let out_of_range = |index: usize| BucketerError::IndexOutOfRange { index, total: bucketer.total_buckets() };
    let mut index = 1usize;
    for entry in &pb.bucket {
        if *entry < 0 {
            let skipped = usize::try_from(entry.unsigned_abs()).unwrap_or(usize::MAX);
            let next = index.saturating_add(skipped);
            if next > overflow {
                return Err(out_of_range(next));
            }
            index = next;
        } else {
            if index >= overflow {
                return Err(out_of_range(index));
            }
            buckets.push((index, *entry as u64));
            index += 1;
        }
    }
    if let Some(n) = pb.overflow {
        buckets.push((bucketer.overflow_bucket(), n.max(0) as u64));
    }

    let count = buckets.iter().map(|(_, n)| n).sum::<u64>();
    let sum = pb.mean.unwrap_or(0.0) * count as f64;
    Ok(Distribution::from_parts(Arc::new(bucketer), sum, count, buckets))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use approx::assert_relative_eq;

    use super::{distribution_from_proto, distribution_to_proto, run_length_encode};
    use crate::{
        bucketer::{Bucketer, BucketerError},
        distribution::Distribution,
        errors::Error,
        field::{Field, FieldTuple, FieldValue},
        metric::{MetricBuilder, MetricKind, MetricValue},
        proto::{MetricsCollection, MetricsFieldType, PrecomputedDistribution, SpecType},
        target::Target,
        units::Units,
    };

    #[test]
    fn run_length_encoding() {
        assert_eq!(run_length_encode(vec![1, 0, 0, 0, 2]), vec![1, -3, 2]);
        assert_eq!(run_length_encode(vec![0, 0, 5]), vec![-2, 5]);
        assert_eq!(run_length_encode(vec![3, 0, 0]), vec![3]);
        assert_eq!(run_length_encode(Vec::new()), Vec::<i64>::new());
        assert_eq!(run_length_encode(vec![0]), Vec::<i64>::new());
    }

    #[test]
    fn canonical_spec_types() {
        let cases = [
            (Bucketer::geometric(2.0, 10).unwrap(), SpecType::CanonicalPowersOf2),
            (Bucketer::default(), SpecType::CanonicalPowersOf10P02),
            (Bucketer::geometric(10.0, 10).unwrap(), SpecType::CanonicalPowersOf10),
        ];
        for (bucketer, spec_type) in cases {
            let pb = distribution_to_proto(&Distribution::new(Arc::new(bucketer)), true);
            assert_eq!(pb.spec_type(), spec_type);
            assert_eq!(pb.width, None);
            assert_eq!(pb.growth_factor, None);
        }
    }

    #[test]
    fn custom_spec_types() {
        let pb = distribution_to_proto(&Distribution::new(Arc::new(Bucketer::fixed_width(10.0, 8).unwrap())), false);
        assert_eq!(pb.spec_type(), SpecType::CustomParameterized);
        assert_eq!(pb.width, Some(10.0));
        assert_eq!(pb.growth_factor, Some(0.0));
        assert_eq!(pb.num_buckets, Some(8));
        assert_eq!(pb.is_cumulative, Some(false));

        // A scaled bucketer is never canonical.
        let scaled = Bucketer::geometric_scaled(2.0, 8, 10.0).unwrap();
        let pb = distribution_to_proto(&Distribution::new(Arc::new(scaled)), true);
        assert_eq!(pb.spec_type(), SpecType::CustomParameterized);
        assert_eq!(pb.growth_factor, Some(2.0));
    }

    #[test]
    fn distribution_buckets_and_mean() {
        let mut dist = Distribution::new(Arc::new(Bucketer::fixed_width(10.0, 5).unwrap()));
        assert_eq!(distribution_to_proto(&dist, true).mean, None);

        for v in [-1.0, 5.0, 42.0, 99.0, 120.0] {
            dist.add(v);
        }
        let pb = distribution_to_proto(&dist, true);
        assert_eq!(pb.bucket, vec![1, -3, 1]);
        assert_eq!(pb.underflow, Some(1));
        assert_eq!(pb.overflow, Some(2));
        assert_relative_eq!(pb.mean.unwrap(), 53.0);

        let mut no_edges = Distribution::new(Arc::new(Bucketer::fixed_width(10.0, 5).unwrap()));
        no_edges.add(5.0);
        let pb = distribution_to_proto(&no_edges, true);
        assert_eq!(pb.underflow, None);
        assert_eq!(pb.overflow, None);
    }

    #[test]
    fn decode_recovers_the_histogram() {
        let mut dist = Distribution::new(Arc::new(Bucketer::geometric(2.0, 20).unwrap()));
        for v in [0.5, 3.0, 3.5, 100.0, 1e9, -2.0] {
            dist.add(v);
        }

        let decoded = distribution_from_proto(&distribution_to_proto(&dist, true)).unwrap();
        assert_eq!(decoded.count(), dist.count());
        assert_eq!(decoded.buckets(), dist.buckets());
        assert_relative_eq!(decoded.sum(), dist.sum(), max_relative = 1e-9);
        assert_eq!(**decoded.bucketer(), **dist.bucketer());
    }

    #[test]
    fn decode_rejects_malformed_buckets() {
        let overlong_skips = PrecomputedDistribution {
            spec_type: Some(SpecType::CanonicalPowersOf2 as i32),
            num_buckets: Some(5),
            bucket: vec![i64::MIN, i64::MIN, 1],
            ..Default::default()
        };
        assert!(matches!(distribution_from_proto(&overlong_skips), Err(BucketerError::IndexOutOfRange { .. })));

        let too_many_counts = PrecomputedDistribution {
            spec_type: Some(SpecType::CanonicalPowersOf2 as i32),
            num_buckets: Some(2),
            bucket: vec![1, 1, 1],
            ..Default::default()
        };
        assert_eq!(
            distribution_from_proto(&too_many_counts).unwrap_err(),
            BucketerError::IndexOutOfRange { index: 3, total: 4 }
        );

        let huge_layout = PrecomputedDistribution {
            spec_type: Some(SpecType::CustomParameterized as i32),
            width: Some(1.0),
            growth_factor: Some(0.0),
            num_buckets: Some(i32::MAX),
            ..Default::default()
        };
        assert!(matches!(distribution_from_proto(&huge_layout), Err(BucketerError::TooManyBuckets { .. })));

        let trailing_skip = PrecomputedDistribution {
            spec_type: Some(SpecType::CanonicalPowersOf2 as i32),
            num_buckets: Some(3),
            bucket: vec![2, -2],
            ..Default::default()
        };
        assert_eq!(distribution_from_proto(&trailing_skip).unwrap().bucket(1), 2);
    }

    #[test]
    fn serialize_counter_with_fields() {
        let def = MetricBuilder::new("/my/counter", "counts things")
            .with_fields([Field::string("host"), Field::int("code"), Field::bool("ok")])
            .with_units(Units::Seconds)
            .build(MetricKind::Counter)
            .unwrap();
        let fields = FieldTuple::new(vec![FieldValue::Str("a".into()), FieldValue::Int(200), FieldValue::Bool(true)]);
        let target = Target::task("serv", "job", "reg", "host", 1);

        let mut collection = MetricsCollection::default();
        def.serialize_to(&mut collection, "/chrome/infra/", 1234.0, &fields, &MetricValue::Int(7), Some(&target))
            .unwrap();

        let data = &collection.data[0];
        assert_eq!(data.name, "my/counter");
        assert_eq!(data.metric_name_prefix.as_deref(), Some("/chrome/infra/"));
        assert_eq!(data.description.as_deref(), Some("counts things"));
        assert_eq!(data.units(), Units::Seconds);
        assert_eq!(data.counter, Some(7));
        assert_eq!(data.start_timestamp_us, Some(1_234_000_000));
        assert_eq!(data.task.as_ref().and_then(|t| t.job_name.as_deref()), Some("job"));

        assert_eq!(data.fields.len(), 3);
        assert_eq!(data.fields[0].name, "host");
        assert_eq!(data.fields[0].r#type(), MetricsFieldType::String);
        assert_eq!(data.fields[0].string_value.as_deref(), Some("a"));
        assert_eq!(data.fields[1].r#type(), MetricsFieldType::Int);
        assert_eq!(data.fields[1].int_value, Some(200));
        assert_eq!(data.fields[2].r#type(), MetricsFieldType::Bool);
        assert_eq!(data.fields[2].bool_value, Some(true));
    }

    #[test]
    fn gauges_carry_no_start_timestamp() {
        let def = MetricBuilder::new("g", "desc").build(MetricKind::Gauge).unwrap();
        let target = Target::device("reg", "role", "net", "host");
        let mut collection = MetricsCollection::default();
        def.serialize_to(&mut collection, "/p/", 1234.0, &FieldTuple::empty(), &MetricValue::Int(-3), Some(&target))
            .unwrap();

        let data = &collection.data[0];
        assert_eq!(data.gauge, Some(-3));
        assert_eq!(data.counter, None);
        assert_eq!(data.start_timestamp_us, None);
        assert!(data.network_device.is_some());
    }

    #[test]
    fn metric_target_overrides_default() {
        let own = Target::task("serv", "own", "reg", "host", 1);
        let def = MetricBuilder::new("f", "desc").with_target(own).build(MetricKind::Float).unwrap();
        let fallback = Target::task("serv", "fallback", "reg", "host", 1);

        let mut collection = MetricsCollection::default();
        def.serialize_to(&mut collection, "/p/", 0.0, &FieldTuple::empty(), &MetricValue::Float(1.5), Some(&fallback))
            .unwrap();
        let data = &collection.data[0];
        assert_eq!(data.task.as_ref().and_then(|t| t.job_name.as_deref()), Some("own"));
        assert_eq!(data.noncumulative_double_value, Some(1.5));
    }

    #[test]
    fn missing_target_is_an_error() {
        let def = MetricBuilder::new("s", "desc").build(MetricKind::String).unwrap();
        let mut collection = MetricsCollection::default();
        let result = def.serialize_to(&mut collection, "/p/", 0.0, &FieldTuple::empty(), &"v".into(), None);
        assert!(matches!(result, Err(Error::NoConfiguredTarget { .. })));
        assert!(collection.data.is_empty());
    }

    #[test]
    fn every_kind_fills_its_slot() {
        let target = Target::device("reg", "role", "net", "host");
        let bucketer = Arc::new(Bucketer::default());
        let cases = vec![
            (MetricKind::String, MetricValue::from("v")),
            (MetricKind::Boolean, MetricValue::Bool(true)),
            (MetricKind::Cumulative, MetricValue::Float(2.5)),
            (
                MetricKind::Distribution { bucketer: Arc::clone(&bucketer), cumulative: false },
                MetricValue::Distribution(Distribution::from_sample(Arc::clone(&bucketer), 3.0)),
            ),
        ];

        let mut collection = MetricsCollection::default();
        for (i, (kind, value)) in cases.into_iter().enumerate() {
            let def = MetricBuilder::new(format!("m{i}"), "desc").build(kind).unwrap();
            def.serialize_to(&mut collection, "/p/", 10.0, &FieldTuple::empty(), &value, Some(&target)).unwrap();
        }

        assert_eq!(collection.data[0].string_value.as_deref(), Some("v"));
        assert_eq!(collection.data[1].boolean_value, Some(true));
        assert_eq!(collection.data[2].cumulative_double_value, Some(2.5));
        assert_eq!(collection.data[2].start_timestamp_us, Some(10_000_000));
        let dist = collection.data[3].distribution.as_ref().unwrap();
        assert_eq!(dist.is_cumulative, Some(false));
        assert_eq!(collection.data[3].start_timestamp_us, None);
    }

    #[test]
    fn mismatched_value_is_an_error() {
        let def = MetricBuilder::new("c", "desc").build(MetricKind::Counter).unwrap();
        let target = Target::device("reg", "role", "net", "host");
        let mut collection = MetricsCollection::default();
        let result = def.serialize_to(&mut collection, "/p/", 0.0, &FieldTuple::empty(), &"v".into(), Some(&target));
        assert!(matches!(result, Err(Error::InvalidValueType { .. })));
    }
}
