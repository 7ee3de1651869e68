use std::{collections::BTreeMap, sync::Arc};

use crate::bucketer::Bucketer;

/// An accumulator of samples against a [`Bucketer`].
///
/// Bucket counts are stored sparsely: buckets that have never seen a sample are absent from [`buckets`].
///
/// [`buckets`]: Distribution::buckets
#[derive(Clone, Debug, PartialEq)]
pub struct Distribution {
    bucketer: Arc<Bucketer>,
    sum: f64,
    count: u64,
    buckets: BTreeMap<usize, u64>,
}

impl Distribution {
    /// Creates an empty `Distribution`.
    pub fn new(bucketer: Arc<Bucketer>) -> Self {
        Self { bucketer, sum: 0.0, count: 0, buckets: BTreeMap::new() }
    }

    /// Creates a `Distribution` holding a single sample.
    pub fn from_sample(bucketer: Arc<Bucketer>, value: f64) -> Self {
        let mut dist = Self::new(bucketer);
        dist.add(value);
        dist
    }

    /// Rebuilds a `Distribution` from its parts.
    ///
    /// Bucket indices beyond the overflow bucket are folded into the overflow bucket and empty buckets are dropped.
    pub fn from_parts(
        bucketer: Arc<Bucketer>,
        sum: f64,
        count: u64,
        buckets: impl IntoIterator<Item = (usize, u64)>,
    ) -> Self {
        let overflow = bucketer.overflow_bucket();
        let mut folded = BTreeMap::new();
        for (index, n) in buckets.into_iter().filter(|(_, n)| *n > 0) {
            *folded.entry(index.min(overflow)).or_insert(0) += n;
        }
        Self { bucketer, sum, count, buckets: folded }
    }

    /// Adds a sample.
    pub fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
        *self.buckets.entry(self.bucketer.bucket_for_value(value)).or_insert(0) += 1;
    }

    /// Merges the samples of `other` into this distribution.
    ///
    /// Buckets are merged by index, so both distributions are expected to share a bucket layout.
    pub fn merge(&mut self, other: &Distribution) {
        self.sum += other.sum;
        self.count += other.count;
        for (index, n) in &other.buckets {
            *self.buckets.entry(*index).or_insert(0) += n;
        }
    }

    /// The bucketer samples are assigned with.
    pub fn bucketer(&self) -> &Arc<Bucketer> {
        &self.bucketer
    }

    /// Sum of every sample.
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Number of samples.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Mean of every sample, or `None` if there are no samples.
    pub fn mean(&self) -> Option<f64> {
        (self.count != 0).then(|| self.sum / self.count as f64)
    }

    /// Sparse mapping of bucket index to sample count.
    pub fn buckets(&self) -> &BTreeMap<usize, u64> {
        &self.buckets
    }

    /// Number of samples in bucket `index`.
    pub fn bucket(&self, index: usize) -> u64 {
        self.buckets.get(&index).copied().unwrap_or(0)
    }

    /// Returns `true` if no samples have been added.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}
