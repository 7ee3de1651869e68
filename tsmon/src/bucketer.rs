use std::cmp::Ordering;

use thiserror::Error;

/// Default number of finite buckets.
pub const DEFAULT_NUM_FINITE_BUCKETS: usize = 100;

/// Largest number of finite buckets a [`Bucketer`] may have.
pub const MAX_NUM_FINITE_BUCKETS: usize = 100_000;

/// Default growth factor: five buckets per power of ten.
pub fn default_growth_factor() -> f64 {
    10f64.powf(0.2)
}

/// Errors that can occur while constructing a [`Bucketer`].
#[derive(Debug, Error, PartialEq)]
pub enum BucketerError {
    /// Both a width and a growth factor were given.
    #[error("a bucketer must have either a width or a growth factor, not both (width: {width}, growth factor: {growth_factor})")]
    WidthAndGrowthFactor {
        /// Requested bucket width.
        width: f64,
        /// Requested growth factor.
        growth_factor: f64,
    },

    /// The computed bucket boundaries are not strictly increasing.
    #[error("bucket boundaries must be strictly increasing, but boundary {index} ({value}) is not greater than {previous}")]
    NonIncreasingBoundaries {
        /// Index of the offending lower bound.
        index: usize,
        /// The offending lower bound.
        value: f64,
        /// The lower bound before it.
        previous: f64,
    },

    /// More finite buckets were requested than [`MAX_NUM_FINITE_BUCKETS`].
    #[error("a bucketer may have at most {limit} finite buckets, but {requested} were requested")]
    TooManyBuckets {
        /// Requested number of finite buckets.
        requested: usize,
        /// Maximum number of finite buckets.
        limit: usize,
    },

    /// A bucket index beyond the overflow bucket was requested.
    #[error("bucket index {index} is out of range (total buckets: {total})")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of buckets, including underflow and overflow.
        total: usize,
    },
}

/// Partitions the real line into histogram buckets.
///
/// There are `num_finite_buckets + 2` buckets: bucket 0 is the underflow bucket and holds every value below zero,
/// the last bucket is the overflow bucket. The finite buckets in between either have a fixed width, or grow
/// geometrically, in which case the first finite bucket is `[0, scale)` and each boundary after that is
/// `growth_factor^i * scale`.
///
/// A `Bucketer` is immutable once built.
#[derive(Clone, Debug, PartialEq)]
pub struct Bucketer {
    width: f64,
    growth_factor: f64,
    num_finite_buckets: usize,
    scale: f64,
    lower_bounds: Vec<f64>,
}

impl Bucketer {
    /// Creates a new `Bucketer` from its raw parameters.
    ///
    /// Exactly one of `width` and `growth_factor` should be non-zero.
    ///
    /// # Errors
    ///
    /// If both `width` and `growth_factor` are non-zero, if there are more than [`MAX_NUM_FINITE_BUCKETS`] finite
    /// buckets, or if the resulting boundaries are not strictly increasing, an error variant will be returned
    /// describing the problem.
    pub fn new(
        width: f64,
        growth_factor: f64,
        num_finite_buckets: usize,
        scale: f64,
    ) -> Result<Self, BucketerError> {
        if width != 0.0 && growth_factor != 0.0 {
            return Err(BucketerError::WidthAndGrowthFactor { width, growth_factor });
        }
        if num_finite_buckets > MAX_NUM_FINITE_BUCKETS {
            return Err(BucketerError::TooManyBuckets { requested: num_finite_buckets, limit: MAX_NUM_FINITE_BUCKETS });
        }

        let lower_bounds = lower_bounds(width, growth_factor, num_finite_buckets, scale);
        for (index, pair) in lower_bounds.windows(2).enumerate() {
            // Also rejects NaN boundaries.
            if pair[1].partial_cmp(&pair[0]) != Some(Ordering::Greater) {
                return Err(BucketerError::NonIncreasingBoundaries {
                    index: index + 1,
                    value: pair[1],
                    previous: pair[0],
                });
            }
        }

        Ok(Self { width, growth_factor, num_finite_buckets, scale, lower_bounds })
    }

    /// Creates a `Bucketer` with `num_finite_buckets` buckets of equal `width`, starting at zero.
    ///
    /// # Errors
    ///
    /// Fails if `width` is not positive while `num_finite_buckets` is non-zero.
    pub fn fixed_width(width: f64, num_finite_buckets: usize) -> Result<Self, BucketerError> {
        Self::new(width, 0.0, num_finite_buckets, 1.0)
    }

    /// Creates a fixed-width `Bucketer` with [`DEFAULT_NUM_FINITE_BUCKETS`] buckets.
    ///
    /// # Errors
    ///
    /// Fails if `width` is not positive.
    pub fn fixed_width_default(width: f64) -> Result<Self, BucketerError> {
        Self::fixed_width(width, DEFAULT_NUM_FINITE_BUCKETS)
    }

    /// Creates a `Bucketer` whose boundaries grow by `growth_factor`.
    ///
    /// # Errors
    ///
    /// Fails if the growth factor does not produce strictly increasing boundaries.
    pub fn geometric(growth_factor: f64, num_finite_buckets: usize) -> Result<Self, BucketerError> {
        Self::new(0.0, growth_factor, num_finite_buckets, 1.0)
    }

    /// Creates a geometric `Bucketer` whose boundaries are all multiplied by `scale`.
    ///
    /// # Errors
    ///
    /// Fails if the scaled boundaries are not strictly increasing.
    pub fn geometric_scaled(
        growth_factor: f64,
        num_finite_buckets: usize,
        scale: f64,
    ) -> Result<Self, BucketerError> {
        Self::new(0.0, growth_factor, num_finite_buckets, scale)
    }

    /// Width of each finite bucket, or zero for a geometric bucketer.
    pub fn width(&self) -> f64 {
        self.width
    }

    /// Growth factor between boundaries, or zero for a fixed-width bucketer.
    pub fn growth_factor(&self) -> f64 {
        self.growth_factor
    }

    /// Multiplier applied to every boundary.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Number of buckets between the underflow and overflow buckets.
    pub fn num_finite_buckets(&self) -> usize {
        self.num_finite_buckets
    }

    /// Total number of buckets, including the underflow and overflow buckets.
    pub fn total_buckets(&self) -> usize {
        self.num_finite_buckets + 2
    }

    /// Index of the bucket holding values below zero.
    pub fn underflow_bucket(&self) -> usize {
        0
    }

    /// Index of the bucket holding values beyond the last finite boundary.
    pub fn overflow_bucket(&self) -> usize {
        self.num_finite_buckets + 1
    }

    /// Returns the index of the bucket that `value` falls into.
    ///
    /// A bucket includes its lower bound and excludes its upper bound. NaN falls into the underflow bucket.
    pub fn bucket_for_value(&self, value: f64) -> usize {
        self.lower_bounds.partition_point(|bound| *bound <= value).saturating_sub(1)
    }

    /// Returns the `[lower, upper)` range covered by bucket `index`.
    ///
    /// # Errors
    ///
    /// Fails if `index` is beyond the overflow bucket.
    pub fn bucket_boundaries(&self, index: usize) -> Result<(f64, f64), BucketerError> {
        let total = self.total_buckets();
        if index >= total {
            return Err(BucketerError::IndexOutOfRange { index, total });
        }

        let lower = self.lower_bounds[index];
        let upper = self.lower_bounds.get(index + 1).copied().unwrap_or(f64::INFINITY);
        Ok((lower, upper))
    }
}

impl Default for Bucketer {
    /// Geometric buckets growing by 10^0.2, 100 finite buckets, unit scale.
    fn default() -> Self {
        let growth_factor = default_growth_factor();
        Self {
            width: 0.0,
            growth_factor,
            num_finite_buckets: DEFAULT_NUM_FINITE_BUCKETS,
            scale: 1.0,
            lower_bounds: lower_bounds(0.0, growth_factor, DEFAULT_NUM_FINITE_BUCKETS, 1.0),
        }
    }
}

fn lower_bounds(width: f64, growth_factor: f64, num_finite_buckets: usize, scale: f64) -> Vec<f64> {
    let mut bounds = Vec::with_capacity(num_finite_buckets + 2);
    bounds.push(f64::NEG_INFINITY);
    bounds.push(0.0);

    for i in 0..num_finite_buckets {
        let mut bound = width * (i + 1) as f64;
        if growth_factor != 0.0 {
            bound += growth_factor.powf(i as f64);
        }
        bounds.push(bound * scale);
    }

    bounds
}
