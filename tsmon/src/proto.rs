//! Wire messages sent to the collector.
//!
//! These mirror the collector's `metrics.proto` (proto2). Optional scalars are `Option`s so that unset slots stay
//! off the wire.
//!
//! ```protobuf
//! message MetricsCollection {
//!   repeated MetricsData data = 1;
//!   optional uint64 start_timestamp_us = 2;
//! }
//! ```

use crate::units::Units;

/// A batch of data records, the unit handed to a [`Monitor`](crate::monitor::Monitor).
#[derive(prost::Message, Clone, PartialEq)]
pub struct MetricsCollection {
    /// One record per (metric, field tuple).
    #[prost(message, repeated, tag = "1")]
    pub data: Vec<MetricsData>,
    /// Time the collection was assembled, in microseconds since the UNIX epoch.
    #[prost(uint64, optional, tag = "2")]
    pub start_timestamp_us: Option<u64>,
}

/// The value of one time series.
#[derive(prost::Message, Clone, PartialEq)]
pub struct MetricsData {
    /// Metric name, without the prefix.
    #[prost(string, required, tag = "1")]
    pub name: String,
    /// Prefix prepended to `name` by the collector.
    #[prost(string, optional, tag = "2")]
    pub metric_name_prefix: Option<String>,

    /// Target block for device targets.
    #[prost(message, optional, tag = "11")]
    pub network_device: Option<NetworkDevice>,
    /// Target block for task targets.
    #[prost(message, optional, tag = "12")]
    pub task: Option<Task>,

    /// Field values, in the metric's declared field order.
    #[prost(message, repeated, tag = "20")]
    pub fields: Vec<MetricsField>,

    /// Value of a counter.
    #[prost(int64, optional, tag = "30")]
    pub counter: Option<i64>,
    /// Value of a gauge.
    #[prost(int64, optional, tag = "32")]
    pub gauge: Option<i64>,
    /// Value of a non-cumulative float.
    #[prost(double, optional, tag = "34")]
    pub noncumulative_double_value: Option<f64>,
    /// Value of a distribution.
    #[prost(message, optional, tag = "35")]
    pub distribution: Option<PrecomputedDistribution>,
    /// Value of a string metric.
    #[prost(string, optional, tag = "36")]
    pub string_value: Option<String>,
    /// Value of a boolean metric.
    #[prost(bool, optional, tag = "37")]
    pub boolean_value: Option<bool>,
    /// Value of a cumulative float.
    #[prost(double, optional, tag = "38")]
    pub cumulative_double_value: Option<f64>,

    /// Start of the accumulation window of a cumulative value, in microseconds since the UNIX epoch.
    #[prost(uint64, optional, tag = "40")]
    pub start_timestamp_us: Option<u64>,
    /// Human-readable description of the metric.
    #[prost(string, optional, tag = "43")]
    pub description: Option<String>,
    /// Units of the value.
    #[prost(enumeration = "Units", optional, tag = "44")]
    pub units: Option<i32>,
}

/// Type of a [`MetricsField`] value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MetricsFieldType {
    /// A string value.
    String = 1,
    /// An integer value.
    Int = 2,
    /// A boolean value.
    Bool = 3,
}

/// One typed field of a data record.
#[derive(prost::Message, Clone, PartialEq)]
pub struct MetricsField {
    /// Field name.
    #[prost(string, required, tag = "1")]
    pub name: String,
    /// Which of the value slots is set.
    #[prost(enumeration = "MetricsFieldType", optional, tag = "3")]
    pub r#type: Option<i32>,
    /// String value.
    #[prost(string, optional, tag = "4")]
    pub string_value: Option<String>,
    /// Integer value.
    #[prost(int64, optional, tag = "5")]
    pub int_value: Option<i64>,
    /// Boolean value.
    #[prost(bool, optional, tag = "6")]
    pub bool_value: Option<bool>,
}

/// Bucket layout of a [`PrecomputedDistribution`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum SpecType {
    /// Geometric buckets growing by 2.
    CanonicalPowersOf2 = 1,
    /// Geometric buckets growing by 10^0.2.
    CanonicalPowersOf10P02 = 2,
    /// Geometric buckets growing by 10.
    CanonicalPowersOf10 = 3,
    /// Buckets described by `width`, `growth_factor` and `num_buckets`.
    CustomParameterized = 20,
}

/// A histogram, with its bucket counts run-length encoded.
#[derive(prost::Message, Clone, PartialEq)]
pub struct PrecomputedDistribution {
    /// Bucket layout.
    #[prost(enumeration = "SpecType", optional, tag = "1")]
    pub spec_type: Option<i32>,
    /// Width of each finite bucket.
    #[prost(double, optional, tag = "2")]
    pub width: Option<f64>,
    /// Growth factor between boundaries.
    #[prost(double, optional, tag = "3")]
    pub growth_factor: Option<f64>,
    /// Number of finite buckets.
    #[prost(int32, optional, tag = "4")]
    pub num_buckets: Option<i32>,
    /// Whether counts accumulate since `start_timestamp_us`.
    #[prost(bool, optional, tag = "6")]
    pub is_cumulative: Option<bool>,
    /// Counts of the finite buckets. A negative entry `-n` stands for `n` empty buckets.
    #[prost(sint64, repeated, tag = "7")]
    pub bucket: Vec<i64>,
    /// Count of the underflow bucket.
    #[prost(sint64, optional, tag = "8")]
    pub underflow: Option<i64>,
    /// Count of the overflow bucket.
    #[prost(sint64, optional, tag = "9")]
    pub overflow: Option<i64>,
    /// Mean of every sample.
    #[prost(double, optional, tag = "10")]
    pub mean: Option<f64>,
}

/// Target block identifying a network device.
#[derive(prost::Message, Clone, PartialEq)]
pub struct NetworkDevice {
    /// Whether the collector may alert on this device.
    #[prost(bool, optional, tag = "101")]
    pub alertable: Option<bool>,
    /// Acquisition realm.
    #[prost(string, optional, tag = "102")]
    pub realm: Option<String>,
    /// Region the device lives in.
    #[prost(string, optional, tag = "104")]
    pub metro: Option<String>,
    /// Role of the device.
    #[prost(string, optional, tag = "105")]
    pub role: Option<String>,
    /// Short hostname.
    #[prost(string, optional, tag = "106")]
    pub hostname: Option<String>,
    /// Network the device belongs to.
    #[prost(string, optional, tag = "108")]
    pub hostgroup: Option<String>,
}

/// Target block identifying a task.
#[derive(prost::Message, Clone, PartialEq)]
pub struct Task {
    /// Service the task belongs to.
    #[prost(string, optional, tag = "20")]
    pub service_name: Option<String>,
    /// Job the task belongs to.
    #[prost(string, optional, tag = "30")]
    pub job_name: Option<String>,
    /// Region the task runs in.
    #[prost(string, optional, tag = "40")]
    pub data_center: Option<String>,
    /// Host the task runs on.
    #[prost(string, optional, tag = "50")]
    pub host_name: Option<String>,
    /// Index of the task within its job.
    #[prost(int32, optional, tag = "60")]
    pub task_num: Option<i32>,
}
