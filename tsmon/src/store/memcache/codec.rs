//! Encoding of the value blobs kept in memcache.
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use bytes::Bytes;
use prost::Message as _;
use thiserror::Error;

use crate::{
    bucketer::{Bucketer, BucketerError},
    distribution::Distribution,
    field::{FieldTuple, FieldValue},
    metric::MetricValue,
};

/// Hostname and task number of one instance of a job.
pub(super) type InstanceKey = (String, i32);

/// Everything stored under one metric name: the start time and each instance's values.
#[derive(Clone, Debug, Default, PartialEq)]
pub(super) struct Entry {
    pub start_time: f64,
    pub instances: BTreeMap<InstanceKey, HashMap<FieldTuple, MetricValue>>,
}

impl Entry {
    pub fn new(start_time: f64) -> Self {
        Self { start_time, instances: BTreeMap::new() }
    }
}

#[derive(Debug, Error)]
pub(super) enum CodecError {
    #[error("malformed blob: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("cell has no {0}")]
    Missing(&'static str),

    #[error("invalid bucketer: {0}")]
    Bucketer(#[from] BucketerError),
}

#[derive(prost::Message, Clone, PartialEq)]
struct EntryBlob {
    #[prost(double, tag = "1")]
    start_time: f64,
    #[prost(message, repeated, tag = "2")]
    instances: Vec<InstanceBlob>,
}

#[derive(prost::Message, Clone, PartialEq)]
struct InstanceBlob {
    #[prost(string, tag = "1")]
    hostname: String,
    #[prost(int32, tag = "2")]
    task_num: i32,
    #[prost(message, repeated, tag = "3")]
    cells: Vec<CellBlob>,
}

#[derive(prost::Message, Clone, PartialEq)]
struct CellBlob {
    #[prost(message, repeated, tag = "1")]
    fields: Vec<FieldValueBlob>,
    #[prost(message, optional, tag = "2")]
    value: Option<ValueBlob>,
}

#[derive(prost::Message, Clone, PartialEq)]
struct FieldValueBlob {
    #[prost(oneof = "FieldKind", tags = "1, 2, 3")]
    kind: Option<FieldKind>,
}

#[derive(prost::Oneof, Clone, PartialEq)]
enum FieldKind {
    #[prost(string, tag = "1")]
    Str(String),
    #[prost(int64, tag = "2")]
    Int(i64),
    #[prost(bool, tag = "3")]
    Bool(bool),
}

#[derive(prost::Message, Clone, PartialEq)]
struct ValueBlob {
    #[prost(oneof = "ValueKind", tags = "1, 2, 3, 4, 5")]
    kind: Option<ValueKind>,
}

#[derive(prost::Oneof, Clone, PartialEq)]
enum ValueKind {
    #[prost(bool, tag = "1")]
    Bool(bool),
    #[prost(int64, tag = "2")]
    Int(i64),
    #[prost(double, tag = "3")]
    Float(f64),
    #[prost(string, tag = "4")]
    Str(String),
    #[prost(message, tag = "5")]
    Distribution(DistributionBlob),
}

#[derive(prost::Message, Clone, PartialEq)]
struct DistributionBlob {
    #[prost(double, tag = "1")]
    width: f64,
    #[prost(double, tag = "2")]
    growth_factor: f64,
    #[prost(uint32, tag = "3")]
    num_finite_buckets: u32,
    #[prost(double, tag = "4")]
    scale: f64,
    #[prost(double, tag = "5")]
    sum: f64,
    #[prost(uint64, tag = "6")]
    count: u64,
    #[prost(btree_map = "uint32, uint64", tag = "7")]
    buckets: BTreeMap<u32, u64>,
}

pub(super) fn encode(entry: &Entry) -> Bytes {
    let blob = EntryBlob {
        start_time: entry.start_time,
        instances: entry
            .instances
            .iter()
            .map(|((hostname, task_num), cells)| InstanceBlob {
                hostname: hostname.clone(),
                task_num: *task_num,
                cells: cells.iter().map(|(fields, value)| encode_cell(fields, value)).collect(),
            })
            .collect(),
    };
    Bytes::from(blob.encode_to_vec())
}

pub(super) fn decode(bytes: &[u8]) -> Result<Entry, CodecError> {
    let blob = EntryBlob::decode(bytes)?;
    let mut entry = Entry::new(blob.start_time);
    for instance in blob.instances {
        let cells = instance.cells.into_iter().map(decode_cell).collect::<Result<HashMap<_, _>, _>>()?;
        entry.instances.insert((instance.hostname, instance.task_num), cells);
    }
    Ok(entry)
}

fn encode_cell(fields: &FieldTuple, value: &MetricValue) -> CellBlob {
    let fields = fields
        .values()
        .iter()
        .map(|field| FieldValueBlob {
            kind: Some(match field {
                FieldValue::Str(s) => FieldKind::Str(s.clone()),
                FieldValue::Int(i) => FieldKind::Int(*i),
                FieldValue::Bool(b) => FieldKind::Bool(*b),
            }),
        })
        .collect();

    let kind = match value {
        MetricValue::Bool(b) => ValueKind::Bool(*b),
        MetricValue::Int(i) => ValueKind::Int(*i),
        MetricValue::Float(f) => ValueKind::Float(*f),
        MetricValue::String(s) => ValueKind::Str(s.clone()),
        MetricValue::Distribution(d) => {
            let bucketer = d.bucketer();
            ValueKind::Distribution(DistributionBlob {
                width: bucketer.width(),
                growth_factor: bucketer.growth_factor(),
                num_finite_buckets: bucketer.num_finite_buckets() as u32,
                scale: bucketer.scale(),
                sum: d.sum(),
                count: d.count(),
                buckets: d.buckets().iter().map(|(i, n)| (*i as u32, *n)).collect(),
            })
        }
    };

    CellBlob { fields, value: Some(ValueBlob { kind: Some(kind) }) }
}

fn decode_cell(cell: CellBlob) -> Result<(FieldTuple, MetricValue), CodecError> {
    let fields = cell
        .fields
        .into_iter()
        .map(|field| match field.kind {
            Some(FieldKind::Str(s)) => Ok(FieldValue::Str(s)),
            Some(FieldKind::Int(i)) => Ok(FieldValue::Int(i)),
            Some(FieldKind::Bool(b)) => Ok(FieldValue::Bool(b)),
            None => Err(CodecError::Missing("field value")),
        })
        .collect::<Result<Vec<_>, _>>()?;

    let value = match cell.value.and_then(|v| v.kind).ok_or(CodecError::Missing("value"))? {
        ValueKind::Bool(b) => MetricValue::Bool(b),
        ValueKind::Int(i) => MetricValue::Int(i),
        ValueKind::Float(f) => MetricValue::Float(f),
        ValueKind::Str(s) => MetricValue::String(s),
        ValueKind::Distribution(d) => {
            let bucketer = Bucketer::new(d.width, d.growth_factor, d.num_finite_buckets as usize, d.scale)?;
            MetricValue::Distribution(Distribution::from_parts(
                Arc::new(bucketer),
                d.sum,
                d.count,
                d.buckets.into_iter().map(|(i, n)| (i as usize, n)),
            ))
        }
    };

    Ok((FieldTuple::new(fields), value))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{decode, encode, CodecError, Entry};
    use crate::{
        bucketer::Bucketer,
        distribution::Distribution,
        field::{FieldTuple, FieldValue},
        metric::MetricValue,
    };

    #[test]
    fn entries_survive_encoding() {
        let mut dist = Distribution::new(Arc::new(Bucketer::geometric_scaled(2.0, 10, 0.5).unwrap()));
        dist.add(3.0);
        dist.add(-1.0);

        let mut entry = Entry::new(1234.5);
        let cells = entry.instances.entry(("host".to_string(), 3)).or_default();
        cells.insert(
            FieldTuple::new(vec![FieldValue::Str("a".into()), FieldValue::Int(1), FieldValue::Bool(false)]),
            MetricValue::Int(7),
        );
        cells.insert(FieldTuple::new(vec![FieldValue::Str("b".into())]), MetricValue::Distribution(dist));
        entry.instances.entry(("other".to_string(), 0)).or_default().insert(FieldTuple::empty(), "s".into());

        assert_eq!(decode(&encode(&entry)).unwrap(), entry);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(decode(b"\xff\xff\xff"), Err(CodecError::Decode(_))));
    }
}
