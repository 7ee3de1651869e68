use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use super::{apply_incr, apply_set, check_delta, MetricSnapshot, MetricStore, ModifyFn};
use crate::{
    clock::Clock,
    errors::Error,
    field::FieldTuple,
    metric::{MetricDef, MetricValue},
};

#[derive(Debug)]
struct Entry {
    start_time: f64,
    values: HashMap<FieldTuple, MetricValue>,
}

/// A store that keeps every value in this process, behind a single lock.
///
/// No I/O happens while the lock is held, so writers only ever wait for one another's in-memory updates.
#[derive(Debug)]
pub struct InProcessMetricStore {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl InProcessMetricStore {
    /// Creates an empty store that stamps start times with `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock, entries: Mutex::new(HashMap::new()) }
    }

    /// Runs `update` against the current value of one time series and stores its result.
    fn update<U>(&self, def: &MetricDef, fields: FieldTuple, update: U) -> Result<(), Error>
    where
        U: FnOnce(Option<&MetricValue>) -> Result<MetricValue, Error>,
    {
        let mut entries = self.entries.lock();
        let old = entries.get(def.name()).and_then(|entry| entry.values.get(&fields));
        let new = update(old)?;

        entries
            .entry(def.name().to_string())
            .or_insert_with(|| Entry {
                start_time: def.start_time().unwrap_or_else(|| self.clock.now()),
                values: HashMap::new(),
            })
            .values
            .insert(fields, new);
        Ok(())
    }
}

impl MetricStore for InProcessMetricStore {
    fn get(&self, name: &str, fields: &FieldTuple) -> Option<MetricValue> {
        self.entries.lock().get(name).and_then(|entry| entry.values.get(fields)).cloned()
    }

    fn field_values(&self, name: &str) -> Vec<(FieldTuple, MetricValue)> {
        self.entries
            .lock()
            .get(name)
            .map(|entry| entry.values.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    fn get_all(&self) -> Vec<MetricSnapshot> {
        let entries = self.entries.lock();
        let end_time = self.clock.now();
        entries
            .iter()
            .map(|(name, entry)| MetricSnapshot {
                name: name.clone(),
                target: None,
                start_time: entry.start_time,
                end_time,
                values: entry.values.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            })
            .collect()
    }

    fn set(&self, def: &MetricDef, fields: FieldTuple, value: MetricValue, enforce_ge: bool) -> Result<(), Error> {
        self.update(def, fields, |old| apply_set(def, old, value, enforce_ge))
    }

    fn incr(
        &self,
        def: &MetricDef,
        fields: FieldTuple,
        delta: MetricValue,
        modify_fn: Option<ModifyFn<'_>>,
    ) -> Result<(), Error> {
        check_delta(def, &delta)?;
        self.update(def, fields, |old| apply_incr(def, old, &delta, modify_fn))
    }

    fn reset_for_unittest(&self, name: Option<&str>) {
        let mut entries = self.entries.lock();
        match name {
            Some(name) => {
                entries.remove(name);
            }
            None => entries.clear(),
        }
    }
}
