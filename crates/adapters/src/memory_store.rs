//! In-memory metric store guarded by a single reader/writer lock.

use metricsd_domain::{Metric, MetricValue};
use metricsd_ports::{MetricName, MetricRecord, MetricSnapshotPort, MetricStorePort};
use metricsd_shared::{ErrorEnvelope, Result};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct Maps {
    gauges: BTreeMap<String, f64>,
    counters: BTreeMap<String, i64>,
}

impl Maps {
    fn apply(&mut self, metric: &Metric) -> MetricValue {
        match metric.value {
            MetricValue::Gauge(value) => {
                self.gauges.insert(metric.name.as_str().to_string(), value);
                MetricValue::Gauge(value)
            },
            MetricValue::Counter(delta) => {
                let total = self
                    .counters
                    .entry(metric.name.as_str().to_string())
                    .or_insert(0);
                *total = total.saturating_add(delta);
                MetricValue::Counter(*total)
            },
        }
    }
}

/// Concurrent gauge/counter store.
///
/// Writers take the exclusive lock, readers the shared lock. A poisoned lock
/// is recovered: every mutation leaves the maps consistent.
#[derive(Debug, Default)]
pub struct MemStorage {
    maps: RwLock<Maps>,
}

impl MemStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Maps> {
        self.maps.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Maps> {
        self.maps.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MetricStorePort for MemStorage {
    fn set_gauge(&self, name: &MetricName, value: f64) {
        self.write().gauges.insert(name.as_str().to_string(), value);
    }

    fn set_counter(&self, name: &MetricName, delta: i64) -> i64 {
        let mut maps = self.write();
        let total = maps.counters.entry(name.as_str().to_string()).or_insert(0);
        *total = total.saturating_add(delta);
        *total
    }

    fn get_gauge(&self, name: &MetricName) -> Option<f64> {
        self.read().gauges.get(name.as_str()).copied()
    }

    fn get_counter(&self, name: &MetricName) -> Option<i64> {
        self.read().counters.get(name.as_str()).copied()
    }
}

impl MetricSnapshotPort for MemStorage {
    fn all_gauges(&self) -> BTreeMap<String, f64> {
        self.read().gauges.clone()
    }

    fn all_counters(&self) -> BTreeMap<String, i64> {
        self.read().counters.clone()
    }

    fn serialize_all(&self) -> Vec<MetricRecord> {
        let (counters, gauges) = {
            let maps = self.read();
            (maps.counters.clone(), maps.gauges.clone())
        };
        counters
            .into_iter()
            .map(|(name, delta)| MetricRecord::counter(name, delta))
            .chain(
                gauges
                    .into_iter()
                    .map(|(name, value)| MetricRecord::gauge(name, value)),
            )
            .collect()
    }

    fn restore(&self, records: &[MetricRecord]) -> Result<usize> {
        let metrics = records
            .iter()
            .map(|record| record.to_metric().map_err(ErrorEnvelope::from))
            .collect::<Result<Vec<_>>>()?;

        let mut maps = self.write();
        for metric in &metrics {
            maps.apply(metric);
        }
        Ok(metrics.len())
    }

    fn is_empty(&self) -> bool {
        let maps = self.read();
        maps.gauges.is_empty() && maps.counters.is_empty()
    }
}
