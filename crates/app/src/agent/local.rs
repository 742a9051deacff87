//! Agent-local metric buffer between collection and dispatch.

use metricsd_domain::{Metric, MetricValue};
use metricsd_ports::MetricRecord;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

#[derive(Debug, Default)]
struct Buffer {
    gauges: BTreeMap<String, f64>,
    counters: BTreeMap<String, i64>,
}

/// Latest gauges plus counter deltas accumulated since the last drain.
#[derive(Debug, Default)]
pub struct LocalMetrics {
    buffer: RwLock<Buffer>,
}

impl LocalMetrics {
    /// Empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one collector sample under a single write lock.
    pub fn record(&self, metrics: &[Metric]) {
        let mut buffer = self.buffer.write().unwrap_or_else(PoisonError::into_inner);
        for metric in metrics {
            match metric.value {
                MetricValue::Gauge(value) => {
                    buffer.gauges.insert(metric.name.to_string(), value);
                },
                MetricValue::Counter(delta) => {
                    let total = buffer.counters.entry(metric.name.to_string()).or_insert(0);
                    *total = total.saturating_add(delta);
                },
            }
        }
    }

    /// Take the report for this tick: all gauges, and counter deltas which
    /// are reset so the server never receives the same increment twice.
    pub fn drain(&self) -> Vec<MetricRecord> {
        let (counters, gauges) = {
            let mut buffer = self.buffer.write().unwrap_or_else(PoisonError::into_inner);
            (std::mem::take(&mut buffer.counters), buffer.gauges.clone())
        };
        counters
            .into_iter()
            .map(|(name, delta)| MetricRecord::counter(name, delta))
            .chain(gauges.into_iter().map(|(name, value)| MetricRecord::gauge(name, value)))
            .collect()
    }

    /// Number of distinct metrics currently buffered.
    pub fn len(&self) -> usize {
        let buffer = self.buffer.read().unwrap_or_else(PoisonError::into_inner);
        buffer.gauges.len() + buffer.counters.len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
