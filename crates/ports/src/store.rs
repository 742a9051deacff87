//! Metric store boundary contracts.
//!
//! `MetricStorePort` is the live update/read surface. Bulk snapshot and
//! restore live on `MetricSnapshotPort` so fakes for either concern stay small.

use metricsd_domain::{MetricName, MetricRecord};
use metricsd_shared::Result;
use std::collections::BTreeMap;

/// Live metric updates and point reads.
///
/// Implementations are shared across request handlers and must be safe to
/// call concurrently.
pub trait MetricStorePort: Send + Sync {
    /// Overwrite the gauge `name`.
    fn set_gauge(&self, name: &MetricName, value: f64);

    /// Add `delta` to the counter `name` and return the accumulated total.
    fn set_counter(&self, name: &MetricName, delta: i64) -> i64;

    /// Current gauge value, `None` when absent.
    fn get_gauge(&self, name: &MetricName) -> Option<f64>;

    /// Current counter total, `None` when absent.
    fn get_counter(&self, name: &MetricName) -> Option<i64>;
}

/// Whole-store snapshots used by durability and listing endpoints.
pub trait MetricSnapshotPort: Send + Sync {
    /// Copy of every gauge.
    fn all_gauges(&self) -> BTreeMap<String, f64>;

    /// Copy of every counter.
    fn all_counters(&self) -> BTreeMap<String, i64>;

    /// Every metric as records: counters first, then gauges, each by name.
    fn serialize_all(&self) -> Vec<MetricRecord>;

    /// Replay records through the update path; returns the applied count.
    ///
    /// Counters accumulate, so this must run against an empty store.
    /// Records are validated before any of them is applied.
    fn restore(&self, records: &[MetricRecord]) -> Result<usize>;

    /// True when the store holds no metrics.
    fn is_empty(&self) -> bool;
}
