//! Durability backend boundary contracts.

use crate::BoxFuture;
use metricsd_domain::MetricRecord;
use metricsd_shared::{RequestContext, Result};

/// Persistence strategy for store snapshots.
pub trait DurabilityPort: Send + Sync {
    /// Load every persisted record.
    fn read(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<Vec<MetricRecord>>>;

    /// Persist a full snapshot of the store.
    fn write(&self, ctx: &RequestContext, records: Vec<MetricRecord>)
    -> BoxFuture<'_, Result<()>>;

    /// Prepare the backend (directories, schema). Idempotent.
    fn create(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<()>>;
}

/// Health and shutdown hooks for a durability backend.
pub trait BackendLifecyclePort: Send + Sync {
    /// Check the backend responds.
    fn ping(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<()>>;

    /// Release connections and handles.
    fn close(&self) -> BoxFuture<'_, ()>;
}

