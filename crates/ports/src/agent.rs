//! Agent-side boundary contracts: local collection and transmission.

use crate::BoxFuture;
use metricsd_domain::{Metric, MetricRecord};
use metricsd_shared::{RequestContext, Result};

/// A source of local metrics polled by the agent.
pub trait MetricCollectorPort: Send + Sync {
    /// Stable collector name for log lines.
    fn name(&self) -> &'static str;

    /// Sample the source once.
    fn collect(&self) -> Result<Vec<Metric>>;
}

/// Transport that delivers metrics to the server.
pub trait MetricSenderPort: Send + Sync {
    /// Deliver one record to the single-metric endpoint.
    fn send_one(&self, ctx: &RequestContext, record: MetricRecord) -> BoxFuture<'_, Result<()>>;

    /// Deliver all records in one request to the batch endpoint.
    fn send_batch(
        &self,
        ctx: &RequestContext,
        records: Vec<MetricRecord>,
    ) -> BoxFuture<'_, Result<()>>;
}
