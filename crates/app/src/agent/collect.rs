//! Periodic sampling of one collector into the local buffer.

use crate::agent::LocalMetrics;
use metricsd_ports::{LogLevel, LoggerPort, MetricCollectorPort, log_fields};
use metricsd_shared::RequestContext;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Sample `collector` every `interval` until `ctx` is cancelled.
///
/// The first sample is taken immediately. A failed sample is logged and
/// skipped.
pub async fn run_collection_loop(
    ctx: &RequestContext,
    collector: Arc<dyn MetricCollectorPort>,
    local: Arc<LocalMetrics>,
    interval: Duration,
    logger: Option<Arc<dyn LoggerPort>>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = ctx.cancelled() => return,
            _ = ticker.tick() => {},
        }
        match collector.collect() {
            Ok(metrics) => {
                local.record(&metrics);
                if let Some(logger) = logger.as_ref() {
                    logger.debug(
                        "agent.collect.sampled",
                        "Collector sampled",
                        Some(log_fields([
                            ("collector", Value::from(collector.name())),
                            ("metrics", Value::from(metrics.len())),
                        ])),
                    );
                }
            },
            Err(error) => {
                if let Some(logger) = logger.as_ref() {
                    logger.failure(
                        LogLevel::Warn,
                        "agent.collect.failed",
                        "Collector failed",
                        &error,
                        Some(log_fields([("collector", Value::from(collector.name()))])),
                    );
                }
            },
        }
    }
}
