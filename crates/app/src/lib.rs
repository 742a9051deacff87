//! # metricsd-app
//!
//! Application use cases: metric updates and queries, durability flush and
//! restore, and agent collection and dispatch.
//! This crate depends on `ports`, `domain`, and `shared`.

pub mod agent;
pub mod durability;
pub mod metrics;

pub use agent::{
    BROKEN_PIPE_COOLDOWN, DispatchDeps, DispatchMode, DispatchReport, LocalMetrics, dispatch_once,
    run_collection_loop, run_report_loop,
};
pub use durability::{DURABILITY_IO_TIMEOUT, DurabilityService, PING_TIMEOUT};
pub use metrics::{
    MetricListing, MetricsDeps, PathUpdate, get_record, get_value, list_metrics, ping,
    update_from_path, update_metric, update_metrics,
};

/// Returns the app crate version.
#[must_use]
pub const fn app_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
