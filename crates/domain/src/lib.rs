//! # metricsd-domain
//!
//! Domain model for metric ingestion:
//!
//! - **Kinds and values** - `MetricKind`, `MetricName`, `MetricValue`, `Metric`
//! - **Records** - `MetricRecord`, the serialized form shared by the store,
//!   the durability backends, and the wire protocol
//!
//! ## Dependency Rules
//!
//! - Depends only on `shared` crate
//! - No I/O

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub use metricsd_shared::shared_crate_version;

pub mod metric;
pub mod record;

pub use metric::{Metric, MetricError, MetricKind, MetricName, MetricValue};
pub use record::MetricRecord;

/// Returns the domain crate version.
#[must_use]
pub const fn domain_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
