//! # metricsd-ports
//!
//! Port traits for the metricsd hexagonal architecture.
//!
//! This crate defines the interfaces between the use cases and the adapters.
//! It depends only on `domain` and `shared`.

use std::future::Future;
use std::pin::Pin;

/// Boxed future used by port traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Returns the ports crate version.
#[must_use]
pub const fn ports_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub mod agent;
pub mod durability;
pub mod logger;
pub mod store;

pub use agent::*;
pub use durability::*;
pub use logger::*;
pub use store::*;

// Re-export domain types used in port signatures.
pub use metricsd_domain::{Metric, MetricKind, MetricName, MetricRecord, MetricValue};
