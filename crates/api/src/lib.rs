//! # metricsd-api
//!
//! gRPC contract (`metricsd.v1`) and mapping between protobuf messages and
//! [`MetricRecord`]s. This crate depends only on `domain` and `shared`.

use metricsd_domain::{MetricKind, MetricRecord};
use metricsd_shared::{ErrorCode, ErrorEnvelope, Result};

/// Generated protobuf messages and the `Metrics` service.
#[allow(
    missing_docs,
    unused_qualifications,
    clippy::pedantic,
    clippy::nursery,
    reason = "generated by tonic-build"
)]
pub mod v1 {
    tonic::include_proto!("metricsd.v1");
}

/// Convert a protobuf metric into a wire record.
///
/// Only the field selected by `type` is carried over. An unspecified or
/// unknown type is `not_implemented`.
pub fn record_from_proto(metric: &v1::Metric) -> Result<MetricRecord> {
    match v1::MetricType::try_from(metric.r#type) {
        Ok(v1::MetricType::Gauge) => Ok(MetricRecord::gauge(metric.name.clone(), metric.gauge)),
        Ok(v1::MetricType::Counter) => {
            Ok(MetricRecord::counter(metric.name.clone(), metric.counter))
        },
        Ok(v1::MetricType::Unspecified) | Err(_) => Err(ErrorEnvelope::expected(
            ErrorCode::not_implemented(),
            format!("unknown metric type: {}", metric.r#type),
        )
        .with_metadata("metric", metric.name.clone())),
    }
}

/// Convert a wire record into a protobuf metric. Absent fields become zero.
#[must_use]
pub fn record_to_proto(record: &MetricRecord) -> v1::Metric {
    let kind = match record.kind {
        MetricKind::Gauge => v1::MetricType::Gauge,
        MetricKind::Counter => v1::MetricType::Counter,
    };
    v1::Metric {
        name: record.id.clone(),
        r#type: kind.into(),
        gauge: record.value.unwrap_or_default(),
        counter: record.delta.unwrap_or_default(),
    }
}

/// Returns the api crate version.
#[must_use]
pub const fn api_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
