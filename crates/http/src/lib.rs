//! # metricsd-http
//!
//! Server surfaces: the HTTP update protocol (axum) with its transform
//! chain, and the `metricsd.v1.Metrics` gRPC service (tonic).
//! Handlers stay thin and delegate to `metricsd-app` use cases.

pub mod error;
pub mod grpc;
pub mod middleware;
pub mod render;
pub mod routes;

pub use error::{ApiError, status_for};
pub use grpc::{MetricsGrpcService, RealIpInterceptor, grpc_service, status_from_envelope};
pub use middleware::{MAX_BODY_BYTES, TransformConfig};
pub use routes::{HttpState, build_router};

/// Returns the http crate version.
#[must_use]
pub const fn http_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;
    use metricsd_api::api_crate_version;
    use metricsd_app::app_crate_version;

    #[test]
    fn http_can_use_app_and_api() {
        assert!(!http_crate_version().is_empty());
        assert!(!app_crate_version().is_empty());
        assert!(!api_crate_version().is_empty());
    }
}
