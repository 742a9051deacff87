//! gRPC surface for `metricsd.v1.Metrics`.

use metricsd_adapters::codec::TrustedSubnet;
use metricsd_api::v1::metrics_server::{Metrics, MetricsServer};
use metricsd_api::v1::{
    UpdateMetricRequest, UpdateMetricResponse, UpdateMetricsRequest, UpdateMetricsResponse,
};
use metricsd_api::{record_from_proto, record_to_proto};
use metricsd_app::MetricsDeps;
use metricsd_shared::{ErrorCode, ErrorEnvelope, RequestContext, Result};
use tonic::service::Interceptor;
use tonic::service::interceptor::InterceptedService;
use tonic::{Code, Request, Response, Status};

/// Metadata key carrying the agent address.
pub const REAL_IP_METADATA: &str = "x-real-ip";

/// Map an error envelope onto a gRPC status.
#[must_use]
pub fn status_from_envelope(error: &ErrorEnvelope) -> Status {
    let code = if error.code == ErrorCode::not_found() {
        Code::NotFound
    } else if error.code == ErrorCode::invalid_input()
        || error.code == ErrorCode::integrity_failure()
    {
        Code::InvalidArgument
    } else if error.code == ErrorCode::forbidden() || error.code == ErrorCode::permission_denied()
    {
        Code::PermissionDenied
    } else if error.code == ErrorCode::unavailable() {
        Code::Unavailable
    } else if error.code == ErrorCode::not_implemented() {
        Code::Unimplemented
    } else if error.is_cancelled() {
        Code::Cancelled
    } else if error.code == ErrorCode::timeout() {
        Code::DeadlineExceeded
    } else {
        Code::Internal
    };
    Status::new(code, error.message.clone())
}

/// `Metrics` service backed by the shared update use cases.
#[derive(Clone)]
pub struct MetricsGrpcService {
    deps: MetricsDeps,
    root: RequestContext,
}

impl MetricsGrpcService {
    /// Serve updates through `deps`; calls derive contexts from `root`.
    #[must_use]
    pub const fn new(deps: MetricsDeps, root: RequestContext) -> Self {
        Self { deps, root }
    }
}

#[tonic::async_trait]
impl Metrics for MetricsGrpcService {
    async fn update_metric(
        &self,
        request: Request<UpdateMetricRequest>,
    ) -> std::result::Result<Response<UpdateMetricResponse>, Status> {
        let ctx = self.root.child("grpc_");
        let metric = request
            .into_inner()
            .metric
            .ok_or_else(|| Status::invalid_argument("metric is required"))?;
        let record = record_from_proto(&metric).map_err(|error| status_from_envelope(&error))?;
        let updated = metricsd_app::update_metric(&ctx, &self.deps, record)
            .await
            .map_err(|error| status_from_envelope(&error))?;
        Ok(Response::new(UpdateMetricResponse {
            metric: Some(record_to_proto(&updated)),
            success: true,
        }))
    }

    async fn update_metrics(
        &self,
        request: Request<UpdateMetricsRequest>,
    ) -> std::result::Result<Response<UpdateMetricsResponse>, Status> {
        let ctx = self.root.child("grpc_");
        let records = request
            .into_inner()
            .metrics
            .iter()
            .map(record_from_proto)
            .collect::<Result<Vec<_>>>()
            .map_err(|error| status_from_envelope(&error))?;
        metricsd_app::update_metrics(&ctx, &self.deps, records)
            .await
            .map_err(|error| status_from_envelope(&error))?;
        Ok(Response::new(UpdateMetricsResponse { success: true }))
    }
}

/// Applies the trusted-subnet check to `x-real-ip` metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealIpInterceptor {
    subnet: Option<TrustedSubnet>,
}

impl RealIpInterceptor {
    /// Interceptor that allows everything when `subnet` is `None`.
    #[must_use]
    pub const fn new(subnet: Option<TrustedSubnet>) -> Self {
        Self { subnet }
    }
}

impl Interceptor for RealIpInterceptor {
    fn call(&mut self, request: Request<()>) -> std::result::Result<Request<()>, Status> {
        let Some(subnet) = self.subnet.as_ref() else {
            return Ok(request);
        };
        let real_ip = request
            .metadata()
            .get(REAL_IP_METADATA)
            .and_then(|value| value.to_str().ok());
        subnet
            .check(real_ip)
            .map_err(|error| status_from_envelope(&error))?;
        Ok(request)
    }
}

/// The service wrapped in the address interceptor, ready for `tonic` routing.
#[must_use]
pub fn grpc_service(
    service: MetricsGrpcService,
    subnet: Option<TrustedSubnet>,
) -> InterceptedService<MetricsServer<MetricsGrpcService>, RealIpInterceptor> {
    MetricsServer::with_interceptor(service, RealIpInterceptor::new(subnet))
}

#[cfg(test)]
mod tests {
    use super::*;
    use metricsd_adapters::MemStorage;
    use metricsd_api::v1::{Metric, MetricType};
    use metricsd_ports::MetricSnapshotPort;
    use std::sync::Arc;

    fn service(store: &Arc<MemStorage>) -> MetricsGrpcService {
        let deps = MetricsDeps {
            store: store.clone(),
            snapshot: store.clone(),
            durability: None,
            sync_flush: false,
            logger: None,
        };
        MetricsGrpcService::new(deps, RequestContext::new_request())
    }

    fn counter(name: &str, delta: i64) -> Metric {
        Metric {
            name: name.to_string(),
            r#type: MetricType::Counter.into(),
            gauge: 0.0,
            counter: delta,
        }
    }

    #[tokio::test]
    async fn update_metric_returns_accumulated_counter() -> std::result::Result<(), Status> {
        let store = Arc::new(MemStorage::new());
        let service = service(&store);
        for _ in 0..2 {
            service
                .update_metric(Request::new(UpdateMetricRequest {
                    metric: Some(counter("hits", 3)),
                }))
                .await?;
        }
        let response = service
            .update_metric(Request::new(UpdateMetricRequest {
                metric: Some(counter("hits", 1)),
            }))
            .await?
            .into_inner();
        assert!(response.success);
        assert_eq!(response.metric.map(|metric| metric.counter), Some(7));
        Ok(())
    }

    #[tokio::test]
    async fn batch_with_unknown_type_is_unimplemented() {
        let store = Arc::new(MemStorage::new());
        let service = service(&store);
        let mut bogus = counter("hits", 1);
        bogus.r#type = MetricType::Unspecified.into();
        let result = service
            .update_metrics(Request::new(UpdateMetricsRequest {
                metrics: vec![counter("ok", 1), bogus],
            }))
            .await;
        assert_eq!(result.err().map(|status| status.code()), Some(Code::Unimplemented));
        assert!(store.serialize_all().is_empty());
    }

    #[test]
    fn interceptor_rejects_untrusted_addresses() -> Result<()> {
        let net: ipnet::IpNet = "10.0.0.0/8"
            .parse()
            .map_err(|_| ErrorEnvelope::invalid_input("bad test subnet"))?;
        let mut interceptor = RealIpInterceptor::new(Some(TrustedSubnet::new(net)));

        let mut trusted = Request::new(());
        trusted
            .metadata_mut()
            .insert(REAL_IP_METADATA, tonic::metadata::MetadataValue::from_static("10.1.2.3"));
        assert!(interceptor.call(trusted).is_ok());

        let denied = interceptor.call(Request::new(()));
        assert_eq!(denied.err().map(|status| status.code()), Some(Code::PermissionDenied));
        Ok(())
    }

    #[test]
    fn envelope_codes_map_to_grpc_codes() {
        let cases = [
            (ErrorCode::not_found(), Code::NotFound),
            (ErrorCode::invalid_input(), Code::InvalidArgument),
            (ErrorCode::forbidden(), Code::PermissionDenied),
            (ErrorCode::not_implemented(), Code::Unimplemented),
            (ErrorCode::io(), Code::Internal),
        ];
        for (code, expected) in cases {
            let status = status_from_envelope(&ErrorEnvelope::expected(code, "x"));
            assert_eq!(status.code(), expected);
        }
    }
}
