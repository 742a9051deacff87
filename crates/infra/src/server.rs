//! Server composition and lifecycle.
//!
//! Startup: backend, restore, then bind. Shutdown: stop accepting, drain
//! in-flight requests, stop the flush loop, final flush, close the backend.

use crate::backend_factory::build_backend;
use axum::Router;
use metricsd_adapters::MemStorage;
use metricsd_adapters::codec::{BodyDecryptor, BodySigner, TrustedSubnet};
use metricsd_app::{DurabilityService, MetricsDeps};
use metricsd_config::ValidatedServerConfig;
use metricsd_http::{HttpState, MetricsGrpcService, TransformConfig, build_router, grpc_service};
use metricsd_ports::{LogLevel, LoggerPort, log_fields};
use metricsd_shared::{
    CorrelationId, ErrorClass, ErrorCode, ErrorEnvelope, RequestContext, Result,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;

/// A fully wired server, ready to bind.
pub struct ServerRuntime {
    config: ValidatedServerConfig,
    logger: Arc<dyn LoggerPort>,
    deps: MetricsDeps,
    durability: Option<Arc<DurabilityService>>,
    transforms: TransformConfig,
    requests: RequestContext,
}

impl ServerRuntime {
    /// Build the store and backend, and restore when enabled.
    pub async fn build(
        ctx: &RequestContext,
        config: ValidatedServerConfig,
        logger: Arc<dyn LoggerPort>,
    ) -> Result<Self> {
        let transforms = build_transforms(&config)?;
        let store = Arc::new(MemStorage::new());

        let durability = match build_backend(ctx, &config.durability_target()).await? {
            Some(backend) => {
                let service = DurabilityService::new(
                    backend.durability,
                    backend.lifecycle,
                    store.clone(),
                )
                .with_logger(Arc::clone(&logger));
                service.create(ctx).await?;
                if config.restore
                    && let Err(error) = service.restore(ctx).await
                {
                    logger.failure(
                        LogLevel::Warn,
                        "server.restore.failed",
                        "Restore failed; starting empty",
                        &error,
                        None,
                    );
                }
                logger.info(
                    "server.backend.ready",
                    "Durability backend ready",
                    Some(log_fields([("backend", Value::from(backend.kind.as_str()))])),
                );
                Some(Arc::new(service))
            },
            None => None,
        };

        let deps = MetricsDeps {
            store: store.clone(),
            snapshot: store,
            durability: durability.clone(),
            sync_flush: durability.is_some() && config.store_interval().is_zero(),
            logger: Some(Arc::clone(&logger)),
        };

        Ok(Self {
            config,
            logger,
            deps,
            durability,
            transforms,
            requests: RequestContext::new(CorrelationId::next_with_prefix("requests_")),
        })
    }

    /// HTTP router over this runtime's store.
    #[must_use]
    pub fn router(&self) -> Router {
        build_router(
            HttpState {
                deps: self.deps.clone(),
                root: self.requests.clone(),
            },
            self.transforms.clone(),
        )
    }

    /// Serve until `shutdown` is cancelled, then flush and close.
    pub async fn run(self, shutdown: &RequestContext) -> Result<()> {
        let listener = TcpListener::bind(self.config.address.as_ref()).await?;
        let http_addr = listener.local_addr()?;
        let grpc_addr = match self.config.grpc_address.as_deref() {
            Some(address) => Some(resolve(address).await?),
            None => None,
        };
        self.logger.info(
            "server.started",
            "Server listening",
            Some(log_fields([
                ("address", Value::from(http_addr.to_string())),
                (
                    "grpcAddress",
                    grpc_addr.map_or(Value::Null, |addr| Value::from(addr.to_string())),
                ),
            ])),
        );

        let http = serve_http(listener, self.router(), shutdown);
        let grpc = serve_grpc(grpc_addr, &self, shutdown);
        let flush = async {
            if let Some(durability) = self.durability.as_ref()
                && !self.deps.sync_flush
            {
                durability
                    .run_flush_loop(shutdown, self.config.store_interval())
                    .await;
            }
            Ok::<(), ErrorEnvelope>(())
        };
        let served = tokio::try_join!(http, grpc, flush).map(|_| ());

        shutdown.cancel();
        self.requests.cancel();
        self.finish().await;
        served
    }

    async fn finish(&self) {
        if let Some(durability) = self.durability.as_ref() {
            let ctx = RequestContext::new(CorrelationId::next_with_prefix("shutdown_"));
            if let Err(error) = durability.flush(&ctx).await {
                self.logger.failure(
                    LogLevel::Error,
                    "server.shutdown.flush_failed",
                    "Final flush failed",
                    &error,
                    None,
                );
            }
            durability.close().await;
        }
        self.logger.info("server.stopped", "Server stopped", None);
    }
}

async fn serve_http(
    listener: TcpListener,
    router: Router,
    shutdown: &RequestContext,
) -> Result<()> {
    let shutdown = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn serve_grpc(
    addr: Option<SocketAddr>,
    runtime: &ServerRuntime,
    shutdown: &RequestContext,
) -> Result<()> {
    let Some(addr) = addr else {
        return Ok(());
    };
    let service = MetricsGrpcService::new(runtime.deps.clone(), runtime.requests.clone());
    let subnet = runtime.transforms.trusted_subnet;
    let shutdown = shutdown.clone();
    tonic::transport::Server::builder()
        .add_service(grpc_service(service, subnet))
        .serve_with_shutdown(addr, async move { shutdown.cancelled().await })
        .await
        .map_err(|error| {
            ErrorEnvelope::unexpected(
                ErrorCode::io(),
                format!("gRPC server failed: {error}"),
                ErrorClass::NonRetriable,
            )
            .with_metadata("address", addr.to_string())
        })
}

async fn resolve(address: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(address).await?.next().ok_or_else(|| {
        ErrorEnvelope::invalid_input(format!("address does not resolve: {address}"))
            .with_metadata("address", address.to_string())
    })
}

/// Protocol transforms enabled by the config.
pub fn build_transforms(config: &ValidatedServerConfig) -> Result<TransformConfig> {
    Ok(TransformConfig {
        trusted_subnet: config.trusted_subnet().map(TrustedSubnet::new),
        decryptor: config
            .crypto_key
            .as_deref()
            .map(|path| BodyDecryptor::from_pem_file(Path::new(path)))
            .transpose()?,
        signer: config.key.as_ref().map(BodySigner::new).transpose()?,
    })
}

/// Run the server until SIGINT/SIGTERM.
pub async fn run_server(
    config: ValidatedServerConfig,
    logger: Arc<dyn LoggerPort>,
) -> Result<()> {
    let root = RequestContext::new(CorrelationId::next_with_prefix("server_"));
    let signal = crate::shutdown::cancel_on_signal(&root);
    let result = async {
        let runtime = ServerRuntime::build(&root, config, Arc::clone(&logger)).await?;
        runtime.run(&root).await
    }
    .await;
    root.cancel();
    let _ = signal.await;
    if let Err(error) = result.as_ref() {
        logger.failure(LogLevel::Error, "server.failed", "Server exited with error", error, None);
    }
    result
}
