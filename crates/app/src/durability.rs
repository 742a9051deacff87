//! Snapshot flush, restore, and health checks against a durability backend.
//!
//! Every backend call runs under a deadline; a timeout aborts that call
//! only. The periodic flush loop logs failures and retries on the next tick.

use metricsd_ports::{
    BackendLifecyclePort, DurabilityPort, LogLevel, LoggerPort, MetricSnapshotPort, log_fields,
};
use metricsd_shared::{RequestContext, Result, timeout_with_context};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Deadline for `read`, `write`, and `create`.
pub const DURABILITY_IO_TIMEOUT: Duration = Duration::from_secs(3);
/// Deadline for `ping`.
pub const PING_TIMEOUT: Duration = Duration::from_secs(1);

/// Store snapshotting bound to one backend.
pub struct DurabilityService {
    backend: Arc<dyn DurabilityPort>,
    lifecycle: Arc<dyn BackendLifecyclePort>,
    snapshot: Arc<dyn MetricSnapshotPort>,
    logger: Option<Arc<dyn LoggerPort>>,
    io_timeout: Duration,
    ping_timeout: Duration,
    flush_gate: Mutex<()>,
}

impl DurabilityService {
    /// Bind `snapshot` to a backend with the default deadlines.
    pub fn new(
        backend: Arc<dyn DurabilityPort>,
        lifecycle: Arc<dyn BackendLifecyclePort>,
        snapshot: Arc<dyn MetricSnapshotPort>,
    ) -> Self {
        Self {
            backend,
            lifecycle,
            snapshot,
            logger: None,
            io_timeout: DURABILITY_IO_TIMEOUT,
            ping_timeout: PING_TIMEOUT,
            flush_gate: Mutex::new(()),
        }
    }

    /// Attach a logger.
    #[must_use]
    pub fn with_logger(mut self, logger: Arc<dyn LoggerPort>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Ensure the backend schema or directory exists.
    pub async fn create(&self, ctx: &RequestContext) -> Result<()> {
        timeout_with_context(
            ctx,
            self.io_timeout,
            "durability.create",
            self.backend.create(ctx),
        )
        .await
    }

    /// Seed the store from the backend. Returns the number of records
    /// applied. Must run before any listener is bound.
    pub async fn restore(&self, ctx: &RequestContext) -> Result<usize> {
        let records =
            timeout_with_context(ctx, self.io_timeout, "durability.read", self.backend.read(ctx))
                .await?;
        let restored = self.snapshot.restore(&records)?;
        if let Some(logger) = self.logger.as_ref() {
            logger.info(
                "server.restore.completed",
                "Store restored",
                Some(log_fields([("records", Value::from(restored))])),
            );
        }
        Ok(restored)
    }

    /// Write the full store to the backend. Returns the number of records.
    ///
    /// Flushes are serialized: the snapshot is taken after acquiring the
    /// gate, so a later flush never writes older state than an earlier one.
    pub async fn flush(&self, ctx: &RequestContext) -> Result<usize> {
        let started_at = Instant::now();
        let _gate = self.flush_gate.lock().await;
        let records = self.snapshot.serialize_all();
        let count = records.len();
        timeout_with_context(
            ctx,
            self.io_timeout,
            "durability.write",
            self.backend.write(ctx, records),
        )
        .await?;
        if let Some(logger) = self.logger.as_ref() {
            logger.debug(
                "server.flush.completed",
                "Store flushed",
                Some(log_fields([
                    ("records", Value::from(count)),
                    ("durationMs", Value::from(duration_ms(started_at))),
                ])),
            );
        }
        Ok(count)
    }

    /// Check the backend responds.
    pub async fn ping(&self, ctx: &RequestContext) -> Result<()> {
        timeout_with_context(
            ctx,
            self.ping_timeout,
            "durability.ping",
            self.lifecycle.ping(ctx),
        )
        .await
    }

    /// Release backend resources.
    pub async fn close(&self) {
        self.lifecycle.close().await;
    }

    /// Flush every `interval` until `ctx` is cancelled. Failures are logged
    /// and the next tick retries.
    pub async fn run_flush_loop(&self, ctx: &RequestContext, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                () = ctx.cancelled() => return,
                _ = ticker.tick() => {},
            }
            let tick_ctx = ctx.child("flush_");
            if let Err(error) = self.flush(&tick_ctx).await {
                if error.is_cancelled() {
                    return;
                }
                if let Some(logger) = self.logger.as_ref() {
                    logger.failure(
                        LogLevel::Error,
                        "server.flush.failed",
                        "Periodic flush failed",
                        &error,
                        Some(log_fields([(
                            "correlationId",
                            Value::from(tick_ctx.correlation_id().as_str()),
                        )])),
                    );
                }
            }
        }
    }
}

fn duration_ms(started_at: Instant) -> u64 {
    u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use metricsd_ports::{BoxFuture, MetricRecord};
    use metricsd_shared::{ErrorClass, ErrorCode, ErrorEnvelope};
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingBackend {
        stored: Mutex<Vec<MetricRecord>>,
        writes: AtomicUsize,
        fail_writes: bool,
        stall: bool,
    }

    impl DurabilityPort for RecordingBackend {
        fn read(&self, _ctx: &RequestContext) -> BoxFuture<'_, Result<Vec<MetricRecord>>> {
            Box::pin(async move {
                Ok(self.stored.lock().map(|stored| stored.clone()).unwrap_or_default())
            })
        }

        fn write(
            &self,
            _ctx: &RequestContext,
            records: Vec<MetricRecord>,
        ) -> BoxFuture<'_, Result<()>> {
            Box::pin(async move {
                self.writes.fetch_add(1, Ordering::SeqCst);
                if self.stall {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                if self.fail_writes {
                    return Err(ErrorEnvelope::unexpected(
                        ErrorCode::unavailable(),
                        "backend down",
                        ErrorClass::Retriable,
                    ));
                }
                if let Ok(mut stored) = self.stored.lock() {
                    *stored = records;
                }
                Ok(())
            })
        }

        fn create(&self, _ctx: &RequestContext) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    impl BackendLifecyclePort for RecordingBackend {
        fn ping(&self, _ctx: &RequestContext) -> BoxFuture<'_, Result<()>> {
            Box::pin(async move {
                if self.stall {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                Ok(())
            })
        }

        fn close(&self) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
    }

    #[derive(Default)]
    struct VecSnapshot {
        records: Mutex<Vec<MetricRecord>>,
    }

    impl MetricSnapshotPort for VecSnapshot {
        fn all_gauges(&self) -> BTreeMap<String, f64> {
            BTreeMap::new()
        }

        fn all_counters(&self) -> BTreeMap<String, i64> {
            BTreeMap::new()
        }

        fn serialize_all(&self) -> Vec<MetricRecord> {
            self.records.lock().map(|records| records.clone()).unwrap_or_default()
        }

        fn restore(&self, records: &[MetricRecord]) -> Result<usize> {
            if let Ok(mut stored) = self.records.lock() {
                stored.extend_from_slice(records);
            }
            Ok(records.len())
        }

        fn is_empty(&self) -> bool {
            self.serialize_all().is_empty()
        }
    }

    fn service(backend: Arc<RecordingBackend>, snapshot: Arc<VecSnapshot>) -> DurabilityService {
        DurabilityService::new(backend.clone(), backend, snapshot)
    }

    #[tokio::test]
    async fn flush_then_restore_round_trips() -> Result<()> {
        let ctx = RequestContext::new_request();
        let backend = Arc::new(RecordingBackend::default());
        let source = Arc::new(VecSnapshot::default());
        source.restore(&[MetricRecord::counter("hits", 8)])?;

        assert_eq!(service(backend.clone(), source).flush(&ctx).await?, 1);

        let target = Arc::new(VecSnapshot::default());
        assert_eq!(service(backend, target.clone()).restore(&ctx).await?, 1);
        assert_eq!(target.serialize_all(), vec![MetricRecord::counter("hits", 8)]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_backend_times_out() {
        let ctx = RequestContext::new_request();
        let backend = Arc::new(RecordingBackend {
            stall: true,
            ..RecordingBackend::default()
        });
        let service = service(backend, Arc::new(VecSnapshot::default()));

        let Err(error) = service.ping(&ctx).await else {
            panic!("expected ping timeout");
        };
        assert_eq!(error.code, ErrorCode::timeout());
        let Err(error) = service.flush(&ctx).await else {
            panic!("expected flush timeout");
        };
        assert_eq!(error.metadata.get("operation").map(String::as_str), Some("durability.write"));
    }

    #[tokio::test(start_paused = true)]
    async fn flush_loop_keeps_ticking_after_failures() {
        let ctx = RequestContext::new_request();
        let backend = Arc::new(RecordingBackend {
            fail_writes: true,
            ..RecordingBackend::default()
        });
        let service = Arc::new(service(backend.clone(), Arc::new(VecSnapshot::default())));

        let loop_ctx = ctx.clone();
        let loop_service = Arc::clone(&service);
        let handle = tokio::spawn(async move {
            loop_service
                .run_flush_loop(&loop_ctx, Duration::from_secs(2))
                .await;
        });

        tokio::time::sleep(Duration::from_secs(7)).await;
        ctx.cancel();
        let _ = handle.await;
        assert_eq!(backend.writes.load(Ordering::SeqCst), 3);
    }
}
