//! Report ticks: ship the local buffer to the server.
//!
//! Batch mode sends one request per tick. Per-metric mode fans out over a
//! bounded queue drained by exactly `rate_limit` workers, each reporting to a
//! completion channel; the tick returns once every job has completed.

use crate::agent::LocalMetrics;
use metricsd_ports::{LogLevel, LoggerPort, MetricRecord, MetricSenderPort, log_fields};
use metricsd_shared::{
    BoundedQueue, CorrelationId, ErrorEnvelope, RequestContext, Result, is_queue_closed,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Pause a worker takes after a broken-pipe failure.
pub const BROKEN_PIPE_COOLDOWN: Duration = Duration::from_secs(1);

/// How each tick is shipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// One `/updates/` request.
    Batch,
    /// One `/update/` request per metric.
    PerMetric,
}

/// Dependencies of the reporter.
#[derive(Clone)]
pub struct DispatchDeps {
    /// Transport.
    pub sender: Arc<dyn MetricSenderPort>,
    /// Shipping strategy.
    pub mode: DispatchMode,
    /// Worker count in per-metric mode.
    pub rate_limit: usize,
    /// Worker pause after a broken pipe.
    pub broken_pipe_cooldown: Duration,
    /// Optional logger.
    pub logger: Option<Arc<dyn LoggerPort>>,
}

/// Outcome of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Metrics delivered.
    pub sent: usize,
    /// Metrics dropped after the transport gave up.
    pub failed: usize,
}

/// Ship `records` once according to `deps.mode`.
pub async fn dispatch_once(
    ctx: &RequestContext,
    deps: &DispatchDeps,
    records: Vec<MetricRecord>,
) -> Result<DispatchReport> {
    ctx.ensure_not_cancelled("dispatch.start")?;
    if records.is_empty() {
        return Ok(DispatchReport::default());
    }
    let started_at = Instant::now();
    let total = records.len();

    let report = match deps.mode {
        DispatchMode::Batch => match deps.sender.send_batch(ctx, records).await {
            Ok(()) => DispatchReport {
                sent: total,
                failed: 0,
            },
            Err(error) if error.is_cancelled() => return Err(error),
            Err(error) => {
                log_send_failure(deps, &error, total);
                DispatchReport {
                    sent: 0,
                    failed: total,
                }
            },
        },
        DispatchMode::PerMetric => fan_out(ctx, deps, records).await?,
    };

    if let Some(logger) = deps.logger.as_ref() {
        logger.info(
            "agent.dispatch.sent",
            "Report tick completed",
            Some(log_fields([
                ("sent", Value::from(report.sent)),
                ("failed", Value::from(report.failed)),
                ("durationMs", Value::from(duration_ms(started_at))),
            ])),
        );
    }
    Ok(report)
}

/// Queue every record, close the queue, then start exactly `rate_limit`
/// workers. Workers left without a job exit on the closed queue.
async fn fan_out(
    ctx: &RequestContext,
    deps: &DispatchDeps,
    records: Vec<MetricRecord>,
) -> Result<DispatchReport> {
    let jobs = records.len();
    let queue = BoundedQueue::new(jobs)?;
    for record in records {
        queue.enqueue(ctx, record).await?;
    }
    queue.close().await;

    let (done_tx, mut done_rx) = mpsc::channel::<Result<()>>(jobs);
    let workers = deps.rate_limit.max(1);
    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        handles.push(tokio::spawn(worker(
            ctx.clone(),
            queue.clone(),
            Arc::clone(&deps.sender),
            done_tx.clone(),
            deps.broken_pipe_cooldown,
        )));
    }
    drop(done_tx);

    let mut report = DispatchReport::default();
    for _ in 0..jobs {
        match done_rx.recv().await {
            Some(Ok(())) => report.sent += 1,
            Some(Err(error)) => {
                report.failed += 1;
                if !error.is_cancelled() {
                    log_send_failure(deps, &error, 1);
                }
            },
            None => break,
        }
    }
    for handle in handles {
        if let Err(error) = handle.await
            && let Some(logger) = deps.logger.as_ref()
        {
            logger.error(
                "agent.dispatch.worker_panicked",
                "Dispatch worker stopped abnormally",
                Some(log_fields([("error", Value::from(error.to_string()))])),
            );
        }
    }

    ctx.ensure_not_cancelled("dispatch.fan_out")?;
    Ok(report)
}

async fn worker(
    ctx: RequestContext,
    queue: BoundedQueue<MetricRecord>,
    sender: Arc<dyn MetricSenderPort>,
    done: mpsc::Sender<Result<()>>,
    cooldown: Duration,
) {
    loop {
        let record = match queue.dequeue(&ctx).await {
            Ok(record) => record,
            Err(error) if is_queue_closed(&error) => return,
            Err(error) => {
                let _ = done.send(Err(error)).await;
                return;
            },
        };
        let result = sender.send_one(&ctx, record).await;
        let broken_pipe = matches!(&result, Err(error) if error.is_broken_pipe());
        if done.send(result).await.is_err() {
            return;
        }
        if broken_pipe {
            tokio::select! {
                () = ctx.cancelled() => return,
                () = tokio::time::sleep(cooldown) => {},
            }
        }
    }
}

/// Drain `local` and dispatch every `interval` until `ctx` is cancelled.
///
/// Each tick runs under its own context so a shutdown signal lets the
/// in-flight tick finish.
pub async fn run_report_loop(
    ctx: &RequestContext,
    deps: &DispatchDeps,
    local: Arc<LocalMetrics>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            () = ctx.cancelled() => return,
            _ = ticker.tick() => {},
        }
        let tick_ctx = RequestContext::new(CorrelationId::next_with_prefix("report_"));
        if let Err(error) = dispatch_once(&tick_ctx, deps, local.drain()).await
            && let Some(logger) = deps.logger.as_ref()
        {
            logger.failure(
                LogLevel::Error,
                "agent.dispatch.failed",
                "Report tick failed",
                &error,
                None,
            );
        }
    }
}

fn log_send_failure(deps: &DispatchDeps, error: &ErrorEnvelope, metrics: usize) {
    if let Some(logger) = deps.logger.as_ref() {
        logger.failure(
            LogLevel::Warn,
            "agent.dispatch.dropped",
            "Metrics dropped after send failure",
            error,
            Some(log_fields([("metrics", Value::from(metrics))])),
        );
    }
}

fn duration_ms(started_at: Instant) -> u64 {
    u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use metricsd_ports::BoxFuture;
    use metricsd_shared::{ErrorClass, ErrorCode};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSender {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        sent: Mutex<Vec<String>>,
        batches: AtomicUsize,
        fail_ids: Vec<&'static str>,
        broken_pipe: bool,
    }

    impl MetricSenderPort for CountingSender {
        fn send_one(
            &self,
            _ctx: &RequestContext,
            record: MetricRecord,
        ) -> BoxFuture<'_, Result<()>> {
            Box::pin(async move {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);

                if self.broken_pipe {
                    return Err(ErrorEnvelope::unexpected(
                        ErrorCode::broken_pipe(),
                        "broken pipe",
                        ErrorClass::Retriable,
                    ));
                }
                if self.fail_ids.contains(&record.id.as_str()) {
                    return Err(ErrorEnvelope::expected(
                        ErrorCode::new("agent", "request_rejected"),
                        "rejected",
                    ));
                }
                if let Ok(mut sent) = self.sent.lock() {
                    sent.push(record.id);
                }
                Ok(())
            })
        }

        fn send_batch(
            &self,
            _ctx: &RequestContext,
            _records: Vec<MetricRecord>,
        ) -> BoxFuture<'_, Result<()>> {
            Box::pin(async move {
                self.batches.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    fn deps(sender: Arc<CountingSender>, mode: DispatchMode, rate_limit: usize) -> DispatchDeps {
        DispatchDeps {
            sender,
            mode,
            rate_limit,
            broken_pipe_cooldown: Duration::from_millis(50),
            logger: None,
        }
    }

    fn records(count: usize) -> Vec<MetricRecord> {
        (0..count)
            .map(|index| MetricRecord::gauge(format!("m{index}"), 1.0))
            .collect()
    }

    #[tokio::test]
    async fn batch_mode_sends_one_request() -> Result<()> {
        let ctx = RequestContext::new_request();
        let sender = Arc::new(CountingSender::default());
        let report =
            dispatch_once(&ctx, &deps(sender.clone(), DispatchMode::Batch, 4), records(5)).await?;
        assert_eq!(report.sent, 5);
        assert_eq!(sender.batches.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn fan_out_never_exceeds_rate_limit_and_waits_for_all() -> Result<()> {
        let ctx = RequestContext::new_request();
        let sender = Arc::new(CountingSender::default());
        let report =
            dispatch_once(&ctx, &deps(sender.clone(), DispatchMode::PerMetric, 3), records(20))
                .await?;

        assert_eq!(report, DispatchReport { sent: 20, failed: 0 });
        assert_eq!(sender.sent.lock().map(|sent| sent.len()).unwrap_or(0), 20);
        assert_eq!(sender.in_flight.load(Ordering::SeqCst), 0);
        let peak = sender.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency {peak} exceeded the rate limit");
        Ok(())
    }

    #[tokio::test]
    async fn idle_workers_exit_when_jobs_are_fewer_than_the_rate_limit() -> Result<()> {
        let ctx = RequestContext::new_request();
        let sender = Arc::new(CountingSender::default());
        let report =
            dispatch_once(&ctx, &deps(sender.clone(), DispatchMode::PerMetric, 8), records(2))
                .await?;
        assert_eq!(report, DispatchReport { sent: 2, failed: 0 });
        assert_eq!(sender.sent.lock().map(|sent| sent.len()).unwrap_or(0), 2);
        Ok(())
    }

    #[tokio::test]
    async fn failed_jobs_are_counted_and_do_not_stop_the_tick() -> Result<()> {
        let ctx = RequestContext::new_request();
        let sender = Arc::new(CountingSender {
            fail_ids: vec!["m1", "m3"],
            ..CountingSender::default()
        });
        let report =
            dispatch_once(&ctx, &deps(sender, DispatchMode::PerMetric, 2), records(5)).await?;
        assert_eq!(report, DispatchReport { sent: 3, failed: 2 });
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn broken_pipe_makes_the_worker_cool_down() -> Result<()> {
        let ctx = RequestContext::new_request();
        let sender = Arc::new(CountingSender {
            broken_pipe: true,
            ..CountingSender::default()
        });
        let started = tokio::time::Instant::now();
        let report =
            dispatch_once(&ctx, &deps(sender, DispatchMode::PerMetric, 1), records(3)).await?;

        assert_eq!(report.failed, 3);
        assert!(started.elapsed() >= Duration::from_millis(100));
        Ok(())
    }

    #[tokio::test]
    async fn empty_tick_sends_nothing() -> Result<()> {
        let ctx = RequestContext::new_request();
        let sender = Arc::new(CountingSender::default());
        let report =
            dispatch_once(&ctx, &deps(sender.clone(), DispatchMode::Batch, 1), Vec::new()).await?;
        assert_eq!(report, DispatchReport::default());
        assert_eq!(sender.batches.load(Ordering::SeqCst), 0);
        Ok(())
    }
}
