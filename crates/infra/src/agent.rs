//! Agent composition and lifecycle.

use metricsd_adapters::codec::BodyEncryptor;
use metricsd_adapters::{
    DEFAULT_SEND_RETRY, HttpMetricSender, HttpSenderConfig, RuntimeCollector, SystemCollector,
    detect_local_ip,
};
use metricsd_app::{
    BROKEN_PIPE_COOLDOWN, DispatchDeps, DispatchMode, LocalMetrics, run_collection_loop,
    run_report_loop,
};
use metricsd_config::{DispatchMode as ConfiguredMode, ValidatedAgentConfig};
use metricsd_ports::{LogLevel, LoggerPort, MetricCollectorPort, log_fields};
use metricsd_shared::{CorrelationId, ErrorCode, ErrorEnvelope, RequestContext, Result};
use serde_json::Value;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// A fully wired agent.
pub struct AgentRuntime {
    dispatch: DispatchDeps,
    collectors: Vec<Arc<dyn MetricCollectorPort>>,
    local: Arc<LocalMetrics>,
    poll_interval: Duration,
    report_interval: Duration,
    logger: Arc<dyn LoggerPort>,
}

impl AgentRuntime {
    /// Build the sender, collectors and local buffer from `config`.
    pub fn build(config: &ValidatedAgentConfig, logger: Arc<dyn LoggerPort>) -> Result<Self> {
        let real_ip = resolve_real_ip(config)?;
        let sender = HttpMetricSender::new(HttpSenderConfig {
            base_url: config.base_url().into(),
            key: config.key.clone(),
            encryptor: config
                .crypto_key
                .as_deref()
                .map(|path| BodyEncryptor::from_pem_file(Path::new(path)))
                .transpose()?,
            real_ip,
            timeout: config.request_timeout(),
            retry: DEFAULT_SEND_RETRY,
        })?;
        let rate_limit = usize::try_from(config.rate_limit).map_err(|_| {
            ErrorEnvelope::expected(ErrorCode::invalid_input(), "rate limit out of range")
        })?;

        let collectors: Vec<Arc<dyn MetricCollectorPort>> = vec![
            Arc::new(RuntimeCollector::new()?),
            Arc::new(SystemCollector::new()),
        ];

        logger.info(
            "agent.configured",
            "Agent configured",
            Some(log_fields([
                ("server", Value::from(config.base_url())),
                ("realIp", Value::from(real_ip.to_string())),
                ("rateLimit", Value::from(rate_limit)),
            ])),
        );

        Ok(Self {
            dispatch: DispatchDeps {
                sender: Arc::new(sender),
                mode: dispatch_mode(config.dispatch_mode),
                rate_limit,
                broken_pipe_cooldown: BROKEN_PIPE_COOLDOWN,
                logger: Some(Arc::clone(&logger)),
            },
            collectors,
            local: Arc::new(LocalMetrics::new()),
            poll_interval: config.poll_interval(),
            report_interval: config.report_interval(),
            logger,
        })
    }

    /// Run collectors and the reporter until `ctx` is cancelled.
    ///
    /// The reporter finishes its in-flight tick before returning.
    pub async fn run(self, ctx: &RequestContext) {
        let mut tasks = JoinSet::new();
        for collector in self.collectors {
            let ctx = ctx.clone();
            let local = Arc::clone(&self.local);
            let logger = Some(Arc::clone(&self.logger));
            let interval = self.poll_interval;
            tasks.spawn(async move {
                run_collection_loop(&ctx, collector, local, interval, logger).await;
            });
        }
        {
            let ctx = ctx.clone();
            let dispatch = self.dispatch.clone();
            let local = Arc::clone(&self.local);
            let interval = self.report_interval;
            tasks.spawn(async move {
                run_report_loop(&ctx, &dispatch, local, interval).await;
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(error) = joined {
                self.logger.error(
                    "agent.task.panicked",
                    "Agent task stopped abnormally",
                    Some(log_fields([("error", Value::from(error.to_string()))])),
                );
            }
        }
        self.logger.info("agent.stopped", "Agent stopped", None);
    }
}

fn resolve_real_ip(config: &ValidatedAgentConfig) -> Result<IpAddr> {
    match config.real_ip() {
        Some(addr) => Ok(addr),
        None => detect_local_ip(config.base_url()),
    }
}

const fn dispatch_mode(mode: ConfiguredMode) -> DispatchMode {
    match mode {
        ConfiguredMode::Batch => DispatchMode::Batch,
        ConfiguredMode::PerMetric => DispatchMode::PerMetric,
    }
}

/// Run the agent until SIGINT/SIGTERM.
pub async fn run_agent(config: ValidatedAgentConfig, logger: Arc<dyn LoggerPort>) -> Result<()> {
    let root = RequestContext::new(CorrelationId::next_with_prefix("agent_"));
    let runtime = match AgentRuntime::build(&config, Arc::clone(&logger)) {
        Ok(runtime) => runtime,
        Err(error) => {
            logger.failure(LogLevel::Error, "agent.failed", "Agent setup failed", &error, None);
            return Err(error);
        },
    };
    let signal = crate::shutdown::cancel_on_signal(&root);
    runtime.run(&root).await;
    root.cancel();
    let _ = signal.await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use metricsd_config::AgentConfig;

    #[test]
    fn configured_modes_map_to_dispatch_modes() {
        assert_eq!(dispatch_mode(ConfiguredMode::Batch), DispatchMode::Batch);
        assert_eq!(dispatch_mode(ConfiguredMode::PerMetric), DispatchMode::PerMetric);
    }

    #[test]
    fn configured_real_ip_wins_over_detection() -> Result<()> {
        let config = AgentConfig {
            real_ip: Some("10.1.2.3".into()),
            ..AgentConfig::default()
        }
        .validate_and_normalize()?;
        assert_eq!(resolve_real_ip(&config)?.to_string(), "10.1.2.3");
        Ok(())
    }
}
