//! Logger construction and `tracing` subscriber setup.

use metricsd_adapters::{JsonLogger, StderrLogSink, TracingLogger};
use metricsd_config::LogFormat;
use metricsd_ports::{LogLevel, LoggerPort, log_fields};
use metricsd_shared::{ErrorCode, ErrorEnvelope, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Build the process logger. Every event carries `component`.
pub fn build_logger(
    level: &str,
    format: LogFormat,
    component: &'static str,
) -> Result<Arc<dyn LoggerPort>> {
    let min_level = LogLevel::parse(level).ok_or_else(|| {
        ErrorEnvelope::expected(ErrorCode::invalid_input(), format!("unknown log level: {level}"))
            .with_metadata("logLevel", level.to_string())
    })?;
    let logger: Arc<dyn LoggerPort> = match format {
        LogFormat::Json => Arc::new(
            JsonLogger::new(Arc::new(StderrLogSink))
                .with_min_level(min_level)
                .with_base_fields(log_fields([("component", Value::from(component))])),
        ),
        LogFormat::Tracing => Arc::new(TracingLogger::new(min_level)),
    };
    Ok(logger)
}

/// Install the global `fmt` subscriber for library events.
///
/// `RUST_LOG` wins over `default_directive`. A second call is a no-op.
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_levels_are_rejected() {
        let Err(error) = build_logger("loud", LogFormat::Json, "test") else {
            panic!("expected invalid level");
        };
        assert_eq!(error.code, ErrorCode::invalid_input());
    }

    #[test]
    fn both_formats_build() -> Result<()> {
        build_logger("debug", LogFormat::Json, "test")?;
        build_logger("warn", LogFormat::Tracing, "test")?;
        Ok(())
    }

    #[test]
    fn repeated_subscriber_init_is_harmless() {
        init_tracing("info");
        init_tracing("debug");
    }
}
