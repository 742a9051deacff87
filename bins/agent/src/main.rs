//! `metricsd-agent` entrypoint.

use clap::Parser;
use metricsd_config::{AgentOverrides, DispatchMode, LogFormat, load_agent_config_std_env};
use metricsd_infra::{build_logger, init_tracing, run_agent};
use metricsd_shared::{ErrorCode, ErrorEnvelope, SecretString};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(name = "metricsd-agent", version, about = "Metrics reporting agent", long_about = None)]
struct Cli {
    /// Config file (JSON, YAML or TOML).
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,
    /// Server address (`host:port` or URL).
    #[arg(short = 'a', long)]
    address: Option<String>,
    /// Seconds between report ticks.
    #[arg(short = 'r', long)]
    report_interval: Option<u64>,
    /// Seconds between collector polls.
    #[arg(short = 'p', long)]
    poll_interval: Option<u64>,
    /// Concurrent senders in per-metric mode.
    #[arg(short = 'l', long)]
    rate_limit: Option<u32>,
    /// `batch` or `per-metric`.
    #[arg(long, value_parser = parse_dispatch_mode)]
    dispatch_mode: Option<DispatchMode>,
    /// HMAC-SHA256 key.
    #[arg(short = 'k', long)]
    key: Option<String>,
    /// RSA public key (PEM) for request bodies.
    #[arg(long)]
    crypto_key: Option<String>,
    /// Address sent as `X-Real-IP`; detected when unset.
    #[arg(long)]
    real_ip: Option<String>,
    /// Minimum log level.
    #[arg(long)]
    log_level: Option<String>,
    /// Log output (`json` or `tracing`).
    #[arg(long, value_parser = parse_log_format)]
    log_format: Option<LogFormat>,
}

impl Cli {
    fn overrides(&self) -> AgentOverrides {
        AgentOverrides {
            address: self.address.as_deref().map(Box::from),
            report_interval_secs: self.report_interval,
            poll_interval_secs: self.poll_interval,
            rate_limit: self.rate_limit,
            dispatch_mode: self.dispatch_mode,
            key: self.key.clone().map(SecretString::from),
            crypto_key: self.crypto_key.as_deref().map(Box::from),
            real_ip: self.real_ip.as_deref().map(Box::from),
            log_level: self.log_level.as_deref().map(Box::from),
            log_format: self.log_format,
        }
    }
}

fn parse_dispatch_mode(input: &str) -> Result<DispatchMode, String> {
    DispatchMode::parse(input).ok_or_else(|| format!("unknown dispatch mode: {input}"))
}

fn parse_log_format(input: &str) -> Result<LogFormat, String> {
    LogFormat::parse(input).ok_or_else(|| format!("unknown log format: {input}"))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => exit_with_error(&error),
    }
}

async fn run(cli: &Cli) -> Result<(), ErrorEnvelope> {
    let config = load_agent_config_std_env(cli.config.as_deref(), &cli.overrides())?;
    init_tracing(&config.log_level);
    let logger = build_logger(&config.log_level, config.log_format, "agent")?;
    run_agent(config, logger).await
}

fn exit_with_error(error: &ErrorEnvelope) -> ExitCode {
    let _ = writeln!(std::io::stderr(), "error: {error}");
    ExitCode::from(exit_status(error))
}

fn exit_status(error: &ErrorEnvelope) -> u8 {
    if error.code == ErrorCode::invalid_input() { 2 } else { 1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_to_overrides() -> Result<(), clap::Error> {
        let cli = Cli::try_parse_from([
            "metricsd-agent",
            "-a",
            "http://metrics:8080",
            "-l",
            "4",
            "--dispatch-mode",
            "per-metric",
            "--real-ip",
            "10.0.0.7",
        ])?;
        let overrides = cli.overrides();
        assert_eq!(overrides.address.as_deref(), Some("http://metrics:8080"));
        assert_eq!(overrides.rate_limit, Some(4));
        assert_eq!(overrides.dispatch_mode, Some(DispatchMode::PerMetric));
        assert_eq!(overrides.real_ip.as_deref(), Some("10.0.0.7"));
        Ok(())
    }

    #[test]
    fn unknown_dispatch_modes_are_rejected() {
        assert!(Cli::try_parse_from(["metricsd-agent", "--dispatch-mode", "burst"]).is_err());
    }
}
