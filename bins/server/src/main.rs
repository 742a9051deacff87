//! `metricsd` server entrypoint.

use clap::Parser;
use metricsd_config::{DatabaseWriteMode, LogFormat, ServerOverrides, load_server_config_std_env};
use metricsd_infra::{build_logger, init_tracing, run_server};
use metricsd_shared::{ErrorCode, ErrorEnvelope, SecretString};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(name = "metricsd", version, about = "Metrics collection server", long_about = None)]
struct Cli {
    /// Config file (JSON, YAML or TOML).
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,
    /// HTTP listen address (`host:port`).
    #[arg(short = 'a', long)]
    address: Option<String>,
    /// gRPC listen address; gRPC is off when unset.
    #[arg(short = 'g', long)]
    grpc_address: Option<String>,
    /// Seconds between flushes; 0 flushes after every update.
    #[arg(short = 'i', long)]
    store_interval: Option<u64>,
    /// Snapshot file path.
    #[arg(short = 'f', long)]
    file_storage_path: Option<String>,
    /// PostgreSQL DSN; wins over the file path.
    #[arg(short = 'd', long)]
    database_dsn: Option<String>,
    /// Table write strategy (`snapshot` or `upsert`).
    #[arg(long = "db-write-mode", value_parser = parse_write_mode)]
    db_write_mode: Option<DatabaseWriteMode>,
    /// Seed the store from the backend at startup.
    #[arg(short = 'r', long)]
    restore: Option<bool>,
    /// HMAC-SHA256 key.
    #[arg(short = 'k', long)]
    key: Option<String>,
    /// RSA private key (PEM) for request bodies.
    #[arg(long)]
    crypto_key: Option<String>,
    /// CIDR of trusted agent addresses.
    #[arg(short = 't', long)]
    trusted_subnet: Option<String>,
    /// Minimum log level.
    #[arg(long)]
    log_level: Option<String>,
    /// Log output (`json` or `tracing`).
    #[arg(long, value_parser = parse_log_format)]
    log_format: Option<LogFormat>,
}

impl Cli {
    fn overrides(&self) -> ServerOverrides {
        ServerOverrides {
            address: self.address.as_deref().map(Box::from),
            grpc_address: self.grpc_address.as_deref().map(Box::from),
            store_interval_secs: self.store_interval,
            file_storage_path: self.file_storage_path.as_deref().map(Box::from),
            database_dsn: self.database_dsn.clone().map(SecretString::from),
            database_write_mode: self.db_write_mode,
            restore: self.restore,
            key: self.key.clone().map(SecretString::from),
            crypto_key: self.crypto_key.as_deref().map(Box::from),
            trusted_subnet: self.trusted_subnet.as_deref().map(Box::from),
            log_level: self.log_level.as_deref().map(Box::from),
            log_format: self.log_format,
        }
    }
}

fn parse_write_mode(input: &str) -> Result<DatabaseWriteMode, String> {
    DatabaseWriteMode::parse(input).ok_or_else(|| format!("unknown write mode: {input}"))
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
    let config = load_server_config_std_env(cli.config.as_deref(), &cli.overrides())?;
    init_tracing(&config.log_level);
    let logger = build_logger(&config.log_level, config.log_format, "server")?;
    run_server(config, logger).await
}

fn exit_with_error(error: &ErrorEnvelope) -> ExitCode {
    let _ = writeln!(std::io::stderr(), "error: {error}");
    ExitCode::from(exit_status(error))
}

fn exit_status(error: &ErrorEnvelope) -> u8 {
    if error.code == ErrorCode::invalid_input() { 2 } else { 1 }
}
