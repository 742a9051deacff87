//! Server and agent configuration schema, defaults, validation, and
//! normalization.
//!
//! - Deserialization uses `serde` (JSON, YAML, or TOML; see `load`).
//! - Validation is manual and returns typed errors mapped to `ErrorEnvelope`.
//! - Normalization trims strings and drops empty optional values.

use ipnet::IpNet;
use metricsd_shared::{ErrorCode, ErrorEnvelope, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

const STORE_INTERVAL_MAX_SECS: u64 = 86_400;
const REPORT_INTERVAL_MIN_SECS: u64 = 1;
const REPORT_INTERVAL_MAX_SECS: u64 = 86_400;
const POLL_INTERVAL_MIN_SECS: u64 = 1;
const POLL_INTERVAL_MAX_SECS: u64 = 86_400;
const RATE_LIMIT_MIN: u32 = 1;
const RATE_LIMIT_MAX: u32 = 256;
const REQUEST_TIMEOUT_MIN_MS: u64 = 100;
const REQUEST_TIMEOUT_MAX_MS: u64 = 120_000;

const DEFAULT_ADDRESS: &str = "localhost:8080";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogFormat {
    /// One JSON object per line on stderr.
    #[default]
    Json,
    /// Forward events to the `tracing` subscriber.
    Tracing,
}

impl LogFormat {
    /// Parse a format name (case-insensitive).
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "tracing" | "text" | "pretty" => Some(Self::Tracing),
            _ => None,
        }
    }
}

/// How the relational backend writes snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DatabaseWriteMode {
    /// Truncate the table and insert every record in one transaction.
    #[default]
    Snapshot,
    /// Insert or overwrite each record in one transaction.
    Upsert,
}

impl DatabaseWriteMode {
    /// Parse a mode name (case-insensitive).
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "snapshot" => Some(Self::Snapshot),
            "upsert" => Some(Self::Upsert),
            _ => None,
        }
    }
}

/// How the agent ships metrics on each report tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DispatchMode {
    /// One request to `/updates/` carrying every metric.
    #[default]
    Batch,
    /// One request per metric to `/update/`, spread across `rateLimit` workers.
    PerMetric,
}

impl DispatchMode {
    /// Parse a mode name (case-insensitive).
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "batch" => Some(Self::Batch),
            "per-metric" | "permetric" | "fanout" | "fan-out" => Some(Self::PerMetric),
            _ => None,
        }
    }
}

/// Where the server persists its store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DurabilityTarget {
    /// PostgreSQL table.
    Database {
        /// Connection string.
        dsn: SecretString,
        /// Write strategy.
        mode: DatabaseWriteMode,
    },
    /// Newline-delimited JSON file.
    File {
        /// File path.
        path: PathBuf,
    },
    /// No persistence.
    Memory,
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct ServerConfig {
    /// HTTP listen address (`host:port`).
    pub address: Box<str>,
    /// gRPC listen address; gRPC is disabled when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grpc_address: Option<Box<str>>,
    /// Seconds between durability flushes; `0` flushes after every update.
    pub store_interval_secs: u64,
    /// Snapshot file path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_storage_path: Option<Box<str>>,
    /// PostgreSQL DSN; takes priority over the file path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_dsn: Option<SecretString>,
    /// Relational write strategy.
    pub database_write_mode: DatabaseWriteMode,
    /// Seed the store from the backend at startup.
    pub restore: bool,
    /// HMAC-SHA256 key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<SecretString>,
    /// Path to the RSA private key (PEM) used to decrypt request bodies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crypto_key: Option<Box<str>>,
    /// CIDR of allowed agent addresses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trusted_subnet: Option<Box<str>>,
    /// Minimum log level.
    pub log_level: Box<str>,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.into(),
            grpc_address: None,
            store_interval_secs: 300,
            file_storage_path: None,
            database_dsn: None,
            database_write_mode: DatabaseWriteMode::default(),
            restore: true,
            key: None,
            crypto_key: None,
            trusted_subnet: None,
            log_level: "info".into(),
            log_format: LogFormat::default(),
        }
    }
}

impl ServerConfig {
    /// Validate and normalize the config.
    pub fn validate_and_normalize(mut self) -> Result<ValidatedServerConfig, ConfigSchemaError> {
        self.address = require_non_empty(SERVER, "address", &self.address)?;
        normalize_optional(&mut self.grpc_address);
        normalize_optional(&mut self.file_storage_path);
        normalize_optional(&mut self.crypto_key);
        normalize_optional(&mut self.trusted_subnet);
        normalize_optional_secret(&mut self.database_dsn);
        check_key(SERVER, self.key.as_ref())?;
        check_range(
            SERVER,
            "storeIntervalSecs",
            self.store_interval_secs,
            0,
            STORE_INTERVAL_MAX_SECS,
        )?;
        check_log_level(&self.log_level)?;

        let trusted_subnet = self
            .trusted_subnet
            .as_deref()
            .map(|raw| {
                raw.parse::<IpNet>()
                    .map_err(|_| ConfigSchemaError::InvalidSubnet {
                        value: raw.to_string(),
                    })
            })
            .transpose()?;

        Ok(ValidatedServerConfig {
            raw: self,
            trusted_subnet,
        })
    }
}

/// Validated server config.
#[derive(Debug, Clone)]
pub struct ValidatedServerConfig {
    raw: ServerConfig,
    trusted_subnet: Option<IpNet>,
}

impl ValidatedServerConfig {
    /// Parsed trusted subnet.
    #[must_use]
    pub const fn trusted_subnet(&self) -> Option<IpNet> {
        self.trusted_subnet
    }

    /// Flush period; zero means synchronous flushes.
    #[must_use]
    pub const fn store_interval(&self) -> Duration {
        Duration::from_secs(self.raw.store_interval_secs)
    }

    /// Resolve the durability backend: DSN first, then file, else memory.
    #[must_use]
    pub fn durability_target(&self) -> DurabilityTarget {
        if let Some(dsn) = &self.raw.database_dsn {
            return DurabilityTarget::Database {
                dsn: dsn.clone(),
                mode: self.raw.database_write_mode,
            };
        }
        if let Some(path) = &self.raw.file_storage_path {
            return DurabilityTarget::File {
                path: PathBuf::from(path.as_ref()),
            };
        }
        DurabilityTarget::Memory
    }

    /// Consume the wrapper and return the raw config.
    #[must_use]
    pub fn into_inner(self) -> ServerConfig {
        self.raw
    }
}

impl std::ops::Deref for ValidatedServerConfig {
    type Target = ServerConfig;

    fn deref(&self) -> &Self::Target {
        &self.raw
    }
}

/// Agent configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct AgentConfig {
    /// Server address (`host:port` or full URL).
    pub address: Box<str>,
    /// Seconds between report ticks.
    pub report_interval_secs: u64,
    /// Seconds between collector polls.
    pub poll_interval_secs: u64,
    /// Worker count for per-metric dispatch.
    pub rate_limit: u32,
    /// Batch or per-metric dispatch.
    pub dispatch_mode: DispatchMode,
    /// HMAC-SHA256 key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<SecretString>,
    /// Path to the RSA public key (PEM) used to encrypt request bodies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crypto_key: Option<Box<str>>,
    /// Address reported in `X-Real-IP`; auto-detected when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub real_ip: Option<Box<str>>,
    /// Per-request timeout.
    pub request_timeout_ms: u64,
    /// Minimum log level.
    pub log_level: Box<str>,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.into(),
            report_interval_secs: 10,
            poll_interval_secs: 2,
            rate_limit: 1,
            dispatch_mode: DispatchMode::default(),
            key: None,
            crypto_key: None,
            real_ip: None,
            request_timeout_ms: 5_000,
            log_level: "info".into(),
            log_format: LogFormat::default(),
        }
    }
}

impl AgentConfig {
    /// Validate and normalize the config.
    pub fn validate_and_normalize(mut self) -> Result<ValidatedAgentConfig, ConfigSchemaError> {
        self.address = require_non_empty(AGENT, "address", &self.address)?;
        normalize_optional(&mut self.crypto_key);
        normalize_optional(&mut self.real_ip);
        check_key(AGENT, self.key.as_ref())?;
        check_range(
            AGENT,
            "reportIntervalSecs",
            self.report_interval_secs,
            REPORT_INTERVAL_MIN_SECS,
            REPORT_INTERVAL_MAX_SECS,
        )?;
        check_range(
            AGENT,
            "pollIntervalSecs",
            self.poll_interval_secs,
            POLL_INTERVAL_MIN_SECS,
            POLL_INTERVAL_MAX_SECS,
        )?;
        check_range(
            AGENT,
            "rateLimit",
            u64::from(self.rate_limit),
            u64::from(RATE_LIMIT_MIN),
            u64::from(RATE_LIMIT_MAX),
        )?;
        check_range(
            AGENT,
            "requestTimeoutMs",
            self.request_timeout_ms,
            REQUEST_TIMEOUT_MIN_MS,
            REQUEST_TIMEOUT_MAX_MS,
        )?;
        check_log_level(&self.log_level)?;

        let real_ip = self
            .real_ip
            .as_deref()
            .map(|raw| {
                raw.parse::<IpAddr>()
                    .map_err(|_| ConfigSchemaError::InvalidIp {
                        value: raw.to_string(),
                    })
            })
            .transpose()?;

        let base_url = if self.address.contains("://") {
            self.address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", self.address.trim_end_matches('/'))
        };

        Ok(ValidatedAgentConfig {
            raw: self,
            real_ip,
            base_url: base_url.into_boxed_str(),
        })
    }
}

/// Validated agent config.
#[derive(Debug, Clone)]
pub struct ValidatedAgentConfig {
    raw: AgentConfig,
    real_ip: Option<IpAddr>,
    base_url: Box<str>,
}

impl ValidatedAgentConfig {
    /// Configured agent address, if any.
    #[must_use]
    pub const fn real_ip(&self) -> Option<IpAddr> {
        self.real_ip
    }

    /// Server base URL with scheme and without trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Report tick period.
    #[must_use]
    pub const fn report_interval(&self) -> Duration {
        Duration::from_secs(self.raw.report_interval_secs)
    }

    /// Collector poll period.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.raw.poll_interval_secs)
    }

    /// Per-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.raw.request_timeout_ms)
    }
}

impl std::ops::Deref for ValidatedAgentConfig {
    type Target = AgentConfig;

    fn deref(&self) -> &Self::Target {
        &self.raw
    }
}

const SERVER: &str = "server";
const AGENT: &str = "agent";

fn require_non_empty(
    section: &'static str,
    field: &'static str,
    value: &str,
) -> Result<Box<str>, ConfigSchemaError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigSchemaError::EmptyField { section, field });
    }
    Ok(trimmed.into())
}

fn normalize_optional(field: &mut Option<Box<str>>) {
    *field = field
        .take()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(String::into_boxed_str);
}

fn normalize_optional_secret(field: &mut Option<SecretString>) {
    *field = field
        .take()
        .filter(|value| !value.expose().trim().is_empty())
        .map(|value| SecretString::from(value.expose().trim()));
}

fn check_key(section: &'static str, key: Option<&SecretString>) -> Result<(), ConfigSchemaError> {
    match key {
        Some(key) if key.expose().is_empty() => Err(ConfigSchemaError::EmptyField {
            section,
            field: "key",
        }),
        _ => Ok(()),
    }
}

const fn check_range(
    section: &'static str,
    field: &'static str,
    value: u64,
    min: u64,
    max: u64,
) -> Result<(), ConfigSchemaError> {
    if value < min || value > max {
        return Err(ConfigSchemaError::LimitOutOfRange {
            section,
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

fn check_log_level(level: &str) -> Result<(), ConfigSchemaError> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "warning" | "error" => Ok(()),
        _ => Err(ConfigSchemaError::InvalidLogLevel {
            value: level.to_string(),
        }),
    }
}

/// Validation failures for config values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSchemaError {
    /// A required string is empty after trimming.
    EmptyField {
        /// Schema section (`server` or `agent`).
        section: &'static str,
        /// Field name in the config file.
        field: &'static str,
    },
    /// A numeric value is out of bounds.
    LimitOutOfRange {
        /// Schema section.
        section: &'static str,
        /// Field name in the config file.
        field: &'static str,
        /// Value provided.
        value: u64,
        /// Minimum allowed value.
        min: u64,
        /// Maximum allowed value.
        max: u64,
    },
    /// Trusted subnet is not valid CIDR.
    InvalidSubnet {
        /// Raw value.
        value: String,
    },
    /// Agent address is not a valid IP.
    InvalidIp {
        /// Raw value.
        value: String,
    },
    /// Unknown log level.
    InvalidLogLevel {
        /// Raw value.
        value: String,
    },
}

impl ConfigSchemaError {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::EmptyField { .. } => ErrorCode::new("config", "empty_field"),
            Self::LimitOutOfRange { .. } => ErrorCode::new("config", "invalid_limit"),
            Self::InvalidSubnet { .. } => ErrorCode::new("config", "invalid_subnet"),
            Self::InvalidIp { .. } => ErrorCode::new("config", "invalid_ip"),
            Self::InvalidLogLevel { .. } => ErrorCode::new("config", "invalid_log_level"),
        }
    }
}

impl fmt::Display for ConfigSchemaError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyField { section, field } => {
                write!(formatter, "{section}.{field} must be non-empty")
            },
            Self::LimitOutOfRange {
                section,
                field,
                value,
                min,
                max,
            } => write!(
                formatter,
                "{section}.{field} must be within [{min}, {max}] (got {value})"
            ),
            Self::InvalidSubnet { value } => {
                write!(formatter, "trustedSubnet must be CIDR notation (got {value})")
            },
            Self::InvalidIp { value } => {
                write!(formatter, "realIp must be an IP address (got {value})")
            },
            Self::InvalidLogLevel { value } => write!(formatter, "unsupported log level: {value}"),
        }
    }
}

impl std::error::Error for ConfigSchemaError {}

impl From<ConfigSchemaError> for ErrorEnvelope {
    fn from(error: ConfigSchemaError) -> Self {
        let envelope = Self::expected(error.error_code(), error.to_string());
        match error {
            ConfigSchemaError::EmptyField { section, field } => envelope
                .with_metadata("section", section)
                .with_metadata("field", field),
            ConfigSchemaError::LimitOutOfRange {
                section,
                field,
                value,
                min,
                max,
            } => envelope
                .with_metadata("section", section)
                .with_metadata("field", field)
                .with_metadata("value", value.to_string())
                .with_metadata("min", min.to_string())
                .with_metadata("max", max.to_string()),
            ConfigSchemaError::InvalidSubnet { value }
            | ConfigSchemaError::InvalidIp { value }
            | ConfigSchemaError::InvalidLogLevel { value } => envelope.with_metadata("value", value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults_are_valid() -> Result<(), ConfigSchemaError> {
        let config = ServerConfig::default().validate_and_normalize()?;
        assert_eq!(config.address.as_ref(), "localhost:8080");
        assert_eq!(config.store_interval(), Duration::from_secs(300));
        assert!(config.restore);
        assert_eq!(config.durability_target(), DurabilityTarget::Memory);
        Ok(())
    }

    #[test]
    fn dsn_takes_priority_over_file() -> Result<(), ConfigSchemaError> {
        let config = ServerConfig {
            file_storage_path: Some("/tmp/metrics.json".into()),
            database_dsn: Some(SecretString::from("postgres://localhost/metrics")),
            ..ServerConfig::default()
        }
        .validate_and_normalize()?;

        assert!(matches!(
            config.durability_target(),
            DurabilityTarget::Database {
                mode: DatabaseWriteMode::Snapshot,
                ..
            }
        ));
        Ok(())
    }

    #[test]
    fn blank_optionals_are_dropped() -> Result<(), ConfigSchemaError> {
        let config = ServerConfig {
            file_storage_path: Some("   ".into()),
            database_dsn: Some(SecretString::from(" ")),
            ..ServerConfig::default()
        }
        .validate_and_normalize()?;
        assert_eq!(config.durability_target(), DurabilityTarget::Memory);
        Ok(())
    }

    #[test]
    fn subnet_must_be_cidr() {
        let result = ServerConfig {
            trusted_subnet: Some("10.0.0.0/33".into()),
            ..ServerConfig::default()
        }
        .validate_and_normalize();
        assert!(matches!(
            result,
            Err(ConfigSchemaError::InvalidSubnet { .. })
        ));
    }

    #[test]
    fn agent_rate_limit_is_bounded() {
        let result = AgentConfig {
            rate_limit: 0,
            ..AgentConfig::default()
        }
        .validate_and_normalize();
        let Err(error) = result else {
            panic!("expected rate limit error");
        };
        let envelope = ErrorEnvelope::from(error);
        assert_eq!(envelope.code, ErrorCode::new("config", "invalid_limit"));
        assert_eq!(
            envelope.metadata.get("field").map(String::as_str),
            Some("rateLimit")
        );
    }

    #[test]
    fn agent_base_url_gets_scheme() -> Result<(), ConfigSchemaError> {
        let config = AgentConfig::default().validate_and_normalize()?;
        assert_eq!(config.base_url(), "http://localhost:8080");

        let config = AgentConfig {
            address: "https://metrics.example.com/".into(),
            ..AgentConfig::default()
        }
        .validate_and_normalize()?;
        assert_eq!(config.base_url(), "https://metrics.example.com");
        Ok(())
    }

    #[test]
    fn secrets_serialize_redacted() -> Result<(), serde_json::Error> {
        let config = ServerConfig {
            key: Some(SecretString::from("hunter2")),
            ..ServerConfig::default()
        };
        let json = serde_json::to_string(&config)?;
        assert!(!json.contains("hunter2"));
        Ok(())
    }
}
