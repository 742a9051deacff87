//! Environment variable parsing and env-to-config merging.
//!
//! Env parsing is:
//! - strict (invalid values fail fast)
//! - testable (parsers read from a `BTreeMap`, not the process env)
//! - safe (secret values are redacted in error metadata)

use crate::schema::{AgentConfig, DatabaseWriteMode, DispatchMode, LogFormat, ServerConfig};
use metricsd_shared::{ErrorCode, ErrorEnvelope, REDACTED_VALUE, SecretString, is_secret_key};
use std::collections::BTreeMap;
use std::fmt;

/// Env var: config file path.
pub const ENV_CONFIG: &str = "CONFIG";
/// Env var: HTTP listen address (server) or server address (agent).
pub const ENV_ADDRESS: &str = "ADDRESS";
/// Env var: gRPC listen address.
pub const ENV_GRPC_ADDRESS: &str = "GRPC_ADDRESS";
/// Env var: flush interval in seconds.
pub const ENV_STORE_INTERVAL: &str = "STORE_INTERVAL";
/// Env var: snapshot file path.
pub const ENV_FILE_STORAGE_PATH: &str = "FILE_STORAGE_PATH";
/// Env var: PostgreSQL DSN (secret).
pub const ENV_DATABASE_DSN: &str = "DATABASE_DSN";
/// Env var: relational write mode.
pub const ENV_DATABASE_WRITE_MODE: &str = "DATABASE_WRITE_MODE";
/// Env var: restore on start.
pub const ENV_RESTORE: &str = "RESTORE";
/// Env var: HMAC key (secret).
pub const ENV_KEY: &str = "KEY";
/// Env var: RSA key path.
pub const ENV_CRYPTO_KEY: &str = "CRYPTO_KEY";
/// Env var: trusted subnet CIDR.
pub const ENV_TRUSTED_SUBNET: &str = "TRUSTED_SUBNET";
/// Env var: report interval in seconds.
pub const ENV_REPORT_INTERVAL: &str = "REPORT_INTERVAL";
/// Env var: poll interval in seconds.
pub const ENV_POLL_INTERVAL: &str = "POLL_INTERVAL";
/// Env var: fan-out worker count.
pub const ENV_RATE_LIMIT: &str = "RATE_LIMIT";
/// Env var: dispatch mode.
pub const ENV_DISPATCH_MODE: &str = "DISPATCH_MODE";
/// Env var: agent address reported in `X-Real-IP`.
pub const ENV_REAL_IP: &str = "REAL_IP";
/// Env var: agent request timeout in milliseconds.
pub const ENV_REQUEST_TIMEOUT_MS: &str = "REQUEST_TIMEOUT_MS";
/// Env var: log level.
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
/// Env var: log format.
pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";

const SERVER_VARS: &[&str] = &[
    ENV_CONFIG,
    ENV_ADDRESS,
    ENV_GRPC_ADDRESS,
    ENV_STORE_INTERVAL,
    ENV_FILE_STORAGE_PATH,
    ENV_DATABASE_DSN,
    ENV_DATABASE_WRITE_MODE,
    ENV_RESTORE,
    ENV_KEY,
    ENV_CRYPTO_KEY,
    ENV_TRUSTED_SUBNET,
    ENV_LOG_LEVEL,
    ENV_LOG_FORMAT,
];

const AGENT_VARS: &[&str] = &[
    ENV_CONFIG,
    ENV_ADDRESS,
    ENV_REPORT_INTERVAL,
    ENV_POLL_INTERVAL,
    ENV_RATE_LIMIT,
    ENV_DISPATCH_MODE,
    ENV_KEY,
    ENV_CRYPTO_KEY,
    ENV_REAL_IP,
    ENV_REQUEST_TIMEOUT_MS,
    ENV_LOG_LEVEL,
    ENV_LOG_FORMAT,
];

/// Server settings read from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerEnv {
    /// `CONFIG`
    pub config_path: Option<Box<str>>,
    /// `ADDRESS`
    pub address: Option<Box<str>>,
    /// `GRPC_ADDRESS`
    pub grpc_address: Option<Box<str>>,
    /// `STORE_INTERVAL`
    pub store_interval_secs: Option<u64>,
    /// `FILE_STORAGE_PATH`
    pub file_storage_path: Option<Box<str>>,
    /// `DATABASE_DSN`
    pub database_dsn: Option<SecretString>,
    /// `DATABASE_WRITE_MODE`
    pub database_write_mode: Option<DatabaseWriteMode>,
    /// `RESTORE`
    pub restore: Option<bool>,
    /// `KEY`
    pub key: Option<SecretString>,
    /// `CRYPTO_KEY`
    pub crypto_key: Option<Box<str>>,
    /// `TRUSTED_SUBNET`
    pub trusted_subnet: Option<Box<str>>,
    /// `LOG_LEVEL`
    pub log_level: Option<Box<str>>,
    /// `LOG_FORMAT`
    pub log_format: Option<LogFormat>,
}

impl ServerEnv {
    /// Parse env settings from a key/value map.
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self, EnvParseError> {
        Ok(Self {
            config_path: parse_optional_trimmed_string(map, ENV_CONFIG)?,
            address: parse_optional_trimmed_string(map, ENV_ADDRESS)?,
            grpc_address: parse_optional_trimmed_string(map, ENV_GRPC_ADDRESS)?,
            store_interval_secs: parse_optional_u64(map, ENV_STORE_INTERVAL)?,
            file_storage_path: parse_optional_trimmed_string(map, ENV_FILE_STORAGE_PATH)?,
            database_dsn: parse_optional_secret(map, ENV_DATABASE_DSN)?,
            database_write_mode: parse_optional_enum(
                map,
                ENV_DATABASE_WRITE_MODE,
                DatabaseWriteMode::parse,
            )?,
            restore: parse_optional_bool(map, ENV_RESTORE)?,
            key: parse_optional_secret(map, ENV_KEY)?,
            crypto_key: parse_optional_trimmed_string(map, ENV_CRYPTO_KEY)?,
            trusted_subnet: parse_optional_trimmed_string(map, ENV_TRUSTED_SUBNET)?,
            log_level: parse_optional_trimmed_string(map, ENV_LOG_LEVEL)?,
            log_format: parse_optional_enum(map, ENV_LOG_FORMAT, LogFormat::parse)?,
        })
    }

    /// Parse env settings from the current process environment.
    pub fn from_std_env() -> Result<Self, EnvParseError> {
        Self::from_map(&collect_std_env(SERVER_VARS))
    }

    /// Overlay these settings onto `config`.
    pub fn apply(&self, config: &mut ServerConfig) {
        set_clone(&mut config.address, self.address.as_ref());
        set_option(&mut config.grpc_address, self.grpc_address.as_ref());
        set_copy(&mut config.store_interval_secs, self.store_interval_secs);
        set_option(&mut config.file_storage_path, self.file_storage_path.as_ref());
        set_option(&mut config.database_dsn, self.database_dsn.as_ref());
        set_copy(&mut config.database_write_mode, self.database_write_mode);
        set_copy(&mut config.restore, self.restore);
        set_option(&mut config.key, self.key.as_ref());
        set_option(&mut config.crypto_key, self.crypto_key.as_ref());
        set_option(&mut config.trusted_subnet, self.trusted_subnet.as_ref());
        set_clone(&mut config.log_level, self.log_level.as_ref());
        set_copy(&mut config.log_format, self.log_format);
    }
}

/// Agent settings read from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentEnv {
    /// `CONFIG`
    pub config_path: Option<Box<str>>,
    /// `ADDRESS`
    pub address: Option<Box<str>>,
    /// `REPORT_INTERVAL`
    pub report_interval_secs: Option<u64>,
    /// `POLL_INTERVAL`
    pub poll_interval_secs: Option<u64>,
    /// `RATE_LIMIT`
    pub rate_limit: Option<u32>,
    /// `DISPATCH_MODE`
    pub dispatch_mode: Option<DispatchMode>,
    /// `KEY`
    pub key: Option<SecretString>,
    /// `CRYPTO_KEY`
    pub crypto_key: Option<Box<str>>,
    /// `REAL_IP`
    pub real_ip: Option<Box<str>>,
    /// `REQUEST_TIMEOUT_MS`
    pub request_timeout_ms: Option<u64>,
    /// `LOG_LEVEL`
    pub log_level: Option<Box<str>>,
    /// `LOG_FORMAT`
    pub log_format: Option<LogFormat>,
}

impl AgentEnv {
    /// Parse env settings from a key/value map.
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self, EnvParseError> {
        Ok(Self {
            config_path: parse_optional_trimmed_string(map, ENV_CONFIG)?,
            address: parse_optional_trimmed_string(map, ENV_ADDRESS)?,
            report_interval_secs: parse_optional_u64(map, ENV_REPORT_INTERVAL)?,
            poll_interval_secs: parse_optional_u64(map, ENV_POLL_INTERVAL)?,
            rate_limit: parse_optional_u32(map, ENV_RATE_LIMIT)?,
            dispatch_mode: parse_optional_enum(map, ENV_DISPATCH_MODE, DispatchMode::parse)?,
            key: parse_optional_secret(map, ENV_KEY)?,
            crypto_key: parse_optional_trimmed_string(map, ENV_CRYPTO_KEY)?,
            real_ip: parse_optional_trimmed_string(map, ENV_REAL_IP)?,
            request_timeout_ms: parse_optional_u64(map, ENV_REQUEST_TIMEOUT_MS)?,
            log_level: parse_optional_trimmed_string(map, ENV_LOG_LEVEL)?,
            log_format: parse_optional_enum(map, ENV_LOG_FORMAT, LogFormat::parse)?,
        })
    }

    /// Parse env settings from the current process environment.
    pub fn from_std_env() -> Result<Self, EnvParseError> {
        Self::from_map(&collect_std_env(AGENT_VARS))
    }

    /// Overlay these settings onto `config`.
    pub fn apply(&self, config: &mut AgentConfig) {
        set_clone(&mut config.address, self.address.as_ref());
        set_copy(&mut config.report_interval_secs, self.report_interval_secs);
        set_copy(&mut config.poll_interval_secs, self.poll_interval_secs);
        set_copy(&mut config.rate_limit, self.rate_limit);
        set_copy(&mut config.dispatch_mode, self.dispatch_mode);
        set_option(&mut config.key, self.key.as_ref());
        set_option(&mut config.crypto_key, self.crypto_key.as_ref());
        set_option(&mut config.real_ip, self.real_ip.as_ref());
        set_copy(&mut config.request_timeout_ms, self.request_timeout_ms);
        set_clone(&mut config.log_level, self.log_level.as_ref());
        set_copy(&mut config.log_format, self.log_format);
    }
}

/// Apply env settings and validate the resulting server config.
pub fn apply_server_env(
    mut config: ServerConfig,
    env: &ServerEnv,
) -> Result<crate::ValidatedServerConfig, ErrorEnvelope> {
    env.apply(&mut config);
    config.validate_and_normalize().map_err(ErrorEnvelope::from)
}

/// Apply env settings and validate the resulting agent config.
pub fn apply_agent_env(
    mut config: AgentConfig,
    env: &AgentEnv,
) -> Result<crate::ValidatedAgentConfig, ErrorEnvelope> {
    env.apply(&mut config);
    config.validate_and_normalize().map_err(ErrorEnvelope::from)
}

fn collect_std_env(vars: &[&str]) -> BTreeMap<String, String> {
    vars.iter()
        .filter_map(|name| std::env::var(name).ok().map(|value| ((*name).to_string(), value)))
        .collect()
}

const fn set_copy<T: Copy>(field: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *field = value;
    }
}

fn set_clone<T: Clone>(field: &mut T, value: Option<&T>) {
    if let Some(value) = value {
        field.clone_from(value);
    }
}

fn set_option<T: Clone>(field: &mut Option<T>, value: Option<&T>) {
    if let Some(value) = value {
        *field = Some(value.clone());
    }
}

/// Validation failures when parsing env variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvParseError {
    /// An env var was present but empty after trimming.
    EmptyValue {
        /// Env var name.
        var: &'static str,
    },
    /// A secret env var was present but empty after trimming.
    EmptySecret {
        /// Env var name.
        var: &'static str,
    },
    /// Boolean env var had an invalid value.
    InvalidBool {
        /// Env var name.
        var: &'static str,
        /// Raw input value.
        value: String,
    },
    /// Integer env var had an invalid value.
    InvalidInt {
        /// Env var name.
        var: &'static str,
        /// Raw input value.
        value: String,
    },
    /// Enum env var had an invalid value.
    InvalidEnum {
        /// Env var name.
        var: &'static str,
        /// Raw input value.
        value: String,
    },
}

impl EnvParseError {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::EmptyValue { .. } | Self::EmptySecret { .. } => {
                ErrorCode::new("config", "empty_env_var")
            },
            Self::InvalidBool { .. } => ErrorCode::new("config", "invalid_env_bool"),
            Self::InvalidInt { .. } => ErrorCode::new("config", "invalid_env_int"),
            Self::InvalidEnum { .. } => ErrorCode::new("config", "invalid_env_enum"),
        }
    }
}

impl fmt::Display for EnvParseError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyValue { var } | Self::EmptySecret { var } => {
                write!(formatter, "{var} must be non-empty")
            },
            Self::InvalidBool { var, .. } => write!(formatter, "{var} must be a boolean"),
            Self::InvalidInt { var, .. } => {
                write!(formatter, "{var} must be a non-negative integer")
            },
            Self::InvalidEnum { var, .. } => write!(formatter, "{var} has an unsupported value"),
        }
    }
}

impl std::error::Error for EnvParseError {}

impl From<EnvParseError> for ErrorEnvelope {
    fn from(error: EnvParseError) -> Self {
        let envelope = Self::expected(error.error_code(), error.to_string());
        match error {
            EnvParseError::EmptyValue { var } | EnvParseError::EmptySecret { var } => {
                envelope.with_metadata("env_var", var)
            },
            EnvParseError::InvalidBool { var, value }
            | EnvParseError::InvalidInt { var, value }
            | EnvParseError::InvalidEnum { var, value } => envelope
                .with_metadata("env_var", var)
                .with_metadata("value", redact_value(var, &value)),
        }
    }
}

fn redact_value(var: &str, value: &str) -> String {
    if is_secret_key(var) {
        REDACTED_VALUE.to_string()
    } else {
        value.to_string()
    }
}

fn parse_optional_trimmed_string(
    map: &BTreeMap<String, String>,
    var: &'static str,
) -> Result<Option<Box<str>>, EnvParseError> {
    let Some(raw) = map.get(var) else {
        return Ok(None);
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EnvParseError::EmptyValue { var });
    }

    Ok(Some(trimmed.into()))
}

fn parse_optional_secret(
    map: &BTreeMap<String, String>,
    var: &'static str,
) -> Result<Option<SecretString>, EnvParseError> {
    let Some(raw) = map.get(var) else {
        return Ok(None);
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EnvParseError::EmptySecret { var });
    }

    Ok(Some(SecretString::from(trimmed)))
}

fn parse_optional_u64(
    map: &BTreeMap<String, String>,
    var: &'static str,
) -> Result<Option<u64>, EnvParseError> {
    let Some(raw) = map.get(var) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EnvParseError::EmptyValue { var });
    }

    trimmed
        .parse::<u64>()
        .map(Some)
        .map_err(|_| EnvParseError::InvalidInt {
            var,
            value: raw.clone(),
        })
}

fn parse_optional_u32(
    map: &BTreeMap<String, String>,
    var: &'static str,
) -> Result<Option<u32>, EnvParseError> {
    let Some(value) = parse_optional_u64(map, var)? else {
        return Ok(None);
    };
    u32::try_from(value)
        .map(Some)
        .map_err(|_| EnvParseError::InvalidInt {
            var,
            value: value.to_string(),
        })
}

fn parse_optional_bool(
    map: &BTreeMap<String, String>,
    var: &'static str,
) -> Result<Option<bool>, EnvParseError> {
    let Some(raw) = map.get(var) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EnvParseError::EmptyValue { var });
    }

    match trimmed.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(Some(true)),
        "false" | "0" | "no" | "off" => Ok(Some(false)),
        _ => Err(EnvParseError::InvalidBool {
            var,
            value: raw.clone(),
        }),
    }
}

fn parse_optional_enum<T>(
    map: &BTreeMap<String, String>,
    var: &'static str,
    parse: fn(&str) -> Option<T>,
) -> Result<Option<T>, EnvParseError> {
    let Some(raw) = map.get(var) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EnvParseError::EmptyValue { var });
    }
    parse(trimmed)
        .map(Some)
        .ok_or_else(|| EnvParseError::InvalidEnum {
            var,
            value: raw.clone(),
        })
}
