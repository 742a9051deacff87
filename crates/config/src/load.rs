//! Config loading helpers (file + flags + env).
//!
//! The loader is responsible for deterministic merge order and surfacing
//! user-facing errors as typed `ErrorEnvelope`s.

use crate::env::{AgentEnv, ServerEnv, apply_agent_env, apply_server_env};
use crate::schema::{
    AgentConfig, DatabaseWriteMode, DispatchMode, LogFormat, ServerConfig, ValidatedAgentConfig,
    ValidatedServerConfig,
};
use metricsd_shared::{ErrorClass, ErrorCode, ErrorEnvelope, SecretString};
use serde::de::DeserializeOwned;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Json,
    Yaml,
    Toml,
}

/// Server settings supplied as command-line flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerOverrides {
    /// `-a`
    pub address: Option<Box<str>>,
    /// `-g`
    pub grpc_address: Option<Box<str>>,
    /// `-i`
    pub store_interval_secs: Option<u64>,
    /// `-f`
    pub file_storage_path: Option<Box<str>>,
    /// `-d`
    pub database_dsn: Option<SecretString>,
    /// `--db-write-mode`
    pub database_write_mode: Option<DatabaseWriteMode>,
    /// `-r`
    pub restore: Option<bool>,
    /// `-k`
    pub key: Option<SecretString>,
    /// `--crypto-key`
    pub crypto_key: Option<Box<str>>,
    /// `-t`
    pub trusted_subnet: Option<Box<str>>,
    /// `--log-level`
    pub log_level: Option<Box<str>>,
    /// `--log-format`
    pub log_format: Option<LogFormat>,
}

impl ServerOverrides {
    fn apply(&self, config: &mut ServerConfig) {
        // Flags share the env overlay semantics; reuse it.
        ServerEnv {
            config_path: None,
            address: self.address.clone(),
            grpc_address: self.grpc_address.clone(),
            store_interval_secs: self.store_interval_secs,
            file_storage_path: self.file_storage_path.clone(),
            database_dsn: self.database_dsn.clone(),
            database_write_mode: self.database_write_mode,
            restore: self.restore,
            key: self.key.clone(),
            crypto_key: self.crypto_key.clone(),
            trusted_subnet: self.trusted_subnet.clone(),
            log_level: self.log_level.clone(),
            log_format: self.log_format,
        }
        .apply(config);
    }
}

/// Agent settings supplied as command-line flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentOverrides {
    /// `-a`
    pub address: Option<Box<str>>,
    /// `-r`
    pub report_interval_secs: Option<u64>,
    /// `-p`
    pub poll_interval_secs: Option<u64>,
    /// `-l`
    pub rate_limit: Option<u32>,
    /// `--dispatch-mode`
    pub dispatch_mode: Option<DispatchMode>,
    /// `-k`
    pub key: Option<SecretString>,
    /// `--crypto-key`
    pub crypto_key: Option<Box<str>>,
    /// `--real-ip`
    pub real_ip: Option<Box<str>>,
    /// `--log-level`
    pub log_level: Option<Box<str>>,
    /// `--log-format`
    pub log_format: Option<LogFormat>,
}

impl AgentOverrides {
    fn apply(&self, config: &mut AgentConfig) {
        AgentEnv {
            config_path: None,
            address: self.address.clone(),
            report_interval_secs: self.report_interval_secs,
            poll_interval_secs: self.poll_interval_secs,
            rate_limit: self.rate_limit,
            dispatch_mode: self.dispatch_mode,
            key: self.key.clone(),
            crypto_key: self.crypto_key.clone(),
            real_ip: self.real_ip.clone(),
            request_timeout_ms: None,
            log_level: self.log_level.clone(),
            log_format: self.log_format,
        }
        .apply(config);
    }
}

/// Load the server config using a deterministic precedence order.
///
/// Precedence (highest wins):
/// - env (`ServerEnv`)
/// - command-line flags (`ServerOverrides`)
/// - config file (`CONFIG` env var, else `config_path`)
/// - defaults (`ServerConfig::default()`)
pub fn load_server_config(
    config_path: Option<&Path>,
    overrides: &ServerOverrides,
    env: &ServerEnv,
) -> Result<ValidatedServerConfig, ErrorEnvelope> {
    let path = env.config_path.as_deref().map(Path::new).or(config_path);
    let mut config: ServerConfig = match path {
        None => ServerConfig::default(),
        Some(path) => read_and_parse(path)?,
    };

    overrides.apply(&mut config);

    // env is applied last and also validates/normalizes the resulting config.
    apply_server_env(config, env)
}

/// Load the agent config using the same precedence as the server.
pub fn load_agent_config(
    config_path: Option<&Path>,
    overrides: &AgentOverrides,
    env: &AgentEnv,
) -> Result<ValidatedAgentConfig, ErrorEnvelope> {
    let path = env.config_path.as_deref().map(Path::new).or(config_path);
    let mut config: AgentConfig = match path {
        None => AgentConfig::default(),
        Some(path) => read_and_parse(path)?,
    };

    overrides.apply(&mut config);

    apply_agent_env(config, env)
}

/// Load the server config reading env from the current process.
pub fn load_server_config_std_env(
    config_path: Option<&Path>,
    overrides: &ServerOverrides,
) -> Result<ValidatedServerConfig, ErrorEnvelope> {
    let env = ServerEnv::from_std_env()?;
    load_server_config(config_path, overrides, &env)
}

/// Load the agent config reading env from the current process.
pub fn load_agent_config_std_env(
    config_path: Option<&Path>,
    overrides: &AgentOverrides,
) -> Result<ValidatedAgentConfig, ErrorEnvelope> {
    let env = AgentEnv::from_std_env()?;
    load_agent_config(config_path, overrides, &env)
}

/// Serialize a config as pretty JSON (with trailing newline). Secrets are redacted.
pub fn to_pretty_json<T: serde::Serialize>(config: &T) -> Result<String, ErrorEnvelope> {
    let mut output = serde_json::to_string_pretty(config).map_err(|error| {
        ErrorEnvelope::unexpected(
            ErrorCode::internal(),
            format!("failed to serialize config: {error}"),
            ErrorClass::NonRetriable,
        )
    })?;
    output.push('\n');
    Ok(output)
}

fn read_and_parse<T: DeserializeOwned>(path: &Path) -> Result<T, ErrorEnvelope> {
    let format = detect_config_format(path)?;
    let text = read_config_file(path)?;
    parse_config(&text, format).map_err(|error| {
        error.with_metadata("path", path.to_string_lossy().to_string())
    })
}

fn parse_config<T: DeserializeOwned>(input: &str, format: ConfigFormat) -> Result<T, ErrorEnvelope> {
    match format {
        ConfigFormat::Json => serde_json::from_str(input).map_err(|error| {
            ErrorEnvelope::expected(
                ErrorCode::new("config", "invalid_json"),
                format!("invalid config JSON: {error}"),
            )
        }),
        ConfigFormat::Yaml => serde_yaml_ng::from_str(input).map_err(|error| {
            ErrorEnvelope::expected(
                ErrorCode::new("config", "invalid_yaml"),
                format!("invalid config YAML: {error}"),
            )
        }),
        ConfigFormat::Toml => toml::from_str(input).map_err(|error| {
            ErrorEnvelope::expected(
                ErrorCode::new("config", "invalid_toml"),
                format!("invalid config TOML: {error}"),
            )
        }),
    }
}

fn read_config_file(path: &Path) -> Result<String, ErrorEnvelope> {
    std::fs::read_to_string(path).map_err(|error| {
        let code = match error.kind() {
            std::io::ErrorKind::NotFound => ErrorCode::new("config", "config_file_not_found"),
            std::io::ErrorKind::PermissionDenied => {
                ErrorCode::new("config", "config_file_permission_denied")
            },
            _ => ErrorCode::new("config", "config_file_io"),
        };

        ErrorEnvelope::expected(code, format!("failed to read config file: {error}"))
            .with_metadata("path", path.to_string_lossy().to_string())
    })
}

fn detect_config_format(path: &Path) -> Result<ConfigFormat, ErrorEnvelope> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        None | Some("json") => Ok(ConfigFormat::Json),
        Some("yaml" | "yml") => Ok(ConfigFormat::Yaml),
        Some("toml") => Ok(ConfigFormat::Toml),
        Some(other) => Err(ErrorEnvelope::expected(
            ErrorCode::new("config", "unsupported_format"),
            "unsupported config format; use .json, .yaml, or .toml",
        )
        .with_metadata("extension", other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> Result<std::path::PathBuf, Box<dyn std::error::Error>> {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos();
        let dir = std::env::temp_dir().join(format!("{prefix}-{nanos}"));
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    #[test]
    fn defaults_when_no_sources() -> Result<(), Box<dyn std::error::Error>> {
        let config =
            load_server_config(None, &ServerOverrides::default(), &ServerEnv::default())?;
        assert_eq!(config.address.as_ref(), "localhost:8080");
        assert_eq!(config.store_interval_secs, 300);
        Ok(())
    }

    #[test]
    fn env_beats_flags_beats_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = temp_dir("metricsd-load")?;
        let path = dir.join("server.toml");
        std::fs::write(
            &path,
            "address = \"file:1\"\nstoreIntervalSecs = 7\nrestore = false\n",
        )?;

        let overrides = ServerOverrides {
            address: Some("flag:2".into()),
            store_interval_secs: Some(9),
            ..ServerOverrides::default()
        };
        let env = ServerEnv {
            address: Some("env:3".into()),
            ..ServerEnv::default()
        };

        let config = load_server_config(Some(&path), &overrides, &env)?;
        assert_eq!(config.address.as_ref(), "env:3");
        assert_eq!(config.store_interval_secs, 9);
        assert!(!config.restore);

        std::fs::remove_dir_all(dir)?;
        Ok(())
    }

    #[test]
    fn config_env_var_selects_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = temp_dir("metricsd-load-env")?;
        let path = dir.join("agent.yaml");
        std::fs::write(&path, "rateLimit: 3\ndispatchMode: perMetric\n")?;

        let env = AgentEnv {
            config_path: Some(path.to_string_lossy().into()),
            ..AgentEnv::default()
        };
        let config = load_agent_config(None, &AgentOverrides::default(), &env)?;
        assert_eq!(config.rate_limit, 3);
        assert_eq!(config.dispatch_mode, DispatchMode::PerMetric);

        std::fs::remove_dir_all(dir)?;
        Ok(())
    }

    #[test]
    fn missing_file_reports_path() {
        let path = Path::new("/definitely/not/here/server.json");
        let Err(error) = load_server_config(
            Some(path),
            &ServerOverrides::default(),
            &ServerEnv::default(),
        ) else {
            panic!("expected missing file error");
        };
        assert_eq!(error.code, ErrorCode::new("config", "config_file_not_found"));
        assert!(error.metadata.contains_key("path"));
    }

    #[test]
    fn unknown_fields_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = temp_dir("metricsd-load-unknown")?;
        let path = dir.join("server.json");
        std::fs::write(&path, r#"{"adress":"typo:1"}"#)?;

        let result = load_server_config(
            Some(&path),
            &ServerOverrides::default(),
            &ServerEnv::default(),
        );
        let Err(error) = result else {
            panic!("expected invalid json error");
        };
        assert_eq!(error.code, ErrorCode::new("config", "invalid_json"));

        std::fs::remove_dir_all(dir)?;
        Ok(())
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let result = load_agent_config(
            Some(Path::new("agent.ini")),
            &AgentOverrides::default(),
            &AgentEnv::default(),
        );
        assert!(matches!(
            result,
            Err(error) if error.code == ErrorCode::new("config", "unsupported_format")
        ));
    }

    #[test]
    fn pretty_json_redacts_secrets() -> Result<(), ErrorEnvelope> {
        let config = ServerConfig {
            database_dsn: Some(SecretString::from("postgres://u:p@h/db")),
            ..ServerConfig::default()
        };
        let output = to_pretty_json(&config)?;
        assert!(!output.contains("u:p@h"));
        assert!(output.ends_with('\n'));
        Ok(())
    }
}
