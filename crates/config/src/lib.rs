//! # metricsd-config
//!
//! Configuration schema, validation, env parsing, and loading for the
//! server and the agent. This crate depends on `shared` only.

/// Environment variable parsing and merging.
pub mod env;
/// Config loading helpers (file + flags + env).
pub mod load;
/// Configuration schema types and helpers.
pub mod schema;

pub use env::{AgentEnv, EnvParseError, ServerEnv, apply_agent_env, apply_server_env};
pub use load::{
    AgentOverrides, ServerOverrides, load_agent_config, load_agent_config_std_env,
    load_server_config, load_server_config_std_env, to_pretty_json,
};
pub use schema::{
    AgentConfig, ConfigSchemaError, DatabaseWriteMode, DispatchMode, DurabilityTarget, LogFormat,
    ServerConfig, ValidatedAgentConfig, ValidatedServerConfig,
};

/// Returns the config crate version.
#[must_use]
pub const fn config_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;
    use metricsd_shared::shared_crate_version;

    #[test]
    fn config_crate_compiles() {
        let version = config_crate_version();
        assert!(!version.is_empty());
        assert!(!shared_crate_version().is_empty());
    }
}
