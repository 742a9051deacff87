//! # metricsd-infra
//!
//! Composition root: backend selection, logger construction, and the server
//! and agent runtimes with signal-driven shutdown.
//! This crate depends on `app`, `adapters`, `config`, `http`, and `shared`.

/// Agent wiring and lifecycle.
pub mod agent;
/// Durability backend selection.
pub mod backend_factory;
/// Logger and subscriber setup.
pub mod logging;
/// Server wiring and lifecycle.
pub mod server;
/// Signal handling.
pub mod shutdown;

pub use agent::{AgentRuntime, run_agent};
pub use backend_factory::{BackendKind, BuiltBackend, build_backend};
pub use logging::{build_logger, init_tracing};
pub use server::{ServerRuntime, build_transforms, run_server};
pub use shutdown::{cancel_on_signal, shutdown_signal};

/// Returns the infra crate version.
#[must_use]
pub const fn infra_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;
    use metricsd_adapters::adapters_crate_version;
    use metricsd_app::app_crate_version;
    use metricsd_config::config_crate_version;
    use metricsd_http::http_crate_version;

    fn workspace_deps() -> Vec<String> {
        let cargo_toml = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml"));
        let mut deps = Vec::new();
        let mut in_deps = false;

        for raw_line in cargo_toml.lines() {
            let line = raw_line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with('[') {
                in_deps = line == "[dependencies]" || line == "[dev-dependencies]";
                continue;
            }
            if in_deps && line.starts_with("metricsd-") {
                let key = line.split('=').next().unwrap_or("").trim();
                deps.push(key.split('.').next().unwrap_or("").trim().to_string());
            }
        }

        deps
    }

    #[test]
    fn infra_depends_on_app_adapters_config_http() {
        let deps = workspace_deps();
        for expected in [
            "metricsd-app",
            "metricsd-adapters",
            "metricsd-config",
            "metricsd-http",
        ] {
            assert!(
                deps.iter().any(|dep| dep == expected),
                "missing dependency: {expected}"
            );
        }
    }

    #[test]
    fn infra_can_use_its_layers() {
        assert!(!infra_crate_version().is_empty());
        assert!(!app_crate_version().is_empty());
        assert!(!adapters_crate_version().is_empty());
        assert!(!config_crate_version().is_empty());
        assert!(!http_crate_version().is_empty());
    }
}
