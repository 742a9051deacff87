//! # metricsd-adapters
//!
//! Adapter implementations for ports: the in-memory store, durability
//! backends, wire codecs, loggers, the agent HTTP sender, and local
//! collectors. This crate depends on `ports`, `domain`, and `shared`.

pub mod codec;
pub mod collectors;
pub mod durability;
pub mod local_ip;
pub mod log_sink;
pub mod logger;
pub mod memory_store;
pub mod sender;

pub use collectors::{RuntimeCollector, SystemCollector};
pub use durability::{FileBackend, PostgresBackend, PostgresWriteMode};
pub use local_ip::detect_local_ip;
pub use log_sink::{LogSink, MemoryLogSink, StderrLogSink};
pub use logger::{JsonLogger, TracingLogger};
pub use memory_store::MemStorage;
pub use sender::{DEFAULT_SEND_RETRY, HttpMetricSender, HttpSenderConfig};

/// Returns the adapters crate version.
#[must_use]
pub const fn adapters_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;
    use metricsd_ports::ports_crate_version;
    use metricsd_shared::shared_crate_version;

    fn workspace_deps() -> Vec<String> {
        let cargo_toml = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml"));
        let mut deps = Vec::new();
        let mut in_deps = false;
        let mut in_dev_deps = false;

        for raw_line in cargo_toml.lines() {
            let line = raw_line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with('[') {
                in_deps = line == "[dependencies]";
                in_dev_deps = line == "[dev-dependencies]";
                continue;
            }
            if !(in_deps || in_dev_deps) {
                continue;
            }
            if line.starts_with("metricsd-") {
                let key = line.split('=').next().unwrap_or("").trim();
                let name = key.split('.').next().unwrap_or("").trim();
                deps.push(name.to_string());
            }
        }

        deps
    }

    #[test]
    fn adapters_do_not_depend_on_app_http_or_infra() {
        let deps = workspace_deps();
        let forbidden = ["metricsd-app", "metricsd-http", "metricsd-infra"];

        for dep in &deps {
            assert!(
                !forbidden.contains(&dep.as_str()),
                "forbidden dependency found: {dep}"
            );
        }
    }

    #[test]
    fn adapters_crate_compiles() {
        assert!(!adapters_crate_version().is_empty());
        assert!(!ports_crate_version().is_empty());
        assert!(!shared_crate_version().is_empty());
    }
}
