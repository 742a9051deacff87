//! Durability backend selection and initialization.

use metricsd_adapters::{FileBackend, PostgresBackend, PostgresWriteMode};
use metricsd_config::{DatabaseWriteMode, DurabilityTarget};
use metricsd_ports::{BackendLifecyclePort, DurabilityPort};
use metricsd_shared::{RequestContext, Result};
use std::sync::Arc;

/// Which backend was built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Newline-delimited JSON file.
    File,
    /// PostgreSQL table.
    Postgres,
}

impl BackendKind {
    /// Stable name for log lines.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Postgres => "postgres",
        }
    }
}

/// A backend seen through both of its ports.
#[derive(Clone)]
pub struct BuiltBackend {
    /// Snapshot read/write.
    pub durability: Arc<dyn DurabilityPort>,
    /// Health and shutdown.
    pub lifecycle: Arc<dyn BackendLifecyclePort>,
    /// Backend kind.
    pub kind: BackendKind,
}

/// Build the backend for `target`; `None` for memory-only runs.
///
/// PostgreSQL connections retry connection-class failures before giving up.
pub async fn build_backend(
    ctx: &RequestContext,
    target: &DurabilityTarget,
) -> Result<Option<BuiltBackend>> {
    match target {
        DurabilityTarget::Memory => Ok(None),
        DurabilityTarget::File { path } => {
            let backend = Arc::new(FileBackend::new(path.clone()));
            Ok(Some(BuiltBackend {
                durability: backend.clone(),
                lifecycle: backend,
                kind: BackendKind::File,
            }))
        },
        DurabilityTarget::Database { dsn, mode } => {
            let backend =
                Arc::new(PostgresBackend::connect(ctx, dsn.expose(), write_mode(*mode)).await?);
            Ok(Some(BuiltBackend {
                durability: backend.clone(),
                lifecycle: backend,
                kind: BackendKind::Postgres,
            }))
        },
    }
}

const fn write_mode(mode: DatabaseWriteMode) -> PostgresWriteMode {
    match mode {
        DatabaseWriteMode::Snapshot => PostgresWriteMode::Snapshot,
        DatabaseWriteMode::Upsert => PostgresWriteMode::Upsert,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn memory_target_has_no_backend() -> Result<()> {
        let ctx = RequestContext::new_request();
        assert!(build_backend(&ctx, &DurabilityTarget::Memory).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn file_target_builds_file_backend() -> Result<()> {
        let ctx = RequestContext::new_request();
        let target = DurabilityTarget::File {
            path: PathBuf::from("metrics.json"),
        };
        let built = build_backend(&ctx, &target).await?;
        assert_eq!(built.map(|backend| backend.kind), Some(BackendKind::File));
        Ok(())
    }

    #[test]
    fn write_modes_map_one_to_one() {
        assert_eq!(write_mode(DatabaseWriteMode::Snapshot), PostgresWriteMode::Snapshot);
        assert_eq!(write_mode(DatabaseWriteMode::Upsert), PostgresWriteMode::Upsert);
    }
}
