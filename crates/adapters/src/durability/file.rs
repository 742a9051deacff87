//! Newline-delimited JSON snapshot file.
//!
//! `write` rewrites the whole snapshot into a sibling temp file and renames
//! it over the target, so readers never see a half-written snapshot.

use metricsd_ports::{BackendLifecyclePort, BoxFuture, DurabilityPort, MetricRecord};
use metricsd_shared::{ErrorClass, ErrorCode, ErrorEnvelope, RequestContext, Result};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};

/// File durability backend.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    /// Backend writing to `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Snapshot file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parent_dir(&self) -> Option<&Path> {
        self.path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn io_error(&self, error: std::io::Error) -> ErrorEnvelope {
        ErrorEnvelope::from(error).with_metadata("path", self.path.to_string_lossy().to_string())
    }

    async fn read_records(&self) -> Result<Vec<MetricRecord>> {
        let file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(self.io_error(error)),
        };

        let mut lines = BufReader::new(file).lines();
        let mut records = Vec::new();
        let mut line_number = 0_u64;
        while let Some(line) = lines.next_line().await.map_err(|error| self.io_error(error))? {
            line_number += 1;
            if line.trim().is_empty() {
                continue;
            }
            let record: MetricRecord = serde_json::from_str(&line).map_err(|error| {
                ErrorEnvelope::unexpected(
                    ErrorCode::new("durability", "corrupt_record"),
                    format!("malformed snapshot line: {error}"),
                    ErrorClass::NonRetriable,
                )
                .with_metadata("path", self.path.to_string_lossy().to_string())
                .with_metadata("line", line_number.to_string())
            })?;
            records.push(record);
        }
        Ok(records)
    }

    async fn write_records(&self, records: Vec<MetricRecord>) -> Result<()> {
        let staging = self.staging_path();
        let file = tokio::fs::File::create(&staging)
            .await
            .map_err(|error| self.io_error(error))?;
        let mut writer = BufWriter::new(file);
        for record in &records {
            let mut line = serde_json::to_vec(record).map_err(|error| {
                ErrorEnvelope::unexpected(
                    ErrorCode::internal(),
                    format!("failed to encode record: {error}"),
                    ErrorClass::NonRetriable,
                )
            })?;
            line.push(b'\n');
            writer
                .write_all(&line)
                .await
                .map_err(|error| self.io_error(error))?;
        }
        writer.flush().await.map_err(|error| self.io_error(error))?;
        writer
            .into_inner()
            .sync_all()
            .await
            .map_err(|error| self.io_error(error))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|error| self.io_error(error))
    }
}

impl DurabilityPort for FileBackend {
    fn read(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<Vec<MetricRecord>>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("file_backend.read")?;
            self.read_records().await
        })
    }

    fn write(
        &self,
        ctx: &RequestContext,
        records: Vec<MetricRecord>,
    ) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("file_backend.write")?;
            self.write_records(records).await
        })
    }

    fn create(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("file_backend.create")?;
            if let Some(parent) = self.parent_dir() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|error| self.io_error(error))?;
            }
            Ok(())
        })
    }
}

impl BackendLifecyclePort for FileBackend {
    fn ping(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("file_backend.ping")?;
            let dir = self.parent_dir().unwrap_or_else(|| Path::new("."));
            let metadata = tokio::fs::metadata(dir)
                .await
                .map_err(|error| self.io_error(error))?;
            if metadata.is_dir() {
                Ok(())
            } else {
                Err(ErrorEnvelope::unexpected(
                    ErrorCode::unavailable(),
                    "snapshot directory is not a directory",
                    ErrorClass::NonRetriable,
                )
                .with_metadata("path", dir.to_string_lossy().to_string()))
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}
