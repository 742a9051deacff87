//! Server runtime wiring: restore at startup and flush at shutdown.

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use metricsd_adapters::{JsonLogger, MemoryLogSink};
use metricsd_config::ServerConfig;
use metricsd_infra::ServerRuntime;
use metricsd_ports::LoggerPort;
use metricsd_shared::RequestContext;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tower::ServiceExt;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn temp_dir(prefix: &str) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos();
    Ok(std::env::temp_dir().join(format!("{prefix}-{nanos}")))
}

fn logger(sink: &Arc<MemoryLogSink>) -> Arc<dyn LoggerPort> {
    Arc::new(JsonLogger::new(sink.clone()))
}

fn file_config(path: &std::path::Path, restore: bool) -> ServerConfig {
    ServerConfig {
        address: "127.0.0.1:0".into(),
        file_storage_path: Some(path.to_string_lossy().into()),
        restore,
        ..ServerConfig::default()
    }
}

#[tokio::test]
async fn restored_counters_are_served_immediately() -> TestResult {
    let dir = temp_dir("metricsd-infra-restore")?;
    tokio::fs::create_dir_all(&dir).await?;
    let path = dir.join("metrics.json");
    tokio::fs::write(&path, "{\"id\":\"hits\",\"type\":\"counter\",\"delta\":8}\n").await?;

    let sink = Arc::new(MemoryLogSink::default());
    let ctx = RequestContext::new_request();
    let config = file_config(&path, true).validate_and_normalize()?;
    let runtime = ServerRuntime::build(&ctx, config, logger(&sink)).await?;

    let request = Request::get("/value/counter/hits").body(Body::empty())?;
    let response = runtime.router().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await?;
    assert_eq!(body.as_ref(), b"8");
    assert!(sink.take().iter().any(|line| line.contains("server.restore.completed")));

    tokio::fs::remove_dir_all(&dir).await?;
    Ok(())
}

#[tokio::test]
async fn restore_disabled_starts_empty() -> TestResult {
    let dir = temp_dir("metricsd-infra-norestore")?;
    tokio::fs::create_dir_all(&dir).await?;
    let path = dir.join("metrics.json");
    tokio::fs::write(&path, "{\"id\":\"hits\",\"type\":\"counter\",\"delta\":8}\n").await?;

    let sink = Arc::new(MemoryLogSink::default());
    let ctx = RequestContext::new_request();
    let config = file_config(&path, false).validate_and_normalize()?;
    let runtime = ServerRuntime::build(&ctx, config, logger(&sink)).await?;

    let request = Request::get("/value/counter/hits").body(Body::empty())?;
    let response = runtime.router().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    tokio::fs::remove_dir_all(&dir).await?;
    Ok(())
}

#[tokio::test]
async fn corrupt_snapshot_starts_empty() -> TestResult {
    let dir = temp_dir("metricsd-infra-corrupt")?;
    tokio::fs::create_dir_all(&dir).await?;
    let path = dir.join("metrics.json");
    tokio::fs::write(&path, "{\"id\":\"hits\",\"type\":\n").await?;

    let sink = Arc::new(MemoryLogSink::default());
    let ctx = RequestContext::new_request();
    let config = file_config(&path, true).validate_and_normalize()?;
    let runtime = ServerRuntime::build(&ctx, config, logger(&sink)).await?;

    let request = Request::get("/value/counter/hits").body(Body::empty())?;
    let response = runtime.router().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(sink.take().iter().any(|line| line.contains("server.restore.failed")));

    tokio::fs::remove_dir_all(&dir).await?;
    Ok(())
}

#[tokio::test]
async fn shutdown_runs_a_final_flush() -> TestResult {
    let dir = temp_dir("metricsd-infra-shutdown")?;
    let path = dir.join("metrics.json");

    let sink = Arc::new(MemoryLogSink::default());
    let ctx = RequestContext::new_request();
    let config = file_config(&path, false).validate_and_normalize()?;
    let runtime = ServerRuntime::build(&ctx, config, logger(&sink)).await?;

    let request = Request::post("/update/gauge/temp/1.5").body(Body::empty())?;
    let response = runtime.router().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let shutdown = ctx.clone();
    let server = tokio::spawn(async move { runtime.run(&shutdown).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    ctx.cancel();
    server.await??;

    let written = tokio::fs::read_to_string(&path).await?;
    assert_eq!(written, "{\"id\":\"temp\",\"type\":\"gauge\",\"value\":1.5}\n");
    let lines = sink.take();
    assert!(lines.iter().any(|line| line.contains("server.started")));
    assert!(lines.iter().any(|line| line.contains("server.stopped")));

    tokio::fs::remove_dir_all(&dir).await?;
    Ok(())
}
