//! Process signal handling.

use metricsd_shared::RequestContext;
use tokio::task::JoinHandle;

/// Resolve on SIGINT, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

/// Cancel `root` when a shutdown signal arrives.
pub fn cancel_on_signal(root: &RequestContext) -> JoinHandle<()> {
    let root = root.clone();
    tokio::spawn(async move {
        tokio::select! {
            () = shutdown_signal() => root.cancel(),
            () = root.cancelled() => {},
        }
    })
}
