//! HTTP server lifecycle.

use anyhow::Result;
use tokio::net::TcpListener;

use crate::context::AppContext;
use crate::routes;

/// Run the gateway on `bind_addr` (e.g. `127.0.0.1:8080`).
///
/// Graceful shutdown on Ctrl+C (SIGINT) and SIGTERM (Unix); in-flight
/// requests complete, then the stacks are stopped.
pub async fn run(context: AppContext, bind_addr: &str) -> Result<()> {
    let supervisor = context.supervisor.clone();
    let app = routes::router(context);
    let listener = TcpListener::bind(bind_addr).await?;
    tracing::info!("gateway listening on {bind_addr} (Ctrl+C/SIGTERM to stop)");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    supervisor.shutdown().await;
    tracing::info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let ctrl_c = tokio::signal::ctrl_c();
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to listen for SIGTERM");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for Ctrl+C");
    }
}
