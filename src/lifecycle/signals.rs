//! OS signal handling.
//!
//! - SIGINT / SIGTERM → graceful shutdown
//! - SIGHUP → configuration reload (unix only)

use tokio::sync::broadcast;

use crate::gateway::Gateway;

/// Resolve when the process is asked to stop.
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("SIGINT received, shutting down"),
        _ = terminate => tracing::info!("SIGTERM received, shutting down"),
    }
}

/// Reload the configuration on every SIGHUP until shutdown.
#[cfg(unix)]
pub async fn reload_on_sighup(gateway: Gateway, mut shutdown: broadcast::Receiver<()>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(error = %e, "SIGHUP reload unavailable");
            return;
        }
    };

    loop {
        tokio::select! {
            received = hangup.recv() => {
                if received.is_none() {
                    break;
                }
                tracing::info!("SIGHUP received, reloading configuration");
                if let Err(e) = gateway.reload_config() {
                    tracing::error!(error = %e, "Configuration reload failed");
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

#[cfg(not(unix))]
pub async fn reload_on_sighup(_gateway: Gateway, _shutdown: broadcast::Receiver<()>) {}
