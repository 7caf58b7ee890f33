//! Startup orchestration.
//!
//! Order: config → logging → key store → gateway → metrics → listener →
//! management API → config watcher → tunnel auto-start. Any failure before
//! the listener is bound is fatal; nothing listens on a bad config.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use crate::admin::serve_admin;
use crate::config::{discover_config, load_config, ConfigError, ConfigWatcher, KeyStoreConfig, ObservabilityConfig};
use crate::gateway::Gateway;
use crate::http::HttpServer;
use crate::lifecycle::signals::{reload_on_sighup, wait_for_shutdown_signal};
use crate::lifecycle::Shutdown;
use crate::observability::{logging, metrics};
use crate::security::{FileKeyStore, KeyStore, KeyStoreError, MemoryKeyStore};
use crate::tunnel::{NgrokAgent, TunnelError, TunnelOptions};

/// How long shutdown waits for spliced connections.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Command-line driven startup options.
#[derive(Debug, Clone, Default)]
pub struct StartupOptions {
    /// Explicit config file; otherwise discovered in the working directory.
    pub config_path: Option<PathBuf>,
    /// Open the tunnel even if `ngrok.auto_start` is off.
    pub tunnel: bool,
}

/// Open the configured key store: a JSON file, or memory when no path is set.
pub fn open_key_store(config: &KeyStoreConfig) -> Result<Arc<dyn KeyStore>, KeyStoreError> {
    match &config.path {
        Some(path) => Ok(Arc::new(FileKeyStore::open(path)?)),
        None => Ok(Arc::new(MemoryKeyStore::new())),
    }
}

fn resolve_config_path(explicit: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    match explicit {
        Some(path) => Ok(path),
        None => {
            let cwd = std::env::current_dir().map_err(|source| ConfigError::Io {
                path: PathBuf::from("."),
                source,
            })?;
            discover_config(&cwd)
        }
    }
}

/// Run the gateway until a shutdown signal arrives.
pub async fn run(options: StartupOptions) -> Result<(), Box<dyn std::error::Error>> {
    let loaded = resolve_config_path(options.config_path).and_then(|path| {
        let config = load_config(&path)?;
        Ok((path, config))
    });

    let (config_path, config) = match loaded {
        Ok(loaded) => {
            logging::init_tracing(&loaded.1.observability)?;
            loaded
        }
        Err(e) => {
            let _ = logging::init_tracing(&ObservabilityConfig::default());
            tracing::error!(error = %e, "Failed to load configuration");
            return Err(e.into());
        }
    };

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        port = config.port,
        routes = config.routes.len(),
        "Liten Gateway starting"
    );

    let keys = open_key_store(&config.keys)?;
    let tunnels = Arc::new(NgrokAgent::from_config(config.ngrok.as_ref()));
    let bind_address = config.bind_address();
    let auto_tunnel = options.tunnel || config.ngrok.as_ref().is_some_and(|n| n.auto_start);
    let watch = config.watch;
    let gateway = Gateway::with_config_path(config, &config_path, keys, tunnels)?;
    let config = gateway.config();

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<std::net::SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&bind_address).await?;
    gateway.set_listen_port(listener.local_addr()?.port());

    let shutdown = Shutdown::new();

    if config.admin.enabled {
        let admin_listener = TcpListener::bind(&config.admin.bind_address).await?;
        let (gw, sd) = (gateway.clone(), shutdown.clone());
        tokio::spawn(async move {
            if let Err(e) = serve_admin(gw, admin_listener, sd).await {
                tracing::error!(error = %e, "Management API failed");
            }
        });
    }

    // Dropping the watcher stops it, so it lives until run returns.
    let _watcher = if watch {
        let (watcher, mut updates) = ConfigWatcher::new(&config_path);
        let handle = watcher.run()?;
        let gw = gateway.clone();
        tokio::spawn(async move {
            while let Some(next) = updates.recv().await {
                if let Err(e) = gw.apply_config(next) {
                    tracing::error!(error = %e, "Failed to apply watched configuration");
                }
            }
        });
        Some(handle)
    } else {
        None
    };

    tokio::spawn(reload_on_sighup(gateway.clone(), shutdown.subscribe()));

    if auto_tunnel {
        let gw = gateway.clone();
        tokio::spawn(async move { auto_start_tunnel(gw).await });
    }

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        signal_shutdown.trigger();
    });

    let server = HttpServer::new(gateway.clone());
    let result = server.run(listener, shutdown.clone()).await;

    shutdown.trigger();
    gateway.shutdown(DRAIN_TIMEOUT).await;
    tracing::info!("Shutdown complete");

    result.map_err(Into::into)
}

async fn auto_start_tunnel(gateway: Gateway) {
    match gateway.start_tunnel(None, TunnelOptions::default()).await {
        Ok(info) => tracing::info!(url = %info.url, "Public tunnel ready"),
        Err(TunnelError::AuthRequired(message)) => {
            tracing::error!(error = %message, "Tunnel needs an ngrok authtoken");
            for line in AUTH_REMEDIATION {
                tracing::error!("{}", line);
            }
        }
        Err(e) => tracing::error!(error = %e, "Failed to start tunnel, continuing without it"),
    }
}

/// Steps shown when the tunnel provider rejects the credentials.
pub const AUTH_REMEDIATION: [&str; 4] = [
    "1. Sign up or log in at https://dashboard.ngrok.com",
    "2. Copy your authtoken from https://dashboard.ngrok.com/get-started/your-authtoken",
    "3. export NGROK_AUTHTOKEN=<token> or set ngrok.authtoken in the config file",
    "4. Restart the gateway or run `liten-cli tunnel start`",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_store_follows_config() {
        let store = open_key_store(&KeyStoreConfig { path: None }).unwrap();
        assert!(store.add_key("k").unwrap());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");
        let store = open_key_store(&KeyStoreConfig {
            path: Some(path.to_string_lossy().into_owned()),
        })
        .unwrap();
        store.add_key("persisted").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn explicit_config_path_wins() {
        let path = PathBuf::from("/etc/liten/gateway.yaml");
        assert_eq!(resolve_config_path(Some(path.clone())).unwrap(), path);
    }
}
