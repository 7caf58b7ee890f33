//! The gateway's owned state.
//!
//! A [`Gateway`] is built once at startup and handed (cheaply cloned) to
//! the HTTP server, the upgrade dispatcher and the management API. It owns
//! the route table, the auth gate, the rate limiter, the upgrade cache, the
//! proxy engine and the tunnel manager, and exposes the management
//! operations that mutate them.

pub mod status;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use serde::Serialize;

use crate::config::{load_config, validate_config, ConfigError, GatewayConfig, ValidationError};
use crate::http::{ProxyEngine, UpgradeRouteCache};
use crate::net::SpliceTracker;
use crate::observability::ActivityLog;
use crate::routing::{Route, RouteError, RouteKey, RouteOptions, RouteOrigin, RouteTable};
use crate::security::{AuthGate, KeyStore, KeyStoreError, RateLimiter};
use crate::tunnel::{TunnelError, TunnelInfo, TunnelManager, TunnelOptions, TunnelProvider, TunnelStatus};

pub use status::{GatewayStats, GatewayStatus, SpliceStats, StatsSnapshot};

/// Result of applying a configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ReloadSummary {
    pub path_routes: usize,
    pub domains: usize,
    /// Hosts whose route was replaced or dropped by the reload.
    pub changed_domains: Vec<String>,
}

struct GatewayInner {
    config: ArcSwap<GatewayConfig>,
    config_path: Option<PathBuf>,
    routes: RouteTable,
    auth: AuthGate,
    limiter: Arc<RateLimiter>,
    upgrades: UpgradeRouteCache,
    proxy: ProxyEngine,
    tunnel: TunnelManager,
    activity: Arc<ActivityLog>,
    stats: GatewayStats,
    splices: SpliceTracker,
    listen_port: AtomicU16,
    started_at: Instant,
}

/// Shared handle to the running gateway.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl Gateway {
    /// Build a gateway from a validated configuration.
    pub fn new(
        config: GatewayConfig,
        keys: Arc<dyn KeyStore>,
        tunnels: Arc<dyn TunnelProvider>,
    ) -> Result<Self, ConfigError> {
        Self::build(config, None, keys, tunnels)
    }

    /// Like [`Gateway::new`], remembering where the configuration came from
    /// so `reload_config` can re-read it.
    pub fn with_config_path(
        config: GatewayConfig,
        path: impl AsRef<Path>,
        keys: Arc<dyn KeyStore>,
        tunnels: Arc<dyn TunnelProvider>,
    ) -> Result<Self, ConfigError> {
        Self::build(config, Some(path.as_ref().to_path_buf()), keys, tunnels)
    }

    fn build(
        config: GatewayConfig,
        config_path: Option<PathBuf>,
        keys: Arc<dyn KeyStore>,
        tunnels: Arc<dyn TunnelProvider>,
    ) -> Result<Self, ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;
        let (paths, domains) = compile_routes(&config)?;

        let routes = RouteTable::new();
        routes.apply_config(paths, domains);

        let activity = Arc::new(ActivityLog::new(config.observability.activity_log_capacity));
        let proxy = ProxyEngine::new(Duration::from_secs(config.timeouts.connect_secs), activity.clone());
        let limiter = Arc::new(RateLimiter::new(Duration::from_secs(config.rate_limit.window_secs)));

        tracing::info!(
            path_routes = routes.path_count(),
            domains = routes.domain_count(),
            "Gateway initialised"
        );

        Ok(Self {
            inner: Arc::new(GatewayInner {
                listen_port: AtomicU16::new(config.port),
                config: ArcSwap::from_pointee(config),
                config_path,
                routes,
                auth: AuthGate::new(keys),
                limiter,
                upgrades: UpgradeRouteCache::new(),
                proxy,
                tunnel: TunnelManager::new(tunnels),
                activity,
                stats: GatewayStats::default(),
                splices: SpliceTracker::new(),
                started_at: Instant::now(),
            }),
        })
    }

    pub fn config(&self) -> Arc<GatewayConfig> {
        self.inner.config.load_full()
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.inner.config_path.as_deref()
    }

    pub fn routes(&self) -> &RouteTable {
        &self.inner.routes
    }

    pub fn auth(&self) -> &AuthGate {
        &self.inner.auth
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }

    pub fn limiter_handle(&self) -> Arc<RateLimiter> {
        self.inner.limiter.clone()
    }

    pub fn upgrades(&self) -> &UpgradeRouteCache {
        &self.inner.upgrades
    }

    pub fn proxy(&self) -> &ProxyEngine {
        &self.inner.proxy
    }

    pub fn tunnel(&self) -> &TunnelManager {
        &self.inner.tunnel
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.inner.activity
    }

    pub fn stats(&self) -> &GatewayStats {
        &self.inner.stats
    }

    pub fn splices(&self) -> &SpliceTracker {
        &self.inner.splices
    }

    pub fn key_store(&self) -> &Arc<dyn KeyStore> {
        self.inner.auth.store()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.inner.config.load().timeouts.connect_secs)
    }

    pub fn cors_preflight(&self) -> bool {
        self.inner.config.load().cors.preflight
    }

    pub fn default_rate_limit(&self) -> Option<u32> {
        self.inner.config.load().rate_limit.default_limit
    }

    pub fn listen_port(&self) -> u16 {
        self.inner.listen_port.load(Ordering::Relaxed)
    }

    /// Record the port actually bound (differs from config when it was 0).
    pub fn set_listen_port(&self, port: u16) {
        self.inner.listen_port.store(port, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.inner.started_at.elapsed()
    }

    // ---- domain management ----

    /// Add or replace a runtime domain route. Returns the route it replaced.
    pub fn add_domain(
        &self,
        host: &str,
        target: &str,
        options: RouteOptions,
    ) -> Result<Option<Arc<Route>>, RouteError> {
        let route = Route::domain(host, target, options, RouteOrigin::Runtime)?;
        let key = route.key.clone();
        let line = format!("[Domain] {} -> {} added", key.as_str(), route.target);

        let previous = self.inner.routes.insert_domain(route);
        self.inner.upgrades.invalidate(&key);

        tracing::info!(host = %key.as_str(), target = %target, replaced = previous.is_some(), "Domain route added");
        self.inner.activity.record(line);
        Ok(previous)
    }

    /// Remove a domain route. Missing hosts are a no-op returning `false`.
    pub fn remove_domain(&self, host: &str) -> bool {
        match self.inner.routes.remove_domain(host) {
            Some(route) => {
                self.inner.upgrades.invalidate(&route.key);
                tracing::info!(host = %route.key.as_str(), "Domain route removed");
                self.inner
                    .activity
                    .record(format!("[Domain] {} removed", route.key.as_str()));
                true
            }
            None => false,
        }
    }

    pub fn list_domains(&self) -> Vec<Arc<Route>> {
        self.inner.routes.list_domains()
    }

    pub fn show_domain(&self, host: &str) -> Option<Arc<Route>> {
        self.inner.routes.show_domain(host)
    }

    pub fn list_path_routes(&self) -> Vec<Arc<Route>> {
        self.inner.routes.list_paths()
    }

    // ---- keys ----

    pub fn add_key(&self, key: &str) -> Result<bool, KeyStoreError> {
        let added = self.key_store().add_key(key)?;
        if added {
            self.inner.activity.record("[Keys] API key added");
        }
        Ok(added)
    }

    pub fn remove_key(&self, key: &str) -> Result<bool, KeyStoreError> {
        let removed = self.key_store().remove_key(key)?;
        if removed {
            self.inner.activity.record("[Keys] API key removed");
        }
        Ok(removed)
    }

    pub fn list_keys(&self) -> Vec<String> {
        self.key_store().list_keys()
    }

    // ---- reporting ----

    pub fn status(&self) -> GatewayStatus {
        let uptime_seconds = self.uptime().as_secs();
        let (bytes_to_backend, bytes_to_client) = self.inner.splices.bytes_relayed();

        GatewayStatus {
            version: env!("CARGO_PKG_VERSION"),
            port: self.listen_port(),
            uptime: format!("{}s", uptime_seconds),
            uptime_seconds,
            domains: self.inner.routes.domain_count(),
            path_routes: self.inner.routes.path_count(),
            rate_limit_buckets: self.inner.limiter.bucket_count(),
            api_keys: self.key_store().list_keys().len(),
            stats: self.inner.stats.snapshot(),
            splices: SpliceStats {
                active: self.inner.splices.active_count(),
                total: self.inner.splices.total_count(),
                cached_splicers: self.inner.upgrades.len(),
                bytes_to_backend,
                bytes_to_client,
            },
            tunnel: self.inner.tunnel.status(),
        }
    }

    /// The last `n` activity lines.
    pub fn logs(&self, n: usize) -> Vec<String> {
        self.inner.activity.tail(n)
    }

    // ---- configuration ----

    /// Re-read the configuration file and apply it.
    pub fn reload_config(&self) -> Result<ReloadSummary, ConfigError> {
        let path = self
            .inner
            .config_path
            .clone()
            .ok_or_else(|| ConfigError::NotFound { searched: Vec::new() })?;

        match load_config(&path).and_then(|config| self.apply_config(config)) {
            Ok(summary) => Ok(summary),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Reload failed, keeping current configuration");
                self.inner.activity.record(format!("[Config] Reload failed: {}", e));
                Err(e)
            }
        }
    }

    /// Install a new configuration without touching the listener: path
    /// routes are replaced, config domains re-seeded, runtime domains kept.
    pub fn apply_config(&self, config: GatewayConfig) -> Result<ReloadSummary, ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;
        let (paths, domains) = compile_routes(&config)?;

        let changed_domains = self.inner.routes.apply_config(paths, domains);
        for host in &changed_domains {
            self.inner.upgrades.invalidate(&RouteKey::Domain(host.clone()));
        }
        self.inner.upgrades.invalidate_paths();
        self.inner
            .limiter
            .set_window(Duration::from_secs(config.rate_limit.window_secs));

        if config.port != self.inner.config.load().port {
            tracing::warn!(port = config.port, "Port changes take effect on restart");
        }
        self.inner.config.store(Arc::new(config));

        let summary = ReloadSummary {
            path_routes: self.inner.routes.path_count(),
            domains: self.inner.routes.domain_count(),
            changed_domains,
        };
        tracing::info!(
            path_routes = summary.path_routes,
            domains = summary.domains,
            "Configuration applied"
        );
        self.inner.activity.record(format!(
            "[Config] Reloaded: {} path routes, {} domains",
            summary.path_routes, summary.domains
        ));
        Ok(summary)
    }

    // ---- tunnel ----

    /// Open the public tunnel. `port` defaults to the listening port; unset
    /// options fall back to the `ngrok` config section.
    pub async fn start_tunnel(&self, port: Option<u16>, options: TunnelOptions) -> Result<TunnelInfo, TunnelError> {
        let port = port.unwrap_or_else(|| self.listen_port());
        let options = options.with_defaults(self.inner.config.load().ngrok.as_ref());

        self.inner
            .activity
            .record(format!("[ngrok] Starting tunnel on port {}...", port));
        match self.inner.tunnel.start(port, options).await {
            Ok(info) => {
                self.inner
                    .activity
                    .record(format!("[ngrok] Tunnel started: {} -> localhost:{}", info.url, port));
                Ok(info)
            }
            Err(e) => {
                self.inner
                    .activity
                    .record(format!("[ngrok] Error starting tunnel: {}", e));
                Err(e)
            }
        }
    }

    pub async fn stop_tunnel(&self) -> Result<bool, TunnelError> {
        let url = self.inner.tunnel.url();
        let stopped = self.inner.tunnel.stop().await?;
        if stopped {
            self.inner
                .activity
                .record(format!("[ngrok] Tunnel stopped: {}", url.unwrap_or_default()));
        }
        Ok(stopped)
    }

    pub fn tunnel_status(&self) -> Option<TunnelStatus> {
        self.inner.tunnel.status()
    }

    pub fn is_tunnel_active(&self) -> bool {
        self.inner.tunnel.is_active()
    }

    pub fn tunnel_url(&self) -> Option<String> {
        self.inner.tunnel.url()
    }

    /// Teardown: stop the tunnel (best effort) and wait briefly for
    /// spliced connections.
    pub async fn shutdown(&self, drain: Duration) {
        if let Err(e) = self.stop_tunnel().await {
            tracing::warn!(error = %e, "Error stopping tunnel during shutdown");
        }
        if !self.inner.splices.wait_for_drain(drain).await {
            tracing::warn!(
                active = self.inner.splices.active_count(),
                "Spliced connections still open at shutdown"
            );
        }
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("port", &self.listen_port())
            .field("path_routes", &self.inner.routes.path_count())
            .field("domains", &self.inner.routes.domain_count())
            .finish_non_exhaustive()
    }
}

fn compile_routes(config: &GatewayConfig) -> Result<(Vec<Route>, Vec<Route>), ConfigError> {
    let mut errors = Vec::new();
    let mut paths = Vec::with_capacity(config.routes.len());
    let mut domains = Vec::with_capacity(config.domains.len());

    for (prefix, route) in &config.routes {
        match Route::from_config(RouteKey::PathPrefix(prefix.clone()), route, RouteOrigin::Config) {
            Ok(r) => paths.push(r),
            Err(e) => errors.push(ValidationError {
                field: format!("routes.{}", prefix),
                message: e.to_string(),
            }),
        }
    }
    for (host, route) in &config.domains {
        match Route::from_config(RouteKey::Domain(host.clone()), route, RouteOrigin::Config) {
            Ok(r) => domains.push(r),
            Err(e) => errors.push(ValidationError {
                field: format!("domains.{}", host),
                message: e.to_string(),
            }),
        }
    }

    if errors.is_empty() {
        Ok((paths, domains))
    } else {
        Err(ConfigError::Validation(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteConfig;
    use crate::security::MemoryKeyStore;
    use async_trait::async_trait;
    use crate::tunnel::TunnelHandle;

    struct NoTunnel;

    #[async_trait]
    impl TunnelProvider for NoTunnel {
        async fn open(&self, _port: u16, _options: &TunnelOptions) -> Result<Box<dyn TunnelHandle>, TunnelError> {
            Err(TunnelError::Provider("tunnels disabled".into()))
        }
    }

    fn gateway(config: GatewayConfig) -> Gateway {
        Gateway::new(config, Arc::new(MemoryKeyStore::with_keys(["k"])), Arc::new(NoTunnel)).unwrap()
    }

    fn ws_options() -> RouteOptions {
        RouteOptions { ws: true, ..RouteOptions::default() }
    }

    #[test]
    fn add_domain_twice_replaces_and_invalidates_splicer() {
        let gw = gateway(GatewayConfig::default());
        assert!(gw.add_domain("chat.test", "ws://one:1", ws_options()).unwrap().is_none());

        let route = gw.show_domain("chat.test").unwrap();
        gw.upgrades().get_or_build(&route, Duration::from_secs(1));
        assert!(gw.upgrades().contains(&route.key));

        let replaced = gw.add_domain("chat.test", "ws://two:1", ws_options()).unwrap().unwrap();
        assert_eq!(replaced.target.authority(), "one:1");
        assert!(!gw.upgrades().contains(&route.key));
        assert_eq!(gw.list_domains().len(), 1);
    }

    #[test]
    fn remove_domain_is_idempotent() {
        let gw = gateway(GatewayConfig::default());
        gw.add_domain("chat.test", "ws://one:1", ws_options()).unwrap();
        let route = gw.show_domain("chat.test").unwrap();
        gw.upgrades().get_or_build(&route, Duration::from_secs(1));

        assert!(gw.remove_domain("chat.test"));
        assert!(!gw.upgrades().contains(&route.key));
        assert!(gw.routes().resolve_upgrade("chat.test", "/").is_none());
        assert!(!gw.remove_domain("chat.test"));
        assert!(!gw.remove_domain("never.test"));
    }

    #[test]
    fn apply_config_keeps_runtime_domains_and_reorders_paths() {
        let mut config = GatewayConfig::default();
        config.routes.push(("/a".into(), RouteConfig::new("http://127.0.0.1:1")));
        let gw = gateway(config);
        gw.add_domain("rt.test", "http://127.0.0.1:2", RouteOptions::default()).unwrap();

        let mut next = GatewayConfig::default();
        next.routes.push(("/b".into(), RouteConfig::new("http://127.0.0.1:3")));
        next.routes.push(("/b/c".into(), RouteConfig::new("http://127.0.0.1:4")));
        next.rate_limit.window_secs = 5;
        let summary = gw.apply_config(next).unwrap();

        assert_eq!(summary.path_routes, 2);
        assert_eq!(summary.domains, 1);
        assert!(gw.routes().resolve("x", "/a").is_none());
        assert_eq!(gw.routes().resolve("x", "/b/c").unwrap().target.authority(), "127.0.0.1:3");
        assert_eq!(gw.limiter().window(), Duration::from_secs(5));
    }

    #[test]
    fn invalid_config_is_rejected_and_current_kept() {
        let mut config = GatewayConfig::default();
        config.routes.push(("/a".into(), RouteConfig::new("http://127.0.0.1:1")));
        let gw = gateway(config);

        let mut bad = GatewayConfig::default();
        bad.routes.push(("/a".into(), RouteConfig::new("https://tls.test")));
        assert!(matches!(gw.apply_config(bad), Err(ConfigError::Validation(_))));
        assert!(gw.routes().resolve("x", "/a").is_some());
    }

    #[test]
    fn reload_without_path_is_not_found() {
        let gw = gateway(GatewayConfig::default());
        assert!(matches!(gw.reload_config(), Err(ConfigError::NotFound { .. })));
    }

    #[test]
    fn reload_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[routes.\"/one\"]\ntarget = \"http://127.0.0.1:1\"\n").unwrap();

        let config = load_config(&path).unwrap();
        let gw = Gateway::with_config_path(config, &path, Arc::new(MemoryKeyStore::new()), Arc::new(NoTunnel)).unwrap();
        assert!(gw.routes().resolve("x", "/one").is_some());

        std::fs::write(&path, "[routes.\"/two\"]\ntarget = \"http://127.0.0.1:2\"\n").unwrap();
        gw.reload_config().unwrap();
        assert!(gw.routes().resolve("x", "/one").is_none());
        assert!(gw.routes().resolve("x", "/two").is_some());
        assert!(gw.logs(1)[0].contains("[Config] Reloaded"));
    }

    #[tokio::test]
    async fn tunnel_failure_is_reported() {
        let gw = gateway(GatewayConfig::default());
        assert!(gw.start_tunnel(None, TunnelOptions::default()).await.is_err());
        assert!(!gw.is_tunnel_active());
        assert!(gw.tunnel_status().is_none());
        assert!(!gw.stop_tunnel().await.unwrap());
    }

    #[test]
    fn status_reports_counts() {
        let mut config = GatewayConfig::default();
        config.routes.push(("/a".into(), RouteConfig::new("http://127.0.0.1:1")));
        let gw = gateway(config);
        gw.add_domain("a.test", "http://127.0.0.1:2", RouteOptions::default()).unwrap();

        let status = gw.status();
        assert_eq!(status.path_routes, 1);
        assert_eq!(status.domains, 1);
        assert_eq!(status.api_keys, 1);
        assert!(status.tunnel.is_none());
        assert!(status.to_string().contains("tunnel:      inactive"));
    }
}
