//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::routing::RouteOptions;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Port the gateway listens on.
    pub port: u16,

    /// Interface to bind (e.g., "0.0.0.0").
    pub bind_host: String,

    /// Path-prefix routes, in declaration order.
    #[serde(
        deserialize_with = "deserialize_ordered_routes",
        serialize_with = "serialize_ordered_routes"
    )]
    pub routes: Vec<(String, RouteConfig)>,

    /// Host routes seeded at load. `*` is the wildcard fallback.
    pub domains: BTreeMap<String, RouteConfig>,

    /// Rate limiting defaults.
    pub rate_limit: RateLimitConfig,

    /// CORS handling shared by every route.
    pub cors: CorsConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// API key store location.
    pub keys: KeyStoreConfig,

    /// Optional public tunnel.
    pub ngrok: Option<NgrokConfig>,

    /// Management API settings.
    pub admin: AdminConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Reload the configuration when the file changes on disk.
    pub watch: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_host: "0.0.0.0".to_string(),
            routes: Vec::new(),
            domains: BTreeMap::new(),
            rate_limit: RateLimitConfig::default(),
            cors: CorsConfig::default(),
            timeouts: TimeoutConfig::default(),
            keys: KeyStoreConfig::default(),
            ngrok: None,
            admin: AdminConfig::default(),
            observability: ObservabilityConfig::default(),
            watch: false,
        }
    }
}

impl GatewayConfig {
    /// Socket address the HTTP listener binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }

    /// Look up a path route by its exact prefix.
    pub fn route(&self, prefix: &str) -> Option<&RouteConfig> {
        self.routes
            .iter()
            .find(|(p, _)| p == prefix)
            .map(|(_, route)| route)
    }
}

/// A single route: one target plus its policy flags.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RouteConfig {
    /// Backend target URL (`http://` or `ws://`).
    pub target: String,

    #[serde(flatten)]
    pub options: RouteOptions,
}

impl RouteConfig {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            options: RouteOptions::default(),
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Window length in seconds.
    pub window_secs: u64,

    /// Cap applied to routes that do not declare their own `rate_limit`.
    pub default_limit: Option<u32>,

    /// How often expired buckets are swept.
    pub gc_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            default_limit: None,
            gc_interval_secs: 30,
        }
    }
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Answer every `OPTIONS` request with 200 and the CORS headers.
    pub preflight: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self { preflight: true }
    }
}

/// Timeout configuration for backend calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// Key store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct KeyStoreConfig {
    /// JSON file holding the key list. `None` keeps keys in memory only.
    pub path: Option<String>,
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        Self {
            path: Some("keys.json".to_string()),
        }
    }
}

/// ngrok tunnel configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct NgrokConfig {
    /// Open the tunnel as soon as the gateway is listening.
    pub auto_start: bool,

    pub authtoken: Option<String>,
    pub domain: Option<String>,
    pub subdomain: Option<String>,

    /// One of us, eu, ap, au, sa, jp, in.
    pub region: Option<String>,

    /// Path or name of the ngrok agent executable.
    pub binary: Option<String>,

    /// Seconds to wait for the agent to report its public URL.
    pub startup_timeout_secs: Option<u64>,
}

/// Management API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the management API.
    pub enabled: bool,

    /// Management API bind address.
    pub bind_address: String,

    /// Bearer token required on every management call.
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "127.0.0.1:8081".to_string(),
            api_key: String::new(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// Number of recent activity lines kept for `logs`.
    pub activity_log_capacity: usize,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "liten_gateway=info,tower_http=info".to_string(),
            log_format: LogFormat::default(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
            activity_log_capacity: 1000,
        }
    }
}

// Route maps keep the order they were written in; first prefix match wins.
fn deserialize_ordered_routes<'de, D>(deserializer: D) -> Result<Vec<(String, RouteConfig)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct OrderedRoutes;

    impl<'de> Visitor<'de> for OrderedRoutes {
        type Value = Vec<(String, RouteConfig)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of path prefixes to routes")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut routes: Vec<(String, RouteConfig)> = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((prefix, route)) = map.next_entry::<String, RouteConfig>()? {
                match routes.iter_mut().find(|(p, _)| *p == prefix) {
                    Some(existing) => existing.1 = route,
                    None => routes.push((prefix, route)),
                }
            }
            Ok(routes)
        }
    }

    deserializer.deserialize_map(OrderedRoutes)
}

fn serialize_ordered_routes<S>(routes: &[(String, RouteConfig)], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_map(routes.iter().map(|(prefix, route)| (prefix, route)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_uses_defaults() {
        let config: GatewayConfig = toml::from_str("port = 9000").unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.rate_limit.window_secs, 60);
        assert!(config.cors.preflight);
        assert!(config.routes.is_empty());
        assert!(config.ngrok.is_none());
    }

    #[test]
    fn routes_keep_declaration_order() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [routes."/zeta"]
            target = "http://127.0.0.1:9001"

            [routes."/alpha"]
            target = "http://127.0.0.1:9002"
            rate_limit = 5

            [routes."/mid"]
            target = "ws://127.0.0.1:9003"
            ws = true
            api_key_required = false
            "#,
        )
        .unwrap();

        let prefixes: Vec<&str> = config.routes.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(prefixes, ["/zeta", "/alpha", "/mid"]);

        let alpha = config.route("/alpha").unwrap();
        assert_eq!(alpha.options.rate_limit, Some(5));
        assert!(alpha.options.api_key_required);

        let mid = config.route("/mid").unwrap();
        assert!(mid.options.ws);
        assert!(!mid.options.api_key_required);
    }

    #[test]
    fn json_routes_keep_declaration_order() {
        let config: GatewayConfig = serde_json::from_str(
            r#"{
                "port": 8080,
                "routes": {
                    "/b": { "target": "http://127.0.0.1:1" },
                    "/a": { "target": "http://127.0.0.1:2", "headers": { "x-team": "core" } }
                }
            }"#,
        )
        .unwrap();

        let prefixes: Vec<&str> = config.routes.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(prefixes, ["/b", "/a"]);
        assert_eq!(config.route("/a").unwrap().options.headers["x-team"], "core");
    }

    #[test]
    fn yaml_ngrok_section() {
        let config: GatewayConfig = serde_yaml::from_str(
            "port: 8080\nngrok:\n  auto_start: true\n  region: eu\nroutes:\n  /echo:\n    target: http://backend:9000\n    rate_limit: 5\n",
        )
        .unwrap();

        let ngrok = config.ngrok.as_ref().unwrap();
        assert!(ngrok.auto_start);
        assert_eq!(ngrok.region.as_deref(), Some("eu"));
        assert_eq!(config.route("/echo").unwrap().options.rate_limit, Some(5));
    }
}
