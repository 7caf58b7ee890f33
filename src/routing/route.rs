//! Route definitions.
//!
//! A route maps one host or one path prefix to exactly one backend target
//! plus the policy flags that apply to traffic on it. Routes are immutable;
//! changing one means replacing it in the table.

use std::collections::BTreeMap;
use std::fmt;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::config::RouteConfig;
use crate::routing::matcher;

/// Errors raised while building a route.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("invalid target URL {target:?}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("unsupported target scheme {0:?} (expected http or ws)")]
    UnsupportedScheme(String),

    #[error("invalid header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("path prefix {0:?} must start with '/'")]
    InvalidPrefix(String),

    #[error("host must not be empty")]
    EmptyHost,
}

/// What a route is keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RouteKey {
    Domain(String),
    PathPrefix(String),
}

impl RouteKey {
    pub fn is_domain(&self) -> bool {
        matches!(self, RouteKey::Domain(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            RouteKey::Domain(host) => host,
            RouteKey::PathPrefix(prefix) => prefix,
        }
    }

    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RouteKey::Domain(_) => "domain",
            RouteKey::PathPrefix(_) => "path",
        }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteKey::Domain(host) => write!(f, "domain:{}", host),
            RouteKey::PathPrefix(prefix) => write!(f, "path:{}", prefix),
        }
    }
}

/// Where a route came from. Config routes are rebuilt on every reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteOrigin {
    Config,
    Runtime,
}

/// Policy flags attached to a route.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct RouteOptions {
    /// Require a valid API key (`x-api-key` header or `key` query parameter).
    pub api_key_required: bool,

    /// Accept protocol-upgrade handshakes (WebSocket).
    pub ws: bool,

    /// Requests per window per scope. `None` falls back to the global default.
    pub rate_limit: Option<u32>,

    /// Add permissive CORS headers to responses.
    pub cors: bool,

    /// Headers set on every outbound request.
    pub headers: BTreeMap<String, String>,
}

impl Default for RouteOptions {
    fn default() -> Self {
        Self {
            api_key_required: true,
            ws: false,
            rate_limit: None,
            cors: false,
            headers: BTreeMap::new(),
        }
    }
}

/// A parsed backend target.
///
/// `ws://` targets are dialed as `http://`; the upgrade handshake itself
/// carries the protocol switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    url: Url,
}

impl Target {
    pub fn parse(raw: &str) -> Result<Self, RouteError> {
        let url = Url::parse(raw).map_err(|e| RouteError::InvalidTarget {
            target: raw.to_string(),
            reason: e.to_string(),
        })?;

        match url.scheme() {
            "http" | "ws" => {}
            other => return Err(RouteError::UnsupportedScheme(other.to_string())),
        }

        if url.host_str().map_or(true, str::is_empty) {
            return Err(RouteError::InvalidTarget {
                target: raw.to_string(),
                reason: "missing host".to_string(),
            });
        }

        Ok(Self { url })
    }

    /// `host[:port]` used for both dialing and the rewritten `Host` header.
    pub fn authority(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// Path the target was declared with, without a trailing slash.
    pub fn base_path(&self) -> &str {
        self.url.path().trim_end_matches('/')
    }

    /// Absolute `http://` URI for a request path (and optional query).
    pub fn uri_for(&self, path: &str, query: Option<&str>) -> String {
        let path = matcher::join_paths(self.base_path(), path);
        match query {
            Some(q) if !q.is_empty() => format!("http://{}{}?{}", self.authority(), path, q),
            _ => format!("http://{}{}", self.authority(), path),
        }
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

impl Serialize for Target {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.url.as_str())
    }
}

/// A compiled route.
#[derive(Debug, Clone, Serialize)]
pub struct Route {
    pub key: RouteKey,
    pub target: Target,
    pub requires_api_key: bool,
    pub supports_upgrade: bool,
    pub rate_limit: Option<u32>,
    pub cors_enabled: bool,
    pub custom_headers: BTreeMap<String, String>,
    pub origin: RouteOrigin,
    #[serde(skip)]
    header_map: HeaderMap,
}

impl Route {
    /// Build a host route. The host is normalised (lowercase, port dropped).
    pub fn domain(
        host: &str,
        target: &str,
        options: RouteOptions,
        origin: RouteOrigin,
    ) -> Result<Self, RouteError> {
        let host = matcher::normalize_host(host);
        if host.is_empty() {
            return Err(RouteError::EmptyHost);
        }
        Self::build(RouteKey::Domain(host), target, options, origin)
    }

    /// Build a path-prefix route.
    pub fn path(
        prefix: &str,
        target: &str,
        options: RouteOptions,
        origin: RouteOrigin,
    ) -> Result<Self, RouteError> {
        if !prefix.starts_with('/') {
            return Err(RouteError::InvalidPrefix(prefix.to_string()));
        }
        Self::build(RouteKey::PathPrefix(prefix.to_string()), target, options, origin)
    }

    pub fn from_config(key: RouteKey, config: &RouteConfig, origin: RouteOrigin) -> Result<Self, RouteError> {
        match key {
            RouteKey::Domain(host) => Self::domain(&host, &config.target, config.options.clone(), origin),
            RouteKey::PathPrefix(prefix) => Self::path(&prefix, &config.target, config.options.clone(), origin),
        }
    }

    fn build(
        key: RouteKey,
        target: &str,
        options: RouteOptions,
        origin: RouteOrigin,
    ) -> Result<Self, RouteError> {
        let target = Target::parse(target)?;
        let header_map = compile_headers(&options.headers)?;

        Ok(Self {
            key,
            target,
            requires_api_key: options.api_key_required,
            supports_upgrade: options.ws,
            rate_limit: options.rate_limit,
            cors_enabled: options.cors,
            custom_headers: options.headers,
            origin,
            header_map,
        })
    }

    /// Custom headers in wire form.
    pub fn header_map(&self) -> &HeaderMap {
        &self.header_map
    }

    /// Path sent to the backend: the matched prefix is stripped for path
    /// routes, domain routes pass the path through.
    pub fn rewrite_path<'a>(&self, path: &'a str) -> std::borrow::Cow<'a, str> {
        match &self.key {
            RouteKey::Domain(_) => std::borrow::Cow::Borrowed(path),
            RouteKey::PathPrefix(prefix) => matcher::strip_prefix(path, prefix),
        }
    }
}

fn compile_headers(headers: &BTreeMap<String, String>) -> Result<HeaderMap, RouteError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| RouteError::InvalidHeader {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| RouteError::InvalidHeader {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}
