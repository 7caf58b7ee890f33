//! Tunnel provider contract.
//!
//! A provider opens a public endpoint forwarding to a local port and hands
//! back a handle that can later close it. The manager never touches the
//! network itself.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::NgrokConfig;

/// Environment variable consulted when no authtoken is passed explicitly.
pub const AUTHTOKEN_ENV: &str = "NGROK_AUTHTOKEN";

/// Errors surfaced by tunnel operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TunnelError {
    #[error("Tunnel is already running. Stop the current tunnel first.")]
    AlreadyActive,

    /// The provider refused the credentials (or none were given).
    #[error("tunnel provider requires authentication: {0}")]
    AuthRequired(String),

    #[error("{0}")]
    Provider(String),
}

impl TunnelError {
    /// Short machine-readable label.
    pub fn kind(&self) -> &'static str {
        match self {
            TunnelError::AlreadyActive => "tunnel_already_active",
            TunnelError::AuthRequired(_) => "tunnel_auth_required",
            TunnelError::Provider(_) => "tunnel_provider_error",
        }
    }
}

/// Options for opening a tunnel.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct TunnelOptions {
    #[serde(skip_serializing)]
    pub authtoken: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subdomain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl TunnelOptions {
    /// Fill unset fields from configuration. Authtoken precedence is the
    /// explicit option, then `NGROK_AUTHTOKEN`, then the config file.
    pub fn with_defaults(mut self, config: Option<&NgrokConfig>) -> Self {
        if self.authtoken.is_none() {
            self.authtoken = std::env::var(AUTHTOKEN_ENV)
                .ok()
                .filter(|t| !t.is_empty())
                .or_else(|| config.and_then(|c| c.authtoken.clone()));
        }
        if let Some(config) = config {
            self.domain = self.domain.or_else(|| config.domain.clone());
            self.subdomain = self.subdomain.or_else(|| config.subdomain.clone());
            self.region = self.region.or_else(|| config.region.clone());
        }
        self
    }
}

/// A live tunnel.
#[async_trait]
pub trait TunnelHandle: Send + Sync {
    /// Public URL of the tunnel.
    fn url(&self) -> &str;

    /// Tear the tunnel down.
    async fn close(&mut self) -> Result<(), TunnelError>;
}

/// Opens tunnels.
#[async_trait]
pub trait TunnelProvider: Send + Sync {
    async fn open(&self, port: u16, options: &TunnelOptions) -> Result<Box<dyn TunnelHandle>, TunnelError>;
}

/// What the manager records about an active tunnel.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelInfo {
    pub url: String,
    pub port: u16,
    pub start_time: DateTime<Utc>,
    pub options: TunnelOptions,
}

/// Status report for an active tunnel.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelStatus {
    pub url: String,
    pub port: u16,
    /// Whole seconds formatted as `"<n>s"`.
    pub uptime: String,
    pub uptime_seconds: u64,
    pub start_time: DateTime<Utc>,
    pub options: TunnelOptions,
}

impl TunnelStatus {
    pub fn at(info: &TunnelInfo, now: DateTime<Utc>) -> Self {
        let uptime_seconds = (now - info.start_time).num_seconds().max(0) as u64;
        Self {
            url: info.url.clone(),
            port: info.port,
            uptime: format!("{}s", uptime_seconds),
            uptime_seconds,
            start_time: info.start_time,
            options: info.options.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_options_win_over_config() {
        let config = NgrokConfig {
            authtoken: Some("from-config".into()),
            region: Some("eu".into()),
            domain: Some("cfg.ngrok.app".into()),
            ..NgrokConfig::default()
        };
        let options = TunnelOptions {
            authtoken: Some("explicit".into()),
            region: Some("us".into()),
            ..TunnelOptions::default()
        }
        .with_defaults(Some(&config));

        assert_eq!(options.authtoken.as_deref(), Some("explicit"));
        assert_eq!(options.region.as_deref(), Some("us"));
        assert_eq!(options.domain.as_deref(), Some("cfg.ngrok.app"));
    }

    #[test]
    fn status_formats_uptime_and_hides_token() {
        let start = Utc::now() - chrono::Duration::seconds(42);
        let info = TunnelInfo {
            url: "https://abc.ngrok.app".into(),
            port: 8080,
            start_time: start,
            options: TunnelOptions {
                authtoken: Some("secret".into()),
                ..TunnelOptions::default()
            },
        };

        let status = TunnelStatus::at(&info, start + chrono::Duration::seconds(42));
        assert_eq!(status.uptime, "42s");
        assert_eq!(status.uptime_seconds, 42);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["uptimeSeconds"], 42);
        assert!(json["options"].get("authtoken").is_none());
    }

    #[test]
    fn error_kinds() {
        assert_eq!(TunnelError::AlreadyActive.kind(), "tunnel_already_active");
        assert_eq!(TunnelError::AuthRequired("x".into()).kind(), "tunnel_auth_required");
    }
}
