use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::config::{ConfigError, RouteConfig};
use crate::gateway::{Gateway, GatewayStatus, ReloadSummary};
use crate::observability::activity::DEFAULT_TAIL;
use crate::routing::{Route, RouteError, RouteOrigin};
use crate::security::KeyStoreError;
use crate::tunnel::{TunnelError, TunnelInfo, TunnelOptions, TunnelStatus};

/// Management API failures, rendered as `{"error", "kind"}`.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("missing or invalid management token")]
    Unauthorized,

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),
}

impl AdminError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            AdminError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AdminError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AdminError::Route(_) => (StatusCode::BAD_REQUEST, "invalid_route"),
            AdminError::Config(_) => (StatusCode::UNPROCESSABLE_ENTITY, "config_error"),
            AdminError::Tunnel(e) => {
                let status = match e {
                    TunnelError::AlreadyActive => StatusCode::CONFLICT,
                    TunnelError::AuthRequired(_) => StatusCode::UNAUTHORIZED,
                    TunnelError::Provider(_) => StatusCode::BAD_GATEWAY,
                };
                (status, e.kind())
            }
            AdminError::KeyStore(_) => (StatusCode::INTERNAL_SERVER_ERROR, "key_store_error"),
        }
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        (status, Json(json!({ "error": self.to_string(), "kind": kind }))).into_response()
    }
}

/// Route as shown to operators.
#[derive(Debug, Serialize)]
pub struct RouteView {
    pub kind: &'static str,
    #[serde(rename = "match")]
    pub match_key: String,
    pub target: String,
    pub api_key_required: bool,
    pub ws: bool,
    pub rate_limit: Option<u32>,
    pub cors: bool,
    pub headers: BTreeMap<String, String>,
    pub origin: RouteOrigin,
}

impl From<&Route> for RouteView {
    fn from(route: &Route) -> Self {
        Self {
            kind: route.key.kind(),
            match_key: route.key.as_str().to_string(),
            target: route.target.to_string(),
            api_key_required: route.requires_api_key,
            ws: route.supports_upgrade,
            rate_limit: route.rate_limit,
            cors: route.cors_enabled,
            headers: route.custom_headers.clone(),
            origin: route.origin,
        }
    }
}

pub async fn get_status(State(gateway): State<Gateway>) -> Json<GatewayStatus> {
    Json(gateway.status())
}

pub async fn list_routes(State(gateway): State<Gateway>) -> Json<Vec<RouteView>> {
    Json(gateway.list_path_routes().iter().map(|r| RouteView::from(&**r)).collect())
}

pub async fn list_domains(State(gateway): State<Gateway>) -> Json<Vec<RouteView>> {
    Json(gateway.list_domains().iter().map(|r| RouteView::from(&**r)).collect())
}

pub async fn show_domain(
    State(gateway): State<Gateway>,
    Path(host): Path<String>,
) -> Result<Json<RouteView>, AdminError> {
    gateway
        .show_domain(&host)
        .map(|r| Json(RouteView::from(&*r)))
        .ok_or_else(|| AdminError::NotFound(format!("Domain \"{}\" not found", host)))
}

#[derive(Debug, Serialize)]
pub struct DomainChange {
    pub domain: RouteView,
    pub replaced: bool,
}

pub async fn add_domain(
    State(gateway): State<Gateway>,
    Path(host): Path<String>,
    Json(body): Json<RouteConfig>,
) -> Result<Json<DomainChange>, AdminError> {
    let replaced = gateway.add_domain(&host, &body.target, body.options)?.is_some();
    let route = gateway
        .show_domain(&host)
        .ok_or_else(|| AdminError::NotFound(format!("Domain \"{}\" not found", host)))?;

    Ok(Json(DomainChange {
        domain: RouteView::from(&*route),
        replaced,
    }))
}

pub async fn remove_domain(State(gateway): State<Gateway>, Path(host): Path<String>) -> Json<serde_json::Value> {
    let removed = gateway.remove_domain(&host);
    Json(json!({ "domain": host, "removed": removed }))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub n: Option<usize>,
}

pub async fn get_logs(State(gateway): State<Gateway>, Query(query): Query<LogsQuery>) -> Json<Vec<String>> {
    Json(gateway.logs(query.n.unwrap_or(DEFAULT_TAIL)))
}

pub async fn reload_config(State(gateway): State<Gateway>) -> Result<Json<ReloadSummary>, AdminError> {
    Ok(Json(gateway.reload_config()?))
}

pub async fn tunnel_status(State(gateway): State<Gateway>) -> Json<Option<TunnelStatus>> {
    Json(gateway.tunnel_status())
}

#[derive(Debug, Default, Deserialize)]
pub struct StartTunnelRequest {
    pub port: Option<u16>,
    #[serde(flatten)]
    pub options: TunnelOptions,
}

pub async fn start_tunnel(
    State(gateway): State<Gateway>,
    Json(body): Json<StartTunnelRequest>,
) -> Result<Json<TunnelInfo>, AdminError> {
    Ok(Json(gateway.start_tunnel(body.port, body.options).await?))
}

pub async fn stop_tunnel(State(gateway): State<Gateway>) -> Result<Json<serde_json::Value>, AdminError> {
    let stopped = gateway.stop_tunnel().await?;
    Ok(Json(json!({ "stopped": stopped })))
}

pub async fn list_keys(State(gateway): State<Gateway>) -> Json<Vec<String>> {
    Json(gateway.list_keys())
}

pub async fn add_key(
    State(gateway): State<Gateway>,
    Path(key): Path<String>,
) -> Result<Json<serde_json::Value>, AdminError> {
    let added = gateway.add_key(&key)?;
    Ok(Json(json!({ "added": added })))
}

pub async fn remove_key(
    State(gateway): State<Gateway>,
    Path(key): Path<String>,
) -> Result<Json<serde_json::Value>, AdminError> {
    let removed = gateway.remove_key(&key)?;
    Ok(Json(json!({ "removed": removed })))
}
