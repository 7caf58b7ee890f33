//! HTTP forwarding.
//!
//! # Responsibilities
//! - Rewrite the outbound URI (prefix stripped for path routes)
//! - Strip hop-by-hop headers, set forwarding headers, apply custom headers
//! - Send through the pooled client and stream the response back
//! - Add CORS headers to responses on CORS-enabled routes
//!
//! No retries: a failed call is reported to the caller as-is.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Uri, Version};
use axum::response::Response;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use crate::http::request::RequestHead;
use crate::http::response::GatewayError;
use crate::observability::ActivityLog;
use crate::routing::{Route, RouteKey};
use crate::security::headers::{apply_cors, apply_custom, apply_forwarding, strip_hop_by_hop};

pub type HttpClient = Client<HttpConnector, Body>;

/// Forwards requests to route targets.
#[derive(Clone)]
pub struct ProxyEngine {
    client: HttpClient,
    activity: Arc<ActivityLog>,
}

impl ProxyEngine {
    pub fn new(connect_timeout: Duration, activity: Arc<ActivityLog>) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self { client, activity }
    }

    /// Forward `request` to `route`'s target and return the backend response.
    pub async fn forward(
        &self,
        request: Request<Body>,
        route: &Route,
        head: &RequestHead,
    ) -> Result<Response, GatewayError> {
        let (mut parts, body) = request.into_parts();

        let path = route.rewrite_path(&head.path);
        let uri: Uri = route
            .target
            .uri_for(&path, head.query.as_deref())
            .parse()
            .map_err(|e| GatewayError::Upstream(format!("invalid upstream URI: {}", e)))?;

        strip_hop_by_hop(&mut parts.headers);
        apply_forwarding(
            &mut parts.headers,
            &route.target.authority(),
            Some(head.host.as_str()).filter(|h| !h.is_empty()),
            head.client_addr.ip(),
        );
        apply_custom(&mut parts.headers, route.header_map());

        parts.uri = uri;
        parts.version = Version::HTTP_11;

        self.log_forward(route, head);

        let response = self
            .client
            .request(Request::from_parts(parts, body))
            .await
            .map_err(|e| {
                tracing::warn!(
                    request_id = head.request_id.as_deref().unwrap_or("-"),
                    target = %route.target,
                    error = %e,
                    "Upstream request failed"
                );
                GatewayError::Upstream(e.to_string())
            })?;

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        if route.cors_enabled {
            apply_cors(&mut parts.headers);
        }

        Ok(Response::from_parts(parts, Body::new(body)))
    }

    fn log_forward(&self, route: &Route, head: &RequestHead) {
        let line = match &route.key {
            RouteKey::Domain(_) => format!(
                "[Proxy:Domain] {} -> {} ({} {})",
                head.host,
                route.target,
                head.method,
                head.path_and_query()
            ),
            RouteKey::PathPrefix(_) => format!(
                "[Proxy:Route] {} {} -> {}",
                head.method,
                head.path_and_query(),
                route.target
            ),
        };

        tracing::info!(
            request_id = head.request_id.as_deref().unwrap_or("-"),
            route = %route.key,
            method = %head.method,
            path = %head.path,
            target = %route.target,
            "Forwarding request"
        );
        self.activity.record(line);
    }
}

impl std::fmt::Debug for ProxyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyEngine").finish_non_exhaustive()
    }
}
