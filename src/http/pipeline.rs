//! The HTTP request pipeline.
//!
//! ```text
//! CORS preflight → resolve → authenticate → rate limit → forward
//! ```
//!
//! Each stage takes the request head plus the state it needs and either
//! lets the request through or produces the response that ends it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::gateway::Gateway;
use crate::http::request::RequestHead;
use crate::http::response::GatewayError;
use crate::observability::metrics;
use crate::routing::{Route, RouteTable};
use crate::security::auth::AuthGate;
use crate::security::headers::apply_cors;
use crate::security::rate_limit::{scope_key, RateDecision, RateLimiter};

/// Answer `OPTIONS` with 200 and the CORS headers, before any routing.
pub fn cors_preflight(head: &RequestHead, enabled: bool) -> Option<Response> {
    if !enabled || head.method != Method::OPTIONS {
        return None;
    }
    let mut response = StatusCode::OK.into_response();
    apply_cors(response.headers_mut());
    Some(response)
}

/// Find the route for this request.
pub fn resolve(routes: &RouteTable, head: &RequestHead) -> Result<Arc<Route>, GatewayError> {
    routes
        .resolve(&head.host, &head.path)
        .ok_or_else(|| GatewayError::NotFound(head.path.clone()))
}

/// Enforce the route's API key policy.
pub fn authenticate(auth: &AuthGate, route: &Route, head: &RequestHead) -> Result<(), GatewayError> {
    if auth.admit(route, head.credential.as_deref()) {
        Ok(())
    } else {
        Err(GatewayError::Authentication)
    }
}

/// Count the request against the route's limit (or the global default).
pub fn rate_limit(
    limiter: &RateLimiter,
    route: &Route,
    head: &RequestHead,
    default_limit: Option<u32>,
) -> Result<(), GatewayError> {
    let Some(limit) = route.rate_limit.or(default_limit) else {
        return Ok(());
    };

    let scope = scope_key(
        &route.key.to_string(),
        head.credential.as_deref(),
        &head.client_addr.ip().to_string(),
    );
    match limiter.check(&scope, limit) {
        RateDecision::Allowed { .. } => Ok(()),
        RateDecision::Limited { retry_after } => Err(GatewayError::RateLimitExceeded { retry_after }),
    }
}

/// Run a plain HTTP request through every stage.
pub async fn handle(gateway: &Gateway, request: Request<Body>, client_addr: SocketAddr) -> Response {
    let start = Instant::now();
    let head = RequestHead::from_request(&request, client_addr);
    let stats = gateway.stats();
    stats.record_request();

    if let Some(response) = cors_preflight(&head, gateway.cors_preflight()) {
        stats.record_preflight();
        metrics::record_request(head.method.as_str(), 200, "preflight", start);
        return response;
    }

    let route = match resolve(gateway.routes(), &head) {
        Ok(route) => route,
        Err(e) => {
            tracing::debug!(host = %head.host, path = %head.path, "No route matched");
            stats.record_not_found();
            metrics::record_request(head.method.as_str(), 404, "none", start);
            return e.into_response();
        }
    };
    let kind = route.key.kind();

    if let Err(e) = authenticate(gateway.auth(), &route, &head) {
        tracing::info!(route = %route.key, client = %client_addr, "Rejected request: invalid API key");
        stats.record_auth_failure();
        metrics::record_auth_failure(kind);
        metrics::record_request(head.method.as_str(), 401, kind, start);
        return e.into_response();
    }

    if let Err(e) = rate_limit(gateway.limiter(), &route, &head, gateway.default_rate_limit()) {
        tracing::info!(route = %route.key, client = %client_addr, "Rate limit exceeded");
        stats.record_rate_limited();
        metrics::record_rate_limited(route.key.as_str());
        metrics::record_request(head.method.as_str(), 429, kind, start);
        return e.into_response();
    }

    match gateway.proxy().forward(request, &route, &head).await {
        Ok(response) => {
            stats.record_forwarded();
            metrics::record_request(head.method.as_str(), response.status().as_u16(), kind, start);
            response
        }
        Err(e) => {
            stats.record_upstream_error();
            metrics::record_request(head.method.as_str(), e.status().as_u16(), kind, start);
            e.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{RouteOptions, RouteOrigin};
    use crate::security::keys::MemoryKeyStore;
    use std::time::Duration;

    fn head(method: Method, host: &str, uri: &str, key: Option<&str>) -> RequestHead {
        let mut builder = Request::builder().method(method).uri(uri).header("host", host);
        if let Some(key) = key {
            builder = builder.header("x-api-key", key);
        }
        let request = builder.body(Body::empty()).unwrap();
        RequestHead::from_request(&request, "10.0.0.1:4000".parse().unwrap())
    }

    fn route(options: RouteOptions) -> Route {
        Route::path("/echo", "http://127.0.0.1:9000", options, RouteOrigin::Config).unwrap()
    }

    #[test]
    fn preflight_short_circuits_options_only() {
        let options = head(Method::OPTIONS, "localhost", "/anything", None);
        let response = cors_preflight(&options, true).unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");

        assert!(cors_preflight(&options, false).is_none());
        assert!(cors_preflight(&head(Method::GET, "localhost", "/", None), true).is_none());
    }

    #[test]
    fn resolve_reports_missing_route() {
        let table = RouteTable::new();
        let err = resolve(&table, &head(Method::GET, "localhost", "/nope", None)).unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn authenticate_honours_route_policy() {
        let auth = AuthGate::new(Arc::new(MemoryKeyStore::with_keys(["good"])));
        let private = route(RouteOptions::default());
        let public = route(RouteOptions { api_key_required: false, ..RouteOptions::default() });

        assert!(authenticate(&auth, &private, &head(Method::GET, "h", "/echo", Some("good"))).is_ok());
        assert!(matches!(
            authenticate(&auth, &private, &head(Method::GET, "h", "/echo", Some("bad"))),
            Err(GatewayError::Authentication)
        ));
        assert!(authenticate(&auth, &public, &head(Method::GET, "h", "/echo", None)).is_ok());
    }

    #[test]
    fn rate_limit_uses_route_then_default() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        let limited = route(RouteOptions { rate_limit: Some(5), ..RouteOptions::default() });
        let request = head(Method::GET, "h", "/echo", Some("k"));

        let outcomes: Vec<bool> = (0..6)
            .map(|_| rate_limit(&limiter, &limited, &request, None).is_ok())
            .collect();
        assert_eq!(outcomes, [true, true, true, true, true, false]);

        let unlimited = Route::path("/free", "http://127.0.0.1:9000", RouteOptions::default(), RouteOrigin::Config).unwrap();
        for _ in 0..20 {
            assert!(rate_limit(&limiter, &unlimited, &request, None).is_ok());
        }
        assert!(rate_limit(&limiter, &unlimited, &request, Some(1)).is_ok());
        assert!(rate_limit(&limiter, &unlimited, &request, Some(1)).is_err());
    }
}
