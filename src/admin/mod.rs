//! Management API.
//!
//! Exposes the gateway's management operations over HTTP on a separate
//! listener, guarded by a bearer token. `liten-cli` is its client.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tokio::net::TcpListener;

use crate::gateway::Gateway;
use crate::lifecycle::Shutdown;

use self::auth::admin_auth_middleware;
use self::handlers::*;

pub fn setup_admin_router(gateway: Gateway, api_key: &str) -> Router {
    let api_key: Arc<str> = Arc::from(api_key);

    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/routes", get(list_routes))
        .route("/admin/domains", get(list_domains))
        .route(
            "/admin/domains/{host}",
            get(show_domain).put(add_domain).delete(remove_domain),
        )
        .route("/admin/logs", get(get_logs))
        .route("/admin/reload", post(reload_config))
        .route(
            "/admin/tunnel",
            get(tunnel_status).post(start_tunnel).delete(stop_tunnel),
        )
        .route("/admin/keys", get(list_keys))
        .route("/admin/keys/{key}", put(add_key).delete(remove_key))
        .layer(middleware::from_fn_with_state(api_key, admin_auth_middleware))
        .with_state(gateway)
}

/// Serve the management API until shutdown.
pub async fn serve_admin(gateway: Gateway, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
    let api_key = gateway.config().admin.api_key.clone();
    let router = setup_admin_router(gateway, &api_key);
    let mut stop = shutdown.subscribe();

    tracing::info!(address = %listener.local_addr()?, "Management API listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = stop.recv().await;
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::GatewayConfig;
    use crate::security::MemoryKeyStore;
    use crate::tunnel::{TunnelError, TunnelHandle, TunnelOptions, TunnelProvider};

    const TOKEN: &str = "admin-token";

    struct NeedsToken;

    #[async_trait]
    impl TunnelProvider for NeedsToken {
        async fn open(&self, _port: u16, _options: &TunnelOptions) -> Result<Box<dyn TunnelHandle>, TunnelError> {
            Err(TunnelError::AuthRequired("ERR_NGROK_4018".into()))
        }
    }

    fn router() -> (Gateway, Router) {
        let gateway = Gateway::new(
            GatewayConfig::default(),
            Arc::new(MemoryKeyStore::new()),
            Arc::new(NeedsToken),
        )
        .unwrap();
        (gateway.clone(), setup_admin_router(gateway, TOKEN))
    }

    async fn call(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN));
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = router.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn rejects_missing_bearer_token() {
        let (_, router) = router();
        let response = router
            .oneshot(Request::get("/admin/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn domain_lifecycle() {
        let (gateway, router) = router();

        let (status, body) = call(
            &router,
            Method::PUT,
            "/admin/domains/chat.test",
            Some(json!({ "target": "ws://127.0.0.1:9000", "ws": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["replaced"], false);
        assert_eq!(body["domain"]["ws"], true);
        assert!(gateway.show_domain("chat.test").is_some());

        let (status, body) = call(&router, Method::GET, "/admin/domains", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (status, body) = call(&router, Method::DELETE, "/admin/domains/chat.test", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["removed"], true);

        let (status, body) = call(&router, Method::GET, "/admin/domains/chat.test", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "not_found");
    }

    #[tokio::test]
    async fn bad_target_is_a_client_error() {
        let (_, router) = router();
        let (status, body) = call(
            &router,
            Method::PUT,
            "/admin/domains/bad.test",
            Some(json!({ "target": "not a url" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "invalid_route");
    }

    #[tokio::test]
    async fn key_management() {
        let (gateway, router) = router();
        let (_, body) = call(&router, Method::PUT, "/admin/keys/k1", None).await;
        assert_eq!(body["added"], true);
        assert!(gateway.auth().authenticate(Some("k1")));

        let (_, body) = call(&router, Method::GET, "/admin/keys", None).await;
        assert_eq!(body, json!(["k1"]));

        let (_, body) = call(&router, Method::DELETE, "/admin/keys/k1", None).await;
        assert_eq!(body["removed"], true);
        assert!(!gateway.auth().authenticate(Some("k1")));
    }

    #[tokio::test]
    async fn tunnel_auth_failure_is_reported_with_kind() {
        let (gateway, router) = router();
        let (status, body) = call(&router, Method::POST, "/admin/tunnel", Some(json!({}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["kind"], "tunnel_auth_required");
        assert!(!gateway.is_tunnel_active());

        let (status, body) = call(&router, Method::GET, "/admin/tunnel", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::Null);
    }
}
