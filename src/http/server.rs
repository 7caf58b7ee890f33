//! HTTP server setup.
//!
//! # Responsibilities
//! - Create the Axum router with the catch-all gateway handler
//! - Send upgrade handshakes to the upgrade dispatcher and everything
//!   else through the HTTP pipeline
//! - Wire up middleware (timeouts, request ids, tracing)
//! - Serve until shutdown, with background rate limiter GC

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::Response,
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::gateway::Gateway;
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::http::{pipeline, upgrade};
use crate::lifecycle::Shutdown;
use crate::security::headers::is_upgrade_request;

/// The gateway's public listener.
pub struct HttpServer {
    gateway: Gateway,
    router: Router,
}

impl HttpServer {
    pub fn new(gateway: Gateway) -> Self {
        let router = Self::build_router(&gateway);
        Self { gateway, router }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(gateway: &Gateway) -> Router {
        let request_timeout = Duration::from_secs(gateway.config().timeouts.request_secs);

        Router::new()
            .route("/", any(gateway_handler))
            .route("/{*path}", any(gateway_handler))
            .with_state(gateway.clone())
            .layer(TimeoutLayer::new(request_timeout))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Serve on `listener` until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        self.gateway.set_listen_port(addr.port());
        tracing::info!(address = %addr, "Liten Gateway listening");
        self.gateway
            .activity()
            .record(format!("Liten Gateway running on port {}", addr.port()));

        let gc_interval = Duration::from_secs(self.gateway.config().rate_limit.gc_interval_secs.max(1));
        tokio::spawn(
            self.gateway
                .limiter_handle()
                .run_gc(gc_interval, shutdown.subscribe()),
        );

        let mut stop = shutdown.subscribe();
        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop.recv().await;
                tracing::info!("HTTP server draining");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn gateway_handler(
    State(gateway): State<Gateway>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    if is_upgrade_request(request.headers()) {
        upgrade::dispatch(&gateway, request, addr).await
    } else {
        pipeline::handle(&gateway, request, addr).await
    }
}
