//! Protocol-upgrade dispatch.
//!
//! Upgrade handshakes (WebSocket and friends) never enter the HTTP
//! pipeline. Each one runs a short state machine:
//!
//! ```text
//! Received → Resolve ──no upgrade route──▶ Rejected(404)
//!               │
//!               ▼
//!          Authenticate ──bad key──▶ Rejected(401)
//!               │
//!               ▼
//!            Splice ──backend answers 101──▶ Active (bytes relayed both ways)
//! ```
//!
//! Rejections are answered before any byte is spliced and close the
//! connection. Once active, nothing above the byte stream is inspected and
//! no timeout applies; the relay ends as soon as either side closes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode, Version};
use axum::response::Response;
use dashmap::DashMap;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::gateway::Gateway;
use crate::http::request::RequestHead;
use crate::http::response::GatewayError;
use crate::net::{SpliceGuard, SpliceTracker};
use crate::observability::metrics;
use crate::routing::{Route, RouteKey, Target};
use crate::security::headers::{apply_custom, apply_forwarding};

/// Bridges upgraded client connections to one target.
#[derive(Debug)]
pub struct Splicer {
    key: RouteKey,
    target: Target,
    connect_timeout: Duration,
}

impl Splicer {
    pub fn new(route: &Route, connect_timeout: Duration) -> Self {
        Self {
            key: route.key.clone(),
            target: route.target.clone(),
            connect_timeout,
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Replay the handshake against the target. On `101` the client and
    /// backend streams are bridged in a background task and the backend's
    /// `101` is returned for the client. Any other backend answer is passed
    /// through unchanged.
    pub async fn splice(
        &self,
        mut request: Request<Body>,
        route: &Route,
        head: &RequestHead,
        tracker: &SpliceTracker,
    ) -> Result<Response, GatewayError> {
        let client_upgrade = hyper::upgrade::on(&mut request);

        let (mut parts, _) = request.into_parts();
        apply_forwarding(
            &mut parts.headers,
            &self.target.authority(),
            Some(head.host.as_str()).filter(|h| !h.is_empty()),
            head.client_addr.ip(),
        );
        apply_custom(&mut parts.headers, route.header_map());
        parts.uri = head.uri();
        parts.version = Version::HTTP_11;
        let outbound = Request::from_parts(parts, Body::empty());

        let authority = self.target.authority();
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(dial_address(&authority)))
            .await
            .map_err(|_| GatewayError::Upstream(format!("connect to {} timed out", authority)))?
            .map_err(|e| GatewayError::Upstream(format!("connect to {}: {}", authority, e)))?;

        let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;
        tokio::spawn(async move {
            if let Err(e) = connection.with_upgrades().await {
                tracing::debug!(error = %e, "Upstream handshake connection ended with error");
            }
        });

        let mut response = sender
            .send_request(outbound)
            .await
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;

        if response.status() != StatusCode::SWITCHING_PROTOCOLS {
            tracing::debug!(route = %self.key, status = %response.status(), "Backend declined upgrade");
            let (parts, body) = response.into_parts();
            return Ok(Response::from_parts(parts, Body::new(body)));
        }

        let backend_upgrade = hyper::upgrade::on(&mut response);
        let guard = tracker.track();
        let key = self.key.clone();

        tokio::spawn(async move {
            match tokio::try_join!(client_upgrade, backend_upgrade) {
                Ok((client, backend)) => {
                    tracing::debug!(splice_id = %guard.id(), route = %key, "Splice active");
                    relay(TokioIo::new(client), TokioIo::new(backend), guard).await;
                }
                Err(e) => {
                    tracing::warn!(route = %key, error = %e, "Upgrade did not complete");
                }
            }
        });

        let (parts, _) = response.into_parts();
        Ok(Response::from_parts(parts, Body::empty()))
    }
}

/// `TcpStream::connect` wants a port; targets may leave it implicit.
fn dial_address(authority: &str) -> String {
    let has_port = match authority.rfind(':') {
        Some(idx) => !authority[idx..].contains(']'),
        None => false,
    };
    if has_port {
        authority.to_string()
    } else {
        format!("{}:80", authority)
    }
}

const RELAY_BUFFER: usize = 8 * 1024;

/// Copy bytes both ways until either direction finishes, then close both.
/// Bytes are counted as they are written, so the direction still open when
/// the other closes is accounted for too.
async fn relay<C, B>(client: C, backend: B, guard: SpliceGuard)
where
    C: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut backend_read, mut backend_write) = tokio::io::split(backend);

    let (closed_by, result) = tokio::select! {
        res = pump(&mut client_read, &mut backend_write, |n| guard.record_bytes(n, 0)) => ("client", res),
        res = pump(&mut backend_read, &mut client_write, |n| guard.record_bytes(0, n)) => ("backend", res),
    };

    let _ = backend_write.shutdown().await;
    let _ = client_write.shutdown().await;

    match result {
        Ok(()) => tracing::debug!(splice_id = %guard.id(), closed_by, "Splice closed"),
        Err(e) => tracing::debug!(splice_id = %guard.id(), closed_by, error = %e, "Splice ended with error"),
    }
}

async fn pump<R, W>(reader: &mut R, writer: &mut W, count: impl Fn(u64)) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        count(n as u64);
    }
}

/// Splicers by route, built on first use.
#[derive(Debug, Default)]
pub struct UpgradeRouteCache {
    splicers: DashMap<RouteKey, Arc<Splicer>>,
}

impl UpgradeRouteCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached splicer for `route`, rebuilt if the route's target moved.
    pub fn get_or_build(&self, route: &Route, connect_timeout: Duration) -> Arc<Splicer> {
        if let Some(existing) = self.splicers.get(&route.key) {
            if existing.target == route.target {
                return existing.clone();
            }
        }

        let splicer = Arc::new(Splicer::new(route, connect_timeout));
        self.splicers.insert(route.key.clone(), splicer.clone());
        splicer
    }

    pub fn contains(&self, key: &RouteKey) -> bool {
        self.splicers.contains_key(key)
    }

    /// Drop the splicer for one route.
    pub fn invalidate(&self, key: &RouteKey) -> bool {
        self.splicers.remove(key).is_some()
    }

    /// Drop the splicer for `key` only if it is still `splicer`.
    pub fn invalidate_if_same(&self, key: &RouteKey, splicer: &Arc<Splicer>) -> bool {
        self.splicers
            .remove_if(key, |_, cached| Arc::ptr_eq(cached, splicer))
            .is_some()
    }

    /// Drop every path-route splicer (path routes are replaced on reload).
    pub fn invalidate_paths(&self) {
        self.splicers.retain(|key, _| key.is_domain());
    }

    pub fn len(&self) -> usize {
        self.splicers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.splicers.is_empty()
    }
}

/// Entry point for upgrade handshakes.
pub async fn dispatch(gateway: &Gateway, request: Request<Body>, client_addr: SocketAddr) -> Response {
    let head = RequestHead::from_request(&request, client_addr);
    let protocol = request
        .headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    // Resolve
    let Some(route) = gateway.routes().resolve_upgrade(&head.host, &head.path) else {
        tracing::info!(host = %head.host, path = %head.path, protocol = %protocol, "Upgrade rejected: no route");
        return reject(gateway, &head, GatewayError::NotFound(head.path.clone()), "not_found");
    };

    // Authenticate
    if !gateway.auth().admit(&route, head.credential.as_deref()) {
        tracing::info!(route = %route.key, client = %client_addr, "Upgrade rejected: invalid API key");
        metrics::record_auth_failure(route.key.kind());
        return reject(gateway, &head, GatewayError::Authentication, "unauthorized");
    }

    // Splice
    let splicer = gateway
        .upgrades()
        .get_or_build(&route, gateway.connect_timeout());
    // The route may have been removed or replaced since it was resolved; its
    // invalidation could have run before the insert above.
    if !gateway.routes().is_current(&route) {
        gateway.upgrades().invalidate_if_same(&route.key, &splicer);
    }

    match splicer.splice(request, &route, &head, gateway.splices()).await {
        Ok(response) => {
            let accepted = response.status() == StatusCode::SWITCHING_PROTOCOLS;
            if accepted {
                gateway.stats().record_upgrade_accepted();
                metrics::record_upgrade("accepted");
                gateway.activity().record(format!(
                    "[Upgrade:{}] {} {} -> {}",
                    if route.key.is_domain() { "Domain" } else { "Route" },
                    head.host,
                    head.path_and_query(),
                    route.target
                ));
            } else {
                gateway.stats().record_upgrade_rejected();
                metrics::record_upgrade("declined");
            }
            tracing::info!(
                route = %route.key,
                target = %route.target,
                protocol = %protocol,
                status = %response.status(),
                "Upgrade handshake relayed"
            );
            response
        }
        Err(e) => {
            tracing::warn!(route = %route.key, target = %route.target, error = %e, "Upgrade failed");
            gateway.stats().record_upstream_error();
            reject(gateway, &head, e, "upstream_error")
        }
    }
}

fn reject(gateway: &Gateway, head: &RequestHead, error: GatewayError, outcome: &'static str) -> Response {
    gateway.stats().record_upgrade_rejected();
    if matches!(error, GatewayError::Authentication) {
        gateway.stats().record_auth_failure();
    }
    metrics::record_upgrade(outcome);
    gateway.activity().record(format!(
        "[Upgrade] {} {} rejected ({})",
        head.host,
        head.path,
        error.status().as_u16()
    ));
    error.upgrade_rejection()
}
