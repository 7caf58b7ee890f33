//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use liten_gateway::config::GatewayConfig;
use liten_gateway::http::HttpServer;
use liten_gateway::lifecycle::Shutdown;
use liten_gateway::security::MemoryKeyStore;
use liten_gateway::tunnel::{TunnelError, TunnelHandle, TunnelOptions, TunnelProvider};
use liten_gateway::Gateway;

pub const VALID_KEY: &str = "test-key";
pub const OTHER_KEY: &str = "other-key";

/// Start a backend that answers every request with a JSON description of
/// what it received: `{method, path, query, headers}`.
pub async fn start_echo_backend() -> SocketAddr {
    async fn echo(request: Request) -> Response {
        let headers: BTreeMap<String, String> = request
            .headers()
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();

        Json(json!({
            "method": request.method().as_str(),
            "path": request.uri().path(),
            "query": request.uri().query(),
            "headers": headers,
        }))
        .into_response()
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = axum::Router::new().fallback(echo);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Start a backend that always fails with the given status.
pub async fn start_status_backend(status: StatusCode) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = axum::Router::new().fallback(move || async move { (status, Body::from("backend says no")) });
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Start a WebSocket backend that echoes every text and binary frame.
pub async fn start_ws_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(socket).await else {
                    return;
                };
                while let Some(Ok(message)) = ws.next().await {
                    if message.is_text() || message.is_binary() {
                        if ws.send(message).await.is_err() {
                            break;
                        }
                    } else if message.is_close() {
                        break;
                    }
                }
            });
        }
    });
    addr
}

/// Start a backend that answers 200 and counts the requests it served.
pub async fn start_counting_backend() -> (SocketAddr, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = axum::Router::new().fallback(move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            (StatusCode::OK, Body::from("counted"))
        }
    });
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, hits)
}

/// Accept TCP connections, count them and hang up.
pub async fn start_counting_listener() -> (SocketAddr, Arc<AtomicUsize>) {
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(socket);
        }
    });
    (addr, accepted)
}

/// An address nothing listens on.
pub async fn dead_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// A running gateway bound to an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub gateway: Gateway,
    pub shutdown: Shutdown,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn stop(&self) {
        self.shutdown.trigger();
    }
}

/// Build a gateway from `config` with the standard test keys and serve it.
pub async fn spawn_gateway(config: GatewayConfig) -> TestGateway {
    spawn_gateway_with(config, Arc::new(ScriptedTunnels::default())).await
}

pub async fn spawn_gateway_with(config: GatewayConfig, tunnels: Arc<dyn TunnelProvider>) -> TestGateway {
    let keys = Arc::new(MemoryKeyStore::with_keys([VALID_KEY, OTHER_KEY]));
    let gateway = Gateway::new(config, keys, tunnels).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    gateway.set_listen_port(addr.port());
    let shutdown = Shutdown::new();

    let server = HttpServer::new(gateway.clone());
    let sd = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.run(listener, sd).await;
    });

    TestGateway { addr, gateway, shutdown }
}

/// Send a raw upgrade handshake and return the response status code.
pub async fn raw_upgrade_status(addr: SocketAddr, host: &str, path: &str, key: Option<&str>) -> u16 {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\
         Sec-WebSocket-Version: 13\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n",
        path, host
    );
    if let Some(key) = key {
        request.push_str(&format!("x-api-key: {}\r\n", key));
    }
    request.push_str("\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut chunk))
            .await
            .expect("handshake response timed out")
            .unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let head = String::from_utf8_lossy(&buf);
    head.split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .expect("malformed status line")
}

/// Tunnel provider driven by the test: succeeds with a fixed URL, or fails
/// with a scripted error. Counts opens and closes.
#[derive(Default)]
pub struct ScriptedTunnels {
    pub failure: Mutex<Option<TunnelError>>,
    pub opened: AtomicUsize,
    pub closed: Arc<AtomicUsize>,
    pub last_port: Mutex<Option<u16>>,
}

impl ScriptedTunnels {
    pub fn failing(error: TunnelError) -> Self {
        Self {
            failure: Mutex::new(Some(error)),
            ..Self::default()
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

struct ScriptedHandle {
    url: String,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl TunnelHandle for ScriptedHandle {
    fn url(&self) -> &str {
        &self.url
    }

    async fn close(&mut self) -> Result<(), TunnelError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl TunnelProvider for ScriptedTunnels {
    async fn open(&self, port: u16, options: &TunnelOptions) -> Result<Box<dyn TunnelHandle>, TunnelError> {
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        *self.last_port.lock().unwrap() = Some(port);

        let host = options.subdomain.as_deref().unwrap_or("liten");
        Ok(Box::new(ScriptedHandle {
            url: format!("https://{}.ngrok.test", host),
            closed: self.closed.clone(),
        }))
    }
}
