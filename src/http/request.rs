//! Request inspection.
//!
//! Pulls out everything routing and policy need from a request head so the
//! pipeline stages never have to look at the raw request again.

use std::net::SocketAddr;

use axum::body::Body;
use axum::http::{header, HeaderName, Method, Request, Uri};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use crate::security::auth::extract_credential;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Routing-relevant view of an inbound request.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    /// Host as sent by the client (port included), used for matching.
    pub host: String,
    pub path: String,
    pub query: Option<String>,
    pub credential: Option<String>,
    pub client_addr: SocketAddr,
    pub request_id: Option<String>,
}

impl RequestHead {
    pub fn from_request(request: &Request<Body>, client_addr: SocketAddr) -> Self {
        let uri = request.uri();
        let host = request
            .headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| uri.authority().map(|a| a.to_string()))
            .unwrap_or_default();

        Self {
            method: request.method().clone(),
            host,
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            credential: extract_credential(request.headers(), uri),
            client_addr,
            request_id: request
                .headers()
                .get(&X_REQUEST_ID)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        }
    }

    /// Path plus query, as the client sent it.
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }

    pub fn uri(&self) -> Uri {
        self.path_and_query().parse().unwrap_or_default()
    }
}

/// Generates an `x-request-id` for requests that arrive without one.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid)
}

/// Copies `x-request-id` from the request onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(X_REQUEST_ID)
}
