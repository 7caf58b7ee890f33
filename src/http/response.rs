//! Gateway errors as HTTP responses.
//!
//! Plain requests get a JSON body with an `error` field. Upgrade handshakes
//! get a bare status response that closes the connection, since the client
//! is expecting a protocol switch rather than an API payload.

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Request-level failures.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid or missing API key.")]
    Authentication,

    #[error("No route for {0}")]
    NotFound(String),

    #[error("Too many requests, please try again later.")]
    RateLimitExceeded { retry_after: Duration },

    #[error("Upstream request failed: {0}")]
    Upstream(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Authentication => StatusCode::UNAUTHORIZED,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Rejection for an upgrade handshake: status line, short text body,
    /// `Connection: close`.
    pub fn upgrade_rejection(&self) -> Response {
        let status = self.status();
        let reason = status.canonical_reason().unwrap_or("Error");

        let mut response = Response::new(Body::from(reason));
        *response.status_mut() = status;
        let headers = response.headers_mut();
        headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        response
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = (status, Json(json!({ "error": self.to_string() }))).into_response();

        if let GatewayError::RateLimitExceeded { retry_after } = &self {
            let secs = retry_after.as_secs().max(1);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn json_error_bodies() {
        let response = GatewayError::Authentication.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], "Invalid or missing API key.");

        let response = GatewayError::RateLimitExceeded {
            retry_after: Duration::from_secs(12),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "12");
        assert!(body_json(response).await["error"].is_string());
    }

    #[test]
    fn upgrade_rejection_closes_connection() {
        let response = GatewayError::NotFound("/ws".into()).upgrade_rejection();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[header::CONNECTION], "close");
    }
}
