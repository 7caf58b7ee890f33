//! Header manipulation.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers on both legs
//! - Rewrite `Host` to the target and add X-Forwarded-For/-Host/-Proto
//! - Apply per-route custom headers
//! - Add permissive CORS headers
//!
//! # Design Decisions
//! - Client X-Forwarded-For chains are appended to, not replaced
//! - Upgrade handshakes keep `Connection`/`Upgrade`; everything else drops them

use std::net::IpAddr;

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

pub const CORS_ALLOW_METHODS: &str = "GET,POST,PUT,DELETE,OPTIONS";

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Set `Host` to the target and record where the request came from.
pub fn apply_forwarding(headers: &mut HeaderMap, target_authority: &str, original_host: Option<&str>, client_ip: IpAddr) {
    let forwarded_for = match headers
        .get(&X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
    {
        Some(existing) if !existing.is_empty() => format!("{}, {}", existing, client_ip),
        _ => client_ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        headers.insert(X_FORWARDED_FOR, value);
    }

    if let Some(value) = original_host.and_then(|h| HeaderValue::from_str(h).ok()) {
        headers.insert(X_FORWARDED_HOST, value);
    }
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));

    if let Ok(value) = HeaderValue::from_str(target_authority) {
        headers.insert(header::HOST, value);
    }
}

/// Overlay a route's custom headers, replacing any client-sent values.
pub fn apply_custom(headers: &mut HeaderMap, custom: &HeaderMap) {
    for (name, value) in custom {
        headers.insert(name.clone(), value.clone());
    }
}

/// Add the permissive CORS header set.
pub fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(CORS_ALLOW_METHODS),
    );
    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("*"));
}

/// True for `Connection: upgrade` + `Upgrade: <protocol>` handshakes.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));

    connection_upgrade && headers.contains_key(header::UPGRADE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_listed_and_standard_hop_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-private"));
        headers.insert("x-private", HeaderValue::from_static("1"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert("x-keep", HeaderValue::from_static("1"));

        strip_hop_by_hop(&mut headers);

        assert!(headers.get("x-private").is_none());
        assert!(headers.get(header::CONNECTION).is_none());
        assert!(headers.get(header::TRANSFER_ENCODING).is_none());
        assert!(headers.get("x-keep").is_some());
    }

    #[test]
    fn forwarding_rewrites_host_and_appends_for() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("api.test"));
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("10.0.0.9"));

        apply_forwarding(&mut headers, "backend:9000", Some("api.test"), "127.0.0.1".parse().unwrap());

        assert_eq!(headers[header::HOST], "backend:9000");
        assert_eq!(headers[X_FORWARDED_HOST], "api.test");
        assert_eq!(headers[X_FORWARDED_FOR], "10.0.0.9, 127.0.0.1");
        assert_eq!(headers[X_FORWARDED_PROTO], "http");
    }

    #[test]
    fn custom_headers_override() {
        let mut headers = HeaderMap::new();
        headers.insert("x-team", HeaderValue::from_static("client"));
        let mut custom = HeaderMap::new();
        custom.insert("x-team", HeaderValue::from_static("gateway"));

        apply_custom(&mut headers, &custom);
        assert_eq!(headers["x-team"], "gateway");
    }

    #[test]
    fn detects_upgrade_handshake() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        assert!(is_upgrade_request(&headers));

        headers.remove(header::UPGRADE);
        assert!(!is_upgrade_request(&headers));
    }
}
