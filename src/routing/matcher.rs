//! Route matching helpers.
//!
//! # Responsibilities
//! - Normalise host headers (case-insensitive, port ignored)
//! - Match path prefixes (case-sensitive)
//! - Rewrite matched paths for the backend
//!
//! # Design Decisions
//! - Host matching is case-insensitive (RFC 9110)
//! - Path matching is a plain byte prefix, no segment awareness
//! - No regex in the hot path

use std::borrow::Cow;

/// Wildcard host entry used when no exact host matches.
pub const WILDCARD_HOST: &str = "*";

/// Lowercase a host header value and drop any `:port` suffix.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    if host == WILDCARD_HOST {
        return host.to_string();
    }

    // Bracketed IPv6 literals keep their colons.
    let without_port = if let Some(rest) = host.strip_prefix('[') {
        match rest.find(']') {
            Some(end) => &host[..end + 2],
            None => host,
        }
    } else {
        match host.rsplit_once(':') {
            Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
            _ => host,
        }
    };

    without_port.to_ascii_lowercase()
}

/// True if `path` falls under `prefix`.
pub fn prefix_matches(prefix: &str, path: &str) -> bool {
    path.starts_with(prefix)
}

/// Remove `prefix` from `path`, always returning an absolute path.
pub fn strip_prefix<'a>(path: &'a str, prefix: &str) -> Cow<'a, str> {
    match path.strip_prefix(prefix) {
        Some("") => Cow::Borrowed("/"),
        Some(rest) if rest.starts_with('/') => Cow::Borrowed(rest),
        Some(rest) => Cow::Owned(format!("/{}", rest)),
        None => Cow::Borrowed(path),
    }
}

/// Join a target base path with a request path.
pub fn join_paths(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.is_empty() || path == "/" {
        if base.is_empty() {
            return "/".to_string();
        }
        return format!("{}/", base);
    }
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}
