//! API key authentication.
//!
//! Credentials come from the `x-api-key` header or, failing that, the `key`
//! query parameter. The same extraction serves plain requests and upgrade
//! handshakes.

use std::sync::Arc;

use axum::http::{HeaderMap, Uri};

use crate::routing::Route;
use crate::security::keys::KeyStore;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const API_KEY_QUERY_PARAM: &str = "key";

/// Pull the presented credential out of a request. The header wins.
pub fn extract_credential(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    let from_header = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    from_header.or_else(|| {
        uri.query().and_then(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .find(|(name, value)| name == API_KEY_QUERY_PARAM && !value.is_empty())
                .map(|(_, value)| value.into_owned())
        })
    })
}

/// Validates credentials against the key store.
#[derive(Clone)]
pub struct AuthGate {
    store: Arc<dyn KeyStore>,
}

impl AuthGate {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self { store }
    }

    /// True if the credential is present and known.
    pub fn authenticate(&self, credential: Option<&str>) -> bool {
        match credential {
            Some(key) => self.store.is_valid_key(key),
            None => false,
        }
    }

    /// Apply a route's policy: public routes always pass.
    pub fn admit(&self, route: &Route, credential: Option<&str>) -> bool {
        !route.requires_api_key || self.authenticate(credential)
    }

    pub fn store(&self) -> &Arc<dyn KeyStore> {
        &self.store
    }
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{RouteOptions, RouteOrigin};
    use crate::security::keys::MemoryKeyStore;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, v.parse().unwrap());
        }
        map
    }

    #[test]
    fn header_takes_precedence_over_query() {
        let uri: Uri = "/posts/1?key=from-query".parse().unwrap();
        let h = headers(&[("x-api-key", "from-header")]);
        assert_eq!(extract_credential(&h, &uri).as_deref(), Some("from-header"));
        assert_eq!(extract_credential(&HeaderMap::new(), &uri).as_deref(), Some("from-query"));
    }

    #[test]
    fn query_key_is_percent_decoded() {
        let uri: Uri = "/ws?other=1&key=a%2Bb".parse().unwrap();
        assert_eq!(extract_credential(&HeaderMap::new(), &uri).as_deref(), Some("a+b"));
    }

    #[test]
    fn missing_credential() {
        let uri: Uri = "/posts/1?keys=nope".parse().unwrap();
        assert_eq!(extract_credential(&HeaderMap::new(), &uri), None);
    }

    #[test]
    fn gate_checks_store_and_route_policy() {
        let gate = AuthGate::new(Arc::new(MemoryKeyStore::with_keys(["valid"])));
        assert!(gate.authenticate(Some("valid")));
        assert!(!gate.authenticate(Some("invalid")));
        assert!(!gate.authenticate(None));

        let public = Route::path(
            "/public",
            "http://backend",
            RouteOptions { api_key_required: false, ..RouteOptions::default() },
            RouteOrigin::Config,
        )
        .unwrap();
        let private = Route::path("/private", "http://backend", RouteOptions::default(), RouteOrigin::Config).unwrap();

        assert!(gate.admit(&public, None));
        assert!(!gate.admit(&private, None));
        assert!(gate.admit(&private, Some("valid")));
    }
}
