//! Route lookup.
//!
//! # Responsibilities
//! - Store domain routes and path-prefix routes
//! - Resolve a request's host and path to a single route
//! - Apply runtime domain mutations and wholesale path reloads
//!
//! # Design Decisions
//! - Readers load an immutable snapshot; writers publish a new one via
//!   `ArcSwap::rcu`, so a lookup sees the table before or after a mutation,
//!   never in between
//! - O(1) host lookup via HashMap
//! - O(n) path prefix scan in declaration order, first match wins

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::routing::matcher::{self, WILDCARD_HOST};
use crate::routing::route::{Route, RouteKey, RouteOrigin};

/// One published version of the routing table.
#[derive(Debug, Default, Clone)]
pub struct RouteSnapshot {
    domains: HashMap<String, Arc<Route>>,
    paths: Vec<Arc<Route>>,
}

impl RouteSnapshot {
    fn resolve(&self, host: &str, path: &str) -> Option<Arc<Route>> {
        self.domains
            .get(host)
            .or_else(|| self.domains.get(WILDCARD_HOST))
            .or_else(|| self.paths.iter().find(|r| matches_path(r, path)))
            .cloned()
    }

    fn resolve_upgrade(&self, host: &str, path: &str) -> Option<Arc<Route>> {
        if let Some(route) = self
            .paths
            .iter()
            .find(|r| r.supports_upgrade && matches_path(r, path))
        {
            return Some(route.clone());
        }

        // An exact host shadows the wildcard even when it refuses upgrades.
        self.domains
            .get(host)
            .or_else(|| self.domains.get(WILDCARD_HOST))
            .filter(|r| r.supports_upgrade)
            .cloned()
    }
}

fn matches_path(route: &Route, path: &str) -> bool {
    match &route.key {
        RouteKey::PathPrefix(prefix) => matcher::prefix_matches(prefix, path),
        RouteKey::Domain(_) => false,
    }
}

/// The live routing table shared by every connection.
#[derive(Debug, Default)]
pub struct RouteTable {
    snapshot: ArcSwap<RouteSnapshot>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a plain HTTP request: exact host, then `*`, then the first
    /// path prefix in declaration order.
    pub fn resolve(&self, host: &str, path: &str) -> Option<Arc<Route>> {
        self.snapshot.load().resolve(&matcher::normalize_host(host), path)
    }

    /// Resolve an upgrade handshake: upgrade-enabled path routes first, then
    /// upgrade-enabled domain routes (exact host, then `*`).
    pub fn resolve_upgrade(&self, host: &str, path: &str) -> Option<Arc<Route>> {
        self.snapshot
            .load()
            .resolve_upgrade(&matcher::normalize_host(host), path)
    }

    /// Insert or replace a domain route. Returns the replaced route.
    pub fn insert_domain(&self, route: Route) -> Option<Arc<Route>> {
        let RouteKey::Domain(host) = route.key.clone() else {
            tracing::warn!(key = %route.key, "Refusing to insert a path route as a domain");
            return None;
        };

        let route = Arc::new(route);
        let previous = self.snapshot.rcu(|current| {
            let mut next = RouteSnapshot::clone(current);
            next.domains.insert(host.clone(), route.clone());
            next
        });
        previous.domains.get(&host).cloned()
    }

    /// Remove a domain route. Missing hosts are a no-op.
    pub fn remove_domain(&self, host: &str) -> Option<Arc<Route>> {
        let host = matcher::normalize_host(host);
        if !self.snapshot.load().domains.contains_key(&host) {
            return None;
        }

        let previous = self.snapshot.rcu(|current| {
            let mut next = RouteSnapshot::clone(current);
            next.domains.remove(&host);
            next
        });
        previous.domains.get(&host).cloned()
    }

    /// Whether `route` is still the entry published under its key.
    pub fn is_current(&self, route: &Arc<Route>) -> bool {
        let snapshot = self.snapshot.load();
        match &route.key {
            RouteKey::Domain(host) => snapshot.domains.get(host).is_some_and(|r| Arc::ptr_eq(r, route)),
            RouteKey::PathPrefix(_) => snapshot.paths.iter().any(|r| Arc::ptr_eq(r, route)),
        }
    }

    /// Domain routes sorted by host.
    pub fn list_domains(&self) -> Vec<Arc<Route>> {
        let snapshot = self.snapshot.load();
        let mut routes: Vec<Arc<Route>> = snapshot.domains.values().cloned().collect();
        routes.sort_by(|a, b| a.key.cmp(&b.key));
        routes
    }

    pub fn show_domain(&self, host: &str) -> Option<Arc<Route>> {
        self.snapshot
            .load()
            .domains
            .get(&matcher::normalize_host(host))
            .cloned()
    }

    /// Path routes in declaration order.
    pub fn list_paths(&self) -> Vec<Arc<Route>> {
        self.snapshot.load().paths.clone()
    }

    /// Install a new configuration: path routes are replaced wholesale and
    /// config-declared domains are re-seeded. Runtime domains survive unless
    /// the configuration declares the same host.
    ///
    /// Returns the hosts whose route changed or disappeared.
    pub fn apply_config(&self, paths: Vec<Route>, domains: Vec<Route>) -> Vec<String> {
        let paths: Vec<Arc<Route>> = paths.into_iter().map(Arc::new).collect();
        let domains: Vec<(String, Arc<Route>)> = domains
            .into_iter()
            .filter_map(|route| match route.key.clone() {
                RouteKey::Domain(host) => Some((host, Arc::new(route))),
                RouteKey::PathPrefix(_) => None,
            })
            .collect();

        let previous = self.snapshot.rcu(|current| {
            let mut next_domains: HashMap<String, Arc<Route>> = current
                .domains
                .iter()
                .filter(|(_, r)| r.origin == RouteOrigin::Runtime)
                .map(|(h, r)| (h.clone(), r.clone()))
                .collect();
            for (host, route) in &domains {
                next_domains.insert(host.clone(), route.clone());
            }
            RouteSnapshot {
                domains: next_domains,
                paths: paths.clone(),
            }
        });

        let current = self.snapshot.load();
        previous
            .domains
            .iter()
            .filter(|(host, old)| match current.domains.get(*host) {
                Some(new) => !Arc::ptr_eq(old, new),
                None => true,
            })
            .map(|(host, _)| host.clone())
            .collect()
    }

    pub fn domain_count(&self) -> usize {
        self.snapshot.load().domains.len()
    }

    pub fn path_count(&self) -> usize {
        self.snapshot.load().paths.len()
    }
}
