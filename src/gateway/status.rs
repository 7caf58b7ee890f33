//! Gateway counters and the status report built from them.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::tunnel::TunnelStatus;

/// Running counters shared by the HTTP pipeline and the upgrade dispatcher.
#[derive(Debug, Default)]
pub struct GatewayStats {
    requests: AtomicU64,
    forwarded: AtomicU64,
    auth_failures: AtomicU64,
    rate_limited: AtomicU64,
    not_found: AtomicU64,
    upstream_errors: AtomicU64,
    preflights: AtomicU64,
    upgrades_accepted: AtomicU64,
    upgrades_rejected: AtomicU64,
}

macro_rules! counter_ops {
    ($($incr:ident => $field:ident),* $(,)?) => {
        $(
            pub fn $incr(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl GatewayStats {
    counter_ops! {
        record_request => requests,
        record_forwarded => forwarded,
        record_auth_failure => auth_failures,
        record_rate_limited => rate_limited,
        record_not_found => not_found,
        record_upstream_error => upstream_errors,
        record_preflight => preflights,
        record_upgrade_accepted => upgrades_accepted,
        record_upgrade_rejected => upgrades_rejected,
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            requests: load(&self.requests),
            forwarded: load(&self.forwarded),
            auth_failures: load(&self.auth_failures),
            rate_limited: load(&self.rate_limited),
            not_found: load(&self.not_found),
            upstream_errors: load(&self.upstream_errors),
            preflights: load(&self.preflights),
            upgrades_accepted: load(&self.upgrades_accepted),
            upgrades_rejected: load(&self.upgrades_rejected),
        }
    }
}

/// Point-in-time copy of [`GatewayStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub forwarded: u64,
    pub auth_failures: u64,
    pub rate_limited: u64,
    pub not_found: u64,
    pub upstream_errors: u64,
    pub preflights: u64,
    pub upgrades_accepted: u64,
    pub upgrades_rejected: u64,
}

/// Spliced upgrade connection counts.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SpliceStats {
    pub active: u64,
    pub total: u64,
    pub cached_splicers: usize,
    pub bytes_to_backend: u64,
    pub bytes_to_client: u64,
}

/// Everything `status` reports.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub version: &'static str,
    pub port: u16,
    pub uptime: String,
    pub uptime_seconds: u64,
    pub domains: usize,
    pub path_routes: usize,
    pub rate_limit_buckets: usize,
    pub api_keys: usize,
    pub stats: StatsSnapshot,
    pub splices: SpliceStats,
    pub tunnel: Option<TunnelStatus>,
}

impl std::fmt::Display for GatewayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Liten Gateway v{}", self.version)?;
        writeln!(f, "  port:        {}", self.port)?;
        writeln!(f, "  uptime:      {}", self.uptime)?;
        writeln!(f, "  routes:      {} path, {} domain", self.path_routes, self.domains)?;
        writeln!(f, "  api keys:    {}", self.api_keys)?;
        writeln!(
            f,
            "  requests:    {} total, {} forwarded, {} unauthorized, {} rate limited, {} not found, {} upstream errors",
            self.stats.requests,
            self.stats.forwarded,
            self.stats.auth_failures,
            self.stats.rate_limited,
            self.stats.not_found,
            self.stats.upstream_errors,
        )?;
        writeln!(
            f,
            "  upgrades:    {} accepted, {} rejected, {} active",
            self.stats.upgrades_accepted, self.stats.upgrades_rejected, self.splices.active
        )?;
        match &self.tunnel {
            Some(t) => write!(f, "  tunnel:      {} -> localhost:{} (up {})", t.url, t.port, t.uptime),
            None => write!(f, "  tunnel:      inactive"),
        }
    }
}
