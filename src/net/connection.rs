//! Spliced connection tracking.
//!
//! # Responsibilities
//! - Generate unique ids for spliced upgrade streams
//! - Count active and completed splices
//! - Accumulate bytes relayed in each direction
//! - Let shutdown wait for in-flight splices to drain

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::observability::metrics;

/// Relaxed ordering is enough, ids only need to be unique.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a spliced connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "splice-{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Counters {
    active: AtomicU64,
    total: AtomicU64,
    bytes_to_backend: AtomicU64,
    bytes_to_client: AtomicU64,
}

/// Tracks spliced upgrade streams.
#[derive(Debug, Clone, Default)]
pub struct SpliceTracker {
    counters: Arc<Counters>,
}

impl SpliceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new splice. The returned guard decrements on drop.
    pub fn track(&self) -> SpliceGuard {
        let active = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        metrics::set_active_splices(active);

        SpliceGuard {
            counters: Arc::clone(&self.counters),
            id: ConnectionId::new(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.counters.active.load(Ordering::SeqCst)
    }

    pub fn total_count(&self) -> u64 {
        self.counters.total.load(Ordering::Relaxed)
    }

    /// Bytes relayed (client to backend, backend to client).
    pub fn bytes_relayed(&self) -> (u64, u64) {
        (
            self.counters.bytes_to_backend.load(Ordering::Relaxed),
            self.counters.bytes_to_client.load(Ordering::Relaxed),
        )
    }

    /// Wait until no splice is active or the deadline passes.
    /// Returns `true` if everything drained.
    pub async fn wait_for_drain(&self, deadline: Duration) -> bool {
        let wait = async {
            while self.active_count() > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        tokio::time::timeout(deadline, wait).await.is_ok()
    }
}

/// Lifetime guard for one splice.
#[derive(Debug)]
pub struct SpliceGuard {
    counters: Arc<Counters>,
    id: ConnectionId,
}

impl SpliceGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn record_bytes(&self, to_backend: u64, to_client: u64) {
        self.counters.bytes_to_backend.fetch_add(to_backend, Ordering::Relaxed);
        self.counters.bytes_to_client.fetch_add(to_client, Ordering::Relaxed);
    }
}

impl Drop for SpliceGuard {
    fn drop(&mut self) {
        let active = self.counters.active.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::set_active_splices(active);
        tracing::trace!(splice_id = %self.id, "Splice closed");
    }
}
