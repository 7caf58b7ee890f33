//! Tunnel lifecycle.
//!
//! ```text
//! Stopped → Starting → Active → Stopping → Stopped
//!              │
//!              └─ provider error → Stopped
//! ```
//!
//! At most one tunnel is active. `start` and `stop` are serialised by an
//! async single-flight lock; the phase itself lives behind a plain mutex
//! that is never held across an await.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;

use crate::observability::metrics;
use crate::tunnel::provider::{TunnelError, TunnelHandle, TunnelInfo, TunnelOptions, TunnelProvider, TunnelStatus};

/// Lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelPhase {
    #[default]
    Stopped,
    Starting,
    Active,
    Stopping,
}

#[derive(Default)]
struct TunnelState {
    phase: TunnelPhase,
    handle: Option<Box<dyn TunnelHandle>>,
    info: Option<TunnelInfo>,
}

/// Owns the single outbound tunnel.
pub struct TunnelManager {
    provider: Arc<dyn TunnelProvider>,
    op_lock: tokio::sync::Mutex<()>,
    state: Mutex<TunnelState>,
}

impl TunnelManager {
    pub fn new(provider: Arc<dyn TunnelProvider>) -> Self {
        Self {
            provider,
            op_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(TunnelState::default()),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, TunnelState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn phase(&self) -> TunnelPhase {
        self.lock_state().phase
    }

    pub fn is_active(&self) -> bool {
        self.phase() == TunnelPhase::Active
    }

    pub fn url(&self) -> Option<String> {
        self.lock_state().info.as_ref().map(|i| i.url.clone())
    }

    /// Open a tunnel to `port`. Fails without touching state if one is
    /// already active.
    pub async fn start(&self, port: u16, options: TunnelOptions) -> Result<TunnelInfo, TunnelError> {
        if self.is_active() {
            return Err(TunnelError::AlreadyActive);
        }

        let _op = self.op_lock.lock().await;
        {
            let mut state = self.lock_state();
            if state.phase != TunnelPhase::Stopped {
                return Err(TunnelError::AlreadyActive);
            }
            state.phase = TunnelPhase::Starting;
        }

        tracing::info!(port, "Starting tunnel");
        match self.provider.open(port, &options).await {
            Ok(handle) => {
                let info = TunnelInfo {
                    url: handle.url().to_string(),
                    port,
                    start_time: Utc::now(),
                    options,
                };

                let mut state = self.lock_state();
                state.handle = Some(handle);
                state.info = Some(info.clone());
                state.phase = TunnelPhase::Active;
                metrics::set_tunnel_active(true);

                tracing::info!(url = %info.url, port, "Tunnel started");
                Ok(info)
            }
            Err(e) => {
                self.lock_state().phase = TunnelPhase::Stopped;
                tracing::warn!(error = %e, "Tunnel failed to start");
                Err(e)
            }
        }
    }

    /// Close the active tunnel. Returns `false` if none was active.
    ///
    /// A provider failure while closing is returned, but the tunnel is
    /// still considered stopped since its handle has been consumed.
    pub async fn stop(&self) -> Result<bool, TunnelError> {
        let _op = self.op_lock.lock().await;

        let (handle, info) = {
            let mut state = self.lock_state();
            if state.phase != TunnelPhase::Active {
                return Ok(false);
            }
            state.phase = TunnelPhase::Stopping;
            (state.handle.take(), state.info.take())
        };

        let result = match handle {
            Some(mut handle) => handle.close().await,
            None => Ok(()),
        };

        self.lock_state().phase = TunnelPhase::Stopped;
        metrics::set_tunnel_active(false);

        let url = info.map(|i| i.url).unwrap_or_default();
        match result {
            Ok(()) => {
                tracing::info!(url = %url, "Tunnel stopped");
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Tunnel close reported an error");
                Err(e)
            }
        }
    }

    /// Status of the active tunnel, `None` unless active.
    pub fn status(&self) -> Option<TunnelStatus> {
        let state = self.lock_state();
        if state.phase != TunnelPhase::Active {
            return None;
        }
        state.info.as_ref().map(|info| TunnelStatus::at(info, Utc::now()))
    }
}

impl std::fmt::Debug for TunnelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelManager")
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}
