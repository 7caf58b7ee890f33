//! Public tunnel subsystem.
//!
//! # Data Flow
//! ```text
//! startup auto_start / management call
//!     → manager.rs (single-flight state machine)
//!     → provider.rs (TunnelProvider contract)
//!     → ngrok.rs (agent process reporting the public URL)
//! ```

pub mod manager;
pub mod ngrok;
pub mod provider;

pub use manager::{TunnelManager, TunnelPhase};
pub use ngrok::NgrokAgent;
pub use provider::{TunnelError, TunnelHandle, TunnelInfo, TunnelOptions, TunnelProvider, TunnelStatus};
