//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Upgrade handshake accepted by the backend (101)
//!     → connection.rs (splice id, active/total counters, byte totals)
//!     → bytes relayed in both directions until either side closes
//!     → guard dropped, counters and gauge updated
//! ```
//!
//! Plain HTTP connections are owned by hyper; only spliced upgrade streams
//! are tracked here since they outlive the request that created them.

pub mod connection;

pub use connection::{ConnectionId, SpliceGuard, SpliceTracker};
