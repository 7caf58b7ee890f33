//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request (after route resolution):
//!     → auth.rs (API key from header or query, checked against keys.rs)
//!     → rate_limit.rs (per-route, per-scope fixed window)
//!     → headers.rs (hop-by-hop stripping, X-Forwarded-*, CORS)
//!     → Pass to proxy
//! ```
//!
//! # Design Decisions
//! - Fail closed: missing or unknown keys are rejected
//! - Rejected requests never reach a backend
//! - No trust in client input

pub mod auth;
pub mod headers;
pub mod keys;
pub mod rate_limit;

pub use auth::AuthGate;
pub use keys::{FileKeyStore, KeyStore, KeyStoreError, MemoryKeyStore};
pub use rate_limit::{RateDecision, RateLimiter};
