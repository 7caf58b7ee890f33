//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path)
//!     → table.rs (snapshot lookup)
//!     → matcher.rs (normalise host, prefix match)
//!     → Return: matched Route or None
//!
//! Mutation:
//!     addDomain / removeDomain → new snapshot published atomically
//!     config reload            → path routes replaced wholesale
//! ```
//!
//! # Design Decisions
//! - Domain rules are checked before path rules
//! - Path rules keep declaration order; first match wins
//! - Deterministic: same input always matches same route

pub mod matcher;
pub mod route;
pub mod table;

pub use route::{Route, RouteError, RouteKey, RouteOptions, RouteOrigin, Target};
pub use table::RouteTable;
