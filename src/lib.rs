//! Liten Gateway library.
//!
//! The binary is a thin wrapper over [`lifecycle::run`]; everything else is
//! exposed so tests and embedders can build a [`Gateway`] directly.

pub mod admin;
pub mod config;
pub mod gateway;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod routing;
pub mod security;
pub mod tunnel;

pub use config::GatewayConfig;
pub use gateway::Gateway;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
