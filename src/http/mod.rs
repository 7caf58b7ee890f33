//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (axum/hyper)
//!     → server.rs (router, request ids, tracing)
//!     ├─ upgrade handshake → upgrade.rs (resolve, authenticate, splice)
//!     └─ plain request     → pipeline.rs (CORS → resolve → auth → rate limit)
//!                              → proxy.rs (rewrite, forward, stream back)
//!                              → response.rs (errors as JSON)
//! ```

pub mod pipeline;
pub mod proxy;
pub mod request;
pub mod response;
pub mod server;
pub mod upgrade;

pub use proxy::ProxyEngine;
pub use request::{RequestHead, X_REQUEST_ID};
pub use response::GatewayError;
pub use server::HttpServer;
pub use upgrade::{Splicer, UpgradeRouteCache};
