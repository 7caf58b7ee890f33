//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges, histograms)
//!     → activity.rs (recent operator-facing lines for `logs`)
//!
//! Consumers:
//!     → stdout (pretty, compact or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//!     → Management API / CLI (`logs [n]`)
//! ```

pub mod activity;
pub mod logging;
pub mod metrics;

pub use activity::ActivityLog;
