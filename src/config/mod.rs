//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML/YAML/JSON)
//!     → loader.rs (discover, parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → handed to the Gateway, which compiles routes from it
//!
//! On reload (management call, SIGHUP or file change):
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → Gateway::apply_config swaps route table and limits
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - A failed reload keeps the running configuration

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{discover_config, load_config, ConfigError};
pub use schema::{
    AdminConfig, GatewayConfig, KeyStoreConfig, LogFormat, NgrokConfig, ObservabilityConfig,
    RateLimitConfig, RouteConfig,
};
pub use validation::{validate_config, ValidationError};
pub use watcher::ConfigWatcher;
