//! Configuration validation.
//!
//! Serde handles syntax; this module checks meaning. Every problem is
//! collected so an operator can fix a file in one pass.

use thiserror::Error;

use crate::config::schema::{GatewayConfig, RouteConfig};
use crate::routing::{Route, RouteKey, RouteOrigin};

pub const NGROK_REGIONS: [&str; 7] = ["us", "eu", "ap", "au", "sa", "jp", "in"];

/// One semantic problem in a configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Check a configuration, returning every problem found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.port == 0 {
        errors.push(ValidationError::new("port", "must be non-zero"));
    }
    if config.rate_limit.window_secs == 0 {
        errors.push(ValidationError::new("rate_limit.window_secs", "must be greater than zero"));
    }
    if config.rate_limit.gc_interval_secs == 0 {
        errors.push(ValidationError::new("rate_limit.gc_interval_secs", "must be greater than zero"));
    }
    if config.rate_limit.default_limit == Some(0) {
        errors.push(ValidationError::new("rate_limit.default_limit", "must be greater than zero"));
    }

    for (prefix, route) in &config.routes {
        check_route(
            &format!("routes.{}", prefix),
            RouteKey::PathPrefix(prefix.clone()),
            route,
            &mut errors,
        );
    }
    for (host, route) in &config.domains {
        check_route(
            &format!("domains.{}", host),
            RouteKey::Domain(host.clone()),
            route,
            &mut errors,
        );
    }

    if let Some(region) = config.ngrok.as_ref().and_then(|n| n.region.as_deref()) {
        if !NGROK_REGIONS.contains(&region) {
            errors.push(ValidationError::new(
                "ngrok.region",
                format!("unknown region {:?} (expected one of {})", region, NGROK_REGIONS.join(", ")),
            ));
        }
    }

    if config.admin.enabled && config.admin.api_key.is_empty() {
        errors.push(ValidationError::new("admin.api_key", "required when the admin API is enabled"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_route(field: &str, key: RouteKey, route: &RouteConfig, errors: &mut Vec<ValidationError>) {
    if route.options.rate_limit == Some(0) {
        errors.push(ValidationError::new(format!("{}.rate_limit", field), "must be greater than zero"));
    }
    if let Err(e) = Route::from_config(key, route, RouteOrigin::Config) {
        errors.push(ValidationError::new(field, e.to_string()));
    }
}
