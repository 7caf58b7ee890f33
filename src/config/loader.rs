//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// File names tried, in order, when no explicit path is given.
pub const CONFIG_CANDIDATES: [&str; 4] = ["config.toml", "config.yaml", "config.yml", "config.json"];

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no configuration file found (searched: {})", display_paths(.searched))]
    NotFound { searched: Vec<PathBuf> },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Load and validate configuration. The format follows the extension:
/// `.yaml`/`.yml` and `.json` are recognised, anything else is read as TOML.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let config = parse_config(path, &content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    tracing::debug!(
        path = %path.display(),
        routes = config.routes.len(),
        domains = config.domains.len(),
        "Configuration loaded"
    );
    Ok(config)
}

fn parse_config(path: &Path, content: &str) -> Result<GatewayConfig, ConfigError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    let parsed = match extension.as_deref() {
        Some("yaml") | Some("yml") => serde_yaml::from_str(content).map_err(|e| e.to_string()),
        Some("json") => serde_json::from_str(content).map_err(|e| e.to_string()),
        _ => toml::from_str(content).map_err(|e| e.to_string()),
    };

    parsed.map_err(|message| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    })
}

/// Find the first configuration file present in `dir`.
pub fn discover_config(dir: &Path) -> Result<PathBuf, ConfigError> {
    let searched: Vec<PathBuf> = CONFIG_CANDIDATES.iter().map(|name| dir.join(name)).collect();
    searched
        .iter()
        .find(|path| path.is_file())
        .cloned()
        .ok_or(ConfigError::NotFound { searched })
}
