//! Configuration loading and management
//!
//! This module handles loading configuration from files and environment variables.

use std::path::Path;

use tracing::{debug, info};

use super::types::Config;
use crate::error::ConfigError;

/// Load configuration from a JSON file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read or parsed.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    debug!("Loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;

    let config: Config = serde_json::from_str(&contents)
        .map_err(|e| ConfigError::ParseError(format!("Failed to parse JSON: {e} at {path:?}")))?;

    config.validate()?;

    info!(
        "Configuration loaded: status file {:?}, {} provision workers",
        config.vpn.status_file, config.provision.workers
    );

    Ok(config)
}

/// Load configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.validate()?;

    Ok(config)
}

/// Load configuration with environment variable overrides
///
/// Environment variables:
/// - `FLEETD_NODE_NAME`: Override node name
/// - `FLEETD_LOG_LEVEL`: Override log level
/// - `FLEETD_STATUS_FILE`: Override VPN status file path
/// - `FLEETD_STORE_PATH`: Override datastore path
/// - `FLEETD_WORKERS`: Override provision worker count
///
/// # Errors
///
/// Returns `ConfigError` if loading or parsing fails.
pub fn load_config_with_env(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let mut config = load_config(path)?;

    if let Ok(name) = std::env::var("FLEETD_NODE_NAME") {
        config.node.name = Some(name);
        debug!("Node name overridden to {:?}", config.node.name);
    }

    if let Ok(level) = std::env::var("FLEETD_LOG_LEVEL") {
        config.log.level = level;
        debug!("Log level overridden to {}", config.log.level);
    }

    if let Ok(status) = std::env::var("FLEETD_STATUS_FILE") {
        config.vpn.status_file = status.into();
        debug!("Status file overridden to {:?}", config.vpn.status_file);
    }

    if let Ok(store) = std::env::var("FLEETD_STORE_PATH") {
        config.store.path = store.into();
        debug!("Store path overridden to {:?}", config.store.path);
    }

    if let Ok(workers) = std::env::var("FLEETD_WORKERS") {
        config.provision.workers = workers.parse().map_err(|_| ConfigError::EnvError {
            name: "FLEETD_WORKERS".into(),
            reason: format!("Invalid number: {workers}"),
        })?;
        debug!("Worker count overridden to {}", config.provision.workers);
    }

    // Re-validate after overrides
    config.validate()?;

    Ok(config)
}

/// Create a default configuration file at the given path
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be written.
pub fn create_default_config(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let config = Config::default_config();
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {e}")))?;

    std::fs::write(path, json)?;
    Ok(())
}
