// Configuration module for ttn-relay
//
// Provides:
// - YAML configuration file loading
// - Environment variable substitution
// - Overrides from the TTN_* / THINGSPEAK_* / AZURE_* deployment variables
// - Configuration validation
// - Default values

pub mod types;
mod loader;

pub use types::*;
pub use loader::ConfigLoader;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<RelayConfig> {
    ConfigLoader::load(path).context("Failed to load configuration")
}

/// Load configuration, apply environment overrides and validate
pub fn load_config_with_env<P: AsRef<Path>>(path: P) -> Result<RelayConfig> {
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config)?;
    ConfigLoader::validate(&config)?;
    Ok(config)
}

/// Allow the deployment environment variables to override config values
pub fn apply_env_overrides(config: &mut RelayConfig) -> Result<()> {
    if let Some(host) = env_value("TTN_BROKER") {
        config.broker.host = host;
    }

    if let Some(port) = env_value("TTN_PORT") {
        config.broker.port = port
            .parse()
            .with_context(|| format!("TTN_PORT is not a valid port: '{}'", port))?;
    }

    if let Some(username) = env_value("TTN_USERNAME") {
        config.broker.username = username;
    }

    if let Some(password) = env_value("TTN_PASSWORD") {
        config.broker.password = password;
    }

    if let Some(device_id) = env_value("TTN_DEVICE_ID") {
        config.broker.device_id = device_id;
    }

    if let Some(api_key) = env_value("THINGSPEAK_API_KEY") {
        config.sink.api_key = Some(api_key);
    }

    if let Some(connection_string) = env_value("AZURE_STORAGE_CONNECTION_STRING") {
        let container = env_value("AZURE_STORAGE_CONTAINER")
            .or_else(|| config.archive.azure_blob.as_ref().map(|a| a.container.clone()))
            .unwrap_or_else(|| "sensor-data".to_string());
        let timeout_seconds = config
            .archive
            .azure_blob
            .as_ref()
            .map(|a| a.timeout_seconds)
            .unwrap_or(30);

        config.archive.backend = "azure_blob".to_string();
        config.archive.azure_blob = Some(AzureBlobConfig {
            connection_string,
            container,
            timeout_seconds,
        });
    }

    Ok(())
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}
