// Configuration loader with environment variable substitution

use super::types::*;
use crate::archive::azure_blob::ConnectionString;
use crate::backfill::BackfillWindow;
use crate::schedule::DailySchedule;
use anyhow::{bail, Context, Result};
use regex::Regex;
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file with environment variable substitution
    pub fn load<P: AsRef<Path>>(path: P) -> Result<RelayConfig> {
        let content = std::fs::read_to_string(path.as_ref())
            .context("Failed to read config file")?;

        Self::parse(&content)
    }

    /// Parse YAML text, substituting environment variables first
    pub fn parse(content: &str) -> Result<RelayConfig> {
        let content = Self::substitute_env_vars(content)?;

        let mut config: RelayConfig = serde_yaml::from_str(&content)
            .context("Failed to parse YAML configuration")?;

        // Quoted placeholders for unset variables arrive as ""
        config.sink.api_key = config.sink.api_key.filter(|key| !key.is_empty());
        config.broker.api_base = config.broker.api_base.filter(|base| !base.is_empty());

        Ok(config)
    }

    /// Substitute ${VAR} and ${VAR:-default} patterns with environment variables
    ///
    /// Examples:
    /// - ${TTN_DEVICE_ID} -> lht65n-01
    /// - ${TTN_PORT:-1883} -> 1883 (if TTN_PORT not set)
    ///
    /// An unset variable without default becomes an empty string so that
    /// optional credentials deserialize as absent rather than as the literal
    /// placeholder.
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}")?;

        let substituted = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str());

            match std::env::var(var_name) {
                Ok(value) => value,
                Err(_) => default_value.unwrap_or_default().to_string(),
            }
        });

        Ok(substituted.into_owned())
    }

    /// Validate configuration. Runs before any connection attempt; an error
    /// here is fatal for the process.
    pub fn validate(config: &RelayConfig) -> Result<()> {
        let broker = &config.broker;
        if broker.username.is_empty() {
            bail!("broker.username is required (TTN_USERNAME)");
        }
        if broker.password.is_empty() {
            bail!("broker.password is required (TTN_PASSWORD)");
        }
        if broker.device_id.is_empty() {
            bail!("broker.device_id is required (TTN_DEVICE_ID)");
        }
        if broker.backoff_seconds == 0 {
            bail!("broker.backoff_seconds must be > 0");
        }
        if broker.connect_timeout_seconds == 0 {
            bail!("broker.connect_timeout_seconds must be > 0");
        }

        if config.sink.timeout_seconds == 0 {
            bail!("sink.timeout_seconds must be > 0");
        }

        let relay = &config.relay;
        BackfillWindow::parse(&relay.backfill_window)
            .with_context(|| format!("invalid relay.backfill_window '{}'", relay.backfill_window))?;

        if relay.inter_record_delay_ms < 1000 {
            bail!("relay.inter_record_delay_ms must be >= 1000 to respect the sink rate limit");
        }

        if let Some(schedule) = &relay.schedule {
            DailySchedule::parse(schedule)
                .with_context(|| format!("invalid relay.schedule '{}'", schedule))?;
            // An unbounded session would never yield to the next firing
            if relay.live_duration_seconds.is_none() {
                bail!("relay.schedule requires relay.live_duration_seconds");
            }
        }

        match config.archive.backend.as_str() {
            "none" => {}
            "filesystem" => {
                if config.archive.filesystem.is_none() {
                    bail!("filesystem archive selected but filesystem config missing");
                }
            }
            "azure_blob" => match &config.archive.azure_blob {
                Some(azure) => {
                    ConnectionString::parse(&azure.connection_string)
                        .context("invalid archive.azure_blob.connection_string")?;
                    if azure.container.is_empty() {
                        bail!("archive.azure_blob.container cannot be empty");
                    }
                }
                None => bail!("azure_blob archive selected but azure_blob config missing"),
            },
            unknown => bail!(
                "Unknown archive backend: '{}'. Supported: none, filesystem, azure_blob",
                unknown
            ),
        }

        Ok(())
    }
}
