// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Configuration types for ttn-relay

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RelayConfig {
    pub broker: BrokerConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub relay: RelaySettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// The Things Network broker and storage API settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_host")]
    pub host: String,

    #[serde(default = "default_broker_port")]
    pub port: u16,

    /// MQTT username, `<application-id>@<tenant>`
    #[serde(default)]
    pub username: String,

    /// API key used both as MQTT password and as storage API bearer token
    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub device_id: String,

    /// Base URL of the storage REST API, defaults to `https://{host}`
    #[serde(default)]
    pub api_base: Option<String>,

    #[serde(default = "default_keep_alive")]
    pub keep_alive_seconds: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// Fixed pause between reconnect attempts
    #[serde(default = "default_backoff")]
    pub backoff_seconds: u64,

    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            username: String::new(),
            password: String::new(),
            device_id: String::new(),
            api_base: None,
            keep_alive_seconds: default_keep_alive(),
            connect_timeout_seconds: default_connect_timeout(),
            backoff_seconds: default_backoff(),
            client_id_prefix: default_client_id_prefix(),
        }
    }
}

impl BrokerConfig {
    /// Application id is the part of the username before `@`
    pub fn application_id(&self) -> &str {
        self.username
            .split_once('@')
            .map(|(app, _)| app)
            .unwrap_or(&self.username)
    }

    /// Topic carrying uplinks for the configured device
    pub fn uplink_topic(&self) -> String {
        format!("v3/{}/devices/{}/up", self.username, self.device_id)
    }

    pub fn storage_api_base(&self) -> String {
        self.api_base
            .clone()
            .unwrap_or_else(|| format!("https://{}", self.host))
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

/// ThingSpeak-style ingestion endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SinkConfig {
    #[serde(default = "default_sink_url")]
    pub url: String,

    /// Write key; forwarding is skipped when absent
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_sink_timeout")]
    pub timeout_seconds: u64,

    /// Source field in `decoded_payload` for sink field1..field4
    #[serde(default = "default_field_sources")]
    pub fields: [String; 4],
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            url: default_sink_url(),
            api_key: None,
            timeout_seconds: default_sink_timeout(),
            fields: default_field_sources(),
        }
    }
}

impl SinkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Optional raw payload archive
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArchiveConfig {
    /// Backend type: "none", "filesystem", "azure_blob"
    #[serde(default = "default_archive_backend")]
    pub backend: String,

    #[serde(default)]
    pub filesystem: Option<FilesystemConfig>,

    #[serde(default)]
    pub azure_blob: Option<AzureBlobConfig>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            backend: default_archive_backend(),
            filesystem: None,
            azure_blob: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilesystemConfig {
    pub base_path: String,
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            base_path: "/data/sensor-archive".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AzureBlobConfig {
    /// Connection string with `BlobEndpoint` (or `AccountName`) and `SharedAccessSignature`
    pub connection_string: String,

    #[serde(default = "default_container")]
    pub container: String,

    #[serde(default = "default_archive_timeout")]
    pub timeout_seconds: u64,
}

/// Session sequencing settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelaySettings {
    /// Look-back window for the backfill query, e.g. "6h", "12h", "90m"
    #[serde(default = "default_backfill_window")]
    pub backfill_window: String,

    #[serde(default = "default_backfill_timeout")]
    pub backfill_timeout_seconds: u64,

    /// Minimum pause between two backfill forwards
    #[serde(default = "default_inter_record_delay")]
    pub inter_record_delay_ms: u64,

    /// Length of the live phase; unbounded when absent
    #[serde(default)]
    pub live_duration_seconds: Option<u64>,

    /// Bounded wait for the live subscriber to acknowledge a stop
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_seconds: u64,

    /// Daily trigger time, "HH:MM" in UTC
    #[serde(default)]
    pub schedule: Option<String>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            backfill_window: default_backfill_window(),
            backfill_timeout_seconds: default_backfill_timeout(),
            inter_record_delay_ms: default_inter_record_delay(),
            live_duration_seconds: None,
            stop_timeout_seconds: default_stop_timeout(),
            schedule: None,
        }
    }
}

impl RelaySettings {
    pub fn inter_record_delay(&self) -> Duration {
        Duration::from_millis(self.inter_record_delay_ms)
    }

    pub fn live_duration(&self) -> Option<Duration> {
        self.live_duration_seconds.map(Duration::from_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_seconds)
    }

    pub fn backfill_timeout(&self) -> Duration {
        Duration::from_secs(self.backfill_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"

    #[serde(default = "default_log_format")]
    pub format: String, // "text", "json"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_broker_host() -> String { "eu1.cloud.thethings.network".to_string() }
fn default_broker_port() -> u16 { 1883 }
fn default_keep_alive() -> u64 { 60 }
fn default_connect_timeout() -> u64 { 30 }
fn default_backoff() -> u64 { 300 }
fn default_client_id_prefix() -> String { "ttn-relay".to_string() }
fn default_sink_url() -> String { "https://api.thingspeak.com/update".to_string() }
fn default_sink_timeout() -> u64 { 10 }
fn default_archive_backend() -> String { "none".to_string() }
fn default_container() -> String { "sensor-data".to_string() }
fn default_archive_timeout() -> u64 { 30 }
fn default_backfill_window() -> String { "6h".to_string() }
fn default_backfill_timeout() -> u64 { 30 }
fn default_inter_record_delay() -> u64 { 1000 }
fn default_stop_timeout() -> u64 { 10 }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }

pub fn default_field_sources() -> [String; 4] {
    // temperature, humidity, motion count, battery voltage
    ["field5", "field3", "field4", "field1"].map(String::from)
}
