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

// Uplink records and the sink field mapping

use chrono::{DateTime, FixedOffset};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::{default_field_sources, SinkConfig};

/// Inbound payload could not be decoded
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed uplink payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where a record entered the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOrigin {
    /// Storage API query for a past window
    Historical,
    /// Live broker subscription
    Realtime,
}

impl RecordOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordOrigin::Historical => "historical",
            RecordOrigin::Realtime => "realtime",
        }
    }
}

/// Uplink as delivered by the broker or the storage API
///
/// No schema is enforced; attributes are looked up by path and a missing
/// attribute simply reads as absent.
#[derive(Debug, Clone, PartialEq)]
pub struct RawUplink(Value);

impl RawUplink {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self(serde_json::from_slice(bytes)?))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.0)
    }

    /// Walk nested objects by key
    pub fn path(&self, keys: &[&str]) -> Option<&Value> {
        keys.iter().try_fold(&self.0, |value, key| value.get(key))
    }

    /// `uplink_message.decoded_payload`, if present and an object
    pub fn decoded_payload(&self) -> Option<&Map<String, Value>> {
        self.path(&["uplink_message", "decoded_payload"])
            .and_then(Value::as_object)
    }

    pub fn device_id(&self) -> Option<&str> {
        self.path(&["end_device_ids", "device_id"])
            .and_then(Value::as_str)
    }

    pub fn received_at(&self) -> Option<DateTime<FixedOffset>> {
        self.path(&["received_at"])
            .or_else(|| self.path(&["uplink_message", "received_at"]))
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    }

    /// First correlation id, used to identify the record in logs
    pub fn correlation_id(&self) -> Option<&str> {
        self.path(&["correlation_ids"])
            .and_then(Value::as_array)
            .and_then(|ids| ids.first())
            .and_then(Value::as_str)
    }

    /// Short identifier for log lines
    pub fn label(&self) -> String {
        if let Some(id) = self.correlation_id() {
            return id.to_string();
        }
        match (self.device_id(), self.received_at()) {
            (Some(device), Some(at)) => format!("{}@{}", device, at.to_rfc3339()),
            (None, Some(at)) => at.to_rfc3339(),
            (Some(device), None) => device.to_string(),
            (None, None) => "unidentified".to_string(),
        }
    }
}

impl From<Value> for RawUplink {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// The four sink fields plus the sink's write key
#[derive(Debug, Clone, PartialEq)]
pub struct MappedRecord {
    /// Values for sink field1..field4
    pub fields: [f64; 4],
    pub api_key: Option<String>,
}

impl MappedRecord {
    pub fn temperature(&self) -> f64 {
        self.fields[0]
    }

    pub fn humidity(&self) -> f64 {
        self.fields[1]
    }

    pub fn motion_count(&self) -> f64 {
        self.fields[2]
    }

    pub fn battery_voltage(&self) -> f64 {
        self.fields[3]
    }

    /// Query parameters in sink order: `api_key`, `field1`..`field4`
    pub fn query_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::with_capacity(5);
        if let Some(key) = &self.api_key {
            params.push(("api_key".to_string(), key.clone()));
        }
        for (i, value) in self.fields.iter().enumerate() {
            params.push((format!("field{}", i + 1), value.to_string()));
        }
        params
    }
}

/// Maps decoded uplink fields onto the sink's numbered fields
///
/// Never fails: absent or non-numeric source fields read as zero.
#[derive(Debug, Clone)]
pub struct FieldMapper {
    sources: [String; 4],
    api_key: Option<String>,
}

impl FieldMapper {
    pub fn new(sources: [String; 4], api_key: Option<String>) -> Self {
        Self { sources, api_key }
    }

    pub fn from_config(config: &SinkConfig) -> Self {
        Self::new(config.fields.clone(), config.api_key.clone())
    }

    pub fn map(&self, raw: &RawUplink) -> MappedRecord {
        let payload = raw.decoded_payload();
        let fields = std::array::from_fn(|i| {
            payload
                .and_then(|p| p.get(&self.sources[i]))
                .map(numeric)
                .unwrap_or(0.0)
        });

        MappedRecord {
            fields,
            api_key: self.api_key.clone(),
        }
    }
}

impl Default for FieldMapper {
    fn default() -> Self {
        Self::new(default_field_sources(), None)
    }
}

fn numeric(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        Value::Bool(b) => f64::from(u8::from(*b)),
        _ => 0.0,
    }
}
