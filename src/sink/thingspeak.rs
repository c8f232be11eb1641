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

// ThingSpeak channel update endpoint

use super::{ForwardError, ForwardOutcome, Sink};
use crate::config::SinkConfig;
use crate::uplink::MappedRecord;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Sends records as `GET {url}?api_key=..&field1=..&field4=..`
///
/// The endpoint answers `200` with the new entry id, or `0` when the update
/// was refused (typically the per-channel rate limit).
pub struct ThingSpeakSink {
    client: Client,
    url: String,
}

impl ThingSpeakSink {
    pub fn new(config: &SinkConfig) -> Result<Self> {
        Self::with_timeout(config.url.clone(), config.timeout())
    }

    pub fn with_timeout(url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl Sink for ThingSpeakSink {
    async fn forward(&self, record: &MappedRecord) -> Result<ForwardOutcome, ForwardError> {
        if record.api_key.is_none() {
            return Ok(ForwardOutcome::ConfigurationAbsent);
        }

        let response = self
            .client
            .get(&self.url)
            .query(&record.query_params())
            .send()
            .await
            .map_err(|e| ForwardError::Transport(Box::new(e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ForwardError::Transport(Box::new(e)))?;
        let body = body.trim().to_string();

        debug!(status = status.as_u16(), body = %body, "ThingSpeak response");

        if status != reqwest::StatusCode::OK {
            return Err(ForwardError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        match body.parse::<i64>() {
            Ok(entry_id) if entry_id > 0 => Ok(ForwardOutcome::Accepted {
                entry_id: entry_id as u64,
            }),
            _ => Err(ForwardError::Rejected {
                status: status.as_u16(),
                body,
            }),
        }
    }

    fn sink_type(&self) -> &str {
        "thingspeak"
    }
}
