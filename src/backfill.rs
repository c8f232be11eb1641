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

// Historical backfill from the TTN storage integration

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

use crate::config::BrokerConfig;
use crate::pipeline::{ForwardStats, PipelineCounters, RecordPipeline};
use crate::uplink::{RawUplink, RecordOrigin};

/// Look-back window for the storage query, e.g. `6h`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillWindow {
    raw: String,
    duration: Duration,
}

impl BackfillWindow {
    /// Parse `<n><unit>` with unit `s`, `m` or `h`
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .context("window needs a unit suffix (s, m, h)")?;
        let (digits, unit) = s.split_at(split);

        let amount: u64 = digits.parse().context("window must start with a number")?;
        if amount == 0 {
            bail!("window must be greater than zero");
        }

        let multiplier = match unit {
            "s" => 1,
            "m" => 60,
            "h" => 3600,
            other => bail!("unsupported window unit '{}', expected s, m or h", other),
        };
        let seconds = amount
            .checked_mul(multiplier)
            .with_context(|| format!("window '{}' is too large", s))?;

        Ok(Self {
            raw: s.to_string(),
            duration: Duration::from_secs(seconds),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl fmt::Display for BackfillWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("storage API returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("storage API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("storage API response could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Historical records for one window, oldest first
///
/// Consumed by iteration; a batch cannot be replayed.
#[derive(Debug)]
pub struct UplinkBatch {
    records: std::vec::IntoIter<RawUplink>,
}

impl UplinkBatch {
    /// Orders records by `received_at`; records without a timestamp keep
    /// their relative order ahead of timestamped ones
    pub fn new(mut records: Vec<RawUplink>) -> Self {
        records.sort_by_key(|record| record.received_at());
        Self {
            records: records.into_iter(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl Iterator for UplinkBatch {
    type Item = RawUplink;

    fn next(&mut self) -> Option<Self::Item> {
        self.records.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.records.size_hint()
    }
}

impl ExactSizeIterator for UplinkBatch {}

/// Source of historical uplinks
#[async_trait]
pub trait UplinkSource: Send + Sync {
    /// One request for the window; no retry on failure
    async fn fetch(&self, window: &BackfillWindow) -> Result<UplinkBatch, FetchError>;
}

/// Client for `GET /api/v3/as/applications/{app}/devices/{device}/packages/storage/uplink_message`
pub struct StorageApiClient {
    client: Client,
    url: String,
}

impl StorageApiClient {
    pub fn new(config: &BrokerConfig, timeout: Duration) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        let auth_value = format!("Bearer {}", config.password);
        headers.insert(
            reqwest::header::AUTHORIZATION,
            reqwest::header::HeaderValue::from_str(&auth_value).context("Invalid API token")?,
        );

        let client = reqwest::ClientBuilder::new()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        let url = format!(
            "{}/api/v3/as/applications/{}/devices/{}/packages/storage/uplink_message",
            config.storage_api_base().trim_end_matches('/'),
            config.application_id(),
            config.device_id
        );

        Ok(Self { client, url })
    }
}

#[async_trait]
impl UplinkSource for StorageApiClient {
    async fn fetch(&self, window: &BackfillWindow) -> Result<UplinkBatch, FetchError> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("last", window.as_str())])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(UplinkBatch::new(parse_uplinks(&body)?))
    }
}

/// Accepts `{"result": [...]}` as well as newline-delimited `{"result": {...}}`
pub fn parse_uplinks(body: &str) -> Result<Vec<RawUplink>, serde_json::Error> {
    let body = body.trim();
    if body.is_empty() {
        return Ok(Vec::new());
    }

    if let Ok(Value::Object(mut object)) = serde_json::from_str::<Value>(body) {
        return Ok(match object.remove("result") {
            Some(Value::Array(items)) => items.into_iter().map(RawUplink::new).collect(),
            Some(item @ Value::Object(_)) => vec![RawUplink::new(item)],
            _ => Vec::new(),
        });
    }

    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let mut value: Value = serde_json::from_str(line)?;
            let record = value
                .get_mut("result")
                .map(Value::take)
                .unwrap_or(value);
            Ok(RawUplink::new(record))
        })
        .collect()
}

/// Counts for one backfill run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub window: String,
    pub fetched: usize,
    pub fetch_failed: bool,
    pub stats: ForwardStats,
}

/// Fetches one window and pushes every record through the pipeline
pub struct Backfill {
    source: Arc<dyn UplinkSource>,
    pipeline: Arc<RecordPipeline>,
    window: BackfillWindow,
    inter_record_delay: Duration,
}

impl Backfill {
    pub fn new(
        source: Arc<dyn UplinkSource>,
        pipeline: Arc<RecordPipeline>,
        window: BackfillWindow,
        inter_record_delay: Duration,
    ) -> Self {
        Self {
            source,
            pipeline,
            window,
            inter_record_delay,
        }
    }

    /// Run to completion. Fetch failures are reported once and yield an
    /// empty run; per-record failures do not stop the run.
    pub async fn run(&self) -> BackfillReport {
        let mut report = BackfillReport {
            window: self.window.to_string(),
            ..Default::default()
        };

        info!(window = %self.window, "Fetching historical uplinks");

        let batch = match self.source.fetch(&self.window).await {
            Ok(batch) => batch,
            Err(e) => {
                error!(component = "backfill", window = %self.window, error = %e, "Error fetching historical data");
                report.fetch_failed = true;
                return report;
            }
        };

        report.fetched = batch.len();
        info!(count = report.fetched, "Retrieved historical records");

        let counters = PipelineCounters::default();
        for (index, raw) in batch.enumerate() {
            if index > 0 {
                // Sink rate limit
                tokio::time::sleep(self.inter_record_delay).await;
            }
            let outcome = self
                .pipeline
                .process(&raw, RecordOrigin::Historical, index as u64 + 1)
                .await;
            counters.record(&outcome);
        }

        report.stats = counters.snapshot();
        info!(
            fetched = report.fetched,
            forwarded = report.stats.forwarded,
            rejected = report.stats.rejected,
            failed = report.stats.failed,
            "Backfill complete"
        );

        report
    }
}
