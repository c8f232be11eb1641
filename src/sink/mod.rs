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

// Sink forwarding
//
// A sink accepts one mapped record per request. The forwarder reports the
// outcome and never retries: a rejection usually means the sink's own rate
// limit kicked in, and resubmitting would only stack duplicates.

pub mod thingspeak;

pub use thingspeak::ThingSpeakSink;

use async_trait::async_trait;
use thiserror::Error;

use crate::uplink::MappedRecord;

/// Successful (or intentionally skipped) forward
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Sink stored the record and assigned it this entry id
    Accepted { entry_id: u64 },
    /// No sink credential configured; nothing was sent
    ConfigurationAbsent,
}

#[derive(Debug, Error)]
pub enum ForwardError {
    /// Sink answered but did not accept the record
    #[error("sink rejected record (status {status}): {body}")]
    Rejected { status: u16, body: String },

    /// Timeout or network failure before a response arrived
    #[error("sink transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Ingestion endpoint for mapped records
#[async_trait]
pub trait Sink: Send + Sync {
    /// Send one record. Issues at most one request.
    async fn forward(&self, record: &MappedRecord) -> Result<ForwardOutcome, ForwardError>;

    /// Sink type identifier for logs
    fn sink_type(&self) -> &str;
}
