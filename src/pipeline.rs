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

use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::archive::{archive_key, ArchiveError, ArchiveOutcome, ArchiveWriter};
use crate::sink::{ForwardError, ForwardOutcome, Sink};
use crate::uplink::{FieldMapper, RawUplink, RecordOrigin};

/// Result of pushing one uplink through the pipeline
#[derive(Debug)]
pub struct ProcessOutcome {
    pub forward: Result<ForwardOutcome, ForwardError>,
    pub archive: Result<ArchiveOutcome, ArchiveError>,
}

/// Maps an uplink and fans it out to the sink and the archive
///
/// The two outbound requests run concurrently and fail independently.
pub struct RecordPipeline {
    mapper: FieldMapper,
    sink: Arc<dyn Sink>,
    archive: ArchiveWriter,
}

impl RecordPipeline {
    pub fn new(mapper: FieldMapper, sink: Arc<dyn Sink>, archive: ArchiveWriter) -> Self {
        Self {
            mapper,
            sink,
            archive,
        }
    }

    pub async fn process(&self, raw: &RawUplink, origin: RecordOrigin, seq: u64) -> ProcessOutcome {
        let record = self.mapper.map(raw);
        let key = archive_key(origin, Utc::now(), seq);
        let label = raw.label();

        let (forward, archive) =
            tokio::join!(self.sink.forward(&record), self.archive.archive(raw, &key));

        match &forward {
            Ok(ForwardOutcome::Accepted { entry_id }) => info!(
                origin = origin.as_str(),
                record = %label,
                sink = self.sink.sink_type(),
                entry_id,
                "Record forwarded"
            ),
            Ok(ForwardOutcome::ConfigurationAbsent) => debug!(
                origin = origin.as_str(),
                record = %label,
                "Sink credential not configured, forward skipped"
            ),
            Err(ForwardError::Rejected { status, body }) => error!(
                origin = origin.as_str(),
                record = %label,
                sink = self.sink.sink_type(),
                status,
                body = %body,
                "Sink rejected record"
            ),
            Err(e @ ForwardError::Transport(_)) => error!(
                origin = origin.as_str(),
                record = %label,
                sink = self.sink.sink_type(),
                error = %e,
                "Sink request failed"
            ),
        }

        ProcessOutcome { forward, archive }
    }
}

/// Snapshot of forward/archive counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ForwardStats {
    pub forwarded: u64,
    pub rejected: u64,
    pub failed: u64,
    pub unconfigured: u64,
    pub archived: u64,
    pub archive_failed: u64,
}

impl ForwardStats {
    /// Forward attempts, including ones skipped for lack of a credential
    pub fn attempts(&self) -> u64 {
        self.forwarded + self.rejected + self.failed + self.unconfigured
    }
}

/// Lock-free counters shared between a worker and whoever reports on it
#[derive(Debug, Default)]
pub struct PipelineCounters {
    forwarded: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
    unconfigured: AtomicU64,
    archived: AtomicU64,
    archive_failed: AtomicU64,
}

impl PipelineCounters {
    pub fn record(&self, outcome: &ProcessOutcome) {
        let counter = match &outcome.forward {
            Ok(ForwardOutcome::Accepted { .. }) => &self.forwarded,
            Ok(ForwardOutcome::ConfigurationAbsent) => &self.unconfigured,
            Err(ForwardError::Rejected { .. }) => &self.rejected,
            Err(ForwardError::Transport(_)) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        match &outcome.archive {
            Ok(ArchiveOutcome::Stored { .. }) => {
                self.archived.fetch_add(1, Ordering::Relaxed);
            }
            Ok(ArchiveOutcome::Skipped) => {}
            Err(_) => {
                self.archive_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// A record abandoned mid-forward
    pub fn record_interrupted(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ForwardStats {
        ForwardStats {
            forwarded: self.forwarded.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            unconfigured: self.unconfigured.load(Ordering::Relaxed),
            archived: self.archived.load(Ordering::Relaxed),
            archive_failed: self.archive_failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveBackend;
    use crate::uplink::MappedRecord;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct RecordingSink {
        calls: Mutex<Vec<MappedRecord>>,
    }

    #[async_trait]
    impl Sink for RecordingSink {
        async fn forward(&self, record: &MappedRecord) -> Result<ForwardOutcome, ForwardError> {
            self.calls.lock().unwrap().push(record.clone());
            Err(ForwardError::Transport("connection reset".into()))
        }

        fn sink_type(&self) -> &str {
            "recording"
        }
    }

    struct MemoryArchive {
        keys: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ArchiveBackend for MemoryArchive {
        async fn initialize(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn put(&self, key: &str, _data: Vec<u8>) -> anyhow::Result<()> {
            self.keys.lock().unwrap().push(key.to_string());
            Ok(())
        }

        async fn get(&self, _key: &str) -> anyhow::Result<Vec<u8>> {
            anyhow::bail!("not found")
        }

        async fn health_check(&self) -> anyhow::Result<bool> {
            Ok(true)
        }

        fn backend_type(&self) -> &str {
            "memory"
        }
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_block_archive() {
        let sink = Arc::new(RecordingSink {
            calls: Mutex::new(Vec::new()),
        });
        let archive = Arc::new(MemoryArchive {
            keys: Mutex::new(Vec::new()),
        });
        let pipeline = RecordPipeline::new(
            FieldMapper::default(),
            sink.clone(),
            ArchiveWriter::new(Some(archive.clone())),
        );
        let counters = PipelineCounters::default();

        let raw = RawUplink::new(json!({"uplink_message": {"decoded_payload": {"field5": 20}}}));
        let outcome = pipeline.process(&raw, RecordOrigin::Realtime, 1).await;
        counters.record(&outcome);

        assert!(outcome.forward.is_err());
        assert!(matches!(outcome.archive, Ok(ArchiveOutcome::Stored { .. })));
        assert_eq!(sink.calls.lock().unwrap()[0].fields[0], 20.0);

        let keys = archive.keys.lock().unwrap();
        assert_eq!(keys.len(), 1);
        assert!(keys[0].starts_with("realtime/realtime_data_"));
        assert!(keys[0].ends_with("_0001.json"));

        let stats = counters.snapshot();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.archived, 1);
        assert_eq!(stats.attempts(), 1);
    }
}
