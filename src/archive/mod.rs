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

// Raw payload archive
//
// Provides a trait-based abstraction for blob backends (local filesystem,
// Azure Blob Storage) and the best-effort writer the relay pipeline uses.
// Archival never fails the pipeline: errors are logged and reported to the
// caller, which only counts them.

pub mod azure_blob;
pub mod backend;
pub mod factory;
pub mod filesystem;

pub use azure_blob::AzureBlobBackend;
pub use backend::ArchiveBackend;
pub use factory::ArchiveFactory;
pub use filesystem::FilesystemBackend;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::uplink::{RawUplink, RecordOrigin};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    Stored { key: String },
    /// No archive backend configured
    Skipped,
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to archive '{key}': {source}")]
    Storage {
        key: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Object key for an archived uplink, e.g.
/// `realtime/realtime_data_20250301_060000_0007.json`
pub fn archive_key(origin: RecordOrigin, at: DateTime<Utc>, seq: u64) -> String {
    let prefix = origin.as_str();
    format!(
        "{}/{}_data_{}_{:04}.json",
        prefix,
        prefix,
        at.format("%Y%m%d_%H%M%S"),
        seq
    )
}

/// Best-effort archival of raw uplinks
#[derive(Clone, Default)]
pub struct ArchiveWriter {
    backend: Option<Arc<dyn ArchiveBackend>>,
}

impl ArchiveWriter {
    pub fn new(backend: Option<Arc<dyn ArchiveBackend>>) -> Self {
        Self { backend }
    }

    pub fn disabled() -> Self {
        Self { backend: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub async fn archive(&self, raw: &RawUplink, key: &str) -> Result<ArchiveOutcome, ArchiveError> {
        let Some(backend) = &self.backend else {
            return Ok(ArchiveOutcome::Skipped);
        };

        let result = match raw.to_json_bytes() {
            Ok(bytes) => backend.put(key, bytes).await,
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(()) => {
                debug!(backend = backend.backend_type(), key, "Archived uplink");
                Ok(ArchiveOutcome::Stored {
                    key: key.to_string(),
                })
            }
            Err(source) => {
                warn!(
                    backend = backend.backend_type(),
                    key,
                    error = %source,
                    "Archive write failed"
                );
                Err(ArchiveError::Storage {
                    key: key.to_string(),
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_archive_key_format() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 6, 0, 5).unwrap();
        assert_eq!(
            archive_key(RecordOrigin::Realtime, at, 7),
            "realtime/realtime_data_20250301_060005_0007.json"
        );
        assert_eq!(
            archive_key(RecordOrigin::Historical, at, 12345),
            "historical/historical_data_20250301_060005_12345.json"
        );
    }

    #[tokio::test]
    async fn test_disabled_writer_skips() {
        let writer = ArchiveWriter::disabled();
        let raw = RawUplink::new(serde_json::json!({}));

        let outcome = writer.archive(&raw, "realtime/x.json").await.unwrap();
        assert_eq!(outcome, ArchiveOutcome::Skipped);
        assert!(!writer.is_enabled());
    }
}
