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

// Archive backend trait for raw payload storage

use anyhow::Result;
use async_trait::async_trait;

/// Key/value blob store for raw uplink payloads
///
/// Writes overwrite any existing object under the same key. Reads exist for
/// inspection and tests; the relay itself only writes.
#[async_trait]
pub trait ArchiveBackend: Send + Sync {
    /// Initialize the backend (create container/directory if needed)
    async fn initialize(&self) -> Result<()>;

    /// Store `data` under `key`
    ///
    /// # Arguments
    /// * `key` - Slash-separated object key, e.g. `realtime/realtime_data_20250301_060000_0001.json`
    /// * `data` - JSON bytes of the raw uplink
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()>;

    /// Fetch the object stored under `key`
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Health check
    async fn health_check(&self) -> Result<bool>;

    /// Get backend type identifier
    fn backend_type(&self) -> &str;
}
