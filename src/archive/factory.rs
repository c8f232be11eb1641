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

// Backend factory for creating archive backends from configuration

use super::azure_blob::AzureBlobBackend;
use super::backend::ArchiveBackend;
use super::filesystem::FilesystemBackend;
use crate::config::ArchiveConfig;
use anyhow::{bail, Result};
use std::sync::Arc;

pub struct ArchiveFactory;

impl ArchiveFactory {
    /// Create archive backend from configuration; `None` when archival is disabled
    pub fn create(config: &ArchiveConfig) -> Result<Option<Arc<dyn ArchiveBackend>>> {
        match config.backend.as_str() {
            "none" => Ok(None),

            "filesystem" => {
                let backend_config = config
                    .filesystem
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("Filesystem config missing"))?;

                let backend = FilesystemBackend::new(backend_config.clone())?;
                Ok(Some(Arc::new(backend)))
            }

            "azure_blob" => {
                let backend_config = config
                    .azure_blob
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("Azure blob config missing"))?;

                let backend = AzureBlobBackend::new(backend_config.clone())?;
                Ok(Some(Arc::new(backend)))
            }

            unknown => bail!(
                "Unknown archive backend: '{}'. Supported: none, filesystem, azure_blob",
                unknown
            ),
        }
    }
}
