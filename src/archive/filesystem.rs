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

// Filesystem archive backend

use super::backend::ArchiveBackend;
use crate::config::FilesystemConfig;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Writes each archived payload to `{base_path}/{key}`
pub struct FilesystemBackend {
    base_path: PathBuf,
}

impl FilesystemBackend {
    pub fn new(config: FilesystemConfig) -> Result<Self> {
        let base_path = PathBuf::from(&config.base_path);

        info!(
            "Initializing filesystem archive at: {}",
            base_path.display()
        );

        Ok(Self { base_path })
    }

    /// Resolve a key below the base directory
    fn object_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes {
            bail!("Invalid archive key: '{}'", key);
        }
        Ok(self.base_path.join(relative))
    }
}

#[async_trait]
impl ArchiveBackend for FilesystemBackend {
    async fn initialize(&self) -> Result<()> {
        if !self.base_path.exists() {
            info!("Creating archive directory: {}", self.base_path.display());
            fs::create_dir_all(&self.base_path)
                .await
                .context("Failed to create archive directory")?;
        }
        Ok(())
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let path = self.object_path(key)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .context(format!("Failed to create directory: {}", parent.display()))?;
        }

        debug!("Writing {} bytes to {}", data.len(), path.display());

        let mut file = fs::File::create(&path)
            .await
            .context(format!("Failed to create file: {}", path.display()))?;

        file.write_all(&data)
            .await
            .context("Failed to write data")?;

        file.flush().await.context("Failed to flush data")?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(key)?;
        fs::read(&path)
            .await
            .context(format!("Failed to read file: {}", path.display()))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(fs::metadata(&self.base_path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false))
    }

    fn backend_type(&self) -> &str {
        "filesystem"
    }
}
