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

// Azure Blob Storage archive backend (SAS authenticated REST)

use super::backend::ArchiveBackend;
use crate::config::AzureBlobConfig;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

/// Parsed storage connection string
///
/// Only shared access signature strings are supported; account-key strings
/// would need request signing.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionString {
    pub blob_endpoint: Url,
    pub sas_token: String,
}

impl ConnectionString {
    pub fn parse(raw: &str) -> Result<Self> {
        let parts: HashMap<String, &str> = raw
            .split(';')
            .filter(|part| !part.trim().is_empty())
            .filter_map(|part| part.split_once('='))
            .map(|(key, value)| (key.trim().to_ascii_lowercase(), value.trim()))
            .collect();

        let sas_token = match parts.get("sharedaccesssignature") {
            Some(sas) if !sas.is_empty() => sas.trim_start_matches('?').to_string(),
            _ if parts.contains_key("accountkey") => {
                bail!("account key connection strings are not supported, use a SharedAccessSignature")
            }
            _ => bail!("connection string has no SharedAccessSignature"),
        };

        let endpoint = match (parts.get("blobendpoint"), parts.get("accountname")) {
            (Some(endpoint), _) => endpoint.to_string(),
            (None, Some(account)) => {
                let protocol = parts
                    .get("defaultendpointsprotocol")
                    .copied()
                    .unwrap_or("https");
                let suffix = parts
                    .get("endpointsuffix")
                    .copied()
                    .unwrap_or("core.windows.net");
                format!("{}://{}.blob.{}", protocol, account, suffix)
            }
            (None, None) => bail!("connection string has neither BlobEndpoint nor AccountName"),
        };

        let blob_endpoint = Url::parse(&endpoint).context("Invalid BlobEndpoint")?;
        if blob_endpoint.cannot_be_a_base() {
            bail!("BlobEndpoint must be a hierarchical URL: '{}'", endpoint);
        }

        Ok(Self {
            blob_endpoint,
            sas_token,
        })
    }
}

/// Uploads each payload as a block blob in one container
pub struct AzureBlobBackend {
    client: Client,
    connection: ConnectionString,
    container: String,
}

impl AzureBlobBackend {
    pub fn new(config: AzureBlobConfig) -> Result<Self> {
        let connection = ConnectionString::parse(&config.connection_string)?;

        let client = reqwest::ClientBuilder::new()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            connection,
            container: config.container,
        })
    }

    fn container_url(&self) -> Result<Url> {
        let mut url = self.connection.blob_endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("BlobEndpoint cannot be a base URL"))?
            .pop_if_empty()
            .push(&self.container);
        url.set_query(Some(&format!("restype=container&{}", self.connection.sas_token)));
        Ok(url)
    }

    fn blob_url(&self, key: &str) -> Result<Url> {
        let mut url = self.connection.blob_endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("BlobEndpoint cannot be a base URL"))?
            .pop_if_empty()
            .push(&self.container)
            .extend(key.split('/'));
        url.set_query(Some(&self.connection.sas_token));
        Ok(url)
    }

    /// Create container if it doesn't exist
    async fn ensure_container(&self) -> Result<()> {
        let response = self
            .client
            .put(self.container_url()?)
            .header("Content-Length", "0")
            .send()
            .await
            .context("Failed to create container")?;

        match response.status().as_u16() {
            200..=299 => {
                info!("Container '{}' created", self.container);
                Ok(())
            }
            409 => {
                info!("Container '{}' already exists", self.container);
                Ok(())
            }
            // Blob-scoped SAS tokens may not allow container creation
            403 => {
                warn!(
                    "Not permitted to create container '{}', assuming it exists",
                    self.container
                );
                Ok(())
            }
            status => {
                let error_text = response.text().await.unwrap_or_default();
                bail!("Failed to create container: {} - {}", status, error_text)
            }
        }
    }
}

#[async_trait]
impl ArchiveBackend for AzureBlobBackend {
    async fn initialize(&self) -> Result<()> {
        self.ensure_container().await
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let response = self
            .client
            .put(self.blob_url(key)?)
            .header("x-ms-blob-type", "BlockBlob")
            .header("Content-Type", "application/json")
            .body(data)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            bail!(
                "Blob upload failed with status {}: {}",
                status,
                error_text
            );
        }

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(self.blob_url(key)?)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            bail!("Blob download failed with status {}", response.status());
        }

        Ok(response.bytes().await?.to_vec())
    }

    async fn health_check(&self) -> Result<bool> {
        match self.client.get(self.container_url()?).send().await {
            Ok(response) if response.status().is_success() => Ok(true),
            Ok(response) => {
                warn!("Health check failed with status: {}", response.status());
                Ok(false)
            }
            Err(e) => {
                warn!("Health check error: {}", e);
                Ok(false)
            }
        }
    }

    fn backend_type(&self) -> &str {
        "azure_blob"
    }
}
