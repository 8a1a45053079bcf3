// ABOUTME: Reqwest-backed Storage API client with async job polling
// ABOUTME: Thin wrapper; all orchestration decisions live in the migrate module

use crate::storage::models::{
    Bucket, FileInfo, FileUploadOptions, MetadataEntry, SlicedManifest, Table, TokenInfo,
    TypedTableDefinition, WriteTableOptions,
};
use crate::storage::StorageApi;
use crate::utils::retry_with_backoff;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const JOB_POLL_INTERVAL: Duration = Duration::from_secs(2);
const JOB_POLL_MAX_ATTEMPTS: u32 = 1800;

/// HTTP client for one Storage project.
pub struct StorageApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct StorageJob {
    id: String,
    status: String,
    #[serde(default)]
    results: serde_json::Value,
    #[serde(default)]
    error: Option<JobError>,
}

#[derive(Debug, Deserialize)]
struct JobError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreparedUpload {
    id: String,
    upload_url: String,
}

impl StorageApiClient {
    pub fn new(url: &str, token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: format!("{}/v2/storage", url.trim_end_matches('/')),
            token: token.to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .http
            .get(self.endpoint(path))
            .header("X-StorageApi-Token", &self.token)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", path))?;
        Self::read_json(response, path).await
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let response = self
            .http
            .post(self.endpoint(path))
            .header("X-StorageApi-Token", &self.token)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", path))?;
        Self::read_json(response, path).await
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        path: &str,
    ) -> Result<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read response body from {}", path))?;
        if !status.is_success() {
            bail!("Storage API call {} failed with {}: {}", path, status, body);
        }
        serde_json::from_str(&body)
            .with_context(|| format!("Unexpected response shape from {}", path))
    }

    /// Probe a resource; 404 means absent, anything else non-2xx is an error.
    async fn exists(&self, path: &str) -> Result<bool> {
        let response = self
            .http
            .get(self.endpoint(path))
            .header("X-StorageApi-Token", &self.token)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", path))?;
        let status = response.status();
        if status.is_success() {
            Ok(true)
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Ok(false)
        } else {
            let body = response.text().await.unwrap_or_default();
            bail!("Storage API call {} failed with {}: {}", path, status, body)
        }
    }

    /// Poll an asynchronous job until it reaches a terminal state.
    async fn wait_for_job(&self, job: StorageJob) -> Result<serde_json::Value> {
        let mut job = job;
        for _ in 0..JOB_POLL_MAX_ATTEMPTS {
            if job.status == "success" {
                return Ok(job.results);
            }
            if job.status == "error" {
                let message = job
                    .error
                    .take()
                    .map(|e| e.message)
                    .unwrap_or_else(|| "no error detail".to_string());
                bail!("Storage job {} failed: {}", job.id, message);
            }
            tokio::time::sleep(JOB_POLL_INTERVAL).await;
            job = self.get_json(&format!("jobs/{}", job.id)).await?;
        }
        bail!("Storage job {} did not finish in time", job.id)
    }

    async fn run_job(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let job: StorageJob = self.post_json(path, body).await?;
        self.wait_for_job(job).await
    }

    /// Stream a (possibly presigned) URL to a local file.
    async fn download_url(&self, url: &str, destination: &Path) -> Result<()> {
        retry_with_backoff(
            || async {
                let response = self
                    .http
                    .get(url)
                    .send()
                    .await
                    .with_context(|| format!("Download request to {} failed", url))?;
                if !response.status().is_success() {
                    bail!("Download from {} failed with {}", url, response.status());
                }
                let mut file = tokio::fs::File::create(destination).await.with_context(|| {
                    format!("Failed to create local file {}", destination.display())
                })?;
                let mut stream = response.bytes_stream();
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.context("Download stream interrupted")?;
                    tokio::io::AsyncWriteExt::write_all(&mut file, &chunk).await?;
                }
                Ok(())
            },
            3,
            Duration::from_secs(1),
        )
        .await
    }

    async fn upload_to_url(&self, url: &str, path: &Path) -> Result<()> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read local file {}", path.display()))?;
        let response = self
            .http
            .put(url)
            .body(bytes)
            .send()
            .await
            .with_context(|| format!("Upload request to {} failed", url))?;
        if !response.status().is_success() {
            bail!("Upload to {} failed with {}", url, response.status());
        }
        Ok(())
    }

    async fn prepare_upload(&self, options: &FileUploadOptions) -> Result<PreparedUpload> {
        self.post_json(
            "files/prepare",
            &json!({
                "name": options.file_name,
                "federationToken": options.federation_token,
                "isSliced": options.is_sliced,
            }),
        )
        .await
    }
}

#[async_trait]
impl StorageApi for StorageApiClient {
    async fn verify_token(&self) -> Result<TokenInfo> {
        self.get_json("tokens/verify")
            .await
            .context("Token verification failed")
    }

    async fn list_buckets(&self) -> Result<Vec<Bucket>> {
        self.get_json("buckets").await
    }

    async fn bucket_exists(&self, bucket_id: &str) -> Result<bool> {
        self.exists(&format!("buckets/{}", bucket_id)).await
    }

    async fn create_bucket(&self, name: &str, stage: &str) -> Result<()> {
        let _: serde_json::Value = self
            .post_json("buckets", &json!({ "name": name, "stage": stage }))
            .await
            .with_context(|| format!("Failed to create bucket {}.{}", stage, name))?;
        Ok(())
    }

    async fn list_tables(&self, bucket_id: &str) -> Result<Vec<Table>> {
        self.get_json(&format!("buckets/{}/tables", bucket_id)).await
    }

    async fn table_exists(&self, table_id: &str) -> Result<bool> {
        self.exists(&format!("tables/{}", table_id)).await
    }

    async fn get_table(&self, table_id: &str) -> Result<Table> {
        self.get_json(&format!(
            "tables/{}?include=metadata,columnMetadata",
            table_id
        ))
        .await
    }

    async fn create_table_async(
        &self,
        bucket_id: &str,
        name: &str,
        data_file_id: &str,
        primary_key: &str,
    ) -> Result<()> {
        self.run_job(
            &format!("buckets/{}/tables-async", bucket_id),
            &json!({
                "name": name,
                "dataFileId": data_file_id,
                "primaryKey": primary_key,
            }),
        )
        .await
        .with_context(|| format!("Failed to create table {} in bucket {}", name, bucket_id))?;
        Ok(())
    }

    async fn create_table_definition(
        &self,
        bucket_id: &str,
        definition: &TypedTableDefinition,
    ) -> Result<()> {
        let body = serde_json::to_value(definition)
            .context("Failed to serialize table definition")?;
        self.run_job(&format!("buckets/{}/tables-definition", bucket_id), &body)
            .await
            .with_context(|| {
                format!(
                    "Failed to create typed table {} in bucket {}",
                    definition.name, bucket_id
                )
            })?;
        Ok(())
    }

    async fn update_table_metadata(
        &self,
        table_id: &str,
        provider: &str,
        table_metadata: &[MetadataEntry],
        column_metadata: &HashMap<String, Vec<MetadataEntry>>,
    ) -> Result<()> {
        let _: serde_json::Value = self
            .post_json(
                &format!("tables/{}/metadata", table_id),
                &json!({
                    "provider": provider,
                    "metadata": table_metadata,
                    "columnsMetadata": column_metadata,
                }),
            )
            .await
            .with_context(|| {
                format!(
                    "Failed to restore {} metadata on table {}",
                    provider, table_id
                )
            })?;
        Ok(())
    }

    async fn export_table(
        &self,
        table_id: &str,
        include_internal_timestamp: bool,
    ) -> Result<String> {
        let results = self
            .run_job(
                &format!("tables/{}/export-async", table_id),
                &json!({
                    "gzip": true,
                    "includeInternalTimestamp": include_internal_timestamp,
                }),
            )
            .await
            .with_context(|| format!("Export of table {} failed", table_id))?;
        results
            .pointer("/file/id")
            .and_then(|v| {
                v.as_str()
                    .map(str::to_owned)
                    .or_else(|| v.as_u64().map(|n| n.to_string()))
            })
            .with_context(|| format!("Export job for {} returned no file id", table_id))
    }

    async fn get_file(&self, file_id: &str, federation_token: bool) -> Result<FileInfo> {
        let path = if federation_token {
            format!("files/{}?federationToken=1", file_id)
        } else {
            format!("files/{}", file_id)
        };
        self.get_json(&path).await
    }

    async fn download_file(&self, file_id: &str, destination: &Path) -> Result<()> {
        let info = self.get_file(file_id, true).await?;
        self.download_url(&info.url, destination).await
    }

    async fn download_sliced_file(
        &self,
        file_id: &str,
        destination_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        let info = self.get_file(file_id, true).await?;
        let manifest: SlicedManifest = self
            .get_json_url(&info.url)
            .await
            .with_context(|| format!("Failed to fetch manifest for file {}", file_id))?;

        let mut slices = Vec::with_capacity(manifest.entries.len());
        for entry in &manifest.entries {
            let file_name = entry.url.rsplit('/').next().unwrap_or(&entry.url);
            let local = destination_dir.join(file_name);
            self.download_url(&entry.url, &local).await?;
            slices.push(local);
        }
        Ok(slices)
    }

    async fn upload_file(&self, path: &Path, options: &FileUploadOptions) -> Result<String> {
        let prepared = self.prepare_upload(options).await?;
        self.upload_to_url(&prepared.upload_url, path).await?;
        Ok(prepared.id)
    }

    async fn upload_sliced_file(
        &self,
        paths: &[PathBuf],
        options: &FileUploadOptions,
    ) -> Result<String> {
        let prepared = self.prepare_upload(options).await?;
        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .with_context(|| format!("Slice path {} has no file name", path.display()))?;
            let slice_url = format!("{}/{}", prepared.upload_url, file_name);
            self.upload_to_url(&slice_url, path).await?;
            entries.push(json!({ "url": slice_url }));
        }
        let manifest = serde_json::to_vec(&json!({ "entries": entries }))?;
        let response = self
            .http
            .put(format!("{}/manifest", prepared.upload_url))
            .body(manifest)
            .send()
            .await
            .context("Manifest upload failed")?;
        if !response.status().is_success() {
            bail!("Manifest upload failed with {}", response.status());
        }
        Ok(prepared.id)
    }

    async fn write_table_from_file(
        &self,
        table_id: &str,
        options: &WriteTableOptions,
    ) -> Result<()> {
        let body = serde_json::to_value(options).context("Failed to serialize write options")?;
        self.run_job(&format!("tables/{}/import-async", table_id), &body)
            .await
            .with_context(|| format!("Import into table {} failed", table_id))?;
        Ok(())
    }

    async fn refresh_bucket_info(&self, bucket_id: &str) -> Result<()> {
        let _: serde_json::Value = self
            .post_json(&format!("buckets/{}/refresh-info", bucket_id), &json!({}))
            .await
            .with_context(|| format!("Failed to refresh table information in {}", bucket_id))?;
        Ok(())
    }
}

impl StorageApiClient {
    /// GET an absolute (typically presigned) URL and parse it as JSON.
    async fn get_json_url<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;
        Self::read_json(response, url).await
    }
}
