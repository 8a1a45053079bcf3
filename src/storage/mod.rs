// ABOUTME: Storage API surface consumed by the migration strategies
// ABOUTME: Defines the async client trait plus the reqwest-backed implementation

pub mod client;
pub mod models;

pub use client::StorageApiClient;
pub use models::{
    Bucket, ColumnDatatype, ColumnDefinition, FileInfo, FileUploadOptions, KeyedLayout,
    ManifestEntry, MetadataEntry, SlicedManifest, Table, TokenInfo, TypedTableDefinition,
    WriteTableOptions,
};

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Client contract against one Storage project (source or destination).
///
/// The migration engine never talks HTTP directly; everything goes through
/// this trait so strategies can be exercised against in-memory fakes.
#[async_trait]
pub trait StorageApi: Send + Sync {
    /// Verify the project token and return account information, including
    /// the feature flags that gate optional behavior.
    async fn verify_token(&self) -> Result<TokenInfo>;

    async fn list_buckets(&self) -> Result<Vec<Bucket>>;

    async fn bucket_exists(&self, bucket_id: &str) -> Result<bool>;

    async fn create_bucket(&self, name: &str, stage: &str) -> Result<()>;

    /// List tables of a bucket, including their reported row counts.
    async fn list_tables(&self, bucket_id: &str) -> Result<Vec<Table>>;

    async fn table_exists(&self, table_id: &str) -> Result<bool>;

    async fn get_table(&self, table_id: &str) -> Result<Table>;

    /// Create an untyped table from an already-uploaded header file.
    /// `primary_key` is the comma-joined key column list.
    async fn create_table_async(
        &self,
        bucket_id: &str,
        name: &str,
        data_file_id: &str,
        primary_key: &str,
    ) -> Result<()>;

    /// Create a typed table from explicit column definitions.
    async fn create_table_definition(
        &self,
        bucket_id: &str,
        definition: &TypedTableDefinition,
    ) -> Result<()>;

    /// Replace one provider's metadata on a table, table-level and per-column
    /// entries together.
    async fn update_table_metadata(
        &self,
        table_id: &str,
        provider: &str,
        table_metadata: &[MetadataEntry],
        column_metadata: &std::collections::HashMap<String, Vec<MetadataEntry>>,
    ) -> Result<()>;

    /// Start an asynchronous gzip export of a table and wait for the job to
    /// finish. Returns the id of the produced file.
    async fn export_table(
        &self,
        table_id: &str,
        include_internal_timestamp: bool,
    ) -> Result<String>;

    /// Fetch file metadata; with `federation_token` the response carries
    /// short-lived object storage credentials for direct download.
    async fn get_file(&self, file_id: &str, federation_token: bool) -> Result<FileInfo>;

    async fn download_file(&self, file_id: &str, destination: &Path) -> Result<()>;

    /// Download every slice of a sliced file into `destination_dir` and
    /// return the local slice paths in manifest order.
    async fn download_sliced_file(
        &self,
        file_id: &str,
        destination_dir: &Path,
    ) -> Result<Vec<PathBuf>>;

    async fn upload_file(&self, path: &Path, options: &FileUploadOptions) -> Result<String>;

    async fn upload_sliced_file(
        &self,
        paths: &[PathBuf],
        options: &FileUploadOptions,
    ) -> Result<String>;

    /// Load an uploaded file into a table. The write is destructive unless
    /// `options.incremental` is set.
    async fn write_table_from_file(
        &self,
        table_id: &str,
        options: &WriteTableOptions,
    ) -> Result<()>;

    /// Ask the platform to recompute cached row counts and table metadata
    /// for a bucket.
    async fn refresh_bucket_info(&self, bucket_id: &str) -> Result<()>;
}
