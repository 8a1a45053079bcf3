// ABOUTME: File-staging migration strategy: export, download, upload, import
// ABOUTME: Routes oversized sliced exports into the chunked transfer pipeline

use crate::files::{BlobStore, PROVIDER_GCS};
use crate::migrate::large_transfer::LargeTableTransfer;
use crate::migrate::schema::SchemaReplicator;
use crate::migrate::selector::select_tables;
use crate::migrate::MigrationStrategy;
use crate::storage::models::{FileUploadOptions, Table, WriteTableOptions};
use crate::storage::StorageApi;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

/// Sliced exports above this size move through the chunked pipeline so local
/// disk usage stays bounded.
pub const DEFAULT_LARGE_FILE_THRESHOLD_BYTES: u64 = 50 * 1024 * 1024 * 1024;

/// Stage of internal platform buckets; their tables are never migrated.
const SYSTEM_STAGE: &str = "sys";

/// Migrates tables through the platform file API.
///
/// Dry-run policy: reads (exports, file metadata, downloads) still execute so
/// the log mirrors a real run; every mutation is replaced by a `[dry-run]`
/// log line.
pub struct FileTransferMigrator {
    source: Arc<dyn StorageApi>,
    destination: Arc<dyn StorageApi>,
    blobs: Arc<dyn BlobStore>,
    replicator: SchemaReplicator,
    tables: Vec<String>,
    /// Buckets already confirmed to exist on the destination this run.
    confirmed_buckets: HashSet<String>,
    dry_run: bool,
    preserve_timestamp: bool,
    large_file_threshold_bytes: u64,
}

impl FileTransferMigrator {
    pub fn new(
        source: Arc<dyn StorageApi>,
        destination: Arc<dyn StorageApi>,
        blobs: Arc<dyn BlobStore>,
        tables: Vec<String>,
        dry_run: bool,
        preserve_timestamp: bool,
    ) -> Self {
        Self {
            source,
            destination: destination.clone(),
            blobs,
            replicator: SchemaReplicator::new(destination),
            tables,
            confirmed_buckets: HashSet::new(),
            dry_run,
            preserve_timestamp,
            large_file_threshold_bytes: DEFAULT_LARGE_FILE_THRESHOLD_BYTES,
        }
    }

    pub fn with_large_file_threshold(mut self, bytes: u64) -> Self {
        self.large_file_threshold_bytes = bytes;
        self
    }

    async fn ensure_bucket(&mut self, table: &Table) -> Result<()> {
        if self.confirmed_buckets.contains(&table.bucket.id) {
            return Ok(());
        }
        if !self.destination.bucket_exists(&table.bucket.id).await? {
            if self.dry_run {
                tracing::info!("[dry-run] Creating bucket {}", table.bucket.id);
            } else {
                tracing::info!("Creating bucket {}", table.bucket.id);
                self.replicator.create_bucket(&table.bucket.id).await?;
            }
        }
        self.confirmed_buckets.insert(table.bucket.id.clone());
        Ok(())
    }

    async fn ensure_table(&self, table: &Table) -> Result<()> {
        if self.destination.table_exists(&table.id).await? {
            return Ok(());
        }
        if self.dry_run {
            tracing::info!("[dry-run] Creating table {}", table.id);
        } else {
            tracing::info!("Creating table {}", table.id);
            self.replicator.create_table(table).await?;
        }
        Ok(())
    }

    async fn migrate_table(&self, table: &Table) -> Result<()> {
        tracing::info!("Exporting table {}", table.id);
        let file_id = self
            .source
            .export_table(&table.id, self.preserve_timestamp)
            .await?;
        let file_info = self.source.get_file(&file_id, true).await?;

        if file_info.is_sliced
            && file_info.provider == PROVIDER_GCS
            && file_info.size_bytes > self.large_file_threshold_bytes
        {
            // The chunked pipeline bounds local disk usage; the full-file
            // paths below would stage the entire export at once.
            let transfer = LargeTableTransfer::new(
                self.source.clone(),
                self.destination.clone(),
                self.blobs.clone(),
                self.dry_run,
                self.preserve_timestamp,
            );
            let scratch = tempfile::tempdir().context("Failed to create scratch directory")?;
            return transfer.migrate(&file_id, table, scratch.path()).await;
        }

        let scratch = tempfile::tempdir().context("Failed to create scratch directory")?;
        let upload_options = FileUploadOptions {
            file_name: table.id.clone(),
            federation_token: true,
            is_sliced: file_info.is_sliced,
        };

        let destination_file_id = if file_info.is_sliced {
            tracing::info!("Downloading table {}", table.id);
            let slices = self
                .source
                .download_sliced_file(&file_id, scratch.path())
                .await?;
            if self.dry_run {
                tracing::info!("[dry-run] Uploading table {}", table.id);
                None
            } else {
                tracing::info!("Uploading table {}", table.id);
                Some(
                    self.destination
                        .upload_sliced_file(&slices, &upload_options)
                        .await?,
                )
            }
        } else {
            let local = scratch.path().join(&file_info.name);
            tracing::info!("Downloading table {}", table.id);
            self.source.download_file(&file_id, &local).await?;
            if self.dry_run {
                tracing::info!("[dry-run] Uploading table {}", table.id);
                None
            } else {
                tracing::info!("Uploading table {}", table.id);
                Some(self.destination.upload_file(&local, &upload_options).await?)
            }
        };

        match destination_file_id {
            Some(data_file_id) => {
                self.destination
                    .write_table_from_file(
                        &table.id,
                        &WriteTableOptions {
                            name: table.name.clone(),
                            data_file_id,
                            columns: table.columns.clone(),
                            incremental: false,
                            use_timestamp_from_data_file: self.preserve_timestamp,
                        },
                    )
                    .await?;
            }
            None => tracing::info!("[dry-run] Importing data into table \"{}\"", table.name),
        }

        // Scratch files are removed here on success and failure alike.
        drop(scratch);
        Ok(())
    }
}

#[async_trait]
impl MigrationStrategy for FileTransferMigrator {
    async fn migrate(&mut self) -> Result<()> {
        let tables = select_tables(
            self.source.as_ref(),
            self.destination.as_ref(),
            &self.tables,
        )
        .await?;

        for table_id in tables {
            let table = match self.source.get_table(&table_id).await {
                Ok(table) => table,
                Err(err) => {
                    tracing::warn!(
                        "Skipping migration of table \"{}\". Reason: \"{:#}\"",
                        table_id,
                        err
                    );
                    continue;
                }
            };

            if table.bucket.stage == SYSTEM_STAGE {
                tracing::warn!("Skipping table {} (sys bucket)", table.id);
                continue;
            }
            if table.is_alias {
                tracing::warn!("Skipping table {} (alias)", table.id);
                continue;
            }

            self.ensure_bucket(&table).await?;
            self.ensure_table(&table).await?;
            self.migrate_table(&table).await?;
        }
        Ok(())
    }
}
