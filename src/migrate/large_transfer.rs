// ABOUTME: Chunked transfer of very large sliced exports in bounded local storage
// ABOUTME: Each chunk downloads, uploads, commits incrementally, then deletes its files

use crate::files::BlobStore;
use crate::storage::models::{FileUploadOptions, Table, WriteTableOptions};
use crate::storage::StorageApi;
use anyhow::{Context, Result};
use indicatif::ProgressBar;
use std::path::Path;
use std::sync::Arc;

/// Manifest entries processed per chunk. Bounds both local disk usage and
/// the size of each incremental destination write.
pub const TRANSFER_CHUNK_SIZE: usize = 500;

/// Streams an arbitrarily large sliced export through fixed-size chunks.
///
/// Chunk progress is not persisted anywhere; a crash mid-table restarts the
/// transfer from chunk zero.
pub struct LargeTableTransfer {
    source: Arc<dyn StorageApi>,
    destination: Arc<dyn StorageApi>,
    blobs: Arc<dyn BlobStore>,
    dry_run: bool,
    preserve_timestamp: bool,
}

impl LargeTableTransfer {
    pub fn new(
        source: Arc<dyn StorageApi>,
        destination: Arc<dyn StorageApi>,
        blobs: Arc<dyn BlobStore>,
        dry_run: bool,
        preserve_timestamp: bool,
    ) -> Self {
        Self {
            source,
            destination,
            blobs,
            dry_run,
            preserve_timestamp,
        }
    }

    pub async fn migrate(&self, file_id: &str, table: &Table, scratch: &Path) -> Result<()> {
        if self.dry_run {
            tracing::info!("[dry-run] Migrating table {} through the chunked pipeline", table.id);
            return Ok(());
        }

        let file_info = self.source.get_file(file_id, true).await?;
        let manifest = self
            .blobs
            .fetch_manifest(&file_info)
            .await
            .with_context(|| format!("Failed to fetch slice manifest of table {}", table.id))?;

        let chunk_count = manifest.entries.len().div_ceil(TRANSFER_CHUNK_SIZE);
        let progress = ProgressBar::new(chunk_count as u64);

        let upload_options = FileUploadOptions {
            file_name: table.id.clone(),
            federation_token: true,
            is_sliced: true,
        };

        for (index, chunk) in manifest.entries.chunks(TRANSFER_CHUNK_SIZE).enumerate() {
            tracing::info!(
                "Processing chunk {}/{} of table {}",
                index + 1,
                chunk_count,
                table.id
            );

            // Object storage credentials can expire during a long transfer,
            // so every chunk works with a freshly issued set.
            let fresh = self.source.get_file(file_id, true).await?;

            let mut slices = Vec::with_capacity(chunk.len());
            for entry in chunk {
                let slice_name = entry.url.rsplit('/').next().unwrap_or(&entry.url);
                let local = scratch.join(slice_name);
                self.blobs.download(&fresh, &entry.url, &local).await?;
                slices.push(local);
            }

            let data_file_id = self
                .destination
                .upload_sliced_file(&slices, &upload_options)
                .await?;

            self.destination
                .write_table_from_file(
                    &table.id,
                    &WriteTableOptions {
                        name: table.name.clone(),
                        data_file_id,
                        columns: table.columns.clone(),
                        // Successive chunks must append, never replace.
                        incremental: true,
                        use_timestamp_from_data_file: self.preserve_timestamp,
                    },
                )
                .await?;

            for slice in &slices {
                tokio::fs::remove_file(slice)
                    .await
                    .with_context(|| format!("Failed to remove slice {}", slice.display()))?;
            }
            progress.inc(1);
        }

        progress.finish_and_clear();
        tracing::info!("✓ Chunked transfer of table {} complete", table.id);
        Ok(())
    }
}
