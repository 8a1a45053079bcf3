// ABOUTME: Decides which tables a run will migrate
// ABOUTME: Explicit whitelist passes through verbatim; otherwise auto-discovery

use crate::storage::StorageApi;
use anyhow::Result;

/// Produce the work list for a migration run.
///
/// A non-empty `explicit` list is returned verbatim and caller-trusted; no
/// existence check happens here. With an empty list, every source bucket is
/// enumerated and a table is kept only when the destination does not have it
/// yet, or has it with a zero or unknown row count. A populated destination
/// table is never selected implicitly.
///
/// The discovery order follows bucket enumeration and is not guaranteed to be
/// stable across runs; nothing downstream may rely on it.
pub async fn select_tables(
    source: &dyn StorageApi,
    destination: &dyn StorageApi,
    explicit: &[String],
) -> Result<Vec<String>> {
    if !explicit.is_empty() {
        return Ok(explicit.to_vec());
    }

    let mut selected = Vec::new();
    for bucket in source.list_buckets().await? {
        let source_tables = source.list_tables(&bucket.id).await?;
        let destination_tables = if destination.bucket_exists(&bucket.id).await? {
            destination.list_tables(&bucket.id).await?
        } else {
            Vec::new()
        };

        for table in source_tables {
            let existing = destination_tables.iter().find(|t| t.id == table.id);
            let empty_or_missing = match existing {
                None => true,
                Some(existing) => matches!(existing.rows_count, None | Some(0)),
            };
            if empty_or_missing {
                selected.push(table.id);
            }
        }
    }
    Ok(selected)
}
