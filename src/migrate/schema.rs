// ABOUTME: Recreates buckets, tables, and their metadata on the destination project
// ABOUTME: Typed tables are rebuilt from datatype metadata, untyped ones from a header file

use crate::error::MigrateError;
use crate::storage::models::{
    ColumnDatatype, ColumnDefinition, FileUploadOptions, KeyedLayout, MetadataEntry, Table,
    TypedTableDefinition,
};
use crate::storage::StorageApi;
use crate::utils::split_bucket_id;
use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Provider of the system-managed datatype metadata. Entries under it drive
/// typed table creation and are never replayed onto the destination.
const STORAGE_PROVIDER: &str = "storage";

/// Backend that carries distribution and index layout on its tables.
const SYNAPSE_BACKEND: &str = "synapse";

/// Error fragment the backend returns for a nullable primary key column.
const PK_NULLABLE_BACKEND_MESSAGE: &str = "Primary keys columns must be set nullable false";

/// Creates destination-side schema objects ahead of data transfer.
pub struct SchemaReplicator {
    client: Arc<dyn StorageApi>,
}

impl SchemaReplicator {
    pub fn new(client: Arc<dyn StorageApi>) -> Self {
        Self { client }
    }

    /// Create a bucket from its qualified id. Callers pre-check existence;
    /// a double create surfaces the platform conflict error untouched.
    pub async fn create_bucket(&self, bucket_id: &str) -> Result<()> {
        let (stage, name) = split_bucket_id(bucket_id)?;
        self.client.create_bucket(name, stage).await
    }

    /// Recreate a source table on the destination, then replay its metadata.
    pub async fn create_table(&self, table: &Table) -> Result<()> {
        if table.is_typed {
            self.create_typed_table(table).await?;
        } else {
            self.create_untyped_table(table).await?;
        }
        self.restore_table_metadata(table).await
    }

    async fn create_untyped_table(&self, table: &Table) -> Result<()> {
        let scratch = tempfile::tempdir().context("Failed to create scratch directory")?;
        let header_path = scratch.path().join(format!("{}.header.csv", table.id));
        tokio::fs::write(&header_path, header_row(&table.columns))
            .await
            .with_context(|| format!("Failed to write header file for table {}", table.id))?;

        let options = FileUploadOptions {
            file_name: format!("{}.header.csv", table.id),
            ..FileUploadOptions::default()
        };
        let file_id = self.client.upload_file(&header_path, &options).await?;

        self.client
            .create_table_async(
                &table.bucket.id,
                &table.name,
                &file_id,
                &table.primary_key.join(","),
            )
            .await
    }

    async fn create_typed_table(&self, table: &Table) -> Result<()> {
        let definition = typed_table_definition(table)?;
        match self
            .client
            .create_table_definition(&table.bucket.id, &definition)
            .await
        {
            Ok(()) => Ok(()),
            Err(err) => {
                let message = format!("{:#}", err);
                if message.contains(PK_NULLABLE_BACKEND_MESSAGE) {
                    Err(MigrateError::PrimaryKeyNullable {
                        table: table.name.clone(),
                    }
                    .into())
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Replay table- and column-level metadata grouped by provider, one
    /// update call per provider. The storage provider is system-managed on
    /// the destination and is excluded.
    async fn restore_table_metadata(&self, table: &Table) -> Result<()> {
        for (provider, group) in group_metadata(table) {
            self.client
                .update_table_metadata(&table.id, &provider, &group.table, &group.columns)
                .await?;
        }
        Ok(())
    }
}

/// Metadata of one provider, merged across table and column scope.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ProviderMetadata {
    pub table: Vec<MetadataEntry>,
    pub columns: HashMap<String, Vec<MetadataEntry>>,
}

pub(crate) fn group_metadata(table: &Table) -> BTreeMap<String, ProviderMetadata> {
    let mut groups: BTreeMap<String, ProviderMetadata> = BTreeMap::new();
    for entry in &table.metadata {
        if entry.provider == STORAGE_PROVIDER {
            continue;
        }
        groups
            .entry(entry.provider.clone())
            .or_default()
            .table
            .push(entry.clone());
    }
    for (column, entries) in &table.column_metadata {
        for entry in entries {
            if entry.provider == STORAGE_PROVIDER {
                continue;
            }
            groups
                .entry(entry.provider.clone())
                .or_default()
                .columns
                .entry(column.clone())
                .or_default()
                .push(entry.clone());
        }
    }
    groups
}

/// Render the column list as a single-row CSV header.
pub(crate) fn header_row(columns: &[String]) -> String {
    let quoted: Vec<String> = columns
        .iter()
        .map(|c| format!("\"{}\"", c.replace('"', "\"\"")))
        .collect();
    format!("{}\n", quoted.join(","))
}

/// Build the typed creation request from the source table's datatype
/// metadata, preserving source column order.
pub(crate) fn typed_table_definition(table: &Table) -> Result<TypedTableDefinition> {
    let mut columns = Vec::with_capacity(table.columns.len());
    for column in &table.columns {
        columns.push(typed_column(table, column)?);
    }

    let mut definition = TypedTableDefinition {
        name: table.name.clone(),
        primary_keys_names: table.primary_key.clone(),
        columns,
        distribution: None,
        index: None,
    };

    if table.bucket.backend == SYNAPSE_BACKEND {
        if let Some(distribution_type) = &table.distribution_type {
            definition.distribution = Some(KeyedLayout {
                layout_type: distribution_type.clone(),
                columns_names: table.distribution_key.clone(),
            });
        }
        if let Some(index_type) = &table.index_type {
            definition.index = Some(KeyedLayout {
                layout_type: index_type.clone(),
                columns_names: table.index_key.clone(),
            });
        }
    }

    Ok(definition)
}

fn typed_column(table: &Table, column: &str) -> Result<ColumnDefinition> {
    let datatype: HashMap<&str, &str> = table
        .column_metadata
        .get(column)
        .map(|entries| {
            entries
                .iter()
                .filter(|entry| entry.provider == STORAGE_PROVIDER)
                .map(|entry| (entry.key.as_str(), entry.value.as_str()))
                .collect()
        })
        .unwrap_or_default();

    let type_name = datatype.get("datatype.type").with_context(|| {
        format!(
            "Column \"{}\" of typed table {} has no datatype metadata",
            column, table.id
        )
    })?;
    let basetype = datatype.get("datatype.basetype").with_context(|| {
        format!(
            "Column \"{}\" of typed table {} has no basetype metadata",
            column, table.id
        )
    })?;

    Ok(ColumnDefinition {
        name: column.to_string(),
        definition: ColumnDatatype {
            type_name: (*type_name).to_string(),
            nullable: datatype.get("datatype.nullable") == Some(&"1"),
            length: datatype.get("datatype.length").map(|v| (*v).to_string()),
            default: datatype.get("datatype.default").map(|v| (*v).to_string()),
        },
        basetype: (*basetype).to_string(),
    })
}
