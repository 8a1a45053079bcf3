// ABOUTME: Database-replica migration strategy: replica refresh, role adoption, SQL copy
// ABOUTME: Skips converged tables by comparing revision timestamps under two roles

use crate::config::DatabaseConfig;
use crate::migrate::filter::{table_whitelisted, SchemaFilter};
use crate::migrate::schema::SchemaReplicator;
use crate::migrate::MigrationStrategy;
use crate::storage::StorageApi;
use crate::utils::quote_ident;
use crate::warehouse::{
    grant_replica_privileges, grant_role_to_user, resolve_owning_role, with_adopted_role,
    with_role, GrantObject, Warehouse, ADMIN_ROLE,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Account feature that unlocks per-statement warehouse sizing; with it,
/// routine refresh work runs on the small warehouse tier.
pub const DYNAMIC_BACKEND_FEATURE: &str = "workspace-dynamic-backend-size";

/// Internal revision column maintained by the platform on every table.
const REVISION_COLUMN: &str = "_timestamp";

/// Migrates tables by refreshing a cross-account replica database and copying
/// table contents over SQL.
pub struct DatabaseMigrator {
    warehouse: Arc<dyn Warehouse>,
    source: Arc<dyn StorageApi>,
    destination: Arc<dyn StorageApi>,
    replicator: SchemaReplicator,
    filter: SchemaFilter,
    /// Explicit `schema.table` whitelist; empty admits every replica table.
    tables: Vec<String>,
    source_database: String,
    replica_database: String,
    target_database: String,
    target_warehouse: String,
    source_region: String,
    source_account: String,
    user: String,
    dry_run: bool,
}

impl DatabaseMigrator {
    pub fn new(
        warehouse: Arc<dyn Warehouse>,
        source: Arc<dyn StorageApi>,
        destination: Arc<dyn StorageApi>,
        config: &DatabaseConfig,
        tables: Vec<String>,
        dry_run: bool,
    ) -> Self {
        Self {
            warehouse,
            source,
            destination: destination.clone(),
            replicator: SchemaReplicator::new(destination),
            filter: SchemaFilter::new(
                config.include_workspace_schemas.clone(),
                config.include_external_schemas.clone(),
            ),
            tables,
            source_database: config.source_database.clone(),
            replica_database: config.replica_database(),
            target_database: config.target_database.clone(),
            target_warehouse: config.warehouse.clone(),
            source_region: config.source_region.clone(),
            source_account: config.source_account.clone(),
            user: config.user.clone(),
            dry_run,
        }
    }

    async fn run(&self) -> Result<()> {
        let warehouse = self.warehouse.as_ref();

        with_role(warehouse, ADMIN_ROLE, || async {
            self.create_replica_database().await?;
            self.refresh_replica_database().await
        })
        .await?;

        // Database-level ownership must resolve cleanly; a malformed grant
        // set aborts the run here rather than per table.
        let database_role = resolve_owning_role(
            warehouse,
            &GrantObject::Database(self.target_database.clone()),
        )
        .await?;
        grant_role_to_user(warehouse, &database_role, &self.user).await?;

        with_role(warehouse, &database_role, || async {
            self.migrate_database().await
        })
        .await?;

        self.drop_replica_database().await
    }

    async fn migrate_database(&self) -> Result<()> {
        let token = self.destination.verify_token().await?;
        if token.has_feature(DYNAMIC_BACKEND_FEATURE) {
            self.warehouse
                .execute(&format!(
                    "USE WAREHOUSE {}",
                    quote_ident(&format!("{}_SMALL", self.target_warehouse))
                ))
                .await?;
        }
        self.warehouse
            .execute(&format!(
                "USE DATABASE {}",
                quote_ident(&self.target_database)
            ))
            .await?;

        let schemas = with_role(self.warehouse.as_ref(), ADMIN_ROLE, || async {
            self.warehouse
                .fetch_all(&format!(
                    "SHOW SCHEMAS IN DATABASE {}",
                    quote_ident(&self.replica_database)
                ))
                .await
        })
        .await?;

        for row in &schemas {
            let Some(schema) = row.get("name").and_then(Value::as_str) else {
                continue;
            };
            if self.filter.is_system_schema(schema) || self.filter.skips_workspace_schema(schema) {
                continue;
            }
            if !self.source.bucket_exists(schema).await?
                && !self.filter.includes_external_schema(schema)
            {
                continue;
            }

            if !self.destination.bucket_exists(schema).await? {
                if self.dry_run {
                    tracing::info!("[dry-run] Creating bucket \"{}\"", schema);
                } else {
                    tracing::info!("Creating bucket \"{}\"", schema);
                    self.replicator.create_bucket(schema).await?;
                }
            }

            self.migrate_schema(schema).await?;
        }
        Ok(())
    }

    async fn migrate_schema(&self, schema: &str) -> Result<()> {
        tracing::info!("Migrating schema {}", schema);

        let tables = with_role(self.warehouse.as_ref(), ADMIN_ROLE, || async {
            self.warehouse
                .fetch_all(&format!(
                    "SHOW TABLES IN SCHEMA {}.{}",
                    quote_ident(&self.replica_database),
                    quote_ident(schema)
                ))
                .await
        })
        .await?;

        for row in &tables {
            let Some(table) = row.get("name").and_then(Value::as_str) else {
                continue;
            };
            if !table_whitelisted(&self.tables, schema, table) {
                continue;
            }
            if self.dry_run {
                tracing::info!("[dry-run] Migrating table {}.{}", schema, table);
                continue;
            }

            // Per-table failures stay inside the schema loop; the run moves
            // on to the next table.
            if let Err(err) = self.prepare_and_migrate_table(schema, table).await {
                tracing::warn!(
                    "Error while migrating table {}.{}: {:#}",
                    schema,
                    table,
                    err
                );
            }
        }

        if self.dry_run {
            tracing::info!("[dry-run] Refreshing table information in bucket {}", schema);
        } else {
            tracing::info!("Refreshing table information in bucket {}", schema);
            self.destination.refresh_bucket_info(schema).await?;
        }
        Ok(())
    }

    async fn prepare_and_migrate_table(&self, schema: &str, table: &str) -> Result<()> {
        let table_id = format!("{}.{}", schema, table);
        if !self.destination.table_exists(&table_id).await? {
            tracing::info!("Creating table \"{}\"", table_id);
            let source_table = self
                .source
                .get_table(&table_id)
                .await
                .with_context(|| format!("Failed to read source table {}", table_id))?;
            self.replicator.create_table(&source_table).await?;
        }
        self.migrate_table(schema, table).await
    }

    async fn migrate_table(&self, schema: &str, table: &str) -> Result<()> {
        tracing::info!("Migrating table {}.{}", schema, table);

        let table_role = resolve_owning_role(
            self.warehouse.as_ref(),
            &GrantObject::Table {
                schema: schema.to_string(),
                name: table.to_string(),
            },
        )
        .await?;

        with_adopted_role(
            self.warehouse.as_ref(),
            &table_role,
            &self.user,
            || async {
                grant_replica_privileges(
                    self.warehouse.as_ref(),
                    &self.replica_database,
                    &table_role,
                )
                .await?;

                let columns = self.destination_columns(schema, table).await?;

                if self.table_is_current(schema, table, &table_role).await {
                    tracing::info!("Table {}.{} is up to date", schema, table);
                    return Ok(());
                }

                self.copy_table(schema, table, &columns).await
            },
        )
        .await
    }

    /// Column list read live from the destination table so drift since the
    /// table was created is tolerated.
    async fn destination_columns(&self, schema: &str, table: &str) -> Result<Vec<String>> {
        let rows = self
            .warehouse
            .fetch_all(&format!(
                "SHOW COLUMNS IN TABLE {}.{}.{}",
                quote_ident(&self.target_database),
                quote_ident(schema),
                quote_ident(table)
            ))
            .await?;
        let columns: Vec<String> = rows
            .iter()
            .filter_map(|row| row.get("column_name").and_then(Value::as_str))
            .map(str::to_owned)
            .collect();
        if columns.is_empty() {
            anyhow::bail!(
                "Destination table {}.{} reports no columns",
                schema,
                table
            );
        }
        Ok(columns)
    }

    /// A table is current when the maximum revision timestamp matches between
    /// the replica copy (read as admin) and the destination copy (read as the
    /// owning role). Any comparison error means "copy it" rather than a
    /// failed run; the destination table may simply not be queryable yet.
    async fn table_is_current(&self, schema: &str, table: &str, table_role: &str) -> bool {
        match self.compare_revision_timestamps(schema, table, table_role).await {
            Ok(equal) => equal,
            Err(err) => {
                tracing::debug!(
                    "Revision comparison for {}.{} failed ({:#}); proceeding with copy",
                    schema,
                    table,
                    err
                );
                false
            }
        }
    }

    async fn compare_revision_timestamps(
        &self,
        schema: &str,
        table: &str,
        table_role: &str,
    ) -> Result<bool> {
        let warehouse = self.warehouse.as_ref();
        let replica_max = with_role(warehouse, ADMIN_ROLE, || async {
            self.max_revision(&self.replica_database, schema, table).await
        })
        .await?;
        let target_max = with_role(warehouse, table_role, || async {
            self.max_revision(&self.target_database, schema, table).await
        })
        .await?;
        Ok(replica_max == target_max)
    }

    async fn max_revision(&self, database: &str, schema: &str, table: &str) -> Result<Value> {
        let rows = self
            .warehouse
            .fetch_all(&format!(
                "SELECT MAX({}) AS \"maxTimestamp\" FROM {}.{}.{}",
                quote_ident(REVISION_COLUMN),
                quote_ident(database),
                quote_ident(schema),
                quote_ident(table)
            ))
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("maxTimestamp"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn copy_table(&self, schema: &str, table: &str, columns: &[String]) -> Result<()> {
        let target = format!(
            "{}.{}.{}",
            quote_ident(&self.target_database),
            quote_ident(schema),
            quote_ident(table)
        );
        let replica = format!(
            "{}.{}.{}",
            quote_ident(&self.replica_database),
            quote_ident(schema),
            quote_ident(table)
        );
        let column_list = columns
            .iter()
            .map(|column| quote_ident(column))
            .collect::<Vec<_>>()
            .join(", ");

        tracing::info!("Truncating and copying table {}.{}", schema, table);
        self.warehouse
            .execute(&format!("TRUNCATE TABLE {}", target))
            .await?;
        self.warehouse
            .execute(&format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                target, column_list, column_list, replica
            ))
            .await?;
        Ok(())
    }

    async fn create_replica_database(&self) -> Result<()> {
        if self.dry_run {
            tracing::info!("[dry-run] Creating replica database {}", self.replica_database);
            return Ok(());
        }
        tracing::info!("Creating replica database {}", self.replica_database);
        self.warehouse
            .execute(&format!(
                "CREATE DATABASE IF NOT EXISTS {} AS REPLICA OF {}.{}.{}",
                quote_ident(&self.replica_database),
                self.source_region,
                self.source_account,
                quote_ident(&self.source_database)
            ))
            .await?;
        tracing::info!("Replica database {} created", self.replica_database);
        Ok(())
    }

    async fn refresh_replica_database(&self) -> Result<()> {
        if self.dry_run {
            tracing::info!("[dry-run] Refreshing replica database {}", self.replica_database);
            return Ok(());
        }
        self.warehouse
            .execute(&format!(
                "USE DATABASE {}",
                quote_ident(&self.replica_database)
            ))
            .await?;
        self.warehouse.execute("USE SCHEMA PUBLIC").await?;
        self.warehouse
            .execute(&format!(
                "USE WAREHOUSE {}",
                quote_ident(&self.target_warehouse)
            ))
            .await?;

        tracing::info!("Refreshing replica database {}", self.replica_database);
        self.warehouse
            .execute(&format!(
                "ALTER DATABASE {} REFRESH",
                quote_ident(&self.replica_database)
            ))
            .await
    }

    /// Dropped once per run, on the success path only; a failed run leaves
    /// the replica behind for the next run to reuse.
    async fn drop_replica_database(&self) -> Result<()> {
        if self.dry_run {
            tracing::info!("[dry-run] Dropping replica database {}", self.replica_database);
            return Ok(());
        }
        with_role(self.warehouse.as_ref(), ADMIN_ROLE, || async {
            tracing::info!("Dropping replica database {}", self.replica_database);
            self.warehouse
                .execute(&format!(
                    "DROP DATABASE {}",
                    quote_ident(&self.replica_database)
                ))
                .await
        })
        .await
    }
}

#[async_trait]
impl MigrationStrategy for DatabaseMigrator {
    async fn migrate(&mut self) -> Result<()> {
        self.run().await
    }
}
