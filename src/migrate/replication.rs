// ABOUTME: Enables cross-account replication and creates replica databases
// ABOUTME: Operates on a contiguous range of project databases by id

use crate::utils::quote_ident;
use crate::warehouse::Warehouse;
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Grace period after ENABLE REPLICATION before the replica create; the
/// control plane needs a moment to propagate the grant across accounts.
const REPLICATION_GRANT_PROPAGATION_DELAY: Duration = Duration::from_secs(5);

/// Prepares replication from the source account into the target account for
/// a range of project databases.
pub struct ReplicationSetup {
    source: Arc<dyn Warehouse>,
    target: Arc<dyn Warehouse>,
    database_prefix: String,
    replica_prefix: String,
}

impl ReplicationSetup {
    pub fn new(
        source: Arc<dyn Warehouse>,
        target: Arc<dyn Warehouse>,
        database_prefix: String,
        replica_prefix: String,
    ) -> Self {
        Self {
            source,
            target,
            database_prefix,
            replica_prefix,
        }
    }

    /// Set up replication for every existing `{prefix}_{id}` database with an
    /// id in `[from_project, to_project]`. Missing ids are skipped silently.
    pub async fn create_replications(&self, from_project: u32, to_project: u32) -> Result<()> {
        let databases: HashSet<String> = self
            .source
            .fetch_all("SHOW DATABASES")
            .await
            .context("Failed to list source databases")?
            .iter()
            .filter_map(|row| row.get("name").and_then(Value::as_str))
            .map(str::to_owned)
            .collect();

        for project_id in from_project..=to_project {
            let source_database = format!("{}_{}", self.database_prefix, project_id);
            if !databases.contains(&source_database) {
                continue;
            }
            let replica_database = format!("{}_{}_REPLICA", self.replica_prefix, project_id);
            self.create_replication(&source_database, &replica_database)
                .await?;
        }
        Ok(())
    }

    pub async fn create_replication(
        &self,
        source_database: &str,
        replica_database: &str,
    ) -> Result<()> {
        tracing::info!("Enabling replication on database {}", source_database);
        self.source
            .execute(&format!(
                "ALTER DATABASE {} ENABLE REPLICATION TO ACCOUNTS {}.{}",
                quote_ident(source_database),
                self.target.current_region().await?,
                self.target.current_account().await?
            ))
            .await
            .with_context(|| {
                format!("Failed to enable replication on {}", source_database)
            })?;

        // Not a poll: the grant has no observable completion signal, so a
        // fixed wait stands in for control-plane propagation.
        tokio::time::sleep(REPLICATION_GRANT_PROPAGATION_DELAY).await;

        tracing::info!("Creating replica database {}", replica_database);
        self.target
            .execute(&format!(
                "CREATE DATABASE IF NOT EXISTS {} AS REPLICA OF {}.{}.{}",
                quote_ident(replica_database),
                self.source.current_region().await?,
                self.source.current_account().await?,
                quote_ident(source_database)
            ))
            .await
            .with_context(|| format!("Failed to create replica {}", replica_database))?;

        tracing::info!("Replica database {} created", replica_database);
        Ok(())
    }
}
