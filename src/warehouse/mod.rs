// ABOUTME: Warehouse SQL surface with scoped role switching and grant resolution
// ABOUTME: The session role is global state; it is only ever changed through the scoped helpers

pub mod client;

pub use client::SqlApiClient;

use crate::error::MigrateError;
use crate::utils::quote_ident;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;

/// Administrative role that owns replica lifecycle and grant management.
pub const ADMIN_ROLE: &str = "ACCOUNTADMIN";

/// One result row: column name to JSON value.
pub type Row = serde_json::Map<String, Value>;

/// SQL execution contract against one warehouse account session.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Run a statement, discarding any result rows.
    async fn execute(&self, sql: &str) -> Result<()>;

    /// Run a statement and return all result rows.
    async fn fetch_all(&self, sql: &str) -> Result<Vec<Row>>;

    async fn use_role(&self, role: &str) -> Result<()> {
        self.execute(&format!("USE ROLE {}", quote_ident(role))).await
    }

    async fn current_role(&self) -> Result<String> {
        let rows = self.fetch_all("SELECT CURRENT_ROLE() AS \"role\"").await?;
        scalar_string(&rows, "role").context("CURRENT_ROLE() returned nothing")
    }

    async fn current_region(&self) -> Result<String> {
        let rows = self
            .fetch_all("SELECT CURRENT_REGION() AS \"region\"")
            .await?;
        scalar_string(&rows, "region").context("CURRENT_REGION() returned nothing")
    }

    async fn current_account(&self) -> Result<String> {
        let rows = self
            .fetch_all("SELECT CURRENT_ACCOUNT() AS \"account\"")
            .await?;
        scalar_string(&rows, "account").context("CURRENT_ACCOUNT() returned nothing")
    }
}

fn scalar_string(rows: &[Row], column: &str) -> Option<String> {
    rows.first()
        .and_then(|row| row.get(column))
        .and_then(Value::as_str)
        .map(str::to_owned)
}

/// Run `op` with the session switched to `role`, restoring the previous role
/// on every exit path.
///
/// The role switch is a session-global side effect, so the save/switch/restore
/// sequence is centralized here instead of being repeated at call sites. When
/// both `op` and the restore fail, the operation error wins and the restore
/// failure is logged.
pub async fn with_role<W, T, F, Fut>(warehouse: &W, role: &str, op: F) -> Result<T>
where
    W: Warehouse + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let previous = warehouse.current_role().await?;
    warehouse
        .use_role(role)
        .await
        .with_context(|| format!("Failed to switch to role {}", role))?;

    let result = op().await;

    if let Err(restore_err) = warehouse.use_role(&previous).await {
        tracing::warn!("Failed to restore role {}: {:#}", previous, restore_err);
        result?;
        return Err(restore_err.context(format!("Failed to restore role {}", previous)));
    }
    result
}

/// Like [`with_role`], but tolerates the role not yet being granted to the
/// operating user: on a failed switch it grants the role (under the admin
/// role) and retries the switch exactly once.
pub async fn with_adopted_role<W, T, F, Fut>(
    warehouse: &W,
    role: &str,
    user: &str,
    op: F,
) -> Result<T>
where
    W: Warehouse + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let previous = warehouse.current_role().await?;
    if let Err(switch_err) = warehouse.use_role(role).await {
        tracing::debug!("Role {} not adoptable yet ({:#}), granting", role, switch_err);
        grant_role_to_user(warehouse, role, user).await?;
        warehouse
            .use_role(role)
            .await
            .with_context(|| format!("Failed to switch to role {} after granting it", role))?;
    }

    let result = op().await;

    if let Err(restore_err) = warehouse.use_role(&previous).await {
        tracing::warn!("Failed to restore role {}: {:#}", previous, restore_err);
        result?;
        return Err(restore_err.context(format!("Failed to restore role {}", previous)));
    }
    result
}

/// Warehouse object whose grants can be inspected.
#[derive(Debug, Clone)]
pub enum GrantObject {
    Database(String),
    Table { schema: String, name: String },
}

impl GrantObject {
    fn sql_target(&self) -> (&'static str, String) {
        match self {
            GrantObject::Database(name) => ("DATABASE", quote_ident(name)),
            GrantObject::Table { schema, name } => (
                "TABLE",
                format!("{}.{}", quote_ident(schema), quote_ident(name)),
            ),
        }
    }
}

impl std::fmt::Display for GrantObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (kind, target) = self.sql_target();
        write!(f, "{} {}", kind, target)
    }
}

/// Resolve the role holding the OWNERSHIP privilege on an object.
///
/// Exactly one ownership grant must exist; anything else is a warehouse
/// consistency fault and raises [`MigrateError::AmbiguousOwnership`].
pub async fn resolve_owning_role<W>(warehouse: &W, object: &GrantObject) -> Result<String>
where
    W: Warehouse + ?Sized,
{
    let (kind, target) = object.sql_target();
    let grants = warehouse
        .fetch_all(&format!("SHOW GRANTS ON {} {}", kind, target))
        .await
        .with_context(|| format!("Failed to read grants on {}", object))?;

    let owners: Vec<&str> = grants
        .iter()
        .filter(|row| row.get("privilege").and_then(Value::as_str) == Some("OWNERSHIP"))
        .filter_map(|row| row.get("grantee_name").and_then(Value::as_str))
        .collect();

    match owners.as_slice() {
        [owner] => Ok((*owner).to_string()),
        _ => Err(MigrateError::AmbiguousOwnership {
            object: object.to_string(),
            found: owners.len(),
        }
        .into()),
    }
}

/// Grant a role to a user, under the admin role. The grant is idempotent on
/// the warehouse side.
pub async fn grant_role_to_user<W>(warehouse: &W, role: &str, user: &str) -> Result<()>
where
    W: Warehouse + ?Sized,
{
    let sql = format!(
        "GRANT ROLE {} TO USER {}",
        quote_ident(role),
        quote_ident(user)
    );
    with_role(warehouse, ADMIN_ROLE, || async {
        warehouse.execute(&sql).await
    })
    .await
    .with_context(|| format!("Failed to grant role {} to user {}", role, user))
}

/// Grant a role read access across the replica database so the copy statement
/// can select from it: USAGE on the database and all schemas, SELECT on all
/// tables.
pub async fn grant_replica_privileges<W>(
    warehouse: &W,
    replica_database: &str,
    role: &str,
) -> Result<()>
where
    W: Warehouse + ?Sized,
{
    let database = quote_ident(replica_database);
    let role = quote_ident(role);
    let statements = [
        format!("GRANT USAGE ON DATABASE {} TO ROLE {}", database, role),
        format!(
            "GRANT USAGE ON ALL SCHEMAS IN DATABASE {} TO ROLE {}",
            database, role
        ),
        format!(
            "GRANT SELECT ON ALL TABLES IN DATABASE {} TO ROLE {}",
            database, role
        ),
    ];
    with_role(warehouse, ADMIN_ROLE, || async {
        for statement in &statements {
            warehouse.execute(statement).await?;
        }
        Ok(())
    })
    .await
    .with_context(|| format!("Failed to grant replica privileges on {}", replica_database))
}
