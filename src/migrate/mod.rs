// ABOUTME: Migration orchestration: strategy contract and submodules
// ABOUTME: Exactly two strategies exist, selected once at startup from the config

pub mod database;
pub mod file_transfer;
pub mod filter;
pub mod large_transfer;
pub mod replication;
pub mod schema;
pub mod selector;

pub use database::DatabaseMigrator;
pub use file_transfer::FileTransferMigrator;
pub use replication::ReplicationSetup;
pub use schema::SchemaReplicator;
pub use selector::select_tables;

use anyhow::Result;
use async_trait::async_trait;

/// One migration run. Both strategies implement this contract; they share the
/// schema replicator and the role helpers but never call each other.
#[async_trait]
pub trait MigrationStrategy {
    async fn migrate(&mut self) -> Result<()>;
}
