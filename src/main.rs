// ABOUTME: CLI entry point for seren-storage-migrator
// ABOUTME: Parses commands, builds clients per mode, and runs the selected strategy

use clap::{Parser, Subcommand};
use seren_storage_migrator::config::{Config, Mode};
use seren_storage_migrator::files::HttpBlobStore;
use seren_storage_migrator::migrate::{
    DatabaseMigrator, FileTransferMigrator, MigrationStrategy, ReplicationSetup,
};
use seren_storage_migrator::storage::StorageApiClient;
use seren_storage_migrator::warehouse::{SqlApiClient, Warehouse, ADMIN_ROLE};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "seren-storage-migrator")]
#[command(about = "Table migration between Seren Storage projects", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate tables from the source project into the destination project
    Migrate {
        /// Path to the TOML configuration file
        #[arg(long)]
        config: PathBuf,
        /// Log mutations instead of performing them
        #[arg(long)]
        dry_run: bool,
    },
    /// Enable replication and create replicas for a range of project databases
    CreateReplications {
        /// Path to the TOML configuration file
        #[arg(long)]
        config: PathBuf,
        /// First project id of the range (inclusive)
        #[arg(long)]
        from_project: u32,
        /// Last project id of the range (inclusive)
        #[arg(long)]
        to_project: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging - default to INFO level if RUST_LOG not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Migrate { config, dry_run } => {
            let config = Config::load(&config)?;
            let dry_run = dry_run || config.dry_run;

            let source = Arc::new(StorageApiClient::new(
                &config.source.url,
                &config.source.token,
            ));
            let destination = Arc::new(StorageApiClient::new(
                &config.destination.url,
                &config.destination.token,
            ));

            let mut strategy: Box<dyn MigrationStrategy> = match config.mode {
                Mode::File => {
                    let mut migrator = FileTransferMigrator::new(
                        source,
                        destination,
                        Arc::new(HttpBlobStore::new()),
                        config.tables.clone(),
                        dry_run,
                        config.preserve_timestamp,
                    );
                    if let Some(threshold) = config.large_file_threshold_bytes {
                        migrator = migrator.with_large_file_threshold(threshold);
                    }
                    Box::new(migrator)
                }
                Mode::Database => {
                    let database = config.database()?;
                    let warehouse = SqlApiClient::connect(&database.connection()).await?;
                    warehouse.use_role(ADMIN_ROLE).await?;
                    Box::new(DatabaseMigrator::new(
                        Arc::new(warehouse),
                        source,
                        destination,
                        database,
                        config.tables.clone(),
                        dry_run,
                    ))
                }
            };
            strategy.migrate().await
        }
        Commands::CreateReplications {
            config,
            from_project,
            to_project,
        } => {
            let config = Config::load(&config)?;
            let replication = config.replication()?;
            let database = config.database()?;

            let source = SqlApiClient::connect(&replication.source_connection()).await?;
            source.use_role(ADMIN_ROLE).await?;
            let target = SqlApiClient::connect(&database.connection()).await?;
            target.use_role(ADMIN_ROLE).await?;

            let setup = ReplicationSetup::new(
                Arc::new(source),
                Arc::new(target),
                replication.database_prefix.clone(),
                replication.replica_prefix().to_string(),
            );
            setup.create_replications(from_project, to_project).await
        }
    }
}
