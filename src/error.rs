// ABOUTME: Domain error taxonomy for seren-storage-migrator
// ABOUTME: Typed, downcastable errors for the three operator-facing fault conditions

use thiserror::Error;

/// Typed domain errors for the conditions with distinct operator-facing
/// meaning. Everything else flows through `anyhow` with context.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// A table's primary key column is nullable, so the backend refuses the
    /// migration.
    #[error("primary key of table `{table}` is nullable")]
    PrimaryKeyNullable { table: String },

    /// Ownership resolution found other than exactly one OWNERSHIP grant for
    /// the object.
    #[error("ambiguous ownership of `{object}`: found {found} OWNERSHIP grants")]
    AmbiguousOwnership { object: String, found: usize },

    /// A file entry references a storage provider that is not recognized.
    #[error("unknown file provider: `{0}`")]
    UnknownFileProvider(String),
}
