// ABOUTME: Schema and table filtering for the database-replica strategy
// ABOUTME: System schemas, workspace schemas, and the table whitelist

/// Schemas that exist in every database and are never migrated.
const SKIP_SCHEMAS: [&str; 2] = ["INFORMATION_SCHEMA", "PUBLIC"];

/// Workspace schemas are transient sandboxes and are skipped unless
/// explicitly included.
const WORKSPACE_PREFIX: &str = "WORKSPACE";

/// Filtering rules applied while walking the replica database.
#[derive(Debug, Clone, Default)]
pub struct SchemaFilter {
    include_workspace_schemas: Vec<String>,
    include_external_schemas: Vec<String>,
}

impl SchemaFilter {
    pub fn new(
        include_workspace_schemas: Vec<String>,
        include_external_schemas: Vec<String>,
    ) -> Self {
        Self {
            include_workspace_schemas,
            include_external_schemas,
        }
    }

    /// Built-in schemas present in every database.
    pub fn is_system_schema(&self, schema: &str) -> bool {
        SKIP_SCHEMAS.contains(&schema)
    }

    /// Workspace-prefixed schemas not opted in by configuration.
    pub fn skips_workspace_schema(&self, schema: &str) -> bool {
        schema.starts_with(WORKSPACE_PREFIX)
            && !self.include_workspace_schemas.iter().any(|s| s == schema)
    }

    /// Schemas unknown to the source project are external; they only migrate
    /// when opted in.
    pub fn includes_external_schema(&self, schema: &str) -> bool {
        self.include_external_schemas.iter().any(|s| s == schema)
    }
}

/// Exact-match check of `schema.table` against the configured whitelist.
/// An empty whitelist admits every table.
pub fn table_whitelisted(whitelist: &[String], schema: &str, table: &str) -> bool {
    if whitelist.is_empty() {
        return true;
    }
    let qualified = format!("{}.{}", schema, table);
    whitelist.iter().any(|entry| *entry == qualified)
}
