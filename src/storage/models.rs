// ABOUTME: Serde models for the Storage API JSON payloads
// ABOUTME: Tables, buckets, metadata entries, files, and sliced-file manifests

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Bucket that owns a table, as embedded in table detail responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub id: String,
    pub name: String,
    pub stage: String,
    /// Storage backend the bucket lives on (e.g. "snowflake", "synapse").
    #[serde(default)]
    pub backend: String,
}

/// One metadata entry attached to a table or a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub provider: String,
    pub key: String,
    pub value: String,
}

/// Immutable snapshot of a source table, fetched once at the start of its
/// migration. Column order is preserved end to end; the destination table is
/// always created and written with this exact ordering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub id: String,
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub is_typed: bool,
    #[serde(default)]
    pub is_alias: bool,
    pub bucket: Bucket,
    /// Row count as last reported by the platform; `None` when unknown.
    #[serde(default)]
    pub rows_count: Option<i64>,
    #[serde(default)]
    pub metadata: Vec<MetadataEntry>,
    #[serde(default)]
    pub column_metadata: HashMap<String, Vec<MetadataEntry>>,
    #[serde(default)]
    pub distribution_type: Option<String>,
    #[serde(default)]
    pub distribution_key: Vec<String>,
    #[serde(default)]
    pub index_type: Option<String>,
    #[serde(default)]
    pub index_key: Vec<String>,
}

/// Short-lived object storage credentials returned with a federation token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCredentials {
    pub access_token: String,
    pub expires_in: u64,
    pub token_type: String,
    pub project_id: String,
}

/// Object storage location of a sliced export.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectPath {
    pub bucket: String,
    pub key: String,
}

/// Metadata of an exported file, fetched from the source project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub is_sliced: bool,
    /// Object storage provider hosting the file (e.g. "gcs", "s3").
    #[serde(default)]
    pub provider: String,
    /// Download URL; for sliced files this points at the manifest.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub path: Option<ObjectPath>,
    #[serde(default)]
    pub credentials: Option<FileCredentials>,
}

/// Manifest of a sliced export: the ordered list of slice locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlicedManifest {
    pub entries: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub url: String,
}

/// Options for uploading a staging file to the destination project.
#[derive(Debug, Clone, Default)]
pub struct FileUploadOptions {
    pub file_name: String,
    pub federation_token: bool,
    pub is_sliced: bool,
}

/// Options for a direct table write from an already-uploaded file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteTableOptions {
    pub name: String,
    pub data_file_id: String,
    pub columns: Vec<String>,
    /// Append to the table instead of replacing its contents.
    pub incremental: bool,
    /// Carry the source row timestamps embedded in the data file.
    pub use_timestamp_from_data_file: bool,
}

/// Column definition for typed table creation, assembled from the
/// system-managed datatype metadata of the source table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDefinition {
    pub name: String,
    pub definition: ColumnDatatype,
    pub basetype: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDatatype {
    #[serde(rename = "type")]
    pub type_name: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// Typed table creation request body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedTableDefinition {
    pub name: String,
    pub primary_keys_names: Vec<String>,
    pub columns: Vec<ColumnDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distribution: Option<KeyedLayout>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<KeyedLayout>,
}

/// Distribution or index layout for backends that require one.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyedLayout {
    #[serde(rename = "type")]
    pub layout_type: String,
    pub columns_names: Vec<String>,
}

/// Result of a token verification call; carries the account feature flags
/// that gate optional behavior.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenInfo {
    pub owner: TokenOwner,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenOwner {
    pub id: u64,
    #[serde(default)]
    pub features: Vec<String>,
}

impl TokenInfo {
    pub fn has_feature(&self, feature: &str) -> bool {
        self.owner.features.iter().any(|f| f == feature)
    }
}
