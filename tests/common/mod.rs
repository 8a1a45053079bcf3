// ABOUTME: In-memory fakes of the storage, warehouse, and blob store collaborators
// ABOUTME: Record every call so tests can assert ordering, counts, and dry-run behavior

// Each integration test binary uses its own slice of the fakes.
#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use seren_storage_migrator::files::BlobStore;
use seren_storage_migrator::storage::models::{
    Bucket, FileCredentials, FileInfo, FileUploadOptions, ManifestEntry, MetadataEntry,
    ObjectPath, SlicedManifest, Table, TokenInfo, TokenOwner, TypedTableDefinition,
    WriteTableOptions,
};
use seren_storage_migrator::storage::StorageApi;
use seren_storage_migrator::warehouse::{Row, Warehouse};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

// ============================================================================
// Storage fake
// ============================================================================

/// Shape of the file produced when a table export runs against the fake.
#[derive(Debug, Clone)]
pub struct ExportProfile {
    pub sliced: bool,
    pub provider: String,
    pub size_bytes: u64,
    /// Slice contents handed out by download_sliced_file, in order.
    pub slices: Vec<(String, Vec<u8>)>,
}

impl Default for ExportProfile {
    fn default() -> Self {
        Self {
            sliced: false,
            provider: "s3".to_string(),
            size_bytes: 1024,
            slices: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum StorageCall {
    CreateBucket { name: String, stage: String },
    CreateTableAsync {
        bucket_id: String,
        name: String,
        header: String,
        primary_key: String,
    },
    CreateTableDefinition { bucket_id: String, name: String },
    UpdateMetadata { table_id: String, provider: String },
    Export { table_id: String },
    GetFile { file_id: String, federation_token: bool },
    DownloadFile { file_id: String },
    DownloadSliced { file_id: String },
    UploadFile { file_name: String },
    UploadSliced { file_name: String, slices: usize },
    WriteTable { table_id: String, options: WriteTableOptions },
    RefreshBucket { bucket_id: String },
}

#[derive(Default)]
pub struct StorageState {
    pub buckets: Vec<Bucket>,
    pub tables: HashMap<String, Table>,
    pub exports: HashMap<String, ExportProfile>,
    pub files: HashMap<String, FileInfo>,
    pub uploads: HashMap<String, Vec<u8>>,
    pub features: Vec<String>,
    pub calls: Vec<StorageCall>,
    /// Table ids whose lookup fails, simulating a transient source error.
    pub failing_table_lookups: Vec<String>,
    /// Table names whose typed creation fails with the backend's
    /// nullable-primary-key message.
    pub pk_nullable_tables: Vec<String>,
    next_id: u64,
}

impl StorageState {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }
}

#[derive(Default)]
pub struct FakeStorage {
    pub state: Mutex<StorageState>,
}

impl FakeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bucket(&self, bucket_id: &str) {
        let (stage, name) = bucket_id.split_once('.').expect("bucket id");
        self.state.lock().unwrap().buckets.push(Bucket {
            id: bucket_id.to_string(),
            name: name.to_string(),
            stage: stage.to_string(),
            backend: "snowflake".to_string(),
        });
    }

    pub fn add_table(&self, table: Table) {
        let mut state = self.state.lock().unwrap();
        if !state.buckets.iter().any(|b| b.id == table.bucket.id) {
            state.buckets.push(table.bucket.clone());
        }
        state.tables.insert(table.id.clone(), table);
    }

    pub fn set_export(&self, table_id: &str, profile: ExportProfile) {
        self.state
            .lock()
            .unwrap()
            .exports
            .insert(table_id.to_string(), profile);
    }

    pub fn set_features(&self, features: &[&str]) {
        self.state.lock().unwrap().features =
            features.iter().map(|f| (*f).to_string()).collect();
    }

    pub fn calls(&self) -> Vec<StorageCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn writes(&self) -> Vec<(String, WriteTableOptions)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StorageCall::WriteTable { table_id, options } => Some((table_id, options)),
                _ => None,
            })
            .collect()
    }

    /// Calls that mutate the destination project.
    pub fn mutating_calls(&self) -> Vec<StorageCall> {
        self.calls()
            .into_iter()
            .filter(|call| {
                matches!(
                    call,
                    StorageCall::CreateBucket { .. }
                        | StorageCall::CreateTableAsync { .. }
                        | StorageCall::CreateTableDefinition { .. }
                        | StorageCall::UpdateMetadata { .. }
                        | StorageCall::UploadFile { .. }
                        | StorageCall::UploadSliced { .. }
                        | StorageCall::WriteTable { .. }
                        | StorageCall::RefreshBucket { .. }
                )
            })
            .collect()
    }

    pub fn federation_file_fetches(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| {
                matches!(
                    call,
                    StorageCall::GetFile {
                        federation_token: true,
                        ..
                    }
                )
            })
            .count()
    }

    pub fn export_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, StorageCall::Export { .. }))
            .count()
    }
}

pub fn simple_table(table_id: &str, columns: &[&str], primary_key: &[&str]) -> Table {
    let (bucket_id, name) = table_id.rsplit_once('.').expect("table id");
    let (stage, bucket_name) = bucket_id.split_once('.').expect("bucket id");
    Table {
        id: table_id.to_string(),
        name: name.to_string(),
        columns: columns.iter().map(|c| (*c).to_string()).collect(),
        primary_key: primary_key.iter().map(|c| (*c).to_string()).collect(),
        bucket: Bucket {
            id: bucket_id.to_string(),
            name: bucket_name.to_string(),
            stage: stage.to_string(),
            backend: "snowflake".to_string(),
        },
        ..Table::default()
    }
}

#[async_trait]
impl StorageApi for FakeStorage {
    async fn verify_token(&self) -> Result<TokenInfo> {
        let state = self.state.lock().unwrap();
        Ok(TokenInfo {
            owner: TokenOwner {
                id: 1,
                features: state.features.clone(),
            },
        })
    }

    async fn list_buckets(&self) -> Result<Vec<Bucket>> {
        Ok(self.state.lock().unwrap().buckets.clone())
    }

    async fn bucket_exists(&self, bucket_id: &str) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .buckets
            .iter()
            .any(|b| b.id == bucket_id))
    }

    async fn create_bucket(&self, name: &str, stage: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(StorageCall::CreateBucket {
            name: name.to_string(),
            stage: stage.to_string(),
        });
        state.buckets.push(Bucket {
            id: format!("{}.c-{}", stage, name),
            name: format!("c-{}", name),
            stage: stage.to_string(),
            backend: "snowflake".to_string(),
        });
        Ok(())
    }

    async fn list_tables(&self, bucket_id: &str) -> Result<Vec<Table>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .tables
            .values()
            .filter(|t| t.bucket.id == bucket_id)
            .cloned()
            .collect())
    }

    async fn table_exists(&self, table_id: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().tables.contains_key(table_id))
    }

    async fn get_table(&self, table_id: &str) -> Result<Table> {
        let state = self.state.lock().unwrap();
        if state.failing_table_lookups.iter().any(|t| t == table_id) {
            bail!("The table \"{}\" was not found", table_id);
        }
        state
            .tables
            .get(table_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Table {} not found", table_id))
    }

    async fn create_table_async(
        &self,
        bucket_id: &str,
        name: &str,
        data_file_id: &str,
        primary_key: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let header = state
            .uploads
            .get(data_file_id)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .unwrap_or_default();
        state.calls.push(StorageCall::CreateTableAsync {
            bucket_id: bucket_id.to_string(),
            name: name.to_string(),
            header,
            primary_key: primary_key.to_string(),
        });
        let table_id = format!("{}.{}", bucket_id, name);
        let columns: Vec<&str> = Vec::new();
        let mut table = simple_table(&table_id, &columns, &[]);
        table.primary_key = primary_key
            .split(',')
            .filter(|k| !k.is_empty())
            .map(str::to_owned)
            .collect();
        state.tables.insert(table_id, table);
        Ok(())
    }

    async fn create_table_definition(
        &self,
        bucket_id: &str,
        definition: &TypedTableDefinition,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.pk_nullable_tables.iter().any(|t| t == &definition.name) {
            bail!(
                "Storage job failed: Primary keys columns must be set nullable false ({})",
                definition.name
            );
        }
        state.calls.push(StorageCall::CreateTableDefinition {
            bucket_id: bucket_id.to_string(),
            name: definition.name.clone(),
        });
        let table_id = format!("{}.{}", bucket_id, definition.name);
        let columns: Vec<&str> = Vec::new();
        state
            .tables
            .insert(table_id.clone(), simple_table(&table_id, &columns, &[]));
        Ok(())
    }

    async fn update_table_metadata(
        &self,
        table_id: &str,
        provider: &str,
        _table_metadata: &[MetadataEntry],
        _column_metadata: &HashMap<String, Vec<MetadataEntry>>,
    ) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(StorageCall::UpdateMetadata {
                table_id: table_id.to_string(),
                provider: provider.to_string(),
            });
        Ok(())
    }

    async fn export_table(
        &self,
        table_id: &str,
        _include_internal_timestamp: bool,
    ) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(StorageCall::Export {
            table_id: table_id.to_string(),
        });
        let profile = state.exports.get(table_id).cloned().unwrap_or_default();
        let file_id = state.next_id();
        let info = FileInfo {
            id: file_id.clone(),
            name: format!("{}.csv.gz", table_id),
            size_bytes: profile.size_bytes,
            is_sliced: profile.sliced,
            provider: profile.provider.clone(),
            url: format!("https://files.test/{}", file_id),
            path: Some(ObjectPath {
                bucket: "exports".to_string(),
                key: format!("{}/", table_id),
            }),
            credentials: Some(FileCredentials {
                access_token: format!("token-{}", file_id),
                expires_in: 900,
                token_type: "Bearer".to_string(),
                project_id: "test".to_string(),
            }),
        };
        state.files.insert(file_id.clone(), info);
        Ok(file_id)
    }

    async fn get_file(&self, file_id: &str, federation_token: bool) -> Result<FileInfo> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(StorageCall::GetFile {
            file_id: file_id.to_string(),
            federation_token,
        });
        state
            .files
            .get(file_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("File {} not found", file_id))
    }

    async fn download_file(&self, file_id: &str, destination: &Path) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(StorageCall::DownloadFile {
                file_id: file_id.to_string(),
            });
        std::fs::write(destination, b"exported data")?;
        Ok(())
    }

    async fn download_sliced_file(
        &self,
        file_id: &str,
        destination_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        let slices = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(StorageCall::DownloadSliced {
                file_id: file_id.to_string(),
            });
            let table_id = state
                .files
                .get(file_id)
                .map(|f| f.name.trim_end_matches(".csv.gz").to_string())
                .unwrap_or_default();
            state
                .exports
                .get(&table_id)
                .map(|p| p.slices.clone())
                .unwrap_or_else(|| vec![("slice.0".to_string(), b"part".to_vec())])
        };
        let mut paths = Vec::new();
        for (name, bytes) in slices {
            let path = destination_dir.join(name);
            std::fs::write(&path, bytes)?;
            paths.push(path);
        }
        Ok(paths)
    }

    async fn upload_file(&self, path: &Path, options: &FileUploadOptions) -> Result<String> {
        let bytes = std::fs::read(path)?;
        let mut state = self.state.lock().unwrap();
        state.calls.push(StorageCall::UploadFile {
            file_name: options.file_name.clone(),
        });
        let id = state.next_id();
        state.uploads.insert(id.clone(), bytes);
        Ok(id)
    }

    async fn upload_sliced_file(
        &self,
        paths: &[PathBuf],
        options: &FileUploadOptions,
    ) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(StorageCall::UploadSliced {
            file_name: options.file_name.clone(),
            slices: paths.len(),
        });
        let id = state.next_id();
        state.uploads.insert(id.clone(), Vec::new());
        Ok(id)
    }

    async fn write_table_from_file(
        &self,
        table_id: &str,
        options: &WriteTableOptions,
    ) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(StorageCall::WriteTable {
                table_id: table_id.to_string(),
                options: options.clone(),
            });
        Ok(())
    }

    async fn refresh_bucket_info(&self, bucket_id: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(StorageCall::RefreshBucket {
                bucket_id: bucket_id.to_string(),
            });
        Ok(())
    }
}

// ============================================================================
// Warehouse fake
// ============================================================================

#[derive(Default)]
pub struct WarehouseState {
    pub current_role: String,
    pub executed: Vec<String>,
    pub queries: Vec<String>,
    /// Scripted fetch_all responses, matched by substring, first match wins.
    pub results: Vec<(String, Vec<Row>)>,
    /// Substrings whose statements or queries fail when matched.
    pub failures: Vec<String>,
}

#[derive(Default)]
pub struct FakeWarehouse {
    pub state: Mutex<WarehouseState>,
}

impl FakeWarehouse {
    pub fn new(initial_role: &str) -> Self {
        let fake = Self::default();
        fake.state.lock().unwrap().current_role = initial_role.to_string();
        fake
    }

    /// Script a fetch_all response matched by substring. The most recent
    /// scripting for a needle wins.
    pub fn on(&self, needle: &str, rows: Vec<Row>) {
        self.state
            .lock()
            .unwrap()
            .results
            .insert(0, (needle.to_string(), rows));
    }

    pub fn fail_on(&self, needle: &str) {
        self.state.lock().unwrap().failures.push(needle.to_string());
    }

    pub fn executed_sql(&self) -> Vec<String> {
        self.state.lock().unwrap().executed.clone()
    }

    pub fn queried_sql(&self) -> Vec<String> {
        self.state.lock().unwrap().queries.clone()
    }

    pub fn role_now(&self) -> String {
        self.state.lock().unwrap().current_role.clone()
    }
}

pub fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(key, value)| ((*key).to_string(), value.clone()))
        .collect()
}

pub fn grant_row(privilege: &str, grantee: &str) -> Row {
    row(&[
        ("privilege", Value::String(privilege.to_string())),
        ("grantee_name", Value::String(grantee.to_string())),
    ])
}

pub fn name_row(name: &str) -> Row {
    row(&[("name", Value::String(name.to_string()))])
}

#[async_trait]
impl Warehouse for FakeWarehouse {
    async fn execute(&self, sql: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failures.iter().any(|needle| sql.contains(needle.as_str())) {
            bail!("statement failed: {}", sql);
        }
        if let Some(role) = sql.strip_prefix("USE ROLE ") {
            state.current_role = role.trim_matches('"').to_string();
        }
        state.executed.push(sql.to_string());
        Ok(())
    }

    async fn fetch_all(&self, sql: &str) -> Result<Vec<Row>> {
        let mut state = self.state.lock().unwrap();
        if sql.starts_with("SELECT CURRENT_ROLE()") {
            return Ok(vec![row(&[(
                "role",
                Value::String(state.current_role.clone()),
            )])]);
        }
        if state.failures.iter().any(|needle| sql.contains(needle.as_str())) {
            bail!("query failed: {}", sql);
        }
        state.queries.push(sql.to_string());
        if sql.starts_with("SELECT CURRENT_REGION()") {
            return Ok(vec![row(&[(
                "region",
                Value::String("AWS_EU_TEST_1".to_string()),
            )])]);
        }
        if sql.starts_with("SELECT CURRENT_ACCOUNT()") {
            return Ok(vec![row(&[(
                "account",
                Value::String("TEST_ACCOUNT".to_string()),
            )])]);
        }
        for (needle, rows) in &state.results {
            if sql.contains(needle.as_str()) {
                return Ok(rows.clone());
            }
        }
        Ok(Vec::new())
    }
}

// ============================================================================
// Blob store fake
// ============================================================================

#[derive(Default)]
pub struct BlobState {
    /// Manifests by file id.
    pub manifests: HashMap<String, SlicedManifest>,
    pub manifest_fetches: usize,
    /// Destination paths of every download performed.
    pub downloads: Vec<PathBuf>,
}

#[derive(Default)]
pub struct FakeBlobStore {
    pub state: Mutex<BlobState>,
}

impl FakeBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_manifest(&self, file_id: &str, entry_urls: &[String]) {
        let manifest = SlicedManifest {
            entries: entry_urls
                .iter()
                .map(|url| ManifestEntry { url: url.clone() })
                .collect(),
        };
        self.state
            .lock()
            .unwrap()
            .manifests
            .insert(file_id.to_string(), manifest);
    }

    pub fn downloads(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().downloads.clone()
    }

    pub fn manifest_fetches(&self) -> usize {
        self.state.lock().unwrap().manifest_fetches
    }
}

#[async_trait]
impl BlobStore for FakeBlobStore {
    async fn fetch_manifest(&self, file: &FileInfo) -> Result<SlicedManifest> {
        let mut state = self.state.lock().unwrap();
        state.manifest_fetches += 1;
        state
            .manifests
            .get(&file.id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("No manifest for file {}", file.id))
    }

    async fn download(&self, file: &FileInfo, entry_url: &str, destination: &Path) -> Result<()> {
        if file.credentials.is_none() {
            bail!("Download of {} attempted without credentials", entry_url);
        }
        std::fs::write(destination, b"slice bytes")?;
        self.state
            .lock()
            .unwrap()
            .downloads
            .push(destination.to_path_buf());
        Ok(())
    }
}
