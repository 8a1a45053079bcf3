// ABOUTME: Reqwest-backed warehouse client speaking the SQL-over-HTTP API
// ABOUTME: Logs in once per connection and submits statements within that session

use crate::warehouse::{Row, Warehouse};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

/// Connection settings for one warehouse account.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct WarehouseConfig {
    pub host: String,
    pub user: String,
    pub password: String,
}

/// HTTP client for one warehouse account session.
///
/// Statements run inside a single server-side session, so session state such
/// as the active role, database, and warehouse persists across calls exactly
/// like it would on a driver connection.
pub struct SqlApiClient {
    http: reqwest::Client,
    base_url: String,
    session_token: String,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<LoginData>,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: String,
}

#[derive(Debug, Deserialize)]
struct StatementResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<StatementData>,
}

#[derive(Debug, Deserialize)]
struct StatementData {
    #[serde(default)]
    rowtype: Vec<ColumnType>,
    #[serde(default)]
    rowset: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct ColumnType {
    name: String,
}

impl SqlApiClient {
    /// Open a session against the account and authenticate.
    pub async fn connect(config: &WarehouseConfig) -> Result<Self> {
        let base_url = format!("https://{}", config.host.trim_end_matches('/'));
        let http = reqwest::Client::new();

        let response = http
            .post(format!("{}/session/v1/login-request", base_url))
            .json(&json!({
                "data": {
                    "LOGIN_NAME": config.user,
                    "PASSWORD": config.password,
                }
            }))
            .send()
            .await
            .with_context(|| format!("Login request to {} failed", config.host))?;

        let status = response.status();
        let body: LoginResponse = response
            .json()
            .await
            .context("Unexpected login response shape")?;
        if !status.is_success() || !body.success {
            bail!(
                "Warehouse login to {} failed: {}",
                config.host,
                body.message.unwrap_or_else(|| status.to_string())
            );
        }
        let token = body
            .data
            .map(|d| d.token)
            .context("Warehouse login returned no session token")?;

        Ok(Self {
            http,
            base_url,
            session_token: token,
        })
    }

    async fn submit(&self, sql: &str) -> Result<StatementData> {
        let response = self
            .http
            .post(format!("{}/queries/v1/query-request", self.base_url))
            .header(
                "Authorization",
                format!("Snowflake Token=\"{}\"", self.session_token),
            )
            .json(&json!({ "sqlText": sql }))
            .send()
            .await
            .with_context(|| format!("Statement submission failed: {}", sql))?;

        let status = response.status();
        let body: StatementResponse = response
            .json()
            .await
            .with_context(|| format!("Unexpected statement response shape for: {}", sql))?;
        if !status.is_success() || !body.success {
            bail!(
                "Statement failed ({}): {}",
                body.message.unwrap_or_else(|| status.to_string()),
                sql
            );
        }
        Ok(body.data.unwrap_or(StatementData {
            rowtype: Vec::new(),
            rowset: Vec::new(),
        }))
    }
}

#[async_trait]
impl Warehouse for SqlApiClient {
    async fn execute(&self, sql: &str) -> Result<()> {
        self.submit(sql).await?;
        Ok(())
    }

    async fn fetch_all(&self, sql: &str) -> Result<Vec<Row>> {
        let data = self.submit(sql).await?;
        let columns: Vec<&str> = data.rowtype.iter().map(|c| c.name.as_str()).collect();
        let rows = data
            .rowset
            .into_iter()
            .map(|values| {
                columns
                    .iter()
                    .zip(values)
                    .map(|(name, value)| ((*name).to_string(), value))
                    .collect()
            })
            .collect();
        Ok(rows)
    }
}
