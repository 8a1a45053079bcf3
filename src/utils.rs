// ABOUTME: Shared helpers for identifier quoting, id parsing, and retries
// ABOUTME: Every identifier interpolated into warehouse SQL goes through quote_ident

use anyhow::{bail, Result};
use std::time::Duration;

/// Quote an identifier for interpolation into warehouse SQL.
///
/// Wraps the identifier in double quotes and doubles any embedded quote
/// characters. Identifiers frequently come from external data (bucket and
/// table names read from another project), so they must never reach a SQL
/// string unescaped.
///
/// # Examples
///
/// ```
/// # use seren_storage_migrator::utils::quote_ident;
/// assert_eq!(quote_ident("orders"), "\"orders\"");
/// assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
/// ```
pub fn quote_ident(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Split a bucket id into its stage and bare bucket name.
///
/// Bucket ids have the form `<stage>.<name>` where the name conventionally
/// carries a `c-` prefix that the bucket-create API does not accept.
pub fn split_bucket_id(bucket_id: &str) -> Result<(&str, &str)> {
    let Some((stage, name)) = bucket_id.split_once('.') else {
        bail!("Invalid bucket id \"{}\": expected <stage>.<name>", bucket_id);
    };
    let name = name.strip_prefix("c-").unwrap_or(name);
    Ok((stage, name))
}

/// Split a table id into its bucket id and table name.
///
/// Table ids have the form `<stage>.<bucket>.<table>`; only the last
/// separator is significant because bucket ids themselves contain a dot.
pub fn split_table_id(table_id: &str) -> Result<(&str, &str)> {
    let Some((bucket_id, table)) = table_id.rsplit_once('.') else {
        bail!(
            "Invalid table id \"{}\": expected <stage>.<bucket>.<table>",
            table_id
        );
    };
    Ok((bucket_id, table))
}

/// Retry an async operation with exponential backoff.
///
/// Runs `operation` up to `max_retries + 1` times, doubling the delay after
/// each failure. Returns the first success or the last error.
pub async fn retry_with_backoff<F, Fut, T>(
    mut operation: F,
    max_retries: u32,
    initial_delay: Duration,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut delay = initial_delay;
    let mut last_error = None;

    for attempt in 0..=max_retries {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                last_error = Some(e);
                if attempt < max_retries {
                    tracing::warn!(
                        "Operation failed (attempt {}/{}), retrying in {:?}...",
                        attempt + 1,
                        max_retries + 1,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Operation failed after retries")))
}
