//! PostgREST (Supabase) implementation of [`RemoteStore`].
//!
//! Tables live under `<base>/rest/v1/<table>`. Every request carries the
//! project key both as `apikey` and as a bearer token, and is bounded by the
//! client's request timeout.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use super::remote::RemoteStore;
use crate::error::RemoteError;
use crate::storage::schema::{check_identifier, ID_COLUMN, UPDATED_AT_COLUMN};
use crate::storage::{Config, Row};

const DEFAULT_PAGE_SIZE: usize = 1000;

/// HTTP client for a PostgREST endpoint.
#[derive(Debug, Clone)]
pub struct PostgrestClient {
    http: Client,
    rest_url: Url,
    api_key: String,
    probe_table: String,
    timeout_secs: u64,
    page_size: usize,
}

impl PostgrestClient {
    /// # Errors
    /// `InvalidUrl` if `base_url` is not an absolute http(s) URL.
    pub fn new(
        base_url: &str,
        api_key: &str,
        request_timeout: Duration,
        probe_table: &str,
    ) -> Result<Self, RemoteError> {
        let invalid = |message: String| RemoteError::InvalidUrl {
            url: base_url.to_string(),
            message,
        };
        let mut base = Url::parse(base_url.trim()).map_err(|e| invalid(e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(invalid("scheme must be http or https".into()));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let rest_url = base.join("rest/v1/").map_err(|e| invalid(e.to_string()))?;

        let http = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            rest_url,
            api_key: api_key.to_string(),
            probe_table: probe_table.to_string(),
            timeout_secs: request_timeout.as_secs(),
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Build from the `remote.*` settings and environment credentials.
    pub fn from_config(config: &Config) -> crate::error::Result<Self> {
        let (url, key) = config.remote_credentials()?;
        Ok(Self::new(
            &url,
            &key,
            Duration::from_secs(config.remote.request_timeout_secs),
            &config.remote.probe_table,
        )?)
    }

    /// Rows requested per page by [`RemoteStore::select_since`].
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn table_url(&self, table: &str) -> Result<Url, RemoteError> {
        check_identifier(table, table).map_err(|e| RemoteError::InvalidUrl {
            url: self.rest_url.to_string(),
            message: e.to_string(),
        })?;
        self.rest_url
            .join(table)
            .map_err(|e| RemoteError::InvalidUrl {
                url: self.rest_url.to_string(),
                message: e.to_string(),
            })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;
        check_status(response).await
    }

    fn map_transport(&self, err: reqwest::Error) -> RemoteError {
        if err.is_timeout() {
            RemoteError::Timeout {
                timeout_secs: self.timeout_secs,
            }
        } else if err.is_connect() {
            RemoteError::Unreachable(err.to_string())
        } else {
            RemoteError::Request(err)
        }
    }

    async fn get_rows(&self, table: &str, query: &[(&str, String)]) -> Result<Vec<Row>, RemoteError> {
        let response = self
            .send(self.http.get(self.table_url(table)?).query(query))
            .await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        match body {
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(row) => Ok(row),
                    other => Err(RemoteError::Decode(format!("expected a row object, got {other}"))),
                })
                .collect(),
            other => Err(RemoteError::Decode(format!("expected an array, got {other}"))),
        }
    }
}

/// Turn non-2xx responses into [`RemoteError::Status`].
async fn check_status(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| {
            if text.is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                text.clone()
            }
        });
    Err(RemoteError::Status {
        status: status.as_u16(),
        code: body.get("code").and_then(Value::as_str).map(String::from),
        message,
    })
}

#[async_trait]
impl RemoteStore for PostgrestClient {
    async fn probe(&self) -> Result<(), RemoteError> {
        self.get_rows(
            &self.probe_table,
            &[("select", "*".to_string()), ("limit", "1".to_string())],
        )
        .await
        .map(|_| ())
    }

    async fn select_since(&self, table: &str, since: Option<&str>) -> Result<Vec<Row>, RemoteError> {
        let mut rows = Vec::new();
        let mut offset = 0;
        loop {
            let mut query = vec![
                ("select", "*".to_string()),
                ("order", format!("{ID_COLUMN}.asc")),
                ("limit", self.page_size.to_string()),
                ("offset", offset.to_string()),
            ];
            if let Some(since) = since {
                query.push((UPDATED_AT_COLUMN, format!("gte.{since}")));
            }
            let page = self.get_rows(table, &query).await?;
            let len = page.len();
            rows.extend(page);
            if len < self.page_size {
                break;
            }
            offset += len;
        }
        debug!(table, count = rows.len(), "fetched remote rows");
        Ok(rows)
    }

    async fn fetch_by_id(&self, table: &str, id: &str) -> Result<Option<Row>, RemoteError> {
        let rows = self
            .get_rows(
                table,
                &[
                    ("select", "*".to_string()),
                    (ID_COLUMN, format!("eq.{id}")),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn upsert(&self, table: &str, row: &Row) -> Result<(), RemoteError> {
        let request = self
            .http
            .post(self.table_url(table)?)
            .query(&[("on_conflict", ID_COLUMN)])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&json!([row]));
        self.send(request).await.map(|_| ())
    }

    async fn delete_by_id(&self, table: &str, id: &str) -> Result<(), RemoteError> {
        let request = self
            .http
            .delete(self.table_url(table)?)
            .query(&[(ID_COLUMN, format!("eq.{id}"))]);
        self.send(request).await.map(|_| ())
    }
}
