//! Client for the analytical store's SQL endpoint.

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

use crate::config::constants::druid::{SQL_PATH, STATUS_PATH};

pub type Row = Map<String, Value>;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}: {body}")]
    Status { url: String, status: u16, body: String },
    #[error("malformed response from {url}: {reason}")]
    Malformed { url: String, reason: String },
}

/// SQL access to the analytical store. Each call is one bounded request.
#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    /// Runs `query` and returns the result rows as JSON objects.
    /// `query_id` is attached to the request context for tracing on the store side.
    async fn sql(&self, query: &str, query_id: &str) -> Result<Vec<Row>, AnalyticsError>;

    /// URL of the store's liveness endpoint.
    fn status_url(&self) -> String;
}

/// Create an HTTP client with custom connect and request timeouts.
pub fn build_http_client(connect_timeout: Duration, request_timeout: Duration) -> Client {
    ClientBuilder::new()
        .timeout(request_timeout)
        .connect_timeout(connect_timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}

#[derive(Debug, Serialize)]
struct SqlRequest<'a> {
    query: &'a str,
    context: SqlContext<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SqlContext<'a> {
    sql_query_id: &'a str,
}

/// Druid SQL over HTTP (`POST /druid/v2/sql`, array-of-objects result format).
#[derive(Debug, Clone)]
pub struct DruidClient {
    base_url: String,
    client: Client,
}

impl DruidClient {
    pub fn new(base_url: impl Into<String>, client: Client) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn sql_url(&self) -> String {
        format!("{}{SQL_PATH}", self.base_url)
    }
}

#[async_trait]
impl AnalyticsStore for DruidClient {
    async fn sql(&self, query: &str, query_id: &str) -> Result<Vec<Row>, AnalyticsError> {
        let url = self.sql_url();
        let request = SqlRequest {
            query,
            context: SqlContext {
                sql_query_id: query_id,
            },
        };

        tracing::debug!(query_id, "druid sql request");
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|source| AnalyticsError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalyticsError::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|source| AnalyticsError::Transport {
                url: url.clone(),
                source,
            })?;

        match body {
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(row) => Ok(row),
                    other => Err(AnalyticsError::Malformed {
                        url: url.clone(),
                        reason: format!("expected row object, got {other}"),
                    }),
                })
                .collect(),
            other => Err(AnalyticsError::Malformed {
                url,
                reason: format!("expected an array of rows, got {other}"),
            }),
        }
    }

    fn status_url(&self) -> String {
        format!("{}{STATUS_PATH}", self.base_url)
    }
}
