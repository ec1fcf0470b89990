//! PostgREST replica sink.
//!
//! Talks to a hosted Postgres through its REST gateway (e.g. Supabase):
//!
//! | Operation | Request |
//! |-----------|---------|
//! | `max_id` | `GET /rest/v1/{table}?select=id&order=id.desc&limit=1` |
//! | `upsert_batch` | `POST /rest/v1/{table}` with `Prefer: resolution=merge-duplicates` |
//! | `delete_by_ids` | `DELETE /rest/v1/{table}?id=in.(1,2,3)` |
//!
//! The service key is sent both as `apikey` and as a bearer token. Every
//! failure, including non-2xx statuses, becomes [`IndexError::Sink`].

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::ReplicaConfig;
use crate::error::{IndexError, Result};
use crate::models::ReplicaRow;
use crate::replica::ReplicaSink;

pub struct RestSink {
    client: reqwest::Client,
    base_url: String,
    key: String,
}

#[derive(Deserialize)]
struct IdRow {
    id: i64,
}

impl RestSink {
    pub fn new(base_url: &str, key: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IndexError::Sink(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            key,
        })
    }

    /// Build from the `[replica]` config section, reading the key from the
    /// environment.
    pub fn from_config(config: &ReplicaConfig) -> Result<Self> {
        let key = config.service_key()?;
        Self::new(&config.url, key, Duration::from_secs(config.timeout_secs))
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.key)
            .header("Authorization", format!("Bearer {}", self.key))
    }

    async fn send(&self, what: &str, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| IndexError::Sink(format!("{} failed: {}", what, e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(IndexError::Sink(format!("{} failed with {}: {}", what, status, body)))
    }
}

#[async_trait]
impl ReplicaSink for RestSink {
    async fn max_id(&self, table: &str) -> Result<i64> {
        let url = format!("{}?select=id&order=id.desc&limit=1", self.table_url(table));
        let response = self.send("max id query", self.request(reqwest::Method::GET, &url)).await?;
        let rows: Vec<IdRow> = response
            .json()
            .await
            .map_err(|e| IndexError::Sink(format!("unexpected max id response: {}", e)))?;
        Ok(rows.first().map(|r| r.id).unwrap_or(0))
    }

    async fn upsert_batch(&self, table: &str, rows: &[ReplicaRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let url = self.table_url(table);
        let builder = self
            .request(reqwest::Method::POST, &url)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(rows);
        self.send("upsert", builder).await?;
        debug!(table, rows = rows.len(), "upserted batch");
        Ok(())
    }

    async fn delete_by_ids(&self, table: &str, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let url = delete_url(&self.table_url(table), ids);
        self.send("delete", self.request(reqwest::Method::DELETE, &url))
            .await?;
        debug!(table, ids = ids.len(), "deleted batch");
        Ok(())
    }
}

fn delete_url(table_url: &str, ids: &[i64]) -> String {
    let list = ids
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",");
    format!("{}?id=in.({})", table_url, list)
}
