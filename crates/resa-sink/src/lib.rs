//! Supabase-facing write side: PostgREST bulk operations and the batch
//! upload driver.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;
use resa_core::WeightRule;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const CRATE_NAME: &str = "resa-sink";

pub const SALES_TABLE: &str = "sales_analytics";
pub const INVENTORY_TABLE: &str = "inventory_analytics";
pub const VISITORS_TABLE: &str = "visitors_analytics";
pub const WEIGHTS_TABLE: &str = "product_weights";

pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Delete filter matching every row, for whole-table replacement.
pub const ALL_ROWS_FILTER: &str = "id=gt.0";

/// Delete filter scoping one inventory snapshot day.
pub fn snapshot_date_filter(date: NaiveDate) -> String {
    format!("snapshot_date=eq.{date}")
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("sink returned {status} for {url}: {body}")]
    HttpStatus {
        status: u16,
        url: String,
        body: String,
    },
}

/// One sink row paired with its natural key. The key never travels over the
/// wire; it exists for de-duplication and conflict targeting.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedRow {
    pub key: String,
    pub row: Value,
}

impl KeyedRow {
    pub fn new(key: impl Into<String>, row: Value) -> Self {
        Self {
            key: key.into(),
            row,
        }
    }
}

/// Collapses duplicate keys so no batch can carry two rows sharing one.
/// The last occurrence wins; rows keep the position of their first
/// occurrence.
pub fn dedup_last_wins(rows: Vec<KeyedRow>) -> Vec<KeyedRow> {
    let mut position: HashMap<String, usize> = HashMap::new();
    let mut deduped: Vec<KeyedRow> = Vec::with_capacity(rows.len());
    for row in rows {
        match position.get(&row.key) {
            Some(&at) => deduped[at] = row,
            None => {
                position.insert(row.key.clone(), deduped.len());
                deduped.push(row);
            }
        }
    }
    deduped
}

/// Bulk operations a destination must support. The REST store implements
/// this against PostgREST; tests run against [`MemoryStore`].
#[async_trait]
pub trait BulkStore: Send + Sync {
    async fn delete_where(&self, table: &str, filter: &str) -> Result<(), SinkError>;

    async fn insert_batch(&self, table: &str, rows: &[KeyedRow]) -> Result<(), SinkError>;

    async fn upsert_batch(
        &self,
        table: &str,
        conflict_keys: &str,
        rows: &[KeyedRow],
    ) -> Result<(), SinkError>;

    async fn fetch_weight_rules(&self) -> Result<Vec<WeightRule>, SinkError>;
}

/// PostgREST client carrying the project URL and service key.
pub struct SupabaseStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl SupabaseStore {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    async fn check(response: reqwest::Response) -> Result<(), SinkError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let url = response.url().to_string();
        let body = response.text().await.unwrap_or_default();
        Err(SinkError::HttpStatus {
            status: status.as_u16(),
            url,
            body,
        })
    }

    fn payload(rows: &[KeyedRow]) -> Vec<&Value> {
        rows.iter().map(|r| &r.row).collect()
    }
}

#[async_trait]
impl BulkStore for SupabaseStore {
    async fn delete_where(&self, table: &str, filter: &str) -> Result<(), SinkError> {
        let url = format!("{}?{}", self.rest_url(table), filter);
        let response = self
            .authed(self.client.delete(&url))
            .header("Prefer", "return=minimal")
            .send()
            .await?;
        Self::check(response).await
    }

    async fn insert_batch(&self, table: &str, rows: &[KeyedRow]) -> Result<(), SinkError> {
        let response = self
            .authed(self.client.post(self.rest_url(table)))
            .header("Prefer", "return=minimal")
            .json(&Self::payload(rows))
            .send()
            .await?;
        Self::check(response).await
    }

    async fn upsert_batch(
        &self,
        table: &str,
        conflict_keys: &str,
        rows: &[KeyedRow],
    ) -> Result<(), SinkError> {
        let url = format!("{}?on_conflict={}", self.rest_url(table), conflict_keys);
        let response = self
            .authed(self.client.post(&url))
            .header("Prefer", "resolution=merge-duplicates")
            .json(&Self::payload(rows))
            .send()
            .await?;
        Self::check(response).await
    }

    async fn fetch_weight_rules(&self) -> Result<Vec<WeightRule>, SinkError> {
        let url = format!("{}?select=*", self.rest_url(WEIGHTS_TABLE));
        let response = self.authed(self.client.get(&url)).send().await?;
        let status = response.status();
        if !status.is_success() {
            let url = response.url().to_string();
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::HttpStatus {
                status: status.as_u16(),
                url,
                body,
            });
        }
        Ok(response.json().await?)
    }
}

/// In-memory [`BulkStore`] keyed by natural key, with optional injected
/// insert failures.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, BTreeMap<String, Value>>>,
    weight_rules: Vec<WeightRule>,
    fail_inserts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_weight_rules(weight_rules: Vec<WeightRule>) -> Self {
        Self {
            weight_rules,
            ..Self::default()
        }
    }

    /// Makes the next `count` insert batches fail with a 500.
    pub fn fail_next_inserts(&self, count: usize) {
        self.fail_inserts.store(count, Ordering::SeqCst);
    }

    pub async fn rows(&self, table: &str) -> Vec<Value> {
        let tables = self.tables.lock().await;
        tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn row_count(&self, table: &str) -> usize {
        let tables = self.tables.lock().await;
        tables.get(table).map(BTreeMap::len).unwrap_or(0)
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_inserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn column_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl BulkStore for MemoryStore {
    async fn delete_where(&self, table: &str, filter: &str) -> Result<(), SinkError> {
        let mut tables = self.tables.lock().await;
        let rows = tables.entry(table.to_string()).or_default();
        match filter.split_once("=eq.") {
            Some((column, expected)) => {
                rows.retain(|_, row| {
                    row.get(column).map(column_text).as_deref() != Some(expected)
                });
            }
            None => rows.clear(),
        }
        Ok(())
    }

    async fn insert_batch(&self, table: &str, rows: &[KeyedRow]) -> Result<(), SinkError> {
        if self.take_injected_failure() {
            return Err(SinkError::HttpStatus {
                status: 500,
                url: format!("memory://{table}"),
                body: "injected failure".to_string(),
            });
        }
        let mut tables = self.tables.lock().await;
        let stored = tables.entry(table.to_string()).or_default();
        for row in rows {
            stored.insert(row.key.clone(), row.row.clone());
        }
        Ok(())
    }

    async fn upsert_batch(
        &self,
        table: &str,
        _conflict_keys: &str,
        rows: &[KeyedRow],
    ) -> Result<(), SinkError> {
        let mut tables = self.tables.lock().await;
        let stored = tables.entry(table.to_string()).or_default();
        for row in rows {
            stored.insert(row.key.clone(), row.row.clone());
        }
        Ok(())
    }

    async fn fetch_weight_rules(&self) -> Result<Vec<WeightRule>, SinkError> {
        Ok(self.weight_rules.clone())
    }
}

/// Outcome of one upload phase. `errors` counts failed batches, not rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    pub attempted: usize,
    pub uploaded: usize,
    pub errors: usize,
}

/// Drives chunked uploads. Batch failures are logged and counted so the
/// remaining batches still get their attempt; the caller decides whether a
/// non-zero error count fails the run.
pub struct Uploader {
    batch_size: usize,
}

impl Uploader {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    /// Delete everything the filter matches, then insert the de-duplicated
    /// rows. The delete is fatal on failure: inserting on top of stale rows
    /// would break replace idempotence.
    pub async fn full_replace(
        &self,
        store: &dyn BulkStore,
        table: &str,
        filter: &str,
        rows: Vec<KeyedRow>,
    ) -> Result<UploadReport, SinkError> {
        store.delete_where(table, filter).await?;
        debug!(table, filter, "cleared existing rows");
        let rows = dedup_last_wins(rows);
        let mut report = UploadReport {
            attempted: rows.len(),
            ..UploadReport::default()
        };
        for batch in rows.chunks(self.batch_size) {
            match store.insert_batch(table, batch).await {
                Ok(()) => {
                    report.uploaded += batch.len();
                    debug!(table, rows = batch.len(), "inserted batch");
                }
                Err(error) => {
                    report.errors += 1;
                    warn!(table, %error, "batch insert failed");
                }
            }
        }
        Ok(report)
    }

    /// Insert-or-update by conflict key, batch failures absorbed the same
    /// way as inserts.
    pub async fn upsert(
        &self,
        store: &dyn BulkStore,
        table: &str,
        conflict_keys: &str,
        rows: Vec<KeyedRow>,
    ) -> Result<UploadReport, SinkError> {
        let rows = dedup_last_wins(rows);
        let mut report = UploadReport {
            attempted: rows.len(),
            ..UploadReport::default()
        };
        for batch in rows.chunks(self.batch_size) {
            match store.upsert_batch(table, conflict_keys, batch).await {
                Ok(()) => {
                    report.uploaded += batch.len();
                    debug!(table, rows = batch.len(), "upserted batch");
                }
                Err(error) => {
                    report.errors += 1;
                    warn!(table, %error, "batch upsert failed");
                }
            }
        }
        Ok(report)
    }
}
