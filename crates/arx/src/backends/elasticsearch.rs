//! # 📡 THE ELASTICSEARCH BACKEND
//!
//! 🎬 COLD OPEN — INT. SERVER ROOM — 3:47 AM
//!
//! The live index has eleven hundred million documents in it. Nine hundred million of
//! them belong to process instances that finished last spring. Every dashboard query
//! wades through them anyway. Tonight, someone decided to do something about it.
//!
//! 🚀 This module speaks just enough of the Elasticsearch REST API to archive things:
//! `_search` with `search_after`, `_reindex`, `_delete_by_query`, `_bulk`, index
//! existence checks and creation, and `_refresh`. Nothing fancier. No scroll contexts
//! left dangling, no client library the size of a small moon.
//!
//! 🔒 Auth: API key wins over basic auth. This is not a democracy.
//!
//! ⚠️ Error classification is the whole game here: connection failures, timeouts,
//! 429s and 5xx are [`StoreError::Transient`] and get retried upstream; every other
//! non-2xx is [`StoreError::Rejected`] and does not. 🦆

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::SecondsFormat;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, trace};

use crate::backends::RecordStore;
use crate::common::{
    BulkOutcome, EnsureOutcome, Filter, Record, SearchRequest, SortField, SortOrder,
};
use crate::error::StoreError;

/// 📡 Connection settings for the cluster holding both live and archive indices.
#[derive(Debug, Deserialize, Clone)]
pub struct ElasticsearchStoreConfig {
    /// 📡 Scheme + host + port. Yes, all of it.
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// 🔒 Preferred over basic auth when both are present.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// ⏱️ Whole-request ceiling. Reindex calls wait for completion, so be generous.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

/// 📡 [`RecordStore`] over HTTP. Cheap to clone; the `reqwest::Client` pools connections.
#[derive(Debug, Clone)]
pub struct ElasticsearchStore {
    client: reqwest::Client,
    config: ElasticsearchStoreConfig,
}

impl ElasticsearchStore {
    /// 🚀 Builds the HTTP client and pings the cluster root so a wrong URL or bad
    /// credentials fail at startup instead of in the middle of an archive cycle.
    pub async fn new(config: ElasticsearchStoreConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .context("💀 The HTTP client refused to be born. Probably TLS. It's always TLS.")?;

        let store = Self { client, config };
        let response = store
            .authorize(store.client.get(&store.config.url))
            .send()
            .await
            .with_context(|| {
                format!(
                    "💀 Knocked on '{}' and nobody answered. Check the URL, the network, the firewall, your horoscope.",
                    store.config.url
                )
            })?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "💀 The cluster at '{}' answered the ping with {}. Body: '{}'. Credentials, perhaps?",
                store.config.url,
                status,
                body
            );
        }
        debug!("✅ Elasticsearch at '{}' is home and accepting visitors", store.config.url);
        Ok(store)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.url.trim_end_matches('/'), path)
    }

    /// 🔒 Same auth dance for every request: api_key beats basic auth in this club.
    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(ref api_key) = self.config.api_key {
            request.header("Authorization", format!("ApiKey {}", api_key))
        } else if let Some(ref username) = self.config.username {
            request.basic_auth(username, self.config.password.as_ref())
        } else {
            request
        }
    }

    /// 📡 Sends, then sorts the outcome into transient / rejected / fine.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, StoreError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|err| StoreError::Transient(format!("request failed: {err}")))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 429 || status.is_server_error() {
            Err(StoreError::Transient(format!("{status}: {body}")))
        } else {
            Err(StoreError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }

    async fn send_json(&self, request: reqwest::RequestBuilder) -> Result<Value, StoreError> {
        self.send(request)
            .await?
            .json::<Value>()
            .await
            .map_err(|err| StoreError::Malformed(format!("response body is not JSON: {err}")))
    }

    /// 📦 POSTs an NDJSON body to `_bulk` and collects the per-item verdicts.
    /// `ignore_not_found` turns 404 items (deleting what is already gone) into successes.
    async fn submit_bulk(&self, body: String, ignore_not_found: bool) -> Result<BulkOutcome, StoreError> {
        let response = self
            .send_json(
                self.client
                    .post(self.endpoint("_bulk?refresh=false"))
                    .header("Content-Type", "application/x-ndjson")
                    .body(body),
            )
            .await?;
        Ok(bulk_outcome(&response, ignore_not_found))
    }
}

#[async_trait]
impl RecordStore for ElasticsearchStore {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<Record>, StoreError> {
        let body = search_body(request);
        trace!("🔎 _search on '{}': {}", request.index, body);
        let response = self
            .send_json(
                self.client
                    .post(self.endpoint(&format!("{}/_search", request.index)))
                    .json(&body),
            )
            .await?;
        let hits = response
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .ok_or_else(|| StoreError::Malformed("search response without hits.hits".to_string()))?;
        hits.iter()
            .map(|hit| {
                let id = hit
                    .get("_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| StoreError::Malformed("search hit without _id".to_string()))?;
                let index = hit.get("_index").and_then(Value::as_str).unwrap_or(&request.index);
                let source = hit.get("_source").cloned().unwrap_or(Value::Null);
                Ok(Record::new(index, id, source))
            })
            .collect()
    }

    async fn bulk_write(&self, index: &str, records: &[Record]) -> Result<BulkOutcome, StoreError> {
        if records.is_empty() {
            return Ok(BulkOutcome::default());
        }
        let mut body = String::with_capacity(records.len() * 128);
        for record in records {
            body.push_str(&json!({"index": {"_index": index, "_id": record.id}}).to_string());
            body.push('\n');
            body.push_str(&record.source.to_string());
            body.push('\n');
        }
        self.submit_bulk(body, false).await
    }

    async fn reindex_by_query(
        &self,
        source: &str,
        destination: &str,
        filter: &Filter,
    ) -> Result<u64, StoreError> {
        let body = json!({
            "source": {"index": source, "query": query_json(std::slice::from_ref(filter))},
            "dest": {"index": destination},
        });
        let response = self
            .send_json(
                self.client
                    .post(self.endpoint("_reindex?wait_for_completion=true&refresh=true"))
                    .json(&body),
            )
            .await?;
        check_failures(&response)?;
        let created = response.get("created").and_then(Value::as_u64).unwrap_or(0);
        let updated = response.get("updated").and_then(Value::as_u64).unwrap_or(0);
        debug!("📋 Reindexed '{}' -> '{}': {} created, {} updated", source, destination, created, updated);
        Ok(created + updated)
    }

    async fn delete_by_query(&self, index: &str, filter: &Filter) -> Result<u64, StoreError> {
        let body = json!({"query": query_json(std::slice::from_ref(filter))});
        let response = self
            .send_json(
                self.client
                    .post(self.endpoint(&format!("{index}/_delete_by_query?refresh=true&conflicts=proceed")))
                    .json(&body),
            )
            .await?;
        check_failures(&response)?;
        Ok(response.get("deleted").and_then(Value::as_u64).unwrap_or(0))
    }

    async fn bulk_delete(&self, index: &str, ids: &[String]) -> Result<BulkOutcome, StoreError> {
        if ids.is_empty() {
            return Ok(BulkOutcome::default());
        }
        let mut body = String::with_capacity(ids.len() * 64);
        for id in ids {
            body.push_str(&json!({"delete": {"_index": index, "_id": id}}).to_string());
            body.push('\n');
        }
        self.submit_bulk(body, true).await
    }

    async fn ensure_exists(&self, index: &str) -> Result<EnsureOutcome, StoreError> {
        match self.send(self.client.head(self.endpoint(index))).await {
            Ok(_) => return Ok(EnsureOutcome::AlreadyExisted),
            Err(StoreError::Rejected { status: 404, .. }) => {}
            Err(other) => return Err(other),
        }
        match self.send(self.client.put(self.endpoint(index))).await {
            Ok(_) => Ok(EnsureOutcome::Created),
            // 🏁 lost the creation race to a sibling process. still a win.
            Err(StoreError::Rejected { status: 400, body })
                if body.contains("resource_already_exists_exception") =>
            {
                Ok(EnsureOutcome::AlreadyExisted)
            }
            Err(other) => Err(other),
        }
    }

    async fn refresh(&self, index: &str) -> Result<(), StoreError> {
        self.send(self.client.post(self.endpoint(&format!("{index}/_refresh"))))
            .await
            .map(|_| ())
    }
}

fn filter_json(filter: &Filter) -> Value {
    match filter {
        Filter::Term { field, value } => json!({"term": {field: value}}),
        Filter::Terms { field, values } => json!({"terms": {field: values}}),
        Filter::Exists { field } => json!({"exists": {"field": field}}),
        Filter::RangeLte { field, at } => json!({
            "range": {field: {"lte": at.to_rfc3339_opts(SecondsFormat::Millis, true)}}
        }),
    }
}

/// 🔗 Filters are AND-ed inside a non-scoring bool query.
pub(crate) fn query_json(filters: &[Filter]) -> Value {
    json!({"bool": {"filter": filters.iter().map(filter_json).collect::<Vec<_>>()}})
}

fn sort_json(sort: &[SortField]) -> Value {
    Value::Array(
        sort.iter()
            .map(|key| {
                let order = match key.order {
                    SortOrder::Asc => "asc",
                    SortOrder::Desc => "desc",
                };
                json!({key.field.clone(): {"order": order}})
            })
            .collect(),
    )
}

pub(crate) fn search_body(request: &SearchRequest) -> Value {
    let mut body = json!({
        "size": request.limit,
        "query": query_json(&request.filters),
        "sort": sort_json(&request.sort),
    });
    if let Some(after) = &request.search_after {
        body["search_after"] = Value::Array(after.clone());
    }
    body
}

/// 💀 `_reindex` and `_delete_by_query` report per-document failures in a `failures` array
/// even on HTTP 200.
fn check_failures(response: &Value) -> Result<(), StoreError> {
    match response.get("failures").and_then(Value::as_array) {
        Some(failures) if !failures.is_empty() => Err(StoreError::ItemFailures(
            failures.iter().map(Value::to_string).collect(),
        )),
        _ => Ok(()),
    }
}

fn bulk_outcome(response: &Value, ignore_not_found: bool) -> BulkOutcome {
    let mut outcome = BulkOutcome::default();
    let items = response.get("items").and_then(Value::as_array).cloned().unwrap_or_default();
    for item in items {
        // each item is {"<action>": {...}}
        let Some(result) = item.as_object().and_then(|o| o.values().next()) else {
            continue;
        };
        let status = result.get("status").and_then(Value::as_u64).unwrap_or(0);
        if let Some(error) = result.get("error") {
            outcome.item_errors.push(format!(
                "{}: {}",
                result.get("_id").and_then(Value::as_str).unwrap_or("?"),
                error
            ));
        } else if status == 404 && !ignore_not_found {
            outcome.item_errors.push(format!(
                "{}: not found",
                result.get("_id").and_then(Value::as_str).unwrap_or("?")
            ));
        } else if status != 404 {
            outcome.succeeded += 1;
        }
    }
    outcome
}
