//! # Previously, on the Archive...
//!
//! 🎬 The cluster was down. The tests still had to run. Somebody had to pretend to be
//! Elasticsearch, and that somebody was a `BTreeMap` with delusions of grandeur.
//!
//! `in_mem` provides an in-memory [`RecordStore`]: indices are maps of id → JSON,
//! every filter and sort the archiver uses is evaluated right here on the heap, and
//! writes are visible immediately (refresh is a polite no-op).
//!
//! 🧪 It also lies on command. [`InMemoryStore::fail_next`] makes the next N calls of
//! one operation fail with a transient error, [`InMemoryStore::reject_next`] with a
//! permanent one. Great for retry tests, great for trust issues, great for both.
//! Every call lands in an operation log so tests can check the copy-before-delete order.
//!
//! ⚠️ This is NOT for production. If you're deploying this to prod, please also deploy
//! a therapist. 🦆

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::trace;

use crate::backends::RecordStore;
use crate::common::{
    BulkOutcome, EnsureOutcome, Filter, Record, SearchRequest, SortField, SortOrder, scalar_text,
};
use crate::error::StoreError;

/// 🏷️ Operation kinds, for fault injection and the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Search,
    BulkWrite,
    Reindex,
    DeleteByQuery,
    BulkDelete,
    EnsureExists,
    Refresh,
}

#[derive(Debug, Clone)]
struct Fault {
    remaining: u32,
    transient: bool,
    /// Only calls whose target starts with this are hit. `None` hits every call.
    target_prefix: Option<String>,
}

#[derive(Debug, Default)]
struct InMemoryState {
    indices: BTreeMap<String, BTreeMap<String, Value>>,
    faults: HashMap<StoreOp, Fault>,
    log: Vec<(StoreOp, String)>,
}

impl InMemoryState {
    /// 📝 Logs the call, then burns one injected fault if any is armed.
    fn enter(&mut self, op: StoreOp, target: &str) -> Result<(), StoreError> {
        self.log.push((op, target.to_string()));
        if let Some(fault) = self.faults.get_mut(&op) {
            let aimed_here = fault
                .target_prefix
                .as_deref()
                .is_none_or(|prefix| target.starts_with(prefix));
            if aimed_here && fault.remaining > 0 {
                fault.remaining -= 1;
                let transient = fault.transient;
                trace!("🎭 Injected {:?} fault on '{}'", op, target);
                return Err(if transient {
                    StoreError::Transient(format!("injected {op:?} failure on '{target}'"))
                } else {
                    StoreError::Rejected {
                        status: 400,
                        body: format!("injected {op:?} rejection on '{target}'"),
                    }
                });
            }
        }
        Ok(())
    }
}

/// 📦 A record store that never forgets until the process does.
///
/// Clone-able: every clone shares the same indices, so a test can keep a handle
/// after giving one to the archiver and peek inside afterwards.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn arm(&self, op: StoreOp, fault: Fault) {
        self.state.lock().await.faults.insert(op, fault);
    }

    /// 🎭 The next `times` calls of `op` fail with a transient error.
    pub async fn fail_next(&self, op: StoreOp, times: u32) {
        self.arm(
            op,
            Fault {
                remaining: times,
                transient: true,
                target_prefix: None,
            },
        )
        .await;
    }

    /// 🎯 Like [`InMemoryStore::fail_next`], but only for calls aimed at `target_prefix`.
    /// Reindex targets read `source->destination`, so a source index name works as a prefix.
    pub async fn fail_next_for(&self, op: StoreOp, target_prefix: &str, times: u32) {
        self.arm(
            op,
            Fault {
                remaining: times,
                transient: true,
                target_prefix: Some(target_prefix.to_string()),
            },
        )
        .await;
    }

    /// 🚫 The next `times` calls of `op` fail with a non-retryable rejection.
    pub async fn reject_next(&self, op: StoreOp, times: u32) {
        self.arm(
            op,
            Fault {
                remaining: times,
                transient: false,
                target_prefix: None,
            },
        )
        .await;
    }

    /// 🔍 One document, if it exists.
    pub async fn get(&self, index: &str, id: &str) -> Option<Value> {
        self.state
            .lock()
            .await
            .indices
            .get(index)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    /// 🔢 Document count of `index`; zero for indices that do not exist.
    pub async fn count(&self, index: &str) -> usize {
        self.state
            .lock()
            .await
            .indices
            .get(index)
            .map_or(0, BTreeMap::len)
    }

    pub async fn index_names(&self) -> Vec<String> {
        self.state.lock().await.indices.keys().cloned().collect()
    }

    /// 📜 Every call made so far, oldest first.
    pub async fn operation_log(&self) -> Vec<(StoreOp, String)> {
        self.state.lock().await.log.clone()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<Record>, StoreError> {
        let mut state = self.state.lock().await;
        state.enter(StoreOp::Search, &request.index)?;
        let Some(docs) = state.indices.get(&request.index) else {
            return Err(StoreError::Rejected {
                status: 404,
                body: format!("no such index [{}]", request.index),
            });
        };

        let mut hits: Vec<Record> = docs
            .iter()
            .filter(|(_, source)| request.filters.iter().all(|f| matches_filter(source, f)))
            .map(|(id, source)| Record::new(request.index.clone(), id.clone(), source.clone()))
            .collect();
        hits.sort_by(|a, b| compare_by_sort(&a.source, &b.source, &request.sort));

        if let Some(after) = &request.search_after {
            hits.retain(|hit| is_after(&hit.source, after, &request.sort));
        }
        hits.truncate(request.limit);
        Ok(hits)
    }

    async fn bulk_write(&self, index: &str, records: &[Record]) -> Result<BulkOutcome, StoreError> {
        let mut state = self.state.lock().await;
        state.enter(StoreOp::BulkWrite, index)?;
        let docs = state.indices.entry(index.to_string()).or_default();
        for record in records {
            docs.insert(record.id.clone(), record.source.clone());
        }
        Ok(BulkOutcome {
            succeeded: records.len() as u64,
            item_errors: Vec::new(),
        })
    }

    async fn reindex_by_query(
        &self,
        source: &str,
        destination: &str,
        filter: &Filter,
    ) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        state.enter(StoreOp::Reindex, &format!("{source}->{destination}"))?;
        let matching: Vec<(String, Value)> = match state.indices.get(source) {
            Some(docs) => docs
                .iter()
                .filter(|(_, doc)| matches_filter(doc, filter))
                .map(|(id, doc)| (id.clone(), doc.clone()))
                .collect(),
            None => {
                return Err(StoreError::Rejected {
                    status: 404,
                    body: format!("no such index [{source}]"),
                });
            }
        };
        let moved = matching.len() as u64;
        state
            .indices
            .entry(destination.to_string())
            .or_default()
            .extend(matching);
        Ok(moved)
    }

    async fn delete_by_query(&self, index: &str, filter: &Filter) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        state.enter(StoreOp::DeleteByQuery, index)?;
        let Some(docs) = state.indices.get_mut(index) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|_, doc| !matches_filter(doc, filter));
        Ok((before - docs.len()) as u64)
    }

    async fn bulk_delete(&self, index: &str, ids: &[String]) -> Result<BulkOutcome, StoreError> {
        let mut state = self.state.lock().await;
        state.enter(StoreOp::BulkDelete, index)?;
        let mut outcome = BulkOutcome::default();
        if let Some(docs) = state.indices.get_mut(index) {
            for id in ids {
                if docs.remove(id).is_some() {
                    outcome.succeeded += 1;
                }
            }
        }
        Ok(outcome)
    }

    async fn ensure_exists(&self, index: &str) -> Result<EnsureOutcome, StoreError> {
        let mut state = self.state.lock().await;
        state.enter(StoreOp::EnsureExists, index)?;
        if state.indices.contains_key(index) {
            return Ok(EnsureOutcome::AlreadyExisted);
        }
        state.indices.insert(index.to_string(), BTreeMap::new());
        Ok(EnsureOutcome::Created)
    }

    async fn refresh(&self, index: &str) -> Result<(), StoreError> {
        self.state.lock().await.enter(StoreOp::Refresh, index)
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn matches_filter(doc: &Value, filter: &Filter) -> bool {
    match filter {
        Filter::Term { field, value } => match (doc.get(field), scalar_text(value)) {
            (Some(actual), Some(expected)) => scalar_text(actual).as_deref() == Some(expected.as_str()),
            _ => false,
        },
        Filter::Terms { field, values } => {
            let Some(actual) = doc.get(field).and_then(scalar_text) else {
                return false;
            };
            values
                .iter()
                .filter_map(scalar_text)
                .any(|candidate| candidate == actual)
        }
        Filter::Exists { field } => doc.get(field).is_some_and(|v| !v.is_null()),
        Filter::RangeLte { field, at } => doc
            .get(field)
            .and_then(parse_timestamp)
            .is_some_and(|ts| ts <= *at),
    }
}

/// ⚖️ Orders two JSON values the way a search engine would: numbers numerically,
/// timestamps chronologically, other strings lexically. Missing values sort last.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => {
            if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
                return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
            }
            if let (Some(x), Some(y)) = (parse_timestamp(a), parse_timestamp(b)) {
                return x.cmp(&y);
            }
            match (scalar_text(a), scalar_text(b)) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => Ordering::Equal,
            }
        }
    }
}

fn compare_by_sort(a: &Value, b: &Value, sort: &[SortField]) -> Ordering {
    for key in sort {
        let ordering = compare_values(a.get(&key.field), b.get(&key.field));
        let ordering = match key.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// ⏭️ Strictly after the cursor in sort order.
fn is_after(doc: &Value, cursor: &[Value], sort: &[SortField]) -> bool {
    for (key, after) in sort.iter().zip(cursor) {
        let ordering = compare_values(doc.get(&key.field), Some(after));
        let ordering = match key.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        };
        match ordering {
            Ordering::Greater => return true,
            Ordering::Less => return false,
            Ordering::Equal => continue,
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    async fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        let docs = vec![
            Record::new("live_", "3", json!({"key": 3, "endDate": "2024-03-02T10:00:00Z", "partitionId": 1})),
            Record::new("live_", "1", json!({"key": 1, "endDate": "2024-03-01T10:00:00Z", "partitionId": 1})),
            Record::new("live_", "2", json!({"key": 2, "endDate": "2024-03-01T10:00:00Z", "partitionId": 2})),
            Record::new("live_", "4", json!({"key": 4, "partitionId": 1})),
        ];
        store.bulk_write("live_", &docs).await.expect("seed");
        store
    }

    #[tokio::test]
    async fn the_one_where_search_filters_sorts_and_pages_like_the_real_thing() {
        let store = seeded().await;
        let mut request = SearchRequest {
            index: "live_".into(),
            filters: vec![
                Filter::exists("endDate"),
                Filter::range_lte("endDate", Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap()),
            ],
            sort: vec![SortField::asc("endDate"), SortField::asc("key")],
            limit: 2,
            search_after: None,
        };

        let first: Vec<_> = store.search(&request).await.expect("page 1").into_iter().map(|r| r.id).collect();
        assert_eq!(first, ["1", "2"]);

        request.search_after = Some(vec![json!("2024-03-01T10:00:00Z"), json!(2)]);
        let second: Vec<_> = store.search(&request).await.expect("page 2").into_iter().map(|r| r.id).collect();
        assert_eq!(second, ["3"]);
    }

    #[tokio::test]
    async fn the_one_where_terms_match_numbers_given_as_strings() {
        let store = seeded().await;
        let request = SearchRequest {
            index: "live_".into(),
            filters: vec![Filter::terms("partitionId", ["2"])],
            sort: vec![],
            limit: 10,
            search_after: None,
        };
        let hits = store.search(&request).await.expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "2");
    }

    #[tokio::test]
    async fn the_one_where_reindex_copies_and_leaves_the_source_alone() {
        let store = seeded().await;
        let moved = store
            .reindex_by_query("live_", "live_2024-03-01", &Filter::terms("key", ["1", "2"]))
            .await
            .expect("reindex");
        assert_eq!(moved, 2);
        assert_eq!(store.count("live_2024-03-01").await, 2);
        assert_eq!(store.count("live_").await, 4);

        // second run overwrites by id, no duplicates
        store
            .reindex_by_query("live_", "live_2024-03-01", &Filter::terms("key", ["1", "2"]))
            .await
            .expect("reindex again");
        assert_eq!(store.count("live_2024-03-01").await, 2);
    }

    #[tokio::test]
    async fn the_one_where_deleting_ghosts_is_a_no_op() {
        let store = seeded().await;
        assert_eq!(store.delete_by_query("live_", &Filter::terms("key", ["1"])).await.expect("delete"), 1);
        assert_eq!(store.delete_by_query("live_", &Filter::terms("key", ["1"])).await.expect("again"), 0);
        assert_eq!(store.delete_by_query("nowhere_", &Filter::terms("key", ["1"])).await.expect("missing index"), 0);

        let outcome = store.bulk_delete("live_", &["2".to_string(), "99".to_string()]).await.expect("bulk delete");
        assert_eq!(outcome.succeeded, 1);
        assert!(outcome.is_clean());
    }

    #[tokio::test]
    async fn the_one_where_faults_fire_exactly_as_often_as_ordered() {
        let store = seeded().await;
        store.fail_next(StoreOp::Refresh, 2).await;
        assert!(store.refresh("live_").await.unwrap_err().is_transient());
        assert!(store.refresh("live_").await.unwrap_err().is_transient());
        assert!(store.refresh("live_").await.is_ok());

        store.reject_next(StoreOp::EnsureExists, 1).await;
        assert!(!store.ensure_exists("x_").await.unwrap_err().is_transient());
        assert_eq!(store.ensure_exists("x_").await.expect("ensure"), EnsureOutcome::Created);
        assert_eq!(store.ensure_exists("x_").await.expect("ensure"), EnsureOutcome::AlreadyExisted);

        let refreshes = store
            .operation_log()
            .await
            .into_iter()
            .filter(|(op, _)| *op == StoreOp::Refresh)
            .count();
        assert_eq!(refreshes, 3);
    }

    #[tokio::test]
    async fn the_one_where_an_aimed_fault_only_hits_its_own_index() {
        let store = seeded().await;
        store.ensure_exists("other_").await.expect("other index");
        store.fail_next_for(StoreOp::Reindex, "live_->", 1).await;

        // 🎯 the other index walks past untouched, and doesn't burn the fault either
        let filter = Filter::exists("key");
        assert!(store.reindex_by_query("other_", "other_2024", &filter).await.is_ok());
        assert!(store.reindex_by_query("live_", "live_2024", &filter).await.unwrap_err().is_transient());
        assert_eq!(store.reindex_by_query("live_", "live_2024", &filter).await.expect("fault spent"), 4);
    }
}
