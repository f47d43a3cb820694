//! 🔌 Backends — where the real I/O happens.
//!
//! 🧊 The archiver never talks to a cluster directly. It talks to a [`RecordStore`],
//! and the store talks to whatever is on the other end: an Elasticsearch cluster
//! having its best day, or a `BTreeMap` in RAM that has never had a bad day in its life.
//!
//! 🎭 This module is the casting agency. The [`StoreBackend`] enum dispatches to the
//! concrete store, so the mover, the finder and the job never need to know (or care)
//! where the documents physically live.
//!
//! 🦆 The duck is here because every file must have one. This is law.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use crate::app_config::StoreConfig;
use crate::common::{BulkOutcome, EnsureOutcome, Filter, Record, SearchRequest};
use crate::error::StoreError;

pub mod elasticsearch;
pub mod in_mem;

pub use elasticsearch::{ElasticsearchStore, ElasticsearchStoreConfig};
pub use in_mem::{InMemoryStore, StoreOp};

/// 🗄️ The storage backend as the archiver sees it.
///
/// # Contract
/// - Every call is a blocking network round trip from the caller's point of view.
/// - `reindex_by_query` copies, it never moves. The source is untouched.
/// - Copies and writes are idempotent by document id: same id, same destination slot.
/// - Deleting ids that are already gone is a no-op, not an error.
/// - `ensure_exists` treats "somebody else created it first" as [`EnsureOutcome::AlreadyExisted`].
#[async_trait]
pub trait RecordStore: Send + Sync + std::fmt::Debug {
    /// 🔎 Filtered, sorted, capped read.
    async fn search(&self, request: &SearchRequest) -> Result<Vec<Record>, StoreError>;

    /// 📥 Upserts `records` into `index` by id. The archiver itself only copies with
    /// `reindex_by_query`; this is for seeding and for callers writing live data.
    async fn bulk_write(&self, index: &str, records: &[Record]) -> Result<BulkOutcome, StoreError>;

    /// 📋 Copies every document of `source` matching `filter` into `destination`.
    /// Returns how many documents were created or overwritten.
    async fn reindex_by_query(
        &self,
        source: &str,
        destination: &str,
        filter: &Filter,
    ) -> Result<u64, StoreError>;

    /// 🗑️ Deletes every document of `index` matching `filter`. Returns the deleted count.
    async fn delete_by_query(&self, index: &str, filter: &Filter) -> Result<u64, StoreError>;

    /// 🗑️ Deletes documents of `index` by id. The mover deletes with `delete_by_query`
    /// so co-located records go with their root; this is the by-id variant for other callers.
    async fn bulk_delete(&self, index: &str, ids: &[String]) -> Result<BulkOutcome, StoreError>;

    /// 🏗️ Creates `index` unless it is already there.
    async fn ensure_exists(&self, index: &str) -> Result<EnsureOutcome, StoreError>;

    /// 👀 Makes recent writes to `index` visible to search.
    async fn refresh(&self, index: &str) -> Result<(), StoreError>;
}

/// 🎭 The many faces of a RecordStore.
#[derive(Debug, Clone)]
pub enum StoreBackend {
    InMemory(InMemoryStore),
    Elasticsearch(ElasticsearchStore),
}

impl StoreBackend {
    /// 🚀 Builds the configured backend. The Elasticsearch flavour pings the cluster
    /// on the way in, so a wrong URL fails here and not three batches deep.
    pub async fn from_config(config: &StoreConfig) -> Result<Self> {
        match config {
            StoreConfig::InMemory => {
                info!("🧠 Using the in-memory record store. Nothing survives a restart. Nothing ever does.");
                Ok(StoreBackend::InMemory(InMemoryStore::new()))
            }
            StoreConfig::Elasticsearch(es_config) => {
                let store = ElasticsearchStore::new(es_config.clone())
                    .await
                    .context("💀 Could not stand up the Elasticsearch record store. The cluster did not pick up the phone.")?;
                Ok(StoreBackend::Elasticsearch(store))
            }
        }
    }
}

#[async_trait]
impl RecordStore for StoreBackend {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<Record>, StoreError> {
        match self {
            StoreBackend::InMemory(s) => s.search(request).await,
            StoreBackend::Elasticsearch(s) => s.search(request).await,
        }
    }

    async fn bulk_write(&self, index: &str, records: &[Record]) -> Result<BulkOutcome, StoreError> {
        match self {
            StoreBackend::InMemory(s) => s.bulk_write(index, records).await,
            StoreBackend::Elasticsearch(s) => s.bulk_write(index, records).await,
        }
    }

    async fn reindex_by_query(
        &self,
        source: &str,
        destination: &str,
        filter: &Filter,
    ) -> Result<u64, StoreError> {
        match self {
            StoreBackend::InMemory(s) => s.reindex_by_query(source, destination, filter).await,
            StoreBackend::Elasticsearch(s) => s.reindex_by_query(source, destination, filter).await,
        }
    }

    async fn delete_by_query(&self, index: &str, filter: &Filter) -> Result<u64, StoreError> {
        match self {
            StoreBackend::InMemory(s) => s.delete_by_query(index, filter).await,
            StoreBackend::Elasticsearch(s) => s.delete_by_query(index, filter).await,
        }
    }

    async fn bulk_delete(&self, index: &str, ids: &[String]) -> Result<BulkOutcome, StoreError> {
        match self {
            StoreBackend::InMemory(s) => s.bulk_delete(index, ids).await,
            StoreBackend::Elasticsearch(s) => s.bulk_delete(index, ids).await,
        }
    }

    async fn ensure_exists(&self, index: &str) -> Result<EnsureOutcome, StoreError> {
        match self {
            StoreBackend::InMemory(s) => s.ensure_exists(index).await,
            StoreBackend::Elasticsearch(s) => s.ensure_exists(index).await,
        }
    }

    async fn refresh(&self, index: &str) -> Result<(), StoreError> {
        match self {
            StoreBackend::InMemory(s) => s.refresh(index).await,
            StoreBackend::Elasticsearch(s) => s.refresh(index).await,
        }
    }
}
