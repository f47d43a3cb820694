//! 🚚 The batch mover — copy everything, check everything, then (and only then) delete.
//!
//! 🎬 COLD OPEN — INT. LIVE INDEX — ONE BATCH, SEVEN COLLECTIONS, ZERO TRANSACTIONS
//!
//! There is no lock. There is no rollback. There is only the order of operations:
//!
//! 1. resolve the dated destination of the root index and make sure it exists,
//! 2. copy the root records (and anything co-located with them) into it, and check they all made it,
//! 3. copy every registered dependent type, in registry order, into its own dated destination,
//! 4. refresh the destinations so the copies are visible,
//! 5. delete the originals: dependents first, roots last.
//!
//! Nothing is deleted until every copy has landed. The one carve-out: an orphan-tolerant
//! dependent type whose live index does not exist has nothing to copy, so it is skipped.
//! Any other copy failure, for any type, stops the batch before the first delete.
//! Roots are deleted last because the root
//! is what discovery looks for: as long as it is still live, the next cycle finds the batch
//! again and finishes the cleanup. Copies overwrite by id, deletes of missing ids are no-ops,
//! so replaying a batch from any point converges to the same end state. 🦆

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backends::RecordStore;
use crate::common::{ArchiveBatch, Filter, SearchRequest};
use crate::destination::DestinationNamer;
use crate::error::{ArchiveError, StoreError};
use crate::metrics::ArchiverMetrics;
use crate::registry::{DependentDescriptor, RootDescriptor};
use crate::retry::RetryPolicy;

/// 🚚 Moves one [`ArchiveBatch`] from the live indices into its dated destinations.
#[derive(Debug, Clone)]
pub struct BatchMover {
    store: Arc<dyn RecordStore>,
    namer: DestinationNamer,
    root: RootDescriptor,
    dependents: Vec<DependentDescriptor>,
    retry: RetryPolicy,
    metrics: Arc<ArchiverMetrics>,
}

/// 🗑️ One live collection scheduled for cleanup once every copy has landed.
#[derive(Debug)]
struct CopiedCollection {
    source_index: String,
    destination: String,
    filter: Filter,
}

impl BatchMover {
    pub fn new(
        store: Arc<dyn RecordStore>,
        namer: DestinationNamer,
        root: RootDescriptor,
        dependents: Vec<DependentDescriptor>,
        retry: RetryPolicy,
        metrics: Arc<ArchiverMetrics>,
    ) -> Self {
        Self {
            store,
            namer: namer.with_retry(retry),
            root,
            dependents,
            retry,
            metrics,
        }
    }

    /// 🏷️ The date suffix `batch` lands under, formatted exactly as the destination names are.
    pub fn destination_suffix(&self, batch: &ArchiveBatch) -> String {
        self.namer.format_date(batch.finish_date)
    }

    /// 🚀 Moves `batch` and returns how many root ids it processed.
    ///
    /// Fails with [`ArchiveError::Reindex`] / [`ArchiveError::IncompleteCopy`] before anything
    /// was deleted, or with [`ArchiveError::Persistence`] when a delete gave up after the
    /// copies already landed.
    pub async fn move_batch(&self, batch: &ArchiveBatch) -> Result<u64, ArchiveError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let finish_date = Some(batch.finish_date);
        let root_destination = self.namer.resolve(&self.root.index, finish_date);
        info!(
            finish_date = %self.destination_suffix(batch),
            ids = batch.len(),
            destination = %root_destination,
            "🚚 Moving archive batch"
        );

        // 📋 Copy phase, root first.
        let root_copy = CopiedCollection {
            source_index: self.root.index.clone(),
            destination: root_destination,
            filter: Filter::terms(self.root.link_field.as_str(), batch.ids.iter().cloned()),
        };
        let moved = self
            .copy(&root_copy)
            .await
            .inspect_err(|_| self.metrics.record_reindex_failure())?;
        // 🔢 The reindex count includes co-located records and skips roots an earlier attempt
        // already moved, so ask the destination directly whether every root is there.
        let expected = batch.len() as u64;
        let archived = self.count_archived_roots(&root_copy.destination, &batch.ids).await?;
        if archived < expected {
            self.metrics.record_reindex_failure();
            return Err(ArchiveError::IncompleteCopy {
                source_index: root_copy.source_index,
                destination: root_copy.destination,
                expected,
                moved: archived,
            });
        }
        debug!(moved, archived, "📋 Root records copied and accounted for");

        let mut copied = vec![root_copy];
        for dependent in self.dependents.iter().filter(|d| d.needs_separate_move()) {
            let collection = CopiedCollection {
                source_index: dependent.index.clone(),
                destination: self.namer.resolve(&dependent.index, finish_date),
                filter: Filter::terms(dependent.foreign_key.as_str(), batch.ids.iter().cloned()),
            };
            match self.copy(&collection).await {
                Ok(count) => {
                    debug!(dependent = %dependent.name, count, destination = %collection.destination, "📋 Dependent records copied");
                    copied.push(collection);
                }
                Err(err) if dependent.orphan_tolerant && source_index_missing(&err) => {
                    self.metrics.record_orphan_tolerant_skip();
                    warn!(
                        dependent = %dependent.name,
                        index = %dependent.index,
                        "🍂 Orphan-tolerant dependent type has no live index. Nothing to copy, nothing to delete."
                    );
                }
                Err(err) => {
                    self.metrics.record_reindex_failure();
                    return Err(err);
                }
            }
        }

        // 👀 Make every copy visible before trusting it enough to delete the originals.
        for collection in &copied {
            let store = self.store.as_ref();
            let destination = collection.destination.as_str();
            self.retry
                .run("refresh destination", || store.refresh(destination))
                .await
                .map_err(|source| ArchiveError::Destination {
                    destination: destination.to_string(),
                    source,
                })?;
        }

        // 🗑️ Delete phase, reverse copy order so the root goes last.
        for collection in copied.iter().rev() {
            let store = self.store.as_ref();
            let deleted = self
                .retry
                .run("delete archived originals", || {
                    store.delete_by_query(&collection.source_index, &collection.filter)
                })
                .await
                .map_err(|source| {
                    self.metrics.record_cleanup_debt();
                    warn!(
                        index = %collection.source_index,
                        error = %source,
                        "🧹 Copies are safe but the originals refused to leave. Cleanup debt, the next cycle will collect."
                    );
                    ArchiveError::Persistence {
                        index: collection.source_index.clone(),
                        source,
                    }
                })?;
            debug!(index = %collection.source_index, deleted, "🗑️ Archived originals deleted");
        }

        Ok(expected)
    }

    /// 🔢 How many of `ids` exist as root records in `destination`.
    async fn count_archived_roots(&self, destination: &str, ids: &[String]) -> Result<u64, ArchiveError> {
        let request = SearchRequest {
            index: destination.to_string(),
            filters: vec![
                Filter::term(self.root.join_field.as_str(), self.root.join_value.as_str()),
                Filter::terms(self.root.id_field.as_str(), ids.iter().cloned()),
            ],
            sort: Vec::new(),
            limit: ids.len(),
            search_after: None,
        };
        let store = self.store.as_ref();
        let found = self
            .retry
            .run("verify archived roots", || store.search(&request))
            .await
            .map_err(|source| ArchiveError::Reindex {
                source_index: self.root.index.clone(),
                destination: destination.to_string(),
                source,
            })?;
        Ok(found.len() as u64)
    }

    /// 📋 Ensures the destination, then reindexes into it.
    async fn copy(&self, collection: &CopiedCollection) -> Result<u64, ArchiveError> {
        self.namer
            .ensure(self.store.as_ref(), &collection.destination)
            .await?;
        let store = self.store.as_ref();
        self.retry
            .run("reindex", || {
                store.reindex_by_query(&collection.source_index, &collection.destination, &collection.filter)
            })
            .await
            .map_err(|source| ArchiveError::Reindex {
                source_index: collection.source_index.clone(),
                destination: collection.destination.clone(),
                source,
            })
    }
}

/// 🔍 The copy was refused because the source index isn't there at all.
fn source_index_missing(err: &ArchiveError) -> bool {
    matches!(
        err,
        ArchiveError::Reindex {
            source: StoreError::Rejected { status: 404, .. },
            ..
        }
    )
}
