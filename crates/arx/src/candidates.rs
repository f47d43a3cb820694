//! 🔎 Candidate discovery — finding the process instances that are done, dusted, and old
//! enough to leave.
//!
//! 🎬 COLD OPEN — INT. LIVE INDEX — A PERFECTLY ORDINARY TUESDAY
//!
//! The finder walks the live root index in `(end date, id)` order, one page at a time,
//! remembering where it stopped with a `search_after` cursor. Each page is chopped into
//! [`ArchiveBatch`]es, one per finish bucket, and handed out lazily so the mover can delete
//! page one before page two is even fetched. The cursor never looks back, so the deletes
//! don't shuffle what comes next.
//!
//! The cut-off (`now - min_age`) is computed once per sequence. An instance that ages into
//! eligibility halfway through a cycle waits for the next one. It will cope. 🦆

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::app_config::ArchiverConfig;
use crate::backends::RecordStore;
use crate::common::{ArchiveBatch, Filter, Record, RootCandidate, SearchRequest, SortField, scalar_text};
use crate::error::{ArchiveError, StoreError};
use crate::registry::RootDescriptor;
use crate::retry::RetryPolicy;
use crate::time::{Clock, RolloverInterval, finish_bucket};

/// ⚙️ The knobs the finder cares about, lifted out of [`ArchiverConfig`].
#[derive(Debug, Clone)]
pub struct FinderOptions {
    pub min_age: chrono::Duration,
    pub reference_offset: FixedOffset,
    pub rollover_interval: RolloverInterval,
    pub retry: RetryPolicy,
}

impl FinderOptions {
    pub fn from_config(config: &ArchiverConfig) -> anyhow::Result<Self> {
        Ok(Self {
            min_age: config.min_age(),
            reference_offset: config.reference_offset()?,
            rollover_interval: config.rollover_interval,
            retry: RetryPolicy::from(config),
        })
    }
}

/// 🔎 Queries the live store for finished, unarchived roots.
#[derive(Debug, Clone)]
pub struct CandidateFinder {
    store: Arc<dyn RecordStore>,
    root: RootDescriptor,
    clock: Arc<dyn Clock>,
    options: FinderOptions,
}

impl CandidateFinder {
    pub fn new(
        store: Arc<dyn RecordStore>,
        root: RootDescriptor,
        clock: Arc<dyn Clock>,
        options: FinderOptions,
    ) -> Self {
        Self {
            store,
            root,
            clock,
            options,
        }
    }

    /// 📜 A lazy, finite sequence of batches for `partitions`, at most `batch_size` roots
    /// fetched per query. Nothing is read from the store until the first `next()`.
    pub fn next_batches(&self, partitions: &[u32], batch_size: usize) -> CandidateBatches<'_> {
        let cutoff = self.clock.now() - self.options.min_age;
        debug!(
            partitions = ?partitions,
            batch_size,
            cutoff = %cutoff,
            "🔎 Starting candidate discovery"
        );
        CandidateBatches {
            finder: self,
            partitions: partitions.to_vec(),
            batch_size: batch_size.max(1),
            cutoff,
            cursor: None,
            pending: VecDeque::new(),
            exhausted: partitions.is_empty(),
        }
    }

    fn page_request(&self, partitions: &[u32], cutoff: DateTime<Utc>, limit: usize, cursor: Option<Vec<Value>>) -> SearchRequest {
        let root = &self.root;
        SearchRequest {
            index: root.index.clone(),
            filters: vec![
                Filter::term(root.join_field.as_str(), root.join_value.as_str()),
                Filter::terms(root.partition_field.as_str(), partitions.iter().map(u32::to_string)),
                Filter::exists(root.end_date_field.as_str()),
                Filter::range_lte(root.end_date_field.as_str(), cutoff),
            ],
            sort: vec![
                SortField::asc(root.end_date_field.as_str()),
                SortField::asc(root.id_field.as_str()),
            ],
            limit,
            search_after: cursor,
        }
    }

    /// 🧾 Reads the candidate view of one root record. `None` when the end date is not a
    /// timestamp we can bucket.
    fn to_candidate(&self, record: &Record) -> Option<RootCandidate> {
        let id = record
            .field(&self.root.id_field)
            .and_then(scalar_text)
            .unwrap_or_else(|| record.id.clone());
        let end_date = record
            .field(&self.root.end_date_field)
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))?;
        let partition = record
            .field(&self.root.partition_field)
            .and_then(Value::as_u64)
            .and_then(|p| u32::try_from(p).ok());
        Some(RootCandidate {
            id,
            partition,
            end_date,
        })
    }

    /// ⏭️ The sort values of `record`, in the order the page request sorts by.
    fn cursor_of(&self, record: &Record) -> Vec<Value> {
        vec![
            record.field(&self.root.end_date_field).cloned().unwrap_or(Value::Null),
            record
                .field(&self.root.id_field)
                .cloned()
                .unwrap_or_else(|| Value::String(record.id.clone())),
        ]
    }

    /// 📅 Consecutive candidates sharing a finish bucket become one batch. The page is
    /// sorted by end date, so "consecutive" and "same bucket" mean the same thing.
    fn group(&self, candidates: Vec<RootCandidate>) -> Vec<ArchiveBatch> {
        let mut batches: Vec<ArchiveBatch> = Vec::new();
        for candidate in candidates {
            let finish_date = finish_bucket(
                candidate.end_date,
                self.options.reference_offset,
                self.options.rollover_interval,
            );
            match batches.last_mut() {
                Some(batch) if batch.finish_date == finish_date => batch.ids.push(candidate.id),
                _ => batches.push(ArchiveBatch {
                    finish_date,
                    ids: vec![candidate.id],
                }),
            }
        }
        batches
    }
}

/// 📜 The lazy batch sequence returned by [`CandidateFinder::next_batches`].
#[derive(Debug)]
pub struct CandidateBatches<'a> {
    finder: &'a CandidateFinder,
    partitions: Vec<u32>,
    batch_size: usize,
    cutoff: DateTime<Utc>,
    cursor: Option<Vec<Value>>,
    pending: VecDeque<ArchiveBatch>,
    exhausted: bool,
}

impl CandidateBatches<'_> {
    /// ⏭️ The next batch, or `None` once a page came back short or empty.
    pub async fn next(&mut self) -> Result<Option<ArchiveBatch>, ArchiveError> {
        loop {
            if let Some(batch) = self.pending.pop_front() {
                return Ok(Some(batch));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }

    async fn fetch_page(&mut self) -> Result<(), ArchiveError> {
        let finder = self.finder;
        let request = finder.page_request(&self.partitions, self.cutoff, self.batch_size, self.cursor.clone());
        let store = finder.store.as_ref();
        let result = finder
            .options
            .retry
            .run("candidate search", || store.search(&request))
            .await;

        let page = match result {
            Ok(page) => page,
            Err(StoreError::Rejected { status: 404, .. }) => {
                debug!("🏜️ Root index '{}' does not exist yet. Nothing to archive, nothing to do.", request.index);
                Vec::new()
            }
            Err(err) => {
                // 💀 Leave the sequence exhausted so a caller that ignores the error doesn't spin.
                self.exhausted = true;
                return Err(ArchiveError::Discovery(err));
            }
        };

        if page.len() < self.batch_size {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.cursor = Some(finder.cursor_of(last));
        }

        let candidates: Vec<RootCandidate> = page
            .iter()
            .filter_map(|record| {
                let candidate = finder.to_candidate(record);
                if candidate.is_none() {
                    warn!(
                        id = %record.id,
                        index = %record.index,
                        "🤷 Root record has an end date we can't read as a timestamp, skipping it"
                    );
                }
                candidate
            })
            .collect();
        trace!(fetched = page.len(), usable = candidates.len(), "📄 Candidate page fetched");
        self.pending.extend(finder.group(candidates));
        Ok(())
    }

    /// 🧺 Drains the whole sequence. Handy for tests and dry runs; the job prefers `next()`.
    pub async fn collect_all(mut self) -> Result<Vec<ArchiveBatch>, ArchiveError> {
        let mut batches = Vec::new();
        while let Some(batch) = self.next().await? {
            batches.push(batch);
        }
        Ok(batches)
    }
}
