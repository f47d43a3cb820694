//! 💀 Errors — the full taxonomy of everything that can go sideways between a hot
//! index and a cold one.
//!
//! 🧠 Knowledge graph:
//! - [`StoreError`]: what a [`crate::backends::RecordStore`] call returns when the cluster
//!   is having a day. `is_transient()` decides whether the mover retries it.
//! - [`ArchiveError`]: what a single batch move fails with, tagged by phase
//!   (discovery, destination, copy, delete).
//! - [`CycleFailure`]: what an archive cycle reports when a batch gave up after retries.
//!   Carries the batch's finish date and id count so the log line actually helps.
//!
//! The app edges (config, CLI, scheduler wiring) stay on `anyhow`, like the rest of the
//! kingdom. These typed ones exist because the retry loop needs to ask "is this worth
//! trying again?" and `anyhow` only ever answers "something happened". 🦆

use thiserror::Error;

/// 📡 Failures coming back from the storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// 🔄 Network blip, timeout, 429, 5xx. The cluster said "not now", not "never".
    #[error("transient store error: {0}")]
    Transient(String),

    /// 🚫 The backend looked at the request and said no. Retrying will not change its mind.
    #[error("store rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// 🧩 The response arrived but did not look like anything we know how to read.
    #[error("malformed store response: {0}")]
    Malformed(String),

    /// 📦 A bulk-style request partially failed. One entry per failed item.
    #[error("{} item(s) failed: {}", .0.len(), .0.join("; "))]
    ItemFailures(Vec<String>),
}

impl StoreError {
    /// 🔄 Worth another attempt?
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// 🧊 Failures while moving one archive batch.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to discover archive candidates")]
    Discovery(#[source] StoreError),

    #[error("failed to prepare destination '{destination}'")]
    Destination {
        destination: String,
        #[source]
        source: StoreError,
    },

    /// 📋 Copy phase. Nothing was deleted yet when this fires.
    #[error("failed to reindex '{source_index}' into '{destination}'")]
    Reindex {
        source_index: String,
        destination: String,
        #[source]
        source: StoreError,
    },

    /// 🗑️ Delete phase. The data is already safe in the destination, the live copy just
    /// refuses to leave. Cleanup debt, not data loss.
    #[error("failed to delete archived records from '{index}'")]
    Persistence {
        index: String,
        #[source]
        source: StoreError,
    },

    /// 🔢 The copy "succeeded" but the destination holds fewer roots than the batch asked for.
    #[error("only {moved} of {expected} root(s) from '{source_index}' are present in '{destination}'")]
    IncompleteCopy {
        source_index: String,
        destination: String,
        expected: u64,
        moved: u64,
    },
}

impl ArchiveError {
    /// 🔄 Transient if the underlying store error was. Phase-level errors without a
    /// store error behind them (incomplete copies) are not retried.
    pub fn is_transient(&self) -> bool {
        match self {
            ArchiveError::Discovery(source)
            | ArchiveError::Destination { source, .. }
            | ArchiveError::Reindex { source, .. }
            | ArchiveError::Persistence { source, .. } => source.is_transient(),
            ArchiveError::IncompleteCopy { .. } => false,
        }
    }
}

/// 💀 A cycle aborted because one batch could not be moved. Earlier batches stay moved.
#[derive(Debug, Error)]
#[error("archive cycle aborted at batch '{finish_date}' ({id_count} id(s)) after archiving {archived_before_failure}")]
pub struct CycleFailure {
    /// 📅 Date suffix of the failed batch, formatted like its destination names (empty for discovery failures).
    pub finish_date: String,
    pub id_count: usize,
    pub archived_before_failure: u64,
    #[source]
    pub source: ArchiveError,
}
