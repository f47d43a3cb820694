//! 🏷️ Destination naming — turning "operate-variable_" and a date into a place to live.
//!
//! `resolve` is pure: same base, same date, same name, forever. `ensure` makes sure the
//! named index physically exists before anything is written to it, remembers that it
//! did so for the rest of the process lifetime, and treats "somebody beat me to it" as
//! a perfectly happy ending. 🦆

use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use chrono::format::{Item, StrftimeItems};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::backends::RecordStore;
use crate::common::EnsureOutcome;
use crate::error::ArchiveError;
use crate::retry::RetryPolicy;

/// 🏷️ Maps (base index, finish date) to a concrete destination and creates it lazily.
#[derive(Debug, Clone)]
pub struct DestinationNamer {
    date_format: String,
    known: Arc<Mutex<HashSet<String>>>,
    retry: RetryPolicy,
}

impl DestinationNamer {
    /// 🔧 `date_format` is a chrono strftime pattern, e.g. `%Y-%m-%d`.
    pub fn new(date_format: impl Into<String>) -> Result<Self, String> {
        let date_format = date_format.into();
        validate_date_format(&date_format)?;
        Ok(Self {
            date_format,
            known: Arc::new(Mutex::new(HashSet::new())),
            retry: RetryPolicy {
                retry_count: 0,
                ..RetryPolicy::default()
            },
        })
    }

    /// 🔄 Retry policy for the create call. The default is one attempt, no retries.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// 📅 The suffix a finish date contributes to every destination name.
    pub fn format_date(&self, finish_date: NaiveDate) -> String {
        finish_date.format(&self.date_format).to_string()
    }

    /// 🏷️ `base + formatted date`, or just `base` when there is no date (the current bucket).
    pub fn resolve(&self, base: &str, finish_date: Option<NaiveDate>) -> String {
        match finish_date {
            Some(date) => format!("{}{}", base, self.format_date(date)),
            None => base.to_string(),
        }
    }

    /// 🏗️ Creates `destination` in the store unless this process already saw it exist.
    ///
    /// Concurrent callers may both reach the store; the store's idempotent create makes
    /// the loser report [`EnsureOutcome::AlreadyExisted`], which is success here.
    pub async fn ensure(&self, store: &dyn RecordStore, destination: &str) -> Result<(), ArchiveError> {
        if self.known.lock().await.contains(destination) {
            return Ok(());
        }
        let outcome = self
            .retry
            .run("ensure destination", || store.ensure_exists(destination))
            .await
            .map_err(|source| ArchiveError::Destination {
                destination: destination.to_string(),
                source,
            })?;
        match outcome {
            EnsureOutcome::Created => info!("🏗️ Created archive destination '{}'", destination),
            EnsureOutcome::AlreadyExisted => debug!("🏠 Archive destination '{}' already exists", destination),
        }
        self.known.lock().await.insert(destination.to_string());
        Ok(())
    }
}

fn validate_date_format(pattern: &str) -> Result<(), String> {
    if pattern.is_empty() {
        return Err("rollover date format must not be empty".to_string());
    }
    if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
        return Err(format!("'{pattern}' is not a valid strftime pattern"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{InMemoryStore, StoreOp};

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn the_one_where_dates_become_suffixes_and_no_date_means_home() {
        let namer = DestinationNamer::new("%Y-%m-%d").expect("valid pattern");
        assert_eq!(namer.resolve("operate-variable_", Some(day(2024, 3, 1))), "operate-variable_2024-03-01");
        assert_eq!(namer.resolve("operate-variable_", None), "operate-variable_");
    }

    #[test]
    fn the_one_where_week_patterns_are_welcome_too() {
        let namer = DestinationNamer::new("%G-W%V").expect("valid pattern");
        assert_eq!(namer.resolve("base-", Some(day(2024, 3, 4))), "base-2024-W10");
    }

    #[test]
    fn the_one_where_garbage_patterns_are_turned_away_at_the_door() {
        assert!(DestinationNamer::new("%Y-%").is_err());
        assert!(DestinationNamer::new("").is_err());
    }

    #[tokio::test]
    async fn the_one_where_ensure_only_bothers_the_store_once_per_destination() {
        let store = InMemoryStore::new();
        let namer = DestinationNamer::new("%Y-%m-%d").expect("valid pattern");
        namer.ensure(&store, "live_2024-03-01").await.expect("first");
        namer.ensure(&store, "live_2024-03-01").await.expect("second");
        let ensures = store
            .operation_log()
            .await
            .into_iter()
            .filter(|(op, _)| *op == StoreOp::EnsureExists)
            .count();
        assert_eq!(ensures, 1);
    }

    #[tokio::test]
    async fn the_one_where_two_namers_racing_for_one_index_both_go_home_happy() {
        let store = InMemoryStore::new();
        let a = DestinationNamer::new("%Y-%m-%d").expect("valid pattern");
        let b = DestinationNamer::new("%Y-%m-%d").expect("valid pattern");
        let (ra, rb) = tokio::join!(a.ensure(&store, "live_2024-03-01"), b.ensure(&store, "live_2024-03-01"));
        assert!(ra.is_ok());
        assert!(rb.is_ok());
        assert_eq!(store.count("live_2024-03-01").await, 0);
        assert!(store.index_names().await.contains(&"live_2024-03-01".to_string()));
    }

    #[tokio::test]
    async fn the_one_where_a_failed_create_is_not_remembered_as_done() {
        let store = InMemoryStore::new();
        let namer = DestinationNamer::new("%Y-%m-%d").expect("valid pattern");
        store.fail_next(StoreOp::EnsureExists, 1).await;
        let err = namer.ensure(&store, "live_2024-03-01").await.expect_err("injected");
        assert!(matches!(err, ArchiveError::Destination { .. }));
        assert!(err.is_transient());
        namer.ensure(&store, "live_2024-03-01").await.expect("retry succeeds");
    }

    #[tokio::test]
    async fn the_one_where_a_patient_namer_rides_out_a_blip() {
        let store = InMemoryStore::new();
        let namer = DestinationNamer::new("%Y-%m-%d")
            .expect("valid pattern")
            .with_retry(RetryPolicy {
                retry_count: 2,
                backoff_base: std::time::Duration::from_millis(1),
                backoff_max: std::time::Duration::from_millis(1),
                request_timeout: std::time::Duration::from_secs(5),
            });
        store.fail_next(StoreOp::EnsureExists, 2).await;
        namer.ensure(&store, "live_2024-03-01").await.expect("third attempt lands");
    }
}
