//! 🧊 The archiver job — one archive cycle, start to finish.
//!
//! 🎬 *[narrator voice]* "Every cycle begins the same way. Idle. Hopeful. Naive."
//!
//! ```text
//!   IDLE ──▶ FETCHING ──▶ MOVING ──▶ SUCCESS ──▶ IDLE
//!               ▲  │         │
//!               └──┘         └────▶ FAILED ───▶ IDLE
//! ```
//!
//! The job asks the finder for batches, hands them to the mover one at a time, and adds up
//! what moved. One batch failing ends the cycle. Batches that already moved stay moved;
//! the failed batch's roots are still live, so the next cycle picks them up again. No
//! rollback, no regrets. 🦆

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::app_config::AppConfig;
use crate::backends::RecordStore;
use crate::candidates::{CandidateFinder, FinderOptions};
use crate::destination::DestinationNamer;
use crate::error::CycleFailure;
use crate::metrics::ArchiverMetrics;
use crate::mover::BatchMover;
use crate::partitions::{PartitionHolder, StaticPartitionHolder};
use crate::retry::RetryPolicy;
use crate::time::Clock;

/// 🚦 Where the job is right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Fetching,
    Moving,
    Success,
    Failed,
}

/// 🧊 Runs archive cycles. One cycle at a time; batches strictly in sequence.
#[derive(Debug)]
pub struct ArchiverJob {
    partitions: Arc<dyn PartitionHolder>,
    finder: CandidateFinder,
    mover: BatchMover,
    batch_size: usize,
    metrics: Arc<ArchiverMetrics>,
    state: watch::Sender<JobState>,
}

impl ArchiverJob {
    pub fn new(
        partitions: Arc<dyn PartitionHolder>,
        finder: CandidateFinder,
        mover: BatchMover,
        batch_size: usize,
        metrics: Arc<ArchiverMetrics>,
    ) -> Self {
        let (state, _) = watch::channel(JobState::Idle);
        Self {
            partitions,
            finder,
            mover,
            batch_size,
            metrics,
            state,
        }
    }

    /// 🏗️ Wires finder, mover and partitions out of the app config. Explicit construction,
    /// no container, no beans.
    pub fn from_config(
        app_config: &AppConfig,
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        metrics: Arc<ArchiverMetrics>,
    ) -> anyhow::Result<Self> {
        let archiver = &app_config.archiver;
        let namer = DestinationNamer::new(archiver.rollover_date_format.clone())
            .map_err(|reason| anyhow::anyhow!("💀 archiver.rollover_date_format: {reason}"))?;
        let finder = CandidateFinder::new(
            store.clone(),
            app_config.root.clone(),
            clock,
            FinderOptions::from_config(archiver)?,
        );
        let mover = BatchMover::new(
            store,
            namer,
            app_config.root.clone(),
            app_config.dependents.clone(),
            RetryPolicy::from(archiver),
            metrics.clone(),
        );
        let partitions = Arc::new(StaticPartitionHolder::from(&app_config.partitions));
        Ok(Self::new(partitions, finder, mover, archiver.batch_size, metrics))
    }

    pub fn state(&self) -> JobState {
        *self.state.borrow()
    }

    /// 👀 Watch state transitions as they happen.
    pub fn subscribe(&self) -> watch::Receiver<JobState> {
        self.state.subscribe()
    }

    pub fn metrics(&self) -> &Arc<ArchiverMetrics> {
        &self.metrics
    }

    /// 🚀 One full cycle. Returns how many root instances were archived.
    pub async fn run_cycle(&self) -> Result<u64, CycleFailure> {
        self.state.send_replace(JobState::Fetching);
        let partitions = self.partitions.partition_ids();
        if partitions.is_empty() {
            warn!("🤷 This archiver owns no partitions right now. Skipping the cycle.");
            self.metrics.record_cycle();
            self.state.send_replace(JobState::Idle);
            return Ok(0);
        }
        info!(partitions = ?partitions, batch_size = self.batch_size, "🧊 Archive cycle starting");

        let mut batches = self.finder.next_batches(&partitions, self.batch_size);
        let mut archived = 0u64;
        loop {
            self.state.send_replace(JobState::Fetching);
            let batch = match batches.next().await {
                Ok(Some(batch)) => batch,
                Ok(None) => break,
                Err(source) => {
                    return Err(self.fail(CycleFailure {
                        finish_date: String::new(),
                        id_count: 0,
                        archived_before_failure: archived,
                        source,
                    }));
                }
            };

            self.state.send_replace(JobState::Moving);
            match self.mover.move_batch(&batch).await {
                Ok(count) => {
                    archived += count;
                    debug!(finish_date = %self.mover.destination_suffix(&batch), count, archived, "✅ Batch archived");
                }
                Err(source) => {
                    return Err(self.fail(CycleFailure {
                        finish_date: self.mover.destination_suffix(&batch),
                        id_count: batch.len(),
                        archived_before_failure: archived,
                        source,
                    }));
                }
            }
        }

        self.state.send_replace(JobState::Success);
        self.metrics.record_archived(archived);
        self.metrics.record_cycle();
        if archived == 0 {
            debug!("💤 Archive cycle found nothing old enough to move");
        } else {
            info!(archived, "✅ Archive cycle finished");
        }
        self.state.send_replace(JobState::Idle);
        Ok(archived)
    }

    /// 💀 Books a failed cycle: partial progress still counts, the failure gets logged with
    /// enough detail to find the batch again.
    fn fail(&self, failure: CycleFailure) -> CycleFailure {
        self.state.send_replace(JobState::Failed);
        self.metrics.record_archived(failure.archived_before_failure);
        self.metrics.record_cycle();
        self.metrics.record_cycle_failure();
        error!(
            finish_date = %failure.finish_date,
            id_count = failure.id_count,
            archived_before_failure = failure.archived_before_failure,
            transient = failure.source.is_transient(),
            error = %failure.source,
            "💀 Archive cycle aborted. Remaining batches wait for the next cycle."
        );
        self.state.send_replace(JobState::Idle);
        failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{InMemoryStore, StoreOp};
    use crate::common::Record;
    use crate::error::ArchiveError;
    use crate::registry::{DependentDescriptor, RootDescriptor};
    use crate::time::{ManualClock, RolloverInterval};
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;

    const LIVE: &str = "operate-list-view_";
    const VARIABLES: &str = "operate-variable_";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).single().expect("valid timestamp")
    }

    fn job_over(store: &InMemoryStore, partitions: Vec<u32>) -> ArchiverJob {
        let mut app_config = AppConfig::default();
        app_config.archiver.retry_count = 1;
        app_config.archiver.backoff_base_ms = 1;
        app_config.archiver.backoff_max_ms = 1;
        app_config.partitions.ids = partitions;
        app_config.dependents = vec![DependentDescriptor::new("variable", VARIABLES)];
        ArchiverJob::from_config(
            &app_config,
            Arc::new(store.clone()),
            Arc::new(ManualClock::new(now())),
            Arc::new(ArchiverMetrics::new()),
        )
        .expect("job wiring")
    }

    fn root_record(key: u64, end: &str) -> Record {
        Record::new(
            LIVE,
            key.to_string(),
            json!({"key": key, "workflowInstanceKey": key, "partitionId": 1, "joinRelation": "workflowInstance", "endDate": end}),
        )
    }

    async fn seed_instance(store: &InMemoryStore, key: u64, end: &str) {
        store.bulk_write(LIVE, &[root_record(key, end)]).await.expect("seed root");
        store
            .bulk_write(
                VARIABLES,
                &[Record::new(VARIABLES, format!("var-{key}"), json!({"workflowInstanceKey": key}))],
            )
            .await
            .expect("seed variable");
    }

    #[tokio::test]
    async fn the_one_where_a_cycle_moves_two_days_and_counts_them_all() {
        let store = InMemoryStore::new();
        seed_instance(&store, 1, "2024-03-01T10:00:00Z").await;
        seed_instance(&store, 2, "2024-03-01T11:00:00Z").await;
        seed_instance(&store, 3, "2024-03-02T10:00:00Z").await;
        let job = job_over(&store, vec![1]);

        assert_eq!(job.run_cycle().await.expect("cycle"), 3);
        assert_eq!(store.count("operate-list-view_2024-03-01").await, 2);
        assert_eq!(store.count("operate-list-view_2024-03-02").await, 1);
        assert_eq!(store.count(VARIABLES).await, 0);
        assert_eq!(job.state(), JobState::Idle);

        // 💤 nothing left to do
        assert_eq!(job.run_cycle().await.expect("empty cycle"), 0);
        let snapshot = job.metrics().snapshot();
        assert_eq!(snapshot.archived_instances, 3);
        assert_eq!(snapshot.cycles, 2);
    }

    #[tokio::test]
    async fn the_one_where_the_second_batch_fails_and_the_first_stays_archived() {
        let store = InMemoryStore::new();
        seed_instance(&store, 1, "2024-03-01T10:00:00Z").await;
        seed_instance(&store, 2, "2024-03-02T10:00:00Z").await;
        seed_instance(&store, 3, "2024-03-03T10:00:00Z").await;
        // 🧨 instance 2 points its link field somewhere else, so its root copy comes up empty
        let mut broken = root_record(2, "2024-03-02T10:00:00Z");
        broken.source["workflowInstanceKey"] = json!(999);
        store.bulk_write(LIVE, &[broken]).await.expect("break instance 2");
        let job = job_over(&store, vec![1]);
        let states = job.subscribe();

        let failure = job.run_cycle().await.expect_err("day two cannot be copied");
        assert_eq!(failure.finish_date, "2024-03-02");
        assert_eq!(failure.id_count, 1);
        assert_eq!(failure.archived_before_failure, 1);
        assert!(matches!(failure.source, ArchiveError::IncompleteCopy { expected: 1, moved: 0, .. }));
        assert_eq!(*states.borrow(), JobState::Idle);

        // ✅ day one is archived, day two untouched, day three never reached
        assert!(store.get("operate-list-view_2024-03-01", "1").await.is_some());
        assert!(store.get(LIVE, "1").await.is_none());
        assert!(store.get(LIVE, "2").await.is_some());
        assert!(store.get(VARIABLES, "var-2").await.is_some());
        assert!(store.get(LIVE, "3").await.is_some());

        // 🔁 once instance 2 is repaired the next cycle picks up where this one stopped
        store
            .bulk_write(LIVE, &[root_record(2, "2024-03-02T10:00:00Z")])
            .await
            .expect("repair instance 2");
        assert_eq!(job.run_cycle().await.expect("recovery cycle"), 2);
        assert_eq!(store.count(LIVE).await, 0);
        let snapshot = job.metrics().snapshot();
        assert_eq!(snapshot.cycles, 2);
        assert_eq!(snapshot.cycle_failures, 1);
        assert_eq!(snapshot.reindex_failures, 1);
        assert_eq!(snapshot.archived_instances, 3);
    }

    #[tokio::test]
    async fn the_one_where_no_partitions_means_a_quiet_cycle() {
        let store = InMemoryStore::new();
        seed_instance(&store, 1, "2024-03-01T10:00:00Z").await;
        let job = job_over(&store, vec![]);
        assert_eq!(job.run_cycle().await.expect("skipped"), 0);
        assert!(store.get(LIVE, "1").await.is_some());
        assert_eq!(job.metrics().snapshot().cycles, 1);
    }

    #[tokio::test]
    async fn the_one_where_discovery_fails_and_the_failure_says_so() {
        let store = InMemoryStore::new();
        seed_instance(&store, 1, "2024-03-01T10:00:00Z").await;
        let job = job_over(&store, vec![1]);
        store.reject_next(StoreOp::Search, 1).await;
        let failure = job.run_cycle().await.expect_err("search refused");
        assert!(matches!(failure.source, ArchiveError::Discovery(_)));
        assert_eq!(failure.id_count, 0);
        assert_eq!(job.state(), JobState::Idle);
    }

    #[tokio::test]
    async fn the_one_where_custom_descriptors_flow_all_the_way_through() {
        let store = InMemoryStore::new();
        let root = RootDescriptor {
            index: "instances_".into(),
            ..RootDescriptor::default()
        };
        store
            .bulk_write(
                "instances_",
                &[Record::new(
                    "instances_",
                    "5",
                    json!({"key": 5, "workflowInstanceKey": 5, "partitionId": 1, "joinRelation": "workflowInstance", "endDate": "2024-03-01T10:00:00Z"}),
                )],
            )
            .await
            .expect("seed");
        let mut app_config = AppConfig::default();
        app_config.root = root;
        app_config.dependents = Vec::new();
        app_config.archiver.rollover_date_format = "%Y%m%d".into();
        let job = ArchiverJob::from_config(
            &app_config,
            Arc::new(store.clone()),
            Arc::new(ManualClock::new(now())),
            Arc::new(ArchiverMetrics::new()),
        )
        .expect("job wiring");

        assert_eq!(job.run_cycle().await.expect("cycle"), 1);
        assert!(store.get("instances_20240301", "5").await.is_some());
    }

    #[tokio::test]
    async fn the_one_where_a_weekly_failure_names_the_week_its_destination_uses() {
        let store = InMemoryStore::new();
        // 🧨 saturday 2024-03-02 belongs to ISO week 9, and its link field points nowhere
        let mut broken = root_record(2, "2024-03-02T10:00:00Z");
        broken.source["workflowInstanceKey"] = json!(999);
        store.bulk_write(LIVE, &[broken]).await.expect("seed broken root");
        let mut app_config = AppConfig::default();
        app_config.archiver.rollover_interval = RolloverInterval::Week;
        app_config.archiver.rollover_date_format = "%G-W%V".into();
        app_config.archiver.retry_count = 0;
        app_config.dependents = Vec::new();
        let job = ArchiverJob::from_config(
            &app_config,
            Arc::new(store.clone()),
            Arc::new(ManualClock::new(now())),
            Arc::new(ArchiverMetrics::new()),
        )
        .expect("job wiring");

        let failure = job.run_cycle().await.expect_err("nothing to copy for instance 2");
        assert_eq!(failure.finish_date, "2024-W09");
        assert!(
            matches!(failure.source, ArchiveError::IncompleteCopy { ref destination, .. } if destination == "operate-list-view_2024-W09")
        );
    }
}
