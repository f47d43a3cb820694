//! ⏰ The scheduler — part metronome, part night watchman.
//!
//! 🎬 *[camera pans across a dimly lit server room]*
//! 🎬 "In a world where cycles must never overlap..."
//! 🎬 "One loop dared to wait until the last one finished."
//! 🎬 *[record scratch]* 🦆
//!
//! Fixed delay, not fixed rate: the next cycle is scheduled after the previous one ends,
//! so two cycles never run at once. How long it waits depends on how the last cycle went:
//! nothing to do (idle delay), work done (busy delay), or failure (error delay). A
//! [`SchedulerHandle`] can cut the wait short with a manual trigger, or ask the loop to stop.
//! Stopping never interrupts a running cycle; the loop only listens for cancellation while
//! it waits. With `metrics_textfile` set, the counters are written out after every cycle.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app_config::ArchiverConfig;
use crate::job::ArchiverJob;

/// ⏱️ How long to wait after each kind of cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub idle: Duration,
    pub busy: Duration,
    pub error: Duration,
}

impl From<&ArchiverConfig> for Pacing {
    fn from(config: &ArchiverConfig) -> Self {
        Self {
            idle: Duration::from_millis(config.idle_delay_ms),
            busy: Duration::from_millis(config.busy_delay_ms),
            error: Duration::from_millis(config.error_delay_ms),
        }
    }
}

/// 🎮 The remote control. Cheap to clone, safe to share.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    trigger: async_channel::Sender<()>,
    cancel: CancellationToken,
}

impl SchedulerHandle {
    /// 🔔 Asks for a cycle right away. Triggers that arrive while one is already pending
    /// are folded into it. Returns `false` if the scheduler is gone.
    pub fn trigger_now(&self) -> bool {
        match self.trigger.try_send(()) {
            Ok(()) | Err(async_channel::TrySendError::Full(())) => true,
            Err(async_channel::TrySendError::Closed(())) => false,
        }
    }

    /// 🛑 Stops the loop once the current cycle (if any) is done.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// ⏰ Owns the loop that runs [`ArchiverJob::run_cycle`] over and over.
#[derive(Debug)]
pub struct Scheduler {
    job: Arc<ArchiverJob>,
    pacing: Pacing,
    enabled: bool,
    textfile: Option<PathBuf>,
    trigger: async_channel::Receiver<()>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(job: Arc<ArchiverJob>, config: &ArchiverConfig) -> (Self, SchedulerHandle) {
        Self::with_cancellation(job, config, CancellationToken::new())
    }

    /// 🔗 Same as [`Scheduler::new`], but stops when `cancel` (or any parent of it) fires.
    pub fn with_cancellation(
        job: Arc<ArchiverJob>,
        config: &ArchiverConfig,
        cancel: CancellationToken,
    ) -> (Self, SchedulerHandle) {
        let (tx, rx) = async_channel::bounded(1);
        let scheduler = Self {
            job,
            pacing: Pacing::from(config),
            enabled: config.enabled,
            textfile: config.metrics_textfile.clone(),
            trigger: rx,
            cancel: cancel.clone(),
        };
        (scheduler, SchedulerHandle { trigger: tx, cancel })
    }

    /// 🔄 Runs cycles until cancelled. Returns how many instances this loop archived.
    pub async fn run(self) -> u64 {
        if !self.enabled {
            info!("🔌 Archiver is disabled in config. The scheduler is going home early.");
            return 0;
        }
        info!(pacing = ?self.pacing, "⏰ Archive scheduler started");

        let mut archived_total = 0u64;
        let mut triggers_open = true;
        while !self.cancel.is_cancelled() {
            let delay = match self.job.run_cycle().await {
                Ok(0) => self.pacing.idle,
                Ok(archived) => {
                    archived_total += archived;
                    self.pacing.busy
                }
                Err(failure) => {
                    archived_total += failure.archived_before_failure;
                    self.pacing.error
                }
            };
            self.publish_metrics().await;
            debug!(delay_ms = delay.as_millis() as u64, "😴 Waiting for the next cycle");

            // -- 🧵 the wait is the only place a shutdown can land
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                trigger = self.trigger.recv(), if triggers_open => {
                    match trigger {
                        Ok(()) => debug!("🔔 Manual trigger, skipping the rest of the wait"),
                        Err(_) => {
                            // every handle is gone; keep pacing, stop listening
                            triggers_open = false;
                            tokio::select! {
                                biased;
                                _ = self.cancel.cancelled() => break,
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                    }
                }

                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(archived_total, "🛑 Archive scheduler stopped");
        archived_total
    }

    /// 📡 A scrape file that can't be written is a warning, never a reason to stop archiving.
    async fn publish_metrics(&self) {
        if let Some(path) = &self.textfile {
            if let Err(err) = self.job.metrics().write_textfile(path).await {
                warn!(error = %format!("{err:#}"), "📡 Metrics textfile not updated");
            }
        }
    }
}
