//! 🧊 arx — moves finished workflow instances out of the hot indices and into dated archives.
//!
//! 🎬 *[narrator voice]* "Every process instance finishes eventually. Most of them then
//! sit in the live index for years, being scanned by dashboards that never look at them."
//!
//! 📦 The pieces, leaves first:
//! - [`backends`]: the [`backends::RecordStore`] seam plus its in-memory and Elasticsearch faces
//! - [`partitions`]: which engine partitions this instance owns
//! - [`destination`]: `base + date` naming and lazy index creation
//! - [`candidates`]: lazy discovery of finished, old-enough roots, grouped by finish date
//! - [`mover`]: copy everything, verify, then delete
//! - [`job`]: one cycle, batch by batch
//! - [`scheduler`]: fixed-delay loop with manual triggers and graceful shutdown
//!
//! 🦆 (mandatory duck, see CONTRIBUTING, there is no CONTRIBUTING)

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

pub mod app_config;
pub mod backends;
pub mod candidates;
pub mod common;
pub mod destination;
pub mod error;
pub mod job;
pub mod metrics;
pub mod mover;
pub mod partitions;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod time;

use crate::app_config::AppConfig;
use crate::backends::StoreBackend;
use crate::job::ArchiverJob;
use crate::metrics::ArchiverMetrics;
use crate::scheduler::Scheduler;
use crate::time::SystemClock;

/// 🏗️ Store + wall clock + fresh metrics, wired into a job.
pub async fn build_job(app_config: &AppConfig) -> Result<ArchiverJob> {
    let store = StoreBackend::from_config(&app_config.store)
        .await
        .context("💀 Failed to build the record store from config")?;
    ArchiverJob::from_config(
        app_config,
        Arc::new(store),
        Arc::new(SystemClock),
        Arc::new(ArchiverMetrics::new()),
    )
}

/// 🔄 Runs the scheduler until `shutdown` fires. The cycle in flight finishes first.
pub async fn run(app_config: AppConfig, shutdown: CancellationToken) -> Result<Arc<ArchiverMetrics>> {
    let job = Arc::new(build_job(&app_config).await?);
    let (scheduler, _handle) = Scheduler::with_cancellation(job.clone(), &app_config.archiver, shutdown);
    scheduler.run().await;
    Ok(job.metrics().clone())
}

/// 🎯 Exactly one cycle. Returns what it archived and the metrics it left behind.
///
/// The metrics textfile, if configured, is written whether the cycle succeeded or not.
pub async fn run_once(app_config: AppConfig) -> Result<(u64, Arc<ArchiverMetrics>)> {
    let job = build_job(&app_config).await?;
    let outcome = job.run_cycle().await;
    if let Some(path) = &app_config.archiver.metrics_textfile {
        job.metrics().write_textfile(path).await?;
    }
    let archived =
        outcome.context("💀 The archive cycle aborted. Whatever moved before the failure stays moved.")?;
    Ok((archived, job.metrics().clone()))
}
