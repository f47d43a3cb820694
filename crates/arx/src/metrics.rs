//! 📊 Metrics — the archiver's scoreboard.
//!
//! Process-wide counters, created once, handed around in an `Arc`, reset only by a restart.
//! No global registry, no singleton, no magic: whoever needs to count something gets a
//! reference and counts it.
//!
//! Two ways out: a comfy-table summary for humans staring at a terminal, and Prometheus
//! text exposition for machines staring at a scrape endpoint. 🦆

use std::fmt::Write as _;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};

/// 🖨️ Which face the scoreboard shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetricsFormat {
    #[default]
    Table,
    Prometheus,
}

/// 🔢 The counters. All monotonic, all relaxed; nobody needs them to agree with each other
/// to the nanosecond.
#[derive(Debug)]
pub struct ArchiverMetrics {
    archived_instances: AtomicU64,
    cycles: AtomicU64,
    cycle_failures: AtomicU64,
    reindex_failures: AtomicU64,
    cleanup_debt: AtomicU64,
    orphan_tolerant_skips: AtomicU64,
    started_at: Instant,
}

/// 📸 A frozen copy of the counters at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub archived_instances: u64,
    pub cycles: u64,
    pub cycle_failures: u64,
    pub reindex_failures: u64,
    pub cleanup_debt: u64,
    pub orphan_tolerant_skips: u64,
}

impl Default for ArchiverMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiverMetrics {
    pub fn new() -> Self {
        Self {
            archived_instances: AtomicU64::new(0),
            cycles: AtomicU64::new(0),
            cycle_failures: AtomicU64::new(0),
            reindex_failures: AtomicU64::new(0),
            cleanup_debt: AtomicU64::new(0),
            orphan_tolerant_skips: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn record_archived(&self, count: u64) {
        self.archived_instances.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cycle_failure(&self) {
        self.cycle_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// 📋 A copy step gave up after retries.
    pub fn record_reindex_failure(&self) {
        self.reindex_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// 🧹 A delete step gave up after the copy already landed.
    pub fn record_cleanup_debt(&self) {
        self.cleanup_debt.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_orphan_tolerant_skip(&self) {
        self.orphan_tolerant_skips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            archived_instances: self.archived_instances.load(Ordering::Relaxed),
            cycles: self.cycles.load(Ordering::Relaxed),
            cycle_failures: self.cycle_failures.load(Ordering::Relaxed),
            reindex_failures: self.reindex_failures.load(Ordering::Relaxed),
            cleanup_debt: self.cleanup_debt.load(Ordering::Relaxed),
            orphan_tolerant_skips: self.orphan_tolerant_skips.load(Ordering::Relaxed),
        }
    }

    /// 🎨 Two columns, right-aligned, no borders. Looks fine at 3am, which is the bar.
    pub fn render_table(&self) -> String {
        let snapshot = self.snapshot();
        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        for (label, value) in snapshot.rows() {
            table.add_row(vec![
                Cell::new(label),
                Cell::new(format_number(value)).set_alignment(CellAlignment::Right),
            ]);
        }
        table.add_row(vec![
            Cell::new("uptime"),
            Cell::new(format_duration(self.uptime())).set_alignment(CellAlignment::Right),
        ]);
        table.to_string()
    }

    pub fn render(&self, format: MetricsFormat) -> String {
        match format {
            MetricsFormat::Table => self.render_table(),
            MetricsFormat::Prometheus => self.to_prometheus(),
        }
    }

    /// 📡 Writes the Prometheus exposition to `path` for a textfile collector.
    ///
    /// Goes through a sibling temp file and a rename, so a scrape never reads half a file.
    pub async fn write_textfile(&self, path: &Path) -> anyhow::Result<()> {
        let staging = path.with_extension("prom.tmp");
        tokio::fs::write(&staging, self.to_prometheus())
            .await
            .with_context(|| format!("💀 Couldn't write metrics to '{}'", staging.display()))?;
        tokio::fs::rename(&staging, path)
            .await
            .with_context(|| format!("💀 Couldn't move metrics into place at '{}'", path.display()))?;
        Ok(())
    }

    /// 📡 Prometheus text exposition format, one counter per metric.
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();
        for (name, help, value) in self.snapshot().series() {
            // -- writing into a String can't fail, the Result is a formality
            let _ = writeln!(out, "# HELP arx_{name}_total {help}");
            let _ = writeln!(out, "# TYPE arx_{name}_total counter");
            let _ = writeln!(out, "arx_{name}_total {value}");
        }
        out
    }
}

impl MetricsSnapshot {
    fn rows(&self) -> [(&'static str, u64); 6] {
        [
            ("archived instances", self.archived_instances),
            ("cycles", self.cycles),
            ("failed cycles", self.cycle_failures),
            ("reindex failures", self.reindex_failures),
            ("cleanup debt", self.cleanup_debt),
            ("orphan-tolerant skips", self.orphan_tolerant_skips),
        ]
    }

    fn series(&self) -> [(&'static str, &'static str, u64); 6] {
        [
            ("archived_instances", "Root instances moved to an archive destination.", self.archived_instances),
            ("cycles", "Archive cycles run.", self.cycles),
            ("cycle_failures", "Archive cycles aborted by a batch failure.", self.cycle_failures),
            ("reindex_failures", "Copy steps that failed after retries.", self.reindex_failures),
            ("cleanup_debt", "Delete steps that failed after a successful copy.", self.cleanup_debt),
            ("orphan_tolerant_skips", "Orphan-tolerant dependent types skipped because their live index does not exist.", self.orphan_tolerant_skips),
        ]
    }
}

/// 🔢 "1000000" → "1,000,000". You're welcome, eyes.
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ MM:SS, or HH:MM:SS once the archiver has been up long enough to deserve it.
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}
