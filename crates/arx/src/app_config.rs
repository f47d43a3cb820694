//! 🔧 App Configuration — the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." — every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::FixedOffset;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::backends::ElasticsearchStoreConfig;
use crate::partitions::PartitionConfig;
use crate::registry::{DependentDescriptor, RootDescriptor, default_dependents};
use crate::time::RolloverInterval;

/// 📦 The AppConfig: one struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub archiver: ArchiverConfig,
    #[serde(default)]
    pub partitions: PartitionConfig,
    #[serde(default)]
    pub root: RootDescriptor,
    /// 📋 Copy order matters. First listed, first moved.
    #[serde(default = "default_dependents")]
    pub dependents: Vec<DependentDescriptor>,
}

/// 🗄️ Which record store to talk to.
#[derive(Debug, Deserialize, Clone, Default)]
pub enum StoreConfig {
    /// 🧠 RAM only. Lovely for dry runs, useless for keeping anything.
    #[default]
    InMemory,
    Elasticsearch(ElasticsearchStoreConfig),
}

/// 🧊 Knobs for discovery, moving and pacing.
#[derive(Debug, Deserialize, Clone)]
pub struct ArchiverConfig {
    /// 🔌 Off switch. `false` and the scheduler goes home immediately.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 📦 Max root candidates per discovery page.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// ⏱️ Finished instances younger than this stay hot, so late dependent writes can settle.
    #[serde(default = "default_min_age_secs")]
    pub min_age_secs: u64,
    #[serde(default)]
    pub rollover_interval: RolloverInterval,
    /// 📅 chrono strftime pattern appended to base index names.
    #[serde(default = "default_rollover_date_format")]
    pub rollover_date_format: String,
    /// 🌍 Offset (minutes east of UTC) in which finish dates are bucketed.
    #[serde(default)]
    pub reference_utc_offset_minutes: i32,
    /// 🔄 Retries per store step after the first attempt.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// ⏱️ Ceiling for any single store call made by the mover or finder.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// 😴 Pause after a cycle that found nothing to do.
    #[serde(default = "default_idle_delay_ms")]
    pub idle_delay_ms: u64,
    /// 🏃 Pause after a cycle that archived something.
    #[serde(default)]
    pub busy_delay_ms: u64,
    /// 🩹 Pause after a failed cycle.
    #[serde(default = "default_error_delay_ms")]
    pub error_delay_ms: u64,
    /// 📡 Where to drop Prometheus text exposition after every cycle, for a textfile
    /// collector to scrape. Unset means nobody is listening.
    #[serde(default)]
    pub metrics_textfile: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}
fn default_batch_size() -> usize {
    100
}
fn default_min_age_secs() -> u64 {
    3600
}
fn default_rollover_date_format() -> String {
    "%Y-%m-%d".to_string()
}
fn default_retry_count() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_backoff_max_ms() -> u64 {
    30_000
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_idle_delay_ms() -> u64 {
    60_000
}
fn default_error_delay_ms() -> u64 {
    2_000
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            batch_size: default_batch_size(),
            min_age_secs: default_min_age_secs(),
            rollover_interval: RolloverInterval::default(),
            rollover_date_format: default_rollover_date_format(),
            reference_utc_offset_minutes: 0,
            retry_count: default_retry_count(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            idle_delay_ms: default_idle_delay_ms(),
            busy_delay_ms: 0,
            error_delay_ms: default_error_delay_ms(),
            metrics_textfile: None,
        }
    }
}

impl ArchiverConfig {
    pub fn min_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.min_age_secs).unwrap_or(i64::MAX))
    }

    pub fn reference_offset(&self) -> anyhow::Result<FixedOffset> {
        FixedOffset::east_opt(self.reference_utc_offset_minutes.saturating_mul(60)).with_context(|| {
            format!(
                "💀 reference_utc_offset_minutes = {} is not an offset this planet uses",
                self.reference_utc_offset_minutes
            )
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            archiver: ArchiverConfig::default(),
            partitions: PartitionConfig::default(),
            root: RootDescriptor::default(),
            dependents: default_dependents(),
        }
    }
}

impl AppConfig {
    /// ✅ Catches the configs that parse fine and then explode at 3am.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.archiver.batch_size == 0 {
            anyhow::bail!("💀 archiver.batch_size is 0. Archiving zero things per page is a very slow way to archive everything.");
        }
        self.archiver.reference_offset()?;
        crate::destination::DestinationNamer::new(self.archiver.rollover_date_format.clone())
            .map_err(|reason| anyhow::anyhow!("💀 archiver.rollover_date_format: {reason}"))?;
        let mut seen = HashSet::new();
        for dependent in &self.dependents {
            if !seen.insert(dependent.name.as_str()) {
                anyhow::bail!(
                    "💀 Dependent type '{}' is registered twice. Pick one. They cannot both be the favourite.",
                    dependent.name
                );
            }
        }
        Ok(())
    }
}

/// 🚀 Load the config — from a file, from env vars, or from the sheer power of hoping.
///
/// 📐 Env vars (`ARX_*`, nested keys split on `__`) form the base layer; the TOML file,
/// when given, is merged on top and wins on conflicts. No file means env only.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("ARX_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (ARX_*). \
             The file exists in our hearts, but apparently not in a shape serde likes.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (ARX_*). \
                 No file was provided — this one's all on the environment. Classic."
            .to_string(),
    };

    let app_config: AppConfig = config.extract().context(context_msg)?;
    app_config.validate()?;
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_test_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("💀 Failed to create a temp config. The filesystem said 'new phone who dis'.");
        file.write_all(contents.as_bytes())
            .expect("💀 Failed to write test config.");
        file
    }

    #[test]
    fn the_one_where_a_full_config_lands_in_all_the_right_drawers() {
        let file = write_test_config(
            r#"
            [store.Elasticsearch]
            url = "http://localhost:9200"
            api_key = "abc"

            [archiver]
            batch_size = 50
            min_age_secs = 7200
            rollover_interval = "week"
            rollover_date_format = "%G-W%V"
            reference_utc_offset_minutes = 120
            retry_count = 5
            metrics_textfile = "/var/lib/node_exporter/arx.prom"

            [partitions]
            ids = [1, 2, 3]

            [root]
            index = "list-view_"

            [[dependents]]
            name = "variable"
            index = "variable_"

            [[dependents]]
            name = "incident"
            index = "incident_"
            orphan_tolerant = true
            "#,
        );

        let app_config = load_config(Some(file.path())).expect("💀 full config should parse");

        match &app_config.store {
            StoreConfig::Elasticsearch(es) => {
                assert_eq!(es.url, "http://localhost:9200");
                assert_eq!(es.api_key.as_deref(), Some("abc"));
                assert_eq!(es.request_timeout_ms, 30_000);
            }
            honestly_who_knows => panic!("💀 expected Elasticsearch store, got {honestly_who_knows:?}"),
        }
        assert_eq!(app_config.archiver.batch_size, 50);
        assert_eq!(app_config.archiver.min_age(), chrono::Duration::hours(2));
        assert_eq!(app_config.archiver.rollover_interval, RolloverInterval::Week);
        assert_eq!(
            app_config.archiver.reference_offset().expect("offset"),
            FixedOffset::east_opt(7200).expect("offset")
        );
        assert_eq!(
            app_config.archiver.metrics_textfile.as_deref(),
            Some(Path::new("/var/lib/node_exporter/arx.prom"))
        );
        assert_eq!(app_config.partitions.ids, vec![1, 2, 3]);
        assert_eq!(app_config.root.index, "list-view_");
        assert_eq!(app_config.root.end_date_field, "endDate");
        assert_eq!(app_config.dependents.len(), 2);
        assert!(app_config.dependents[1].orphan_tolerant);
    }

    #[test]
    fn the_one_where_defaults_show_up_uninvited_but_helpful() {
        let file = write_test_config("");
        let app_config: AppConfig = Figment::new()
            .merge(Toml::file(file.path()))
            .extract()
            .expect("💀 empty config should fall back to defaults");

        assert!(matches!(app_config.store, StoreConfig::InMemory));
        assert!(app_config.archiver.enabled);
        assert_eq!(app_config.archiver.batch_size, 100);
        assert_eq!(app_config.archiver.min_age_secs, 3600);
        assert_eq!(app_config.archiver.rollover_date_format, "%Y-%m-%d");
        assert_eq!(app_config.partitions.ids, vec![1]);
        assert_eq!(app_config.dependents, default_dependents());
        app_config.validate().expect("defaults are valid");
    }

    #[test]
    fn the_one_where_zero_batch_size_is_sent_back_to_the_kitchen() {
        let file = write_test_config("[archiver]\nbatch_size = 0\n");
        let err = load_config(Some(file.path())).expect_err("zero batch size must fail");
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn the_one_where_twin_dependents_are_caught_at_the_door() {
        let mut config = AppConfig::default();
        config.dependents.push(DependentDescriptor::new("variable", "other_"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn the_one_where_a_bad_date_format_never_reaches_an_index_name() {
        let mut config = AppConfig::default();
        config.archiver.rollover_date_format = "%Q%".to_string();
        assert!(config.validate().is_err());
    }
}
