//! 🧭 Partitions — which slices of the engine's event stream this archiver owns.
//!
//! Two archiver processes with disjoint partition sets never fight over the same
//! instance. No locks, no leases, just arithmetic. 🦆

use serde::Deserialize;

/// 🧭 Enumerates the engine partitions this instance is responsible for.
pub trait PartitionHolder: Send + Sync + std::fmt::Debug {
    fn partition_ids(&self) -> Vec<u32>;
}

/// 📋 Partition assignment straight from config.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PartitionConfig {
    #[serde(default = "default_partition_ids")]
    pub ids: Vec<u32>,
}

fn default_partition_ids() -> Vec<u32> {
    vec![1]
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            ids: default_partition_ids(),
        }
    }
}

/// 📌 A fixed partition set. Sorted and de-duplicated on the way in.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticPartitionHolder {
    ids: Vec<u32>,
}

impl StaticPartitionHolder {
    pub fn new(mut ids: Vec<u32>) -> Self {
        ids.sort_unstable();
        ids.dedup();
        Self { ids }
    }
}

impl From<&PartitionConfig> for StaticPartitionHolder {
    fn from(config: &PartitionConfig) -> Self {
        Self::new(config.ids.clone())
    }
}

impl PartitionHolder for StaticPartitionHolder {
    fn partition_ids(&self) -> Vec<u32> {
        self.ids.clone()
    }
}
