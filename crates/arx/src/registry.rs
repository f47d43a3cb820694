//! 🗂️ Registry — who gets archived, where they live, and how they point at their parent.
//!
//! Every record type the archiver moves is described by data, not by a subclass.
//! Adding a new dependent type is a config change: add a `[[dependents]]` entry,
//! restart, done. Nobody writes a new handler, nobody gets paged. 🦆
//!
//! 🧠 Knowledge graph:
//! - [`RootDescriptor`]: the finished process instance, living in the list-view index
//!   next to its co-located join children.
//! - [`DependentDescriptor`]: every other record type keyed by the root id.
//! - Order of the dependents list is the order the mover copies them in.

use serde::Deserialize;

/// 🌳 Where root entities live and which fields describe them.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RootDescriptor {
    /// 📦 Live (base) index of the roots.
    #[serde(default = "default_root_index")]
    pub index: String,
    /// 🔑 Field holding the root id; also the tie-break sort key.
    #[serde(default = "default_id_field")]
    pub id_field: String,
    /// ⏱️ Completion timestamp. Absent until the instance finishes.
    #[serde(default = "default_end_date_field")]
    pub end_date_field: String,
    #[serde(default = "default_partition_field")]
    pub partition_field: String,
    /// 🔗 Join discriminator separating roots from co-located children.
    #[serde(default = "default_join_field")]
    pub join_field: String,
    #[serde(default = "default_join_value")]
    pub join_value: String,
    /// 🔗 Field carrying the root id on the root AND on its co-located children.
    /// Copy and delete of the root index filter on this one, so the children ride along.
    #[serde(default = "default_link_field")]
    pub link_field: String,
}

fn default_root_index() -> String {
    "operate-list-view_".to_string()
}
fn default_id_field() -> String {
    "key".to_string()
}
fn default_end_date_field() -> String {
    "endDate".to_string()
}
fn default_partition_field() -> String {
    "partitionId".to_string()
}
fn default_join_field() -> String {
    "joinRelation".to_string()
}
fn default_join_value() -> String {
    "workflowInstance".to_string()
}
fn default_link_field() -> String {
    "workflowInstanceKey".to_string()
}

impl Default for RootDescriptor {
    fn default() -> Self {
        Self {
            index: default_root_index(),
            id_field: default_id_field(),
            end_date_field: default_end_date_field(),
            partition_field: default_partition_field(),
            join_field: default_join_field(),
            join_value: default_join_value(),
            link_field: default_link_field(),
        }
    }
}

/// 🧩 One dependent record type.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DependentDescriptor {
    pub name: String,
    /// 📦 Live (base) index of this type. Its archive lands in `index + finish date`.
    pub index: String,
    /// 🔗 Field holding the owning root's id.
    #[serde(default = "default_link_field")]
    pub foreign_key: String,
    /// 🧊 `false` keeps the type out of archival entirely.
    #[serde(default = "default_true")]
    pub archive: bool,
    /// 🏠 Joined into the root's own index; moves with the root, never reindexed on its own.
    #[serde(default)]
    pub co_located: bool,
    /// 🍂 Leaf with an independent lifecycle. If its live index doesn't exist the batch
    /// carries on without it; any other copy failure still aborts the batch.
    #[serde(default)]
    pub orphan_tolerant: bool,
}

fn default_true() -> bool {
    true
}

impl DependentDescriptor {
    pub fn new(name: &str, index: &str) -> Self {
        Self {
            name: name.to_string(),
            index: index.to_string(),
            foreign_key: default_link_field(),
            archive: true,
            co_located: false,
            orphan_tolerant: false,
        }
    }

    pub fn co_located(mut self) -> Self {
        self.co_located = true;
        self
    }

    pub fn orphan_tolerant(mut self) -> Self {
        self.orphan_tolerant = true;
        self
    }

    /// 🚚 Does the mover issue its own reindex + delete for this type?
    pub fn needs_separate_move(&self) -> bool {
        self.archive && !self.co_located
    }
}

/// 📋 The stock registry for a workflow-monitoring backend, in copy order.
pub fn default_dependents() -> Vec<DependentDescriptor> {
    vec![
        DependentDescriptor::new("list-view-activity", "operate-list-view_").co_located(),
        DependentDescriptor::new("event", "operate-event_"),
        DependentDescriptor::new("flow-node-instance", "operate-activity-instance_"),
        DependentDescriptor::new("variable", "operate-variable_"),
        DependentDescriptor::new("incident", "operate-incident_").orphan_tolerant(),
        DependentDescriptor::new("sequence-flow", "operate-sequence-flow_").orphan_tolerant(),
        DependentDescriptor::new("operation", "operate-operation_"),
    ]
}
