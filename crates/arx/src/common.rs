//! 📦 Common data structures — the building blocks of the archive
//!
//! 🎬 COLD OPEN — INT. HOT INDEX — 3:47 AM
//!
//! Forty million finished process instances sit in the live index, finished,
//! done, closed, and still being scanned by every dashboard query like they owe
//! somebody money. Somewhere a `RootCandidate` is discovered. It gets grouped
//! with its same-day siblings into an `ArchiveBatch`. Together they are about to
//! take a one-way trip to an index with a date in its name. 🦆
//!
//! This module holds the humble, load-bearing types that ferry that trip:
//! records, filters, search requests, outcomes and batches.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;

/// 🎯 One stored document: its id, the index it lives in, and its raw JSON body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub id: String,
    pub index: String,
    pub source: Value,
}

impl Record {
    pub fn new(index: impl Into<String>, id: impl Into<String>, source: Value) -> Self {
        Self {
            id: id.into(),
            index: index.into(),
            source,
        }
    }

    /// 🔍 Top-level field lookup. Nested paths are a problem for another century.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.source.get(name)
    }
}

/// 🔎 The tiny query language the archiver actually needs. Four shapes. That's it.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// 🎯 `field == value`
    Term { field: String, value: Value },
    /// 📋 `field ∈ values`
    Terms { field: String, values: Vec<Value> },
    /// ✅ the field is present and not null
    Exists { field: String },
    /// ⏱️ `field <= at`, field holds an RFC 3339 timestamp
    RangeLte { field: String, at: DateTime<Utc> },
}

impl Filter {
    pub fn term(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    /// 📋 Terms over string ids. Numeric-looking ids stay strings here; the backends
    /// compare them by their textual form, which is what Elasticsearch does too.
    pub fn terms<I, S>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Filter::Terms {
            field: field.into(),
            values: values.into_iter().map(|v| Value::String(v.into())).collect(),
        }
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Filter::Exists {
            field: field.into(),
        }
    }

    pub fn range_lte(field: impl Into<String>, at: DateTime<Utc>) -> Self {
        Filter::RangeLte {
            field: field.into(),
            at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortField {
    pub field: String,
    pub order: SortOrder,
}

impl SortField {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Asc,
        }
    }
}

/// 📡 A filtered, sorted, capped read. `search_after` carries the sort values of the
/// last record of the previous page, one per sort field.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub index: String,
    /// 🔗 AND-ed together. No OR. We are not building a query planner today.
    pub filters: Vec<Filter>,
    pub sort: Vec<SortField>,
    pub limit: usize,
    pub search_after: Option<Vec<Value>>,
}

/// 📦 What a bulk write/delete reports back: how many items landed, and which didn't.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkOutcome {
    pub succeeded: u64,
    pub item_errors: Vec<String>,
}

impl BulkOutcome {
    pub fn is_clean(&self) -> bool {
        self.item_errors.is_empty()
    }
}

/// 🏗️ The two happy endings of "make sure this index exists".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    Created,
    AlreadyExisted,
}

/// 🧊 A finished root entity that is old enough to leave the hot index.
#[derive(Debug, Clone, PartialEq)]
pub struct RootCandidate {
    pub id: String,
    pub partition: Option<u32>,
    pub end_date: DateTime<Utc>,
}

/// 📅 Root ids sharing one finish bucket (a day, or a week). Created per cycle,
/// consumed by the mover, never persisted. Ids keep discovery order.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveBatch {
    pub finish_date: NaiveDate,
    pub ids: Vec<String>,
}

impl ArchiveBatch {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// 🔢 Textual form of a JSON scalar, the way id comparisons want it: `123` and `"123"`
/// are the same id. Returns `None` for arrays, objects and nulls.
pub(crate) fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
