//! ⏱️ Time — clocks, offsets, and the ancient art of deciding which day something happened.
//!
//! "It finished at 23:59:59." "Which timezone?" "...yes." 🦆
//!
//! The archiver needs two things from time: a `now()` it can fake in tests, and a way to
//! squash a completion timestamp into a calendar bucket in one fixed reference offset.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Utc};
use serde::Deserialize;

/// 🕰️ Where "now" comes from.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// 🌍 The wall clock. Boring. Correct. Mostly.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 🧪 A clock that only moves when you tell it to. Time travel for tests, no DeLorean needed.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// 📅 How wide one archive bucket is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RolloverInterval {
    #[default]
    Day,
    /// Buckets start on the Monday of the ISO week.
    Week,
}

/// 🗓️ Truncates `at` to its bucket start, as seen from `offset`.
pub fn finish_bucket(at: DateTime<Utc>, offset: FixedOffset, interval: RolloverInterval) -> NaiveDate {
    let local_day = at.with_timezone(&offset).date_naive();
    match interval {
        RolloverInterval::Day => local_day,
        RolloverInterval::Week => {
            local_day - Duration::days(i64::from(local_day.weekday().num_days_from_monday()))
        }
    }
}
