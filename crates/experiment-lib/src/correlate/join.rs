//! Temporal join between snapshots and burst windows
//!
//! A timestamp belongs to the burst whose `[start, start + duration)` window
//! contains it, otherwise it is idle. The join is exact; nothing is matched
//! to a nearest neighbour.

use crate::models::BurstWindow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which part of the run a timestamp falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribution {
    Burst(usize),
    Idle,
}

impl Attribution {
    pub fn burst_index(&self) -> Option<usize> {
        match self {
            Attribution::Burst(index) => Some(*index),
            Attribution::Idle => None,
        }
    }
}

impl fmt::Display for Attribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attribution::Burst(index) => write!(f, "burst-{}", index),
            Attribution::Idle => f.write_str("idle"),
        }
    }
}

/// Burst windows ordered by start time
#[derive(Debug, Clone, Default)]
pub struct BurstTimeline {
    windows: Vec<BurstWindow>,
}

impl BurstTimeline {
    pub fn new(windows: &[BurstWindow]) -> Self {
        let mut windows = windows.to_vec();
        windows.sort_by_key(|w| w.started_at);
        Self { windows }
    }

    /// Last window that started at or before `ts`
    fn latest_started(&self, ts: DateTime<Utc>) -> Option<&BurstWindow> {
        let idx = self.windows.partition_point(|w| w.started_at <= ts);
        idx.checked_sub(1).map(|i| &self.windows[i])
    }

    pub fn attribute(&self, ts: DateTime<Utc>) -> Attribution {
        match self.latest_started(ts) {
            Some(window) if window.contains(ts) => Attribution::Burst(window.burst_index),
            _ => Attribution::Idle,
        }
    }

    /// Burst whose latency describes `ts`: the containing burst, or for idle
    /// time the most recent burst that already ended. Never a later burst.
    pub fn latency_source(&self, ts: DateTime<Utc>) -> Option<usize> {
        self.latest_started(ts).map(|w| w.burst_index)
    }

    pub fn windows(&self) -> &[BurstWindow] {
        &self.windows
    }
}
