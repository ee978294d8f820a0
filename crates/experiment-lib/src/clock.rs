//! Run-wide timestamp source
//!
//! Burst windows and snapshot timestamps must come from the same clock or the
//! correlator's window join is meaningless. The clock anchors wall time once
//! and then advances with `tokio::time::Instant`, so timestamps never go
//! backwards within a run and follow tokio's paused clock in tests.

use chrono::{DateTime, Utc};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct ExperimentClock {
    anchor_wall: DateTime<Utc>,
    anchor_instant: Instant,
}

impl ExperimentClock {
    /// Anchor at the current wall-clock time
    pub fn start() -> Self {
        Self::anchored_at(Utc::now())
    }

    /// Anchor at an explicit wall-clock time
    pub fn anchored_at(anchor_wall: DateTime<Utc>) -> Self {
        Self {
            anchor_wall,
            anchor_instant: Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = self.anchor_instant.elapsed();
        // Runs are hours long at most; a failed conversion means a corrupt clock
        let elapsed = chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());
        self.anchor_wall + elapsed
    }
}

impl Default for ExperimentClock {
    fn default() -> Self {
        Self::start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_clock_follows_tokio_time() {
        let anchor = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let clock = ExperimentClock::anchored_at(anchor);
        assert_eq!(clock.now(), anchor);

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(clock.now(), anchor + chrono::Duration::seconds(15));
    }
}
