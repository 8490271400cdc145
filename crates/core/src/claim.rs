//! When to ask the broker to reassign stale pending entries.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::options::millis;

/// Claim check configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimingTrigger {
    /// Consecutive empty fetches before a claim check runs.
    pub empty_batch_count: u32,
    /// Entries idle at least this long may be taken from their owner.
    #[serde(rename = "min_idle_ms", with = "millis")]
    pub min_idle: Duration,
}

impl Default for ClaimingTrigger {
    fn default() -> Self {
        Self {
            empty_batch_count: 1000,
            min_idle: Duration::from_secs(10 * 60),
        }
    }
}

impl ClaimingTrigger {
    pub fn new(empty_batch_count: u32, min_idle: Duration) -> Self {
        Self {
            empty_batch_count,
            min_idle,
        }
    }
}

/// Counts consecutive empty fetches for one subscription.
#[derive(Debug, Clone)]
pub struct ClaimTracker {
    trigger: ClaimingTrigger,
    empty_fetches: u32,
}

impl ClaimTracker {
    pub fn new(trigger: ClaimingTrigger) -> Self {
        Self {
            trigger,
            empty_fetches: 0,
        }
    }

    /// Record an empty fetch; `true` exactly once per `empty_batch_count`
    /// consecutive empty fetches.
    pub fn record_empty(&mut self) -> bool {
        self.empty_fetches += 1;
        if self.empty_fetches >= self.trigger.empty_batch_count.max(1) {
            self.empty_fetches = 0;
            return true;
        }
        false
    }

    /// A non-empty fetch breaks the streak.
    pub fn reset(&mut self) {
        self.empty_fetches = 0;
    }

    pub fn min_idle(&self) -> Duration {
        self.trigger.min_idle
    }

    pub fn empty_fetches(&self) -> u32 {
        self.empty_fetches
    }
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case(1, 10)]
    #[case(3, 30)]
    #[case(1000, 3000)]
    fn fires_once_per_streak(#[case] every: u32, #[case] cycles: u32) {
        let mut tracker = ClaimTracker::new(ClaimingTrigger::new(every, Duration::from_secs(1)));
        let fired = (0..cycles).filter(|_| tracker.record_empty()).count() as u32;
        assert_eq!(fired, cycles / every);
    }

    #[test]
    fn non_empty_fetch_restarts_the_streak() {
        let mut tracker = ClaimTracker::new(ClaimingTrigger::new(3, Duration::from_secs(1)));
        assert!(!tracker.record_empty());
        assert!(!tracker.record_empty());
        tracker.reset();
        assert!(!tracker.record_empty());
        assert!(!tracker.record_empty());
        assert!(tracker.record_empty());
        assert_eq!(tracker.empty_fetches(), 0);
    }

    #[test]
    fn defaults() {
        let trigger = ClaimingTrigger::default();
        assert_eq!(trigger.empty_batch_count, 1000);
        assert_eq!(trigger.min_idle, Duration::from_secs(600));
    }
}
