//! Failure backoff and admin-alert suppression.
//!
//! Two independent suppression flags: one for broker connectivity failures,
//! one for everything else. Each flag lets exactly one alert through per
//! failure episode. A single successful tick clears both flags and resets the
//! interval to its base.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Connectivity,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureState {
    base: Duration,
    step: Duration,
    max: Duration,
    current: Duration,
    connectivity_alerted: bool,
    unknown_alerted: bool,
    consecutive_failures: u32,
}

impl FailureState {
    /// `max` below `base` is clamped up to `base`.
    pub fn new(base: Duration, step: Duration, max: Duration) -> Self {
        Self {
            base,
            step,
            max: max.max(base),
            current: base,
            connectivity_alerted: false,
            unknown_alerted: false,
            consecutive_failures: 0,
        }
    }

    /// Sleep before the next tick.
    pub fn interval(&self) -> Duration {
        self.current
    }

    pub fn base_interval(&self) -> Duration {
        self.base
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_alerted(&self, kind: FailureKind) -> bool {
        match kind {
            FailureKind::Connectivity => self.connectivity_alerted,
            FailureKind::Unknown => self.unknown_alerted,
        }
    }

    /// Returns true if this success ended a failure episode.
    pub fn record_success(&mut self) -> bool {
        let recovered = self.consecutive_failures > 0;
        self.current = self.base;
        self.connectivity_alerted = false;
        self.unknown_alerted = false;
        self.consecutive_failures = 0;
        recovered
    }

    /// Grow the interval by one step (capped) and report whether admins
    /// should be alerted about this failure.
    pub fn record_failure(&mut self, kind: FailureKind) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.current = self.current.saturating_add(self.step).min(self.max);

        let flag = match kind {
            FailureKind::Connectivity => &mut self.connectivity_alerted,
            FailureKind::Unknown => &mut self.unknown_alerted,
        };
        let alert = !*flag;
        *flag = true;
        alert
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn interval_grows_by_step_and_caps() {
        let mut s = FailureState::new(secs(5), secs(5), secs(17));
        let mut seen = Vec::new();
        for _ in 0..5 {
            s.record_failure(FailureKind::Connectivity);
            seen.push(s.interval().as_secs());
        }
        assert_eq!(seen, vec![10, 15, 17, 17, 17]);
    }

    #[test]
    fn one_alert_per_kind_per_episode() {
        let mut s = FailureState::new(secs(5), secs(5), secs(300));
        assert!(s.record_failure(FailureKind::Connectivity));
        assert!(!s.record_failure(FailureKind::Connectivity));
        // The other kind has its own flag.
        assert!(s.record_failure(FailureKind::Unknown));
        assert!(!s.record_failure(FailureKind::Unknown));
        assert!(!s.record_failure(FailureKind::Connectivity));
        assert_eq!(s.consecutive_failures(), 5);
    }

    #[test]
    fn success_resets_interval_and_both_flags() {
        let mut s = FailureState::new(secs(5), secs(5), secs(300));
        s.record_failure(FailureKind::Connectivity);
        s.record_failure(FailureKind::Unknown);
        assert!(s.record_success());
        assert_eq!(s.interval(), secs(5));
        assert!(!s.is_alerted(FailureKind::Connectivity));
        assert!(!s.is_alerted(FailureKind::Unknown));
        assert!(s.record_failure(FailureKind::Connectivity));
    }

    #[test]
    fn success_without_prior_failure_is_not_a_recovery() {
        let mut s = FailureState::new(secs(5), secs(5), secs(300));
        assert!(!s.record_success());
    }

    #[test]
    fn max_below_base_is_clamped() {
        let mut s = FailureState::new(secs(10), secs(5), secs(1));
        s.record_failure(FailureKind::Unknown);
        assert_eq!(s.interval(), secs(10));
    }
}
