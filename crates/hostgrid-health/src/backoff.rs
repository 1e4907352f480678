//! Exponential backoff between readiness probes.

use std::time::Duration;

use tracing::debug;

use hostgrid_core::HealthSettings;

use crate::probe::ProbeResult;

/// Tracks consecutive probe failures and the wait before the next probe.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    consecutive_failures: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
            consecutive_failures: 0,
        }
    }

    pub fn from_settings(settings: &HealthSettings) -> Self {
        Self::new(settings.initial_backoff, settings.max_backoff)
    }

    /// Record a probe result and return how long to wait before the next one.
    ///
    /// A failure returns the current interval and doubles it up to the cap.
    /// A success resets the interval.
    pub fn record(&mut self, result: ProbeResult) -> Duration {
        match result {
            ProbeResult::Healthy => {
                self.consecutive_failures = 0;
                self.current = self.initial;
                Duration::ZERO
            }
            ProbeResult::Unhealthy | ProbeResult::Failed => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                let wait = self.current;
                self.current = self.current.saturating_mul(2).min(self.max);
                debug!(
                    failures = self.consecutive_failures,
                    wait_ms = wait.as_millis() as u64,
                    "probe failed, backing off"
                );
                wait
            }
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Wait that the next failure will return.
    pub fn next_interval(&self) -> Duration {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_failure() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(8));
        assert_eq!(backoff.record(ProbeResult::Unhealthy), Duration::from_secs(1));
        assert_eq!(backoff.record(ProbeResult::Failed), Duration::from_secs(2));
        assert_eq!(backoff.record(ProbeResult::Unhealthy), Duration::from_secs(4));
        assert_eq!(backoff.next_interval(), Duration::from_secs(8));
        assert_eq!(backoff.consecutive_failures(), 3);
    }

    #[test]
    fn backoff_caps_at_max() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(8));
        for _ in 0..10 {
            backoff.record(ProbeResult::Failed);
        }
        // 1 → 2 → 4 → 8 → 8 ...
        assert_eq!(backoff.next_interval(), Duration::from_secs(8));
        assert_eq!(backoff.record(ProbeResult::Failed), Duration::from_secs(8));
    }

    #[test]
    fn huge_intervals_saturate() {
        let mut backoff = Backoff::new(Duration::MAX / 2 + Duration::from_secs(1), Duration::MAX);
        backoff.record(ProbeResult::Failed);
        assert_eq!(backoff.next_interval(), Duration::MAX);
        assert_eq!(backoff.record(ProbeResult::Failed), Duration::MAX);
    }

    #[test]
    fn success_resets_backoff() {
        let mut backoff = Backoff::from_settings(&HealthSettings::default());
        backoff.record(ProbeResult::Unhealthy);
        backoff.record(ProbeResult::Unhealthy);
        assert_eq!(backoff.next_interval(), Duration::from_secs(4));

        assert_eq!(backoff.record(ProbeResult::Healthy), Duration::ZERO);
        assert_eq!(backoff.next_interval(), Duration::from_secs(1));
        assert_eq!(backoff.consecutive_failures(), 0);
    }
}
