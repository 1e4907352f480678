//! ReadinessProber: bounded wait for a fresh instance to come up.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use hostgrid_core::HealthSettings;

use crate::backoff::Backoff;
use crate::error::{HealthError, HealthResult};
use crate::probe::{HealthProbe, ProbeResult};

/// Resolves once `cancel` carries `true`. Never resolves if the sender is
/// dropped without cancelling.
pub async fn cancellation(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Polls a health URL until it answers 2xx or the budget is spent.
#[derive(Clone)]
pub struct ReadinessProber {
    probe: Arc<dyn HealthProbe>,
    settings: HealthSettings,
}

impl ReadinessProber {
    pub fn new(probe: Arc<dyn HealthProbe>, settings: HealthSettings) -> Self {
        Self { probe, settings }
    }

    pub fn settings(&self) -> &HealthSettings {
        &self.settings
    }

    /// One probe, bounded by the probe timeout.
    pub async fn probe_once(&self, url: &str) -> ProbeResult {
        match tokio::time::timeout(self.settings.probe_timeout, self.probe.probe(url)).await {
            Ok(result) => result,
            Err(_) => {
                debug!(%url, "health probe timed out");
                ProbeResult::Failed
            }
        }
    }

    /// Whether `url` answers healthy right now.
    pub async fn check_once(&self, url: &str) -> bool {
        self.probe_once(url).await == ProbeResult::Healthy
    }

    /// Probe `url` with backoff until healthy.
    ///
    /// Returns the number of probes made. The last probe happens at the
    /// budget deadline at the latest.
    pub async fn wait_ready(
        &self,
        url: &str,
        cancel: &mut watch::Receiver<bool>,
    ) -> HealthResult<u32> {
        let started = Instant::now();
        // A budget past the clock's range means no deadline.
        let deadline = started.checked_add(self.settings.budget);
        let mut backoff = Backoff::from_settings(&self.settings);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let result = tokio::select! {
                biased;
                _ = cancellation(cancel) => {
                    warn!(%url, attempts, "readiness wait cancelled");
                    return Err(HealthError::Cancelled { attempts });
                }
                result = self.probe_once(url) => result,
            };

            if result == ProbeResult::Healthy {
                info!(%url, attempts, elapsed_ms = started.elapsed().as_millis() as u64, "instance ready");
                return Ok(attempts);
            }

            let wait = backoff.record(result);
            let now = Instant::now();
            let wait = match deadline {
                Some(deadline) if now >= deadline => {
                    let elapsed = now - started;
                    warn!(%url, attempts, elapsed_ms = elapsed.as_millis() as u64, "instance never became ready");
                    return Err(HealthError::Timeout { attempts, elapsed });
                }
                Some(deadline) => wait.min(deadline - now),
                None => wait,
            };

            tokio::select! {
                biased;
                _ = cancellation(cancel) => {
                    warn!(%url, attempts, "readiness wait cancelled");
                    return Err(HealthError::Cancelled { attempts });
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ScriptedProbe;
    use std::time::Duration;

    fn prober(probe: Arc<ScriptedProbe>) -> ReadinessProber {
        ReadinessProber::new(probe, HealthSettings::default())
    }

    #[tokio::test(start_paused = true)]
    async fn ready_on_first_probe() {
        let probe = Arc::new(ScriptedProbe::always(ProbeResult::Healthy));
        let (_tx, mut rx) = watch::channel(false);
        let attempts = prober(probe.clone())
            .wait_ready("https://x/health", &mut rx)
            .await
            .unwrap();
        assert_eq!(attempts, 1);
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ready_after_backoff() {
        let probe = Arc::new(ScriptedProbe::new([
            ProbeResult::Failed,
            ProbeResult::Unhealthy,
            ProbeResult::Healthy,
        ]));
        let (_tx, mut rx) = watch::channel(false);
        let started = Instant::now();
        let attempts = prober(probe)
            .wait_ready("https://x/health", &mut rx)
            .await
            .unwrap();
        assert_eq!(attempts, 3);
        // Waited 1s then 2s.
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_at_budget() {
        let probe = Arc::new(ScriptedProbe::always(ProbeResult::Unhealthy));
        let (_tx, mut rx) = watch::channel(false);
        let err = prober(probe)
            .wait_ready("https://x/health", &mut rx)
            .await
            .unwrap_err();
        // Probes at 0, 1, 3, 7, 15, 23, 31, 39 and the 45s deadline.
        match err {
            HealthError::Timeout { attempts, elapsed } => {
                assert_eq!(attempts, 9);
                assert!(elapsed >= Duration::from_secs(45));
                assert!(elapsed < Duration::from_secs(46));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let probe = Arc::new(ScriptedProbe::always(ProbeResult::Failed));
        let (tx, mut rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            let _ = tx.send(true);
        });

        let started = Instant::now();
        let err = prober(probe)
            .wait_ready("https://x/health", &mut rx)
            .await
            .unwrap_err();
        assert_eq!(err, HealthError::Cancelled { attempts: 2 });
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_probe_counts_as_failed() {
        struct Hanging;

        #[async_trait::async_trait]
        impl HealthProbe for Hanging {
            async fn probe(&self, _url: &str) -> ProbeResult {
                std::future::pending().await
            }
        }

        let prober = ReadinessProber::new(Arc::new(Hanging), HealthSettings::default());
        assert_eq!(prober.probe_once("https://x/health").await, ProbeResult::Failed);
        assert!(!prober.check_once("https://x/health").await);
    }
}
