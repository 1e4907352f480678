//! Single readiness probes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

/// Result of a single health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The health endpoint returned 2xx.
    Healthy,
    /// The health endpoint returned non-2xx.
    Unhealthy,
    /// The probe could not be executed (connection error or timeout).
    Failed,
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, url: &str) -> ProbeResult;
}

/// GET probe over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, url: &str) -> ProbeResult {
        match self
            .client
            .get(url)
            .header("user-agent", "hostgrid-health/0.1")
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => ProbeResult::Healthy,
            Ok(resp) => {
                debug!(status = %resp.status(), %url, "health probe non-2xx");
                ProbeResult::Unhealthy
            }
            Err(e) => {
                debug!(error = %e, %url, "health probe request failed");
                ProbeResult::Failed
            }
        }
    }
}

/// Replays a fixed sequence of results, then repeats the last one.
#[derive(Debug)]
pub struct ScriptedProbe {
    script: Mutex<VecDeque<ProbeResult>>,
    fallback: ProbeResult,
    calls: AtomicU32,
}

impl ScriptedProbe {
    pub fn new(script: impl IntoIterator<Item = ProbeResult>) -> Self {
        let script: VecDeque<ProbeResult> = script.into_iter().collect();
        let fallback = script.back().copied().unwrap_or(ProbeResult::Healthy);
        Self {
            script: Mutex::new(script),
            fallback,
            calls: AtomicU32::new(0),
        }
    }

    /// Answers `result` forever.
    pub fn always(result: ProbeResult) -> Self {
        Self::new([result])
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self, _url: &str) -> ProbeResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(self.fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_once(status_line: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let response =
                format!("HTTP/1.1 {status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            let _ = stream.write_all(response.as_bytes()).await;
        });
        format!("http://{addr}/health")
    }

    #[tokio::test]
    async fn http_probe_healthy_on_2xx() {
        let url = serve_once("200 OK").await;
        let probe = HttpProbe::new(Duration::from_secs(2));
        assert_eq!(probe.probe(&url).await, ProbeResult::Healthy);
    }

    #[tokio::test]
    async fn http_probe_unhealthy_on_5xx() {
        let url = serve_once("503 Service Unavailable").await;
        let probe = HttpProbe::new(Duration::from_secs(2));
        assert_eq!(probe.probe(&url).await, ProbeResult::Unhealthy);
    }

    #[tokio::test]
    async fn http_probe_fails_when_nothing_listens() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = HttpProbe::new(Duration::from_secs(2));
        assert_eq!(
            probe.probe(&format!("http://{addr}/health")).await,
            ProbeResult::Failed
        );
    }

    #[tokio::test]
    async fn scripted_probe_repeats_last_result() {
        let probe = ScriptedProbe::new([ProbeResult::Failed, ProbeResult::Healthy]);
        assert_eq!(probe.probe("x").await, ProbeResult::Failed);
        assert_eq!(probe.probe("x").await, ProbeResult::Healthy);
        assert_eq!(probe.probe("x").await, ProbeResult::Healthy);
        assert_eq!(probe.calls(), 3);
    }
}
