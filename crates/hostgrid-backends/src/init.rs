//! Instance initialization: first-run setup of a freshly deployed instance.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};

use hostgrid_core::AdminCredentials;

use crate::error::{BackendError, BackendResult};

/// Path of the setup endpoint on every instance.
pub const SETUP_PATH: &str = "/api/setup";

#[async_trait]
pub trait InstanceInitializer: Send + Sync {
    /// Run first-time setup against `endpoint_url`, creating the admin account.
    async fn initialize(&self, endpoint_url: &str, admin: &AdminCredentials) -> BackendResult<()>;
}

/// Calls the instance's setup endpoint over HTTP.
#[derive(Debug, Clone)]
pub struct HttpInitializer {
    client: Client,
    timeout: Duration,
}

#[derive(Serialize)]
struct SetupRequest<'a> {
    admin_email: &'a str,
    admin_password: &'a str,
}

impl HttpInitializer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl InstanceInitializer for HttpInitializer {
    async fn initialize(&self, endpoint_url: &str, admin: &AdminCredentials) -> BackendResult<()> {
        let url = format!("{}{SETUP_PATH}", endpoint_url.trim_end_matches('/'));
        debug!(%url, "calling instance setup");

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&SetupRequest {
                admin_email: &admin.email,
                admin_password: &admin.password,
            })
            .send()
            .await
            .map_err(|e| BackendError::Transport {
                url: url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status {
                url,
                status: status.as_u16(),
            });
        }

        info!(%url, "instance setup complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accept one connection and answer it with `status_line`.
    async fn one_shot_server(status_line: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = stream.read(&mut buf).await.unwrap();
            let response = format!("HTTP/1.1 {status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            stream.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).into_owned()
        });
        (format!("http://{addr}"), handle)
    }

    fn admin() -> AdminCredentials {
        AdminCredentials {
            email: "owner@example.com".to_string(),
            password: "correct-horse".to_string(),
        }
    }

    #[tokio::test]
    async fn posts_to_setup_endpoint() {
        let (base, server) = one_shot_server("200 OK").await;
        let init = HttpInitializer::new(Duration::from_secs(5));
        init.initialize(&format!("{base}/"), &admin()).await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/setup HTTP/1.1"));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let (base, server) = one_shot_server("500 Internal Server Error").await;
        let init = HttpInitializer::new(Duration::from_secs(5));
        let err = init.initialize(&base, &admin()).await.unwrap_err();
        assert!(matches!(err, BackendError::Status { status: 500, .. }));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let init = HttpInitializer::new(Duration::from_secs(2));
        let err = init
            .initialize(&format!("http://{addr}"), &admin())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Transport { .. }));
    }
}
