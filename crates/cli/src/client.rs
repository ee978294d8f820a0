//! Client for a running burst-runner's health API

use anyhow::{Context, Result};
use experiment_lib::{HealthResponse, ReadinessResponse};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

pub struct RunnerClient {
    client: Client,
    base_url: Url,
}

impl RunnerClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid runner URL")?;

        Ok(Self { client, base_url })
    }

    /// GET a JSON body; 503 still carries a status document
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;
        debug!(url = %url, "Querying runner");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to reach runner")?;

        let status = response.status();
        debug!(url = %response.url(), status = status.as_u16(), "Runner responded");
        if !status.is_success() && status != StatusCode::SERVICE_UNAVAILABLE {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Runner error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse runner response")
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        self.get("healthz").await
    }

    pub async fn readiness(&self) -> Result<ReadinessResponse> {
        self.get("readyz").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use experiment_lib::{ComponentStatus, DriverState};
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_health_and_unready_readiness() {
        let mut server = mockito::Server::new_async().await;
        let _health = server
            .mock("GET", "/healthz")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status":"degraded","phase":"sampling_and_loading","components":{"executor":{"status":"degraded","message":"burst 1 unreachable","last_check_timestamp":1777629600}}}"#)
            .create_async()
            .await;
        let _ready = server
            .mock("GET", "/readyz")
            .with_status(503)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ready":false,"phase":"draining","reason":"experiment draining"}"#)
            .create_async()
            .await;

        let client = RunnerClient::new(&server.url()).unwrap();

        let health = client.health().await.unwrap();
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(health.phase, DriverState::SamplingAndLoading);
        assert_eq!(
            health.components["executor"].message.as_deref(),
            Some("burst 1 unreachable")
        );

        let readiness = client.readiness().await.unwrap();
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("experiment draining"));
    }

    #[tokio::test]
    async fn test_server_error_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/healthz")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let client = RunnerClient::new(&server.url()).unwrap();
        let err = client.health().await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_requests_are_logged_at_debug() {
        let mut server = mockito::Server::new_async().await;
        let _ready = server
            .mock("GET", "/readyz")
            .with_status(503)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ready":false,"phase":"idle","reason":"experiment not started"}"#)
            .create_async()
            .await;

        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let client = RunnerClient::new(&server.url()).unwrap();
        client.readiness().await.unwrap();

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("Querying runner"));
        assert!(output.contains("status=503"));
        assert!(output.contains("/readyz"));
    }

    #[test]
    fn test_invalid_url() {
        assert!(RunnerClient::new("not a url").is_err());
    }
}
