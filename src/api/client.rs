//! HTTP client for a node's admin API.

use super::protocol::*;
use crate::replication::types::LogIndex;

use anyhow::Result;
use serde::Serialize;
use std::net::SocketAddr;
use std::time::Duration;

/// Per-request timeout and attempt budget.
#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    timeout: Duration,
    attempts: usize,
    /// Whether any failure may be retried. Otherwise only failures to
    /// connect are, since the request never reached the node.
    idempotent: bool,
}

/// Submissions wait for replication and are not idempotent at the HTTP
/// level.
const SUBMIT_RETRY: RetryPolicy = RetryPolicy {
    timeout: Duration::from_secs(30),
    attempts: 3,
    idempotent: false,
};

const READ_RETRY: RetryPolicy = RetryPolicy {
    timeout: Duration::from_secs(5),
    attempts: 3,
    idempotent: true,
};

pub struct ClusterClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl ClusterClient {
    pub fn new(node_http_addr: SocketAddr) -> Self {
        Self {
            base_url: format!("http://{}", node_http_addr),
            http_client: reqwest::Client::new(),
        }
    }

    /// Submits `payload` under `kind` and returns the committed index.
    pub async fn submit<T: Serialize>(&self, kind: &str, payload: &T) -> Result<LogIndex> {
        let request = SubmitRequest {
            kind: kind.to_string(),
            payload: serde_json::to_value(payload)?,
        };

        let response = self
            .post_with_retry(format!("{}{}", self.base_url, ENDPOINT_SUBMIT), &request)
            .await?;
        let status = response.status();
        let body: SubmitResponse = response.json().await?;

        match (body.success, body.index) {
            (true, Some(index)) => Ok(index),
            _ => Err(anyhow::anyhow!(
                "Submit failed ({}): {}",
                status,
                body.error.unwrap_or_default()
            )),
        }
    }

    pub async fn members(&self) -> Result<MembersResponse> {
        let response = self
            .get_with_retry(format!("{}{}", self.base_url, ENDPOINT_MEMBERS))
            .await?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Members request failed {}", response.status()));
        }
        Ok(response.json().await?)
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let response = self
            .get_with_retry(format!("{}{}", self.base_url, ENDPOINT_HEALTH))
            .await?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Health request failed {}", response.status()));
        }
        Ok(response.json().await?)
    }

    pub async fn entry(&self, index: LogIndex) -> Result<Option<EntryResponse>> {
        let response = self
            .get_with_retry(format!("{}{}/{}", self.base_url, ENDPOINT_LOG, index))
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Log request failed {}", response.status()));
        }
        Ok(response.json().await?)
    }

    async fn post_with_retry<T: Serialize>(&self, url: String, payload: &T) -> Result<reqwest::Response> {
        self.send_with_retry(|| self.http_client.post(url.as_str()).json(payload), SUBMIT_RETRY)
            .await
    }

    async fn get_with_retry(&self, url: String) -> Result<reqwest::Response> {
        self.send_with_retry(|| self.http_client.get(url.as_str()), READ_RETRY)
            .await
    }

    async fn send_with_retry(
        &self,
        request: impl Fn() -> reqwest::RequestBuilder,
        policy: RetryPolicy,
    ) -> Result<reqwest::Response> {
        let mut delay_ms = 150u64;

        for attempt in 0..policy.attempts {
            match request().timeout(policy.timeout).send().await {
                Ok(resp) => return Ok(resp),
                Err(e) if attempt + 1 < policy.attempts && (policy.idempotent || e.is_connect()) => {
                    tracing::debug!("Request attempt {} failed: {}", attempt + 1, e);
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
                Err(e) => return Err(anyhow::anyhow!(e)),
            }
        }

        Err(anyhow::anyhow!("Retry attempts exhausted"))
    }
}
