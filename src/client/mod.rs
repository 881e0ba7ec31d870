//! HTTP client for the Athena execution service REST endpoints.

use crate::model::{Execution, ExecutionDetail};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("execution service returned HTTP {status} for {url}")]
    Status { status: u16, url: String },
}

/// Typed client over the execution service REST API.
///
/// The monitor only ever reads execution state through this client (plus the
/// one trigger call that produces an execution id to watch); it never writes
/// runbooks, servers, or credentials.
#[derive(Clone)]
pub struct ExecutionApi {
    client: Client,
    base_url: String,
}

impl ExecutionApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String) -> Result<T, ApiError> {
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(ApiError::Status {
                status: resp.status().as_u16(),
                url,
            });
        }
        Ok(resp.json::<T>().await?)
    }

    /// `GET /executions/{id}` -- the authoritative stored snapshot, including
    /// per-node results once they exist.
    pub async fn get_execution(&self, execution_id: i64) -> Result<ExecutionDetail, ApiError> {
        self.get_json(format!("{}/executions/{}", self.base_url, execution_id))
            .await
    }

    /// `GET /executions?limit=N` -- recent executions, most recent first.
    pub async fn list_executions(&self, limit: usize) -> Result<Vec<Execution>, ApiError> {
        self.get_json(format!("{}/executions?limit={}", self.base_url, limit))
            .await
    }

    /// `POST /runbooks/{id}/execute` -- fire a runbook. Returns the pending
    /// execution record whose id is then handed to the registry.
    pub async fn trigger_runbook(&self, runbook_id: i64) -> Result<Execution, ApiError> {
        let url = format!("{}/runbooks/{}/execute", self.base_url, runbook_id);
        let resp = self.client.post(&url).send().await?;
        if !resp.status().is_success() {
            return Err(ApiError::Status {
                status: resp.status().as_u16(),
                url,
            });
        }
        Ok(resp.json::<Execution>().await?)
    }

    /// `GET /health` -- cheap reachability check.
    pub async fn health(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}
