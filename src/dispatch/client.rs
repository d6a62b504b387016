//! Request/response channel to the execution service.

use async_trait::async_trait;

use crate::config::Endpoints;
use crate::errors::RunError;
use crate::protocol::{ExecuteRequest, ExecuteResponse, HealthStatus};

/// Submits runs and checks service health.
#[async_trait]
pub trait ExecuteClient: Send + Sync {
    async fn execute(&self, request: &ExecuteRequest) -> Result<ExecuteResponse, RunError>;

    async fn health(&self) -> Result<HealthStatus, RunError>;
}

/// [`ExecuteClient`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpExecuteClient {
    client: reqwest::Client,
    endpoints: Endpoints,
}

impl HttpExecuteClient {
    pub fn new(endpoints: Endpoints) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoints,
        }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Read the body of a response, turning non-2xx statuses into
    /// [`RunError::HttpStatus`].
    async fn body(resp: reqwest::Response) -> Result<String, RunError> {
        let status = resp.status();
        if !status.is_success() {
            return Err(RunError::HttpStatus {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }
        resp.text()
            .await
            .map_err(|e| RunError::Transport(e.to_string()))
    }
}

#[async_trait]
impl ExecuteClient for HttpExecuteClient {
    async fn execute(&self, request: &ExecuteRequest) -> Result<ExecuteResponse, RunError> {
        let resp = self
            .client
            .post(self.endpoints.execute_url())
            .json(request)
            .send()
            .await
            .map_err(|e| RunError::Transport(e.to_string()))?;

        let body = Self::body(resp).await?;
        ExecuteResponse::from_json(&body).map_err(|e| RunError::Decode(e.to_string()))
    }

    async fn health(&self) -> Result<HealthStatus, RunError> {
        let resp = self
            .client
            .get(self.endpoints.health_url())
            .send()
            .await
            .map_err(|e| RunError::Transport(e.to_string()))?;

        let body = Self::body(resp).await?;
        serde_json::from_str(&body).map_err(|e| RunError::Decode(e.to_string()))
    }
}
