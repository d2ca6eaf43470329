//! HTTP side of plan approval: `POST {api_url}/plans/{id}/approve`.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::core::errors;
use crate::core::types::ErrorRecord;

/// Request body for the approve endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ApprovalBody {
    pub m_plan_id: String,
    pub plan_id: String,
    pub approved: bool,
    pub feedback: String,
}

#[async_trait]
pub trait ApprovalApi: Send + Sync {
    /// Returns the name of the API implementation.
    fn name(&self) -> &str;

    /// Sends one decision. Failures come back already classified.
    async fn submit(&self, request_id: &str, body: &ApprovalBody) -> Result<(), ErrorRecord>;
}

/// Approval API over plain HTTP (the backend's REST surface).
pub struct HttpApprovalApi {
    base_url: String,
    api_token: Option<String>,
    client: reqwest::Client,
}

impl HttpApprovalApi {
    pub fn new(base_url: impl Into<String>, api_token: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token,
            client,
        }
    }

    /// The request id is one path segment, percent-encoded.
    fn approve_url(&self, request_id: &str) -> Result<reqwest::Url, ErrorRecord> {
        let bad_base = |reason: &str| {
            ErrorRecord::transport(format!("invalid API URL '{}': {}", self.base_url, reason))
        };
        let mut url = reqwest::Url::parse(&self.base_url).map_err(|e| bad_base(&e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| bad_base("cannot be a base"))?
            .pop_if_empty()
            .push("plans")
            .push(request_id)
            .push("approve");
        Ok(url)
    }
}

#[async_trait]
impl ApprovalApi for HttpApprovalApi {
    fn name(&self) -> &str {
        "http"
    }

    async fn submit(&self, request_id: &str, body: &ApprovalBody) -> Result<(), ErrorRecord> {
        let url = self.approve_url(request_id)?;
        info!("POST {} (approved={})", url, body.approved);

        let mut request = self.client.post(url).json(body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            warn!("Approval request failed: {}", e);
            errors::classify_network(&e)
        })?;

        let status = response.status();
        debug!("Approval response status: {}", status);
        if status.is_success() {
            return Ok(());
        }

        let err_body = response.text().await.unwrap_or_default();
        warn!("Approval API error: {} - {}", status.as_u16(), err_body);
        Err(errors::classify_http(status.as_u16(), &err_body))
    }
}
