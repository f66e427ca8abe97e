//! Approval channels

use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;
use tracing::info;

use super::{async_trait, ApprovalChannel, ApprovalRequest};

/// POSTs approval requests as JSON to a chat or ticketing webhook
pub struct WebhookApprovalChannel {
    client: Client,
    url: String,
}

impl WebhookApprovalChannel {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ApprovalChannel for WebhookApprovalChannel {
    async fn request_approval(&self, request: &ApprovalRequest) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .context("Failed to send approval request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Approval webhook returned {}: {}", status, body);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}

/// Records approval requests in the log only
///
/// Operators answer them through the command surface.
#[derive(Debug, Default)]
pub struct LogApprovalChannel;

#[async_trait]
impl ApprovalChannel for LogApprovalChannel {
    async fn request_approval(&self, request: &ApprovalRequest) -> Result<()> {
        info!(
            opportunity_id = %request.opportunity_id,
            opportunity_type = %request.opportunity_type,
            team = %request.team,
            estimated_monthly_savings = request.estimated_monthly_savings,
            risk_score = request.risk_score,
            "Approval required"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
