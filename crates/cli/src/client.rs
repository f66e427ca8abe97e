//! API client for the finops agent command surface

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use url::Url;

/// Non-success answer from the agent
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("API error ({status}): {message}")]
    Other { status: StatusCode, message: String },
}

impl ApiError {
    fn from_response(status: StatusCode, body: &str) -> Self {
        let message = serde_json::from_str::<ErrorResponse>(body)
            .map(|e| e.error)
            .unwrap_or_else(|_| body.to_string());
        match status {
            StatusCode::NOT_FOUND => ApiError::NotFound(message),
            StatusCode::CONFLICT => ApiError::Conflict(message),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ApiError::Rejected(message),
            _ => ApiError::Other { status, message },
        }
    }
}

/// API client for the agent
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await.context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_response(status, &body).into());
        }

        response.json().await.context("Failed to parse response")
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;
        self.send(self.client.get(url)).await
    }

    /// Make a GET request with query parameters; `None` values are left out
    pub async fn get_with_query<T: DeserializeOwned>(&self, path: &str, query: &[(&str, Option<String>)]) -> Result<T> {
        let mut url = self.base_url.join(path).context("Invalid path")?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                if let Some(value) = value {
                    pairs.append_pair(key, value);
                }
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        self.send(self.client.get(url)).await
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;
        self.send(self.client.post(url).json(body)).await
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attribution {
    pub cluster: String,
    pub namespace: String,
    pub workload: String,
    pub team: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: String,
    #[serde(rename = "type")]
    pub opportunity_type: String,
    pub status: String,
    pub workload_id: String,
    pub attribution: Attribution,
    pub estimated_monthly_savings: f64,
    pub confidence: f64,
    pub risk_score: f64,
    pub recommendation: String,
    pub version: u64,
    pub detected_at: String,
    #[serde(default)]
    pub proposal_ref: Option<String>,
    #[serde(default)]
    pub realized_savings: Option<f64>,
    #[serde(default)]
    pub rollback_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub sequence: u64,
    #[serde(default)]
    pub from: Option<String>,
    pub to: String,
    pub version: u64,
    pub at: String,
    #[serde(default)]
    pub cause: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailDecision {
    pub outcome: String,
    pub triggered_policy_names: Vec<String>,
    pub risk_score: f64,
    pub evaluated_at: String,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct History {
    pub opportunity_id: String,
    pub transitions: Vec<AuditEntry>,
    pub decisions: Vec<GuardrailDecision>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub decision: String,
    pub actor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackRequest {
    pub reason: String,
    pub actor: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalRequest {
    pub opportunity_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub opportunity_ids: Vec<String>,
    pub target_system: String,
    pub content_hash: String,
    pub created_at: String,
    #[serde(default)]
    pub review_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImplementedRequest {
    pub reference: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SavingsBucket {
    pub count: usize,
    pub estimated_monthly_savings: f64,
    pub realized_savings: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavingsAggregate {
    pub opportunity_count: usize,
    pub total_estimated_monthly_savings: f64,
    pub total_realized_savings: f64,
    #[serde(default)]
    pub realization_rate: Option<f64>,
    #[serde(default)]
    pub by_team: BTreeMap<String, SavingsBucket>,
    #[serde(default)]
    pub by_type: BTreeMap<String, SavingsBucket>,
    #[serde(default)]
    pub by_cluster: BTreeMap<String, SavingsBucket>,
    #[serde(default)]
    pub by_status: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostAllocation {
    pub team: String,
    pub cluster: String,
    pub namespace: String,
    pub monthly_cost: f64,
    pub workloads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportPeriod {
    pub kind: String,
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedOpportunity {
    pub rank: usize,
    pub id: String,
    #[serde(rename = "type")]
    pub opportunity_type: String,
    pub status: String,
    pub workload: String,
    pub namespace: String,
    pub cluster: String,
    pub team: String,
    pub estimated_monthly_savings: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub period: ReportPeriod,
    pub generated_at: String,
    pub savings: SavingsAggregate,
    pub high_confidence_count: usize,
    pub top_opportunities: Vec<RankedOpportunity>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionCounts {
    pub allowed: usize,
    pub pending_approval: usize,
    pub denied: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorFailure {
    pub detector: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub snapshot_id: String,
    pub period: String,
    pub candidates: usize,
    pub new_opportunities: Vec<String>,
    pub already_tracked: usize,
    pub detector_failures: Vec<DetectorFailure>,
    pub decisions: DecisionCounts,
    pub verified: usize,
    pub realized: usize,
    pub warnings: Vec<String>,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_with_query_skips_missing_values() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/opportunities?status=approved")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("[]")
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let result: Vec<Opportunity> = client
            .get_with_query(
                "api/v1/opportunities",
                &[("status", Some("approved".to_string())), ("team", None)],
            )
            .await
            .unwrap();

        assert!(result.is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_body_is_classified() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/opportunities/opp-1/approval")
            .with_status(409)
            .with_body(r#"{"error":"daily change cap exhausted for 2026-10-19"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let request = ApprovalRequest {
            decision: "approve".to_string(),
            actor: "alice".to_string(),
            reason: None,
            expected_version: None,
        };
        let err = client
            .post::<Opportunity, _>("api/v1/opportunities/opp-1/approval", &request)
            .await
            .unwrap_err();

        match err.downcast_ref::<ApiError>() {
            Some(ApiError::Conflict(message)) => assert!(message.contains("daily change cap")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_parses_opportunity() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/opportunities/opp-1")
            .with_status(200)
            .with_body(
                r#"{"id":"opp-1","type":"cpu_rightsizing","status":"approved","workload_id":"checkout",
                "attribution":{"cluster":"prod-eu","namespace":"shop","workload":"checkout","team":"payments"},
                "estimated_monthly_savings":84.0,"confidence":0.8,"risk_score":0.13,
                "recommendation":"Reduce CPU request","version":2,"detected_at":"2026-10-19T00:00:00Z",
                "fingerprint":"abc","proposal_ref":null}"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let opportunity: Opportunity = client.get("api/v1/opportunities/opp-1").await.unwrap();
        assert_eq!(opportunity.opportunity_type, "cpu_rightsizing");
        assert_eq!(opportunity.attribution.team, "payments");
        assert!(opportunity.rollback_reason.is_none());
    }
}
