//! Boundaries to external collaborators
//!
//! The engine only talks to the outside world through these traits: the
//! snapshot provider, the cost baseline source, the approval channel and
//! the version-control sink for change proposals. File-backed and
//! HTTP-backed implementations live in the submodules.

mod approval;
mod files;
mod retry;

pub use approval::{LogApprovalChannel, WebhookApprovalChannel};
pub use files::{DirectoryProposalSink, FileBaselineSource, FileSnapshotProvider, StaticSnapshotProvider};
pub use retry::{with_retry, RetryPolicy};

use anyhow::Result;
pub use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{ClusterSnapshot, CostBaseline, Opportunity, OpportunityType};
use crate::proposal::ChangeProposal;

/// Source of point-in-time cluster snapshots
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    async fn fetch(&self) -> Result<ClusterSnapshot>;

    fn describe(&self) -> String;
}

/// Source of per-workload cost baselines
#[async_trait]
pub trait BaselineSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<CostBaseline>>;
}

/// Outbound notification asking a human to approve or deny
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub opportunity_id: String,
    #[serde(rename = "type")]
    pub opportunity_type: OpportunityType,
    pub workload_id: String,
    pub team: String,
    pub estimated_monthly_savings: f64,
    pub confidence: f64,
    pub risk_score: f64,
    pub recommendation: String,
    pub proposal_ref: Option<String>,
}

impl From<&Opportunity> for ApprovalRequest {
    fn from(opportunity: &Opportunity) -> Self {
        Self {
            opportunity_id: opportunity.id.clone(),
            opportunity_type: opportunity.opportunity_type,
            workload_id: opportunity.workload_id.clone(),
            team: opportunity.attribution.team.clone(),
            estimated_monthly_savings: opportunity.estimated_monthly_savings,
            confidence: opportunity.confidence,
            risk_score: opportunity.risk_score,
            recommendation: opportunity.recommendation.clone(),
            proposal_ref: opportunity.proposal_ref.clone(),
        }
    }
}

/// Chat or ticketing channel for approval requests
///
/// Responses come back asynchronously through the command surface.
#[async_trait]
pub trait ApprovalChannel: Send + Sync {
    async fn request_approval(&self, request: &ApprovalRequest) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// Version-control destination for generated change proposals
#[async_trait]
pub trait ProposalSink: Send + Sync {
    /// Submit the proposal for review; returns the review reference
    async fn submit(&self, proposal: &ChangeProposal) -> Result<String>;

    fn name(&self) -> &'static str;
}
