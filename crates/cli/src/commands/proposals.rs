//! Change proposal CLI commands

use anyhow::{bail, Result};
use tabled::Tabled;

use crate::client::{ApiClient, ImplementedRequest, Opportunity, Proposal, ProposalRequest};
use crate::output::{format_timestamp, print_info, print_json, print_rows, print_success, print_warning, OutputFormat};

/// Row for proposals table
#[derive(Tabled)]
struct ProposalRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Opportunities")]
    opportunities: usize,
    #[tabled(rename = "Created")]
    created_at: String,
    #[tabled(rename = "Review")]
    review_ref: String,
}

/// List stored proposals
pub async fn list_proposals(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let proposals: Vec<Proposal> = client.get("api/v1/proposals").await?;

    match format {
        OutputFormat::Json => print_json(&proposals)?,
        OutputFormat::Table => {
            if proposals.is_empty() {
                print_warning("No proposals found");
                return Ok(());
            }
            let rows = proposals
                .iter()
                .map(|p| ProposalRow {
                    id: p.id.clone(),
                    target: p.target_system.clone(),
                    opportunities: p.opportunity_ids.len(),
                    created_at: format_timestamp(&p.created_at),
                    review_ref: p.review_ref.clone().unwrap_or_else(|| "-".to_string()),
                })
                .collect();
            print_rows(rows);
        }
    }

    Ok(())
}

/// Create a proposal from approved opportunities
pub async fn propose(client: &ApiClient, ids: Vec<String>, format: OutputFormat) -> Result<()> {
    if ids.is_empty() {
        bail!("At least one opportunity id is required");
    }
    let proposal: Proposal = client
        .post("api/v1/proposals", &ProposalRequest { opportunity_ids: ids })
        .await?;

    match format {
        OutputFormat::Json => print_json(&proposal)?,
        OutputFormat::Table => {
            print_success(&format!(
                "Proposal {} covers {} opportunities ({})",
                proposal.id,
                proposal.opportunity_ids.len(),
                proposal.target_system
            ));
            print_info(&format!("Content hash: {}", proposal.content_hash));
            if let Some(review) = &proposal.review_ref {
                print_info(&format!("Review: {}", review));
            }
        }
    }

    Ok(())
}

/// Record that a proposal was merged and applied
pub async fn mark_implemented(client: &ApiClient, proposal_id: &str, reference: &str, format: OutputFormat) -> Result<()> {
    let updated: Vec<Opportunity> = client
        .post(
            &format!("api/v1/proposals/{}/implemented", proposal_id),
            &ImplementedRequest {
                reference: reference.to_string(),
            },
        )
        .await?;

    match format {
        OutputFormat::Json => print_json(&updated)?,
        OutputFormat::Table => {
            print_success(&format!(
                "Proposal {} implemented at {}: {} opportunities updated",
                proposal_id,
                reference,
                updated.len()
            ));
        }
    }

    Ok(())
}
