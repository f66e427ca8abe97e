//! Opportunity-related CLI commands

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{ApiClient, ApprovalRequest, History, Opportunity, RollbackRequest};
use crate::output::{
    color_confidence, color_status, format_currency, format_timestamp, print_json, print_rows,
    print_success, print_warning, OutputFormat,
};

/// Row for opportunities table
#[derive(Tabled)]
struct OpportunityRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Type")]
    opportunity_type: String,
    #[tabled(rename = "Team")]
    team: String,
    #[tabled(rename = "Workload")]
    workload: String,
    #[tabled(rename = "Savings/mo")]
    savings: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
    #[tabled(rename = "Risk")]
    risk: String,
    #[tabled(rename = "Status")]
    status: String,
}

impl From<&Opportunity> for OpportunityRow {
    fn from(o: &Opportunity) -> Self {
        Self {
            id: o.id.clone(),
            opportunity_type: o.opportunity_type.clone(),
            team: o.attribution.team.clone(),
            workload: format!("{}/{}", o.attribution.namespace, o.attribution.workload),
            savings: format_currency(o.estimated_monthly_savings),
            confidence: color_confidence(o.confidence),
            risk: format!("{:.2}", o.risk_score),
            status: color_status(&o.status),
        }
    }
}

/// Row for the transition history table
#[derive(Tabled)]
struct TransitionRow {
    #[tabled(rename = "#")]
    sequence: u64,
    #[tabled(rename = "At")]
    at: String,
    #[tabled(rename = "From")]
    from: String,
    #[tabled(rename = "To")]
    to: String,
    #[tabled(rename = "Version")]
    version: u64,
    #[tabled(rename = "Cause")]
    cause: String,
}

/// Row for the guardrail decisions table
#[derive(Tabled)]
struct DecisionRow {
    #[tabled(rename = "Evaluated")]
    evaluated_at: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Policies")]
    policies: String,
    #[tabled(rename = "Risk")]
    risk: String,
}

/// Filters for listing opportunities
#[derive(Debug, Default)]
pub struct ListFilter {
    pub status: Option<String>,
    pub opportunity_type: Option<String>,
    pub team: Option<String>,
    pub cluster: Option<String>,
}

/// List opportunities with optional filters
pub async fn list_opportunities(client: &ApiClient, filter: ListFilter, format: OutputFormat) -> Result<()> {
    let opportunities: Vec<Opportunity> = client
        .get_with_query(
            "api/v1/opportunities",
            &[
                ("status", filter.status),
                ("type", filter.opportunity_type),
                ("team", filter.team),
                ("cluster", filter.cluster),
            ],
        )
        .await?;

    match format {
        OutputFormat::Json => print_json(&opportunities)?,
        OutputFormat::Table => {
            if opportunities.is_empty() {
                print_warning("No opportunities found");
                return Ok(());
            }

            let total: f64 = opportunities.iter().map(|o| o.estimated_monthly_savings).sum();
            print_rows(opportunities.iter().map(OpportunityRow::from).collect());
            println!(
                "\nTotal: {} opportunities, {} per month",
                opportunities.len(),
                format_currency(total).green()
            );
        }
    }

    Ok(())
}

/// Show one opportunity in detail
pub async fn get_opportunity(client: &ApiClient, id: &str, format: OutputFormat) -> Result<()> {
    let opportunity: Opportunity = client.get(&format!("api/v1/opportunities/{}", id)).await?;

    match format {
        OutputFormat::Json => print_json(&opportunity)?,
        OutputFormat::Table => print_opportunity(&opportunity),
    }

    Ok(())
}

fn print_opportunity(o: &Opportunity) {
    println!("{}", "Opportunity".bold());
    println!("{}", "=".repeat(50));
    println!("ID:                     {}", o.id.cyan());
    println!("Type:                   {}", o.opportunity_type);
    println!("Status:                 {}", color_status(&o.status));
    println!("Version:                {}", o.version);
    println!(
        "Workload:               {}/{}/{}",
        o.attribution.cluster, o.attribution.namespace, o.attribution.workload
    );
    println!("Team:                   {}", o.attribution.team);
    println!("Detected:               {}", format_timestamp(&o.detected_at));
    println!();

    println!("{}", "Assessment".bold());
    println!("{}", "-".repeat(50));
    println!(
        "Estimated savings:      {}/mo",
        format_currency(o.estimated_monthly_savings).green()
    );
    println!("Confidence:             {}", color_confidence(o.confidence));
    println!("Risk score:             {:.2}", o.risk_score);
    if let Some(realized) = o.realized_savings {
        println!("Realized savings:       {}", format_currency(realized).green());
    }
    if let Some(proposal) = &o.proposal_ref {
        println!("Proposal:               {}", proposal);
    }
    if let Some(reason) = &o.rollback_reason {
        println!("Rollback reason:        {}", reason.red());
    }
    println!();
    println!("{}", o.recommendation);
}

/// Show the audit trail and guardrail decisions of an opportunity
pub async fn show_history(client: &ApiClient, id: &str, format: OutputFormat) -> Result<()> {
    let history: History = client
        .get(&format!("api/v1/opportunities/{}/history", id))
        .await?;

    match format {
        OutputFormat::Json => print_json(&history)?,
        OutputFormat::Table => {
            println!("{} {}", "History of".bold(), history.opportunity_id.cyan());
            let transitions = history
                .transitions
                .iter()
                .map(|t| TransitionRow {
                    sequence: t.sequence,
                    at: format_timestamp(&t.at),
                    from: t.from.as_deref().map(color_status).unwrap_or_else(|| "-".to_string()),
                    to: color_status(&t.to),
                    version: t.version,
                    cause: t
                        .cause
                        .as_ref()
                        .and_then(|c| c.get("cause"))
                        .and_then(|c| c.as_str())
                        .unwrap_or("created")
                        .to_string(),
                })
                .collect();
            print_rows(transitions);

            if history.decisions.is_empty() {
                return Ok(());
            }
            println!("\n{}", "Guardrail decisions".bold());
            let decisions = history
                .decisions
                .iter()
                .map(|d| DecisionRow {
                    evaluated_at: format_timestamp(&d.evaluated_at),
                    outcome: color_status(&d.outcome),
                    policies: match &d.error {
                        Some(error) => format!("error: {}", error),
                        None if d.triggered_policy_names.is_empty() => "-".to_string(),
                        None => d.triggered_policy_names.join(", "),
                    },
                    risk: format!("{:.2}", d.risk_score),
                })
                .collect();
            print_rows(decisions);
        }
    }

    Ok(())
}

/// Send a human approve or deny signal
pub async fn decide(
    client: &ApiClient,
    id: &str,
    request: ApprovalRequest,
    format: OutputFormat,
) -> Result<()> {
    let approve = request.decision == "approve";
    let updated: Opportunity = client
        .post(&format!("api/v1/opportunities/{}/approval", id), &request)
        .await?;

    match format {
        OutputFormat::Json => print_json(&updated)?,
        OutputFormat::Table => {
            let verb = if approve { "approved" } else { "denied" };
            print_success(&format!(
                "Opportunity {} {} by {} (now {}, version {})",
                updated.id,
                verb,
                request.actor,
                color_status(&updated.status),
                updated.version
            ));
        }
    }

    Ok(())
}

/// Roll an opportunity back
pub async fn rollback(client: &ApiClient, id: &str, request: RollbackRequest, format: OutputFormat) -> Result<()> {
    let updated: Opportunity = client
        .post(&format!("api/v1/opportunities/{}/rollback", id), &request)
        .await?;

    match format {
        OutputFormat::Json => print_json(&updated)?,
        OutputFormat::Table => {
            print_success(&format!("Opportunity {} rolled back: {}", updated.id, request.reason));
        }
    }

    Ok(())
}
