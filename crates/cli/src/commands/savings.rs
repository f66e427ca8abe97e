//! Savings, cost allocation and report commands

use anyhow::Result;
use chrono::Utc;
use colored::Colorize;
use std::collections::BTreeMap;
use tabled::Tabled;

use crate::client::{ApiClient, CostAllocation, Report, ReportRequest, SavingsAggregate, SavingsBucket};
use crate::output::{
    color_confidence, color_status, format_currency, format_timestamp, parse_since, print_json,
    print_rows, print_warning, OutputFormat,
};

/// Row for a savings breakdown table
#[derive(Tabled)]
struct BucketRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Count")]
    count: usize,
    #[tabled(rename = "Estimated/mo")]
    estimated: String,
    #[tabled(rename = "Realized")]
    realized: String,
}

/// Row for cost allocation table
#[derive(Tabled)]
struct AllocationRow {
    #[tabled(rename = "Team")]
    team: String,
    #[tabled(rename = "Cluster")]
    cluster: String,
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Workloads")]
    workloads: usize,
    #[tabled(rename = "Monthly Cost")]
    monthly_cost: String,
}

/// Row for top opportunities in a report
#[derive(Tabled)]
struct RankedRow {
    #[tabled(rename = "#")]
    rank: usize,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Type")]
    opportunity_type: String,
    #[tabled(rename = "Team")]
    team: String,
    #[tabled(rename = "Savings/mo")]
    savings: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
    #[tabled(rename = "Status")]
    status: String,
}

fn bucket_rows(buckets: &BTreeMap<String, SavingsBucket>) -> Vec<BucketRow> {
    buckets
        .iter()
        .map(|(key, bucket)| BucketRow {
            key: key.clone(),
            count: bucket.count,
            estimated: format_currency(bucket.estimated_monthly_savings),
            realized: format_currency(bucket.realized_savings),
        })
        .collect()
}

fn print_savings(savings: &SavingsAggregate) {
    println!("Opportunities:          {}", savings.opportunity_count);
    println!(
        "Estimated savings:      {}/mo",
        format_currency(savings.total_estimated_monthly_savings).green()
    );
    println!(
        "Realized savings:       {}",
        format_currency(savings.total_realized_savings).green()
    );
    match savings.realization_rate {
        Some(rate) => println!("Realization rate:       {:.1}%", rate * 100.0),
        None => println!("Realization rate:       {}", "n/a".dimmed()),
    }

    for (title, buckets) in [
        ("By team", &savings.by_team),
        ("By type", &savings.by_type),
        ("By cluster", &savings.by_cluster),
    ] {
        if buckets.is_empty() {
            continue;
        }
        println!("\n{}", title.bold());
        print_rows(bucket_rows(buckets));
    }

    if !savings.by_status.is_empty() {
        println!("\n{}", "By status".bold());
        for (status, count) in &savings.by_status {
            println!("  {:<20} {}", color_status(status), count);
        }
    }
}

/// Show savings across the whole ledger
pub async fn show_savings(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let savings: SavingsAggregate = client.get("api/v1/savings").await?;

    match format {
        OutputFormat::Json => print_json(&savings)?,
        OutputFormat::Table => {
            println!("{}", "Savings".bold());
            println!("{}", "=".repeat(50));
            print_savings(&savings);
        }
    }

    Ok(())
}

/// Show per-team cost allocation from the current baselines
pub async fn show_allocation(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let rows: Vec<CostAllocation> = client.get("api/v1/cost-allocation").await?;

    match format {
        OutputFormat::Json => print_json(&rows)?,
        OutputFormat::Table => {
            if rows.is_empty() {
                print_warning("No cost baselines ingested yet");
                return Ok(());
            }
            let total: f64 = rows.iter().map(|r| r.monthly_cost).sum();
            print_rows(
                rows.iter()
                    .map(|r| AllocationRow {
                        team: r.team.clone(),
                        cluster: r.cluster.clone(),
                        namespace: r.namespace.clone(),
                        workloads: r.workloads,
                        monthly_cost: format_currency(r.monthly_cost),
                    })
                    .collect(),
            );
            println!("\nTotal: {} per month", format_currency(total).bold());
        }
    }

    Ok(())
}

/// Generate a savings report; `since` wins over `monthly`
pub async fn generate_report(
    client: &ApiClient,
    since: Option<String>,
    monthly: bool,
    format: OutputFormat,
) -> Result<()> {
    let request = match since {
        Some(since) => ReportRequest {
            since: Some((Utc::now() - parse_since(&since)?).to_rfc3339()),
            kind: None,
        },
        None => ReportRequest {
            since: None,
            kind: Some(if monthly { "monthly" } else { "weekly" }.to_string()),
        },
    };
    let report: Report = client.post("api/v1/reports", &request).await?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => print_report(&report),
    }

    Ok(())
}

fn print_report(report: &Report) {
    println!("{} {}", "Savings report".bold(), report.id.cyan());
    println!("{}", "=".repeat(50));
    println!(
        "Period:                 {} ({} to {})",
        report.period.kind,
        format_timestamp(&report.period.start),
        format_timestamp(&report.period.end)
    );
    println!("Generated:              {}", format_timestamp(&report.generated_at));
    println!("High confidence:        {}", report.high_confidence_count);
    println!();
    print_savings(&report.savings);

    if !report.top_opportunities.is_empty() {
        println!("\n{}", "Top opportunities".bold());
        print_rows(
            report
                .top_opportunities
                .iter()
                .map(|r| RankedRow {
                    rank: r.rank,
                    id: r.id.clone(),
                    opportunity_type: r.opportunity_type.clone(),
                    team: r.team.clone(),
                    savings: format_currency(r.estimated_monthly_savings),
                    confidence: color_confidence(r.confidence),
                    status: color_status(&r.status),
                })
                .collect(),
        );
    }

    if !report.recommendations.is_empty() {
        println!("\n{}", "Recommendations".bold());
        for recommendation in &report.recommendations {
            println!("  • {}", recommendation);
        }
    }
}
