//! Detection cycle trigger

use anyhow::Result;
use colored::Colorize;

use crate::client::{ApiClient, CycleReport};
use crate::output::{print_json, print_success, print_warning, OutputFormat};

/// Run one detection cycle on the agent and summarize it
pub async fn run_cycle(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let report: CycleReport = client.post("api/v1/cycles/run", &serde_json::json!({})).await?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            print_success(&format!(
                "Cycle over snapshot {} ({}) finished in {:.2}s",
                report.snapshot_id, report.period, report.duration_secs
            ));
            println!("Candidates:             {}", report.candidates);
            println!(
                "New opportunities:      {}",
                report.new_opportunities.len().to_string().green()
            );
            println!("Already tracked:        {}", report.already_tracked);
            println!(
                "Decisions:              {} allowed, {} pending approval, {} denied",
                report.decisions.allowed, report.decisions.pending_approval, report.decisions.denied
            );
            println!("Verified / realized:    {} / {}", report.verified, report.realized);

            for failure in &report.detector_failures {
                print_warning(&format!("Detector {} failed: {}", failure.detector, failure.reason));
            }
            for warning in &report.warnings {
                print_warning(warning);
            }
        }
    }

    Ok(())
}
