//! FinOps opportunity CLI
//!
//! A command-line tool for reviewing waste opportunities, approving or
//! rolling back changes, and reading savings reports from the finops agent.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{cycle, opportunities, proposals, savings};
use output::OutputFormat;

/// FinOps opportunity CLI
#[derive(Parser)]
#[command(name = "fctl")]
#[command(author, version, about = "CLI for the FinOps waste-opportunity agent", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via FCTL_API_URL env var or the config file)
    #[arg(long, env = "FCTL_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<OutputFormat>,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List or show opportunities and proposals
    #[command(subcommand)]
    Get(GetCommands),

    /// Show transitions and guardrail decisions of an opportunity
    History {
        /// Opportunity ID
        id: String,
    },

    /// Approve an opportunity waiting for approval
    Approve {
        /// Opportunity ID to approve
        id: String,

        /// Approver name (defaults to the config file actor, then $USER)
        #[arg(long)]
        actor: Option<String>,

        /// Reason for approval
        #[arg(long)]
        reason: Option<String>,

        /// Fail if the opportunity changed since this version
        #[arg(long)]
        expected_version: Option<u64>,
    },

    /// Deny an opportunity waiting for approval
    Deny {
        /// Opportunity ID to deny
        id: String,

        /// Reason for denial
        #[arg(long)]
        reason: Option<String>,

        /// Reviewer name (defaults to the config file actor, then $USER)
        #[arg(long)]
        actor: Option<String>,
    },

    /// Roll back an approved or implemented opportunity
    Rollback {
        /// Opportunity ID to roll back
        id: String,

        /// Why the change is being reverted
        #[arg(long)]
        reason: String,

        /// Who is rolling back
        #[arg(long)]
        actor: Option<String>,
    },

    /// Create a change proposal from approved opportunities
    Propose {
        /// Opportunity IDs to include
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Record that a proposal was merged and applied
    Implemented {
        /// Proposal ID
        proposal: String,

        /// Merge commit or change reference
        #[arg(long)]
        reference: String,
    },

    /// Show estimated and realized savings
    Savings,

    /// Show per-team cost allocation
    Allocation,

    /// Generate a savings report
    Report {
        /// Report window ending now (e.g., 24h, 7d, 2w)
        #[arg(long, conflicts_with = "monthly")]
        since: Option<String>,

        /// Month-to-date report instead of the last seven days
        #[arg(long)]
        monthly: bool,
    },

    /// Run one detection cycle now
    Run,

    /// Save defaults to ~/.config/fctl/config.json
    Configure {
        /// Default API endpoint URL
        #[arg(long = "set-api-url")]
        api_url: Option<String>,

        /// Default actor for approvals and rollbacks
        #[arg(long = "set-actor")]
        actor: Option<String>,

        /// Default output format
        #[arg(long = "set-format")]
        format: Option<OutputFormat>,
    },
}

#[derive(Subcommand)]
pub enum GetCommands {
    /// List opportunities
    Opportunities {
        /// Filter by status (detected, pending_approval, approved, ...)
        #[arg(long)]
        status: Option<String>,

        /// Filter by owning team
        #[arg(long)]
        team: Option<String>,

        /// Filter by type (cpu_rightsizing, idle_node, ...)
        #[arg(long = "type")]
        opportunity_type: Option<String>,

        /// Filter by cluster
        #[arg(long)]
        cluster: Option<String>,
    },

    /// Show a single opportunity
    Opportunity {
        /// Opportunity ID
        id: String,
    },

    /// List change proposals
    Proposals,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let verbose = cli.verbose;

    if let Err(e) = run(cli).await {
        if verbose {
            output::print_error(&format!("{:?}", e));
        } else {
            output::print_error(&e.to_string());
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = config::Config::load()?;

    if let Commands::Configure { api_url, actor, format } = &cli.command {
        if let Some(api_url) = api_url {
            config.api_url = Some(api_url.clone());
        }
        if let Some(actor) = actor {
            config.actor = Some(actor.clone());
        }
        if let Some(format) = format {
            config.default_format = Some(format!("{:?}", format).to_lowercase());
        }
        let path = config::Config::config_path()?;
        config.save_to(&path)?;
        output::print_success(&format!("Saved {}", path.display()));
        return Ok(());
    }

    let api_url = config.resolve_api_url(cli.api_url);
    let format = cli
        .format
        .or_else(|| config.default_format.as_deref().and_then(OutputFormat::parse_name))
        .unwrap_or_default();

    if cli.verbose {
        output::print_info(&format!("Using API {}", api_url));
    }

    // Initialize client
    let client = client::ApiClient::new(&api_url)?;

    // Execute command
    match cli.command {
        Commands::Get(get_cmd) => match get_cmd {
            GetCommands::Opportunities {
                status,
                team,
                opportunity_type,
                cluster,
            } => {
                let filter = opportunities::ListFilter {
                    status,
                    opportunity_type,
                    team,
                    cluster,
                };
                opportunities::list_opportunities(&client, filter, format).await?;
            }
            GetCommands::Opportunity { id } => {
                opportunities::get_opportunity(&client, &id, format).await?;
            }
            GetCommands::Proposals => {
                proposals::list_proposals(&client, format).await?;
            }
        },
        Commands::History { id } => {
            opportunities::show_history(&client, &id, format).await?;
        }
        Commands::Approve {
            id,
            actor,
            reason,
            expected_version,
        } => {
            let request = client::ApprovalRequest {
                decision: "approve".to_string(),
                actor: config.resolve_actor(actor),
                reason,
                expected_version,
            };
            opportunities::decide(&client, &id, request, format).await?;
        }
        Commands::Deny { id, reason, actor } => {
            let request = client::ApprovalRequest {
                decision: "deny".to_string(),
                actor: config.resolve_actor(actor),
                reason,
                expected_version: None,
            };
            opportunities::decide(&client, &id, request, format).await?;
        }
        Commands::Rollback { id, reason, actor } => {
            let request = client::RollbackRequest {
                reason,
                actor: config.resolve_actor(actor),
            };
            opportunities::rollback(&client, &id, request, format).await?;
        }
        Commands::Propose { ids } => {
            proposals::propose(&client, ids, format).await?;
        }
        Commands::Implemented { proposal, reference } => {
            proposals::mark_implemented(&client, &proposal, &reference, format).await?;
        }
        Commands::Savings => {
            savings::show_savings(&client, format).await?;
        }
        Commands::Allocation => {
            savings::show_allocation(&client, format).await?;
        }
        Commands::Report { since, monthly } => {
            savings::generate_report(&client, since, monthly, format).await?;
        }
        Commands::Run => {
            cycle::run_cycle(&client, format).await?;
        }
        // Saved above without contacting the agent
        Commands::Configure { .. } => {}
    }

    Ok(())
}
