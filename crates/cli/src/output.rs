//! Output formatting utilities

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

impl OutputFormat {
    pub fn parse_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            _ => None,
        }
    }
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print rows as a rounded table
pub fn print_rows<T: Tabled>(rows: Vec<T>) {
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format confidence as percentage
pub fn format_confidence(confidence: f64) -> String {
    format!("{:.0}%", confidence * 100.0)
}

pub fn format_currency(amount: f64) -> String {
    format!("${:.2}", amount)
}

/// Format an RFC 3339 timestamp as `YYYY-MM-DD HH:MM`; unparseable input is returned as is
pub fn format_timestamp(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|_| raw.to_string())
}

/// Color lifecycle status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "detected" => status.cyan().to_string(),
        "pending_approval" => status.yellow().to_string(),
        "approved" | "proposal_created" => status.blue().to_string(),
        "implemented" | "verified" | "realized" => status.green().to_string(),
        "denied" | "rolled_back" => status.red().to_string(),
        "allow" => status.green().to_string(),
        "require_approval" => status.yellow().to_string(),
        "deny" => status.red().to_string(),
        _ => status.to_string(),
    }
}

/// Color confidence based on value
pub fn color_confidence(confidence: f64) -> String {
    let formatted = format_confidence(confidence);
    if confidence >= 0.8 {
        formatted.green().to_string()
    } else if confidence >= 0.6 {
        formatted.yellow().to_string()
    } else {
        formatted.red().to_string()
    }
}

/// Parse a relative period such as `24h`, `7d` or `2w` into a duration
pub fn parse_since(since: &str) -> Result<Duration> {
    let since = since.trim();
    let unit_start = since.char_indices().last().map(|(i, _)| i).unwrap_or(0);
    if unit_start == 0 {
        bail!("Invalid period '{}': expected e.g. 24h, 7d or 2w", since);
    }
    let (amount, unit) = since.split_at(unit_start);
    let amount: i64 = amount
        .parse()
        .with_context(|| format!("Invalid period '{}': expected e.g. 24h, 7d or 2w", since))?;
    if amount <= 0 {
        bail!("Period must be positive: {}", since);
    }
    match unit {
        "h" => Ok(Duration::hours(amount)),
        "d" => Ok(Duration::days(amount)),
        "w" => Ok(Duration::weeks(amount)),
        _ => bail!("Unknown period unit '{}': use h, d or w", unit),
    }
}
