//! Agent configuration
//!
//! Layered with the `config` crate: serde defaults, then an optional file
//! named by `FINOPS_CONFIG` (TOML or JSON), then `FINOPS__*` environment
//! variables, e.g. `FINOPS__ENGINE__GUARDRAILS__MAX_DAILY_CHANGE_AMOUNT=2500`.

use anyhow::{Context, Result};
use finops_lib::EngineSettings;
use serde::Deserialize;
use std::path::PathBuf;

/// Environment variable naming the optional configuration file
pub const CONFIG_PATH_ENV: &str = "FINOPS_CONFIG";

/// Agent configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// API server port for the command surface, health and metrics
    pub api_port: u16,

    /// Seconds between detection cycles
    pub cycle_interval_secs: u64,

    /// Latest cluster snapshot, re-read every cycle
    pub snapshot_path: PathBuf,

    /// Cost baselines; a missing file means no baselines
    pub baseline_path: PathBuf,

    /// Ledger file; the ledger is kept in memory only when unset
    pub ledger_path: Option<PathBuf>,

    /// Directory the proposal sink writes into
    pub proposal_dir: PathBuf,

    /// Approval webhook; requests are only logged when unset
    pub approval_webhook_url: Option<String>,

    pub approval_timeout_secs: u64,

    pub engine: EngineSettings,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_port: 8080,
            cycle_interval_secs: 300,
            snapshot_path: PathBuf::from("/var/lib/finops/snapshot.json"),
            baseline_path: PathBuf::from("/var/lib/finops/baselines.json"),
            ledger_path: Some(PathBuf::from("/var/lib/finops/ledger.json")),
            proposal_dir: PathBuf::from("/var/lib/finops/proposals"),
            approval_webhook_url: None,
            approval_timeout_secs: 10,
            engine: EngineSettings::default(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from the optional file and the environment
    pub fn load() -> Result<Self> {
        Self::load_from(std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from))
    }

    pub fn load_from(file: Option<PathBuf>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = &file {
            builder = builder.add_source(config::File::from(path.as_path()).required(true));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("FINOPS")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .context("Failed to read agent configuration")?;

        config
            .try_deserialize()
            .context("Invalid agent configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.cycle_interval_secs, 300);
        assert_eq!(config.engine.guardrails.max_daily_change_amount, 1000.0);
        assert!(config.approval_webhook_url.is_none());
    }

    #[test]
    fn test_file_overrides_nested_settings() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
api_port = 9191
proposal_dir = "/tmp/proposals"

[engine]
instance = "finops-eu"

[engine.guardrails]
max_daily_change_amount = 2500.0
protected_tags = ["production-critical", "pci"]
"#
        )
        .unwrap();

        let config = AgentConfig::load_from(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.api_port, 9191);
        assert_eq!(config.proposal_dir, PathBuf::from("/tmp/proposals"));
        assert_eq!(config.engine.instance, "finops-eu");
        assert_eq!(config.engine.guardrails.max_daily_change_amount, 2500.0);
        assert_eq!(config.engine.guardrails.protected_tags.len(), 2);
        // Untouched fields keep their defaults
        assert_eq!(config.engine.guardrails.min_confidence, 0.7);
        assert_eq!(config.cycle_interval_secs, 300);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = AgentConfig::load_from(Some(PathBuf::from("/nonexistent/finops.toml")));
        assert!(result.is_err());
    }
}
