//! Ledger tables and their persistence backends
//!
//! Tables are plain serde structures. A `LedgerStore` persists the whole
//! table set after each committed write; the JSON backend writes to a temp
//! file and renames it so a crash never leaves a half-written ledger.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

use super::aggregate::CostAllocation;
use super::state::TransitionCause;
use crate::guardrail::GuardrailDecision;
use crate::models::{CostBaseline, Opportunity, OpportunityStatus};
use crate::proposal::ChangeProposal;
use crate::report::ReportSummary;

/// One append-only audit record per write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub sequence: u64,
    pub opportunity_id: String,
    /// None for the creation record
    pub from: Option<OpportunityStatus>,
    pub to: OpportunityStatus,
    pub version: u64,
    pub at: DateTime<Utc>,
    pub cause: Option<TransitionCause>,
}

/// Full ledger table set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerTables {
    #[serde(default)]
    pub opportunities: BTreeMap<String, Opportunity>,
    #[serde(default)]
    pub audit_log: Vec<AuditEntry>,
    #[serde(default)]
    pub guardrail_decisions: Vec<GuardrailDecision>,
    #[serde(default)]
    pub proposals: BTreeMap<String, ChangeProposal>,
    #[serde(default)]
    pub baselines: Vec<CostBaseline>,
    #[serde(default)]
    pub cost_allocation: Vec<CostAllocation>,
    #[serde(default)]
    pub savings_reports: Vec<ReportSummary>,
    /// fingerprint -> opportunity id, rebuilt on load
    #[serde(skip)]
    pub fingerprints: HashMap<String, String>,
    /// content hash -> proposal id, rebuilt on load
    #[serde(skip)]
    pub proposal_hashes: HashMap<String, String>,
}

impl LedgerTables {
    pub fn rebuild_indexes(&mut self) {
        self.fingerprints = self
            .opportunities
            .values()
            .map(|o| (o.fingerprint.clone(), o.id.clone()))
            .collect();
        self.proposal_hashes = self
            .proposals
            .values()
            .map(|p| (p.content_hash.clone(), p.id.clone()))
            .collect();
    }

    pub fn next_sequence(&self) -> u64 {
        self.audit_log.last().map(|e| e.sequence + 1).unwrap_or(1)
    }
}

/// Persistence backend for ledger tables
pub trait LedgerStore: Send + Sync {
    /// Load previously persisted tables, if any
    fn load(&self) -> Result<Option<LedgerTables>>;

    /// Persist the complete table set
    fn save(&self, tables: &LedgerTables) -> Result<()>;

    fn describe(&self) -> String;
}

/// Volatile store for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    saved: Mutex<Option<LedgerTables>>,
    fail_writes: Mutex<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent saves fail, to exercise write atomicity
    pub fn set_fail_writes(&self, fail: bool) {
        if let Ok(mut flag) = self.fail_writes.lock() {
            *flag = fail;
        }
    }
}

impl LedgerStore for MemoryStore {
    fn load(&self) -> Result<Option<LedgerTables>> {
        let saved = self
            .saved
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        Ok(saved.clone())
    }

    fn save(&self, tables: &LedgerTables) -> Result<()> {
        let fail = self
            .fail_writes
            .lock()
            .map(|f| *f)
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        if fail {
            anyhow::bail!("memory store configured to reject writes");
        }
        let mut saved = self
            .saved
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        *saved = Some(tables.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Single-file JSON store
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LedgerStore for JsonFileStore {
    fn load(&self) -> Result<Option<LedgerTables>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = std::fs::read(&self.path)
            .with_context(|| format!("Failed to read ledger file {:?}", self.path))?;
        let mut tables: LedgerTables =
            serde_json::from_slice(&data).context("Failed to deserialize ledger tables")?;
        tables.rebuild_indexes();
        info!(
            path = %self.path.display(),
            opportunities = tables.opportunities.len(),
            audit_entries = tables.audit_log.len(),
            "Loaded ledger from disk"
        );
        Ok(Some(tables))
    }

    fn save(&self, tables: &LedgerTables) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {:?}", parent))?;
            }
        }

        let json = serde_json::to_vec_pretty(tables).context("Failed to serialize ledger tables")?;

        let temp_path = self.path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .with_context(|| format!("Failed to create temp file {:?}", temp_path))?;
        file.write_all(&json).context("Failed to write ledger data")?;
        file.sync_all().context("Failed to sync ledger file")?;

        std::fs::rename(&temp_path, &self.path)
            .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, self.path))?;

        debug!(path = %self.path.display(), bytes = json.len(), "Ledger flushed to disk");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }
}
