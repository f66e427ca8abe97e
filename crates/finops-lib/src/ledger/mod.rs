//! Savings ledger: the single owner of opportunity state
//!
//! All reads and writes go through `Ledger`. Writes are serialized behind
//! one async lock, carry an expected version, and are persisted before the
//! lock is released. If persistence fails every table is restored to its
//! pre-write contents, so a caller never observes a partial update.

mod aggregate;
mod state;
mod store;
pub mod verification;


pub use aggregate::{
    aggregate, allocate_costs, AggregateQuery, CostAllocation, SavingsAggregate, SavingsBucket,
    TimeWindow,
};
pub use state::{
    apply, is_allowed_edge, successors, validate, ApprovalSignal, TransitionCause,
    TransitionRequest,
};
pub use store::{AuditEntry, JsonFileStore, LedgerStore, LedgerTables, MemoryStore};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::LedgerError;
use crate::guardrail::GuardrailDecision;
use crate::models::{CostBaseline, Opportunity, OpportunityStatus, OpportunityType};
use crate::proposal::{ChangeProposal, ProposalOutcome};
use crate::report::ReportSummary;

/// Listing filter for opportunities
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpportunityFilter {
    #[serde(default)]
    pub status: Option<OpportunityStatus>,
    #[serde(default)]
    pub opportunity_type: Option<OpportunityType>,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub cluster: Option<String>,
}

impl OpportunityFilter {
    pub fn with_status(status: OpportunityStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn matches(&self, opportunity: &Opportunity) -> bool {
        self.status.map(|s| s == opportunity.status).unwrap_or(true)
            && self
                .opportunity_type
                .map(|t| t == opportunity.opportunity_type)
                .unwrap_or(true)
            && self
                .team
                .as_deref()
                .map(|t| t == opportunity.attribution.team)
                .unwrap_or(true)
            && self
                .cluster
                .as_deref()
                .map(|c| c == opportunity.attribution.cluster)
                .unwrap_or(true)
    }
}

/// Pre-write state needed to undo a failed commit
#[derive(Default)]
struct Checkpoint {
    audit_len: usize,
    decisions_len: usize,
    reports_len: usize,
    baselines: Option<(Vec<CostBaseline>, Vec<CostAllocation>)>,
    replaced: Vec<(String, Option<Opportunity>)>,
    inserted_proposals: Vec<String>,
    replaced_proposals: Vec<ChangeProposal>,
}

impl Checkpoint {
    fn of(tables: &LedgerTables) -> Self {
        Self {
            audit_len: tables.audit_log.len(),
            decisions_len: tables.guardrail_decisions.len(),
            reports_len: tables.savings_reports.len(),
            ..Default::default()
        }
    }

    fn remember(&mut self, tables: &LedgerTables, id: &str) {
        if self.replaced.iter().all(|(seen, _)| seen != id) {
            self.replaced
                .push((id.to_string(), tables.opportunities.get(id).cloned()));
        }
    }

    fn restore(self, tables: &mut LedgerTables) {
        tables.audit_log.truncate(self.audit_len);
        tables.guardrail_decisions.truncate(self.decisions_len);
        tables.savings_reports.truncate(self.reports_len);
        if let Some((baselines, allocation)) = self.baselines {
            tables.baselines = baselines;
            tables.cost_allocation = allocation;
        }
        for (id, previous) in self.replaced.into_iter().rev() {
            match previous {
                Some(opportunity) => {
                    tables.opportunities.insert(id, opportunity);
                }
                None => {
                    if let Some(removed) = tables.opportunities.remove(&id) {
                        tables.fingerprints.remove(&removed.fingerprint);
                    }
                }
            }
        }
        for id in self.inserted_proposals {
            if let Some(removed) = tables.proposals.remove(&id) {
                tables.proposal_hashes.remove(&removed.content_hash);
            }
        }
        for proposal in self.replaced_proposals {
            tables.proposals.insert(proposal.id.clone(), proposal);
        }
    }
}

/// Reject anything but a freshly detected record with in-range scores
fn check_fresh(opportunity: &Opportunity) -> Result<(), LedgerError> {
    let reject = |reason: String| {
        Err(LedgerError::InvalidOpportunity {
            id: opportunity.id.clone(),
            reason,
        })
    };
    let unit = 0.0..=1.0;

    if opportunity.status != OpportunityStatus::Detected {
        return reject(format!("new records must be detected, got {}", opportunity.status));
    }
    if opportunity.version != 1 {
        return reject(format!("new records start at version 1, got {}", opportunity.version));
    }
    if !unit.contains(&opportunity.confidence) {
        return reject(format!("confidence {} outside [0, 1]", opportunity.confidence));
    }
    if !unit.contains(&opportunity.risk_score) {
        return reject(format!("risk score {} outside [0, 1]", opportunity.risk_score));
    }
    if !opportunity.estimated_monthly_savings.is_finite() || opportunity.estimated_monthly_savings < 0.0 {
        return reject(format!(
            "estimated savings {} must be finite and non-negative",
            opportunity.estimated_monthly_savings
        ));
    }
    if opportunity.realized_savings.is_some() {
        return reject("realized savings are only recorded by verification".to_string());
    }
    Ok(())
}

/// Authoritative store of opportunities, their audit trail, and savings data
pub struct Ledger {
    tables: RwLock<LedgerTables>,
    store: Arc<dyn LedgerStore>,
}

impl Ledger {
    /// Open a ledger backed by `store`, loading any persisted tables
    pub fn open(store: Arc<dyn LedgerStore>) -> Result<Self, LedgerError> {
        let mut tables = store
            .load()
            .map_err(|e| LedgerError::Persistence(format!("{:#}", e)))?
            .unwrap_or_default();
        tables.rebuild_indexes();
        debug!(store = %store.describe(), opportunities = tables.opportunities.len(), "Ledger opened");
        Ok(Self {
            tables: RwLock::new(tables),
            store,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            tables: RwLock::new(LedgerTables::default()),
            store: Arc::new(MemoryStore::new()),
        }
    }

    fn commit(&self, tables: &mut LedgerTables, checkpoint: Checkpoint) -> Result<(), LedgerError> {
        if let Err(e) = self.store.save(tables) {
            warn!(store = %self.store.describe(), error = %e, "Ledger write failed, restoring previous state");
            checkpoint.restore(tables);
            return Err(LedgerError::Persistence(format!("{:#}", e)));
        }
        Ok(())
    }

    fn push_audit(
        tables: &mut LedgerTables,
        opportunity: &Opportunity,
        from: Option<OpportunityStatus>,
        cause: Option<TransitionCause>,
        at: DateTime<Utc>,
    ) {
        let sequence = tables.next_sequence();
        tables.audit_log.push(AuditEntry {
            sequence,
            opportunity_id: opportunity.id.clone(),
            from,
            to: opportunity.status,
            version: opportunity.version,
            at,
            cause,
        });
    }

    /// Insert a newly detected opportunity; fingerprints are unique
    ///
    /// Only fresh records enter the ledger: every later status is reached
    /// through [`Ledger::transition`].
    pub async fn insert(&self, opportunity: Opportunity) -> Result<Opportunity, LedgerError> {
        check_fresh(&opportunity)?;
        let mut tables = self.tables.write().await;
        if tables.fingerprints.contains_key(&opportunity.fingerprint)
            || tables.opportunities.contains_key(&opportunity.id)
        {
            return Err(LedgerError::DuplicateFingerprint(opportunity.fingerprint));
        }

        let mut checkpoint = Checkpoint::of(&tables);
        checkpoint.remember(&tables, &opportunity.id);
        tables
            .fingerprints
            .insert(opportunity.fingerprint.clone(), opportunity.id.clone());
        tables
            .opportunities
            .insert(opportunity.id.clone(), opportunity.clone());
        Self::push_audit(&mut tables, &opportunity, None, None, opportunity.detected_at);

        self.commit(&mut tables, checkpoint)?;
        Ok(opportunity)
    }

    pub async fn get(&self, id: &str) -> Option<Opportunity> {
        self.tables.read().await.opportunities.get(id).cloned()
    }

    pub async fn contains_fingerprint(&self, fingerprint: &str) -> bool {
        self.tables.read().await.fingerprints.contains_key(fingerprint)
    }

    pub async fn find_by_fingerprint(&self, fingerprint: &str) -> Option<Opportunity> {
        let tables = self.tables.read().await;
        tables
            .fingerprints
            .get(fingerprint)
            .and_then(|id| tables.opportunities.get(id))
            .cloned()
    }

    pub async fn list(&self, filter: &OpportunityFilter) -> Vec<Opportunity> {
        self.tables
            .read()
            .await
            .opportunities
            .values()
            .filter(|o| filter.matches(o))
            .cloned()
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.tables.read().await.opportunities.len()
    }

    /// Move an opportunity along one lifecycle edge
    ///
    /// Fails with `StaleVersionConflict` when `expected_version` is not the
    /// stored version; nothing is written in that case.
    pub async fn transition(
        &self,
        id: &str,
        expected_version: u64,
        request: TransitionRequest,
        at: DateTime<Utc>,
    ) -> Result<Opportunity, LedgerError> {
        let mut tables = self.tables.write().await;
        let next = Self::stage_transition(&tables, id, expected_version, &request, at)?;

        let mut checkpoint = Checkpoint::of(&tables);
        checkpoint.remember(&tables, id);
        Self::write_transition(&mut tables, next.clone(), request, at);

        self.commit(&mut tables, checkpoint)?;
        Ok(next)
    }

    fn stage_transition(
        tables: &LedgerTables,
        id: &str,
        expected_version: u64,
        request: &TransitionRequest,
        at: DateTime<Utc>,
    ) -> Result<Opportunity, LedgerError> {
        let current = tables
            .opportunities
            .get(id)
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;
        if current.version != expected_version {
            return Err(LedgerError::StaleVersionConflict {
                id: id.to_string(),
                expected: expected_version,
                current: current.version,
            });
        }
        validate(current, request)?;
        Ok(apply(current, request, at))
    }

    fn write_transition(
        tables: &mut LedgerTables,
        next: Opportunity,
        request: TransitionRequest,
        at: DateTime<Utc>,
    ) {
        let from = tables.opportunities.get(&next.id).map(|o| o.status);
        if let TransitionCause::Guardrail { decision } = &request.cause {
            tables.guardrail_decisions.push(decision.clone());
        }
        Self::push_audit(tables, &next, from, Some(request.cause), at);
        tables.opportunities.insert(next.id.clone(), next);
    }

    /// Record a proposal and move every member to ProposalCreated, atomically
    ///
    /// A proposal whose content hash is already stored is returned as
    /// `Existing` and nothing is written.
    pub async fn record_proposal(
        &self,
        proposal: ChangeProposal,
        expected_versions: &[(String, u64)],
        at: DateTime<Utc>,
    ) -> Result<ProposalOutcome, LedgerError> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables
            .proposal_hashes
            .get(&proposal.content_hash)
            .and_then(|pid| tables.proposals.get(pid))
        {
            return Ok(ProposalOutcome::Existing(existing.clone()));
        }

        let request = TransitionRequest::new(
            OpportunityStatus::ProposalCreated,
            TransitionCause::Proposal {
                proposal_id: proposal.id.clone(),
            },
        );
        let mut staged = Vec::with_capacity(expected_versions.len());
        for (id, version) in expected_versions {
            staged.push(Self::stage_transition(&tables, id, *version, &request, at)?);
        }

        let mut checkpoint = Checkpoint::of(&tables);
        for next in &staged {
            checkpoint.remember(&tables, &next.id);
        }
        checkpoint.inserted_proposals.push(proposal.id.clone());
        for next in staged {
            Self::write_transition(&mut tables, next, request.clone(), at);
        }
        tables
            .proposal_hashes
            .insert(proposal.content_hash.clone(), proposal.id.clone());
        tables.proposals.insert(proposal.id.clone(), proposal.clone());

        self.commit(&mut tables, checkpoint)?;
        Ok(ProposalOutcome::Created(proposal))
    }

    pub async fn proposal(&self, id: &str) -> Option<ChangeProposal> {
        self.tables.read().await.proposals.get(id).cloned()
    }

    pub async fn proposal_by_hash(&self, content_hash: &str) -> Option<ChangeProposal> {
        let tables = self.tables.read().await;
        tables
            .proposal_hashes
            .get(content_hash)
            .and_then(|id| tables.proposals.get(id))
            .cloned()
    }

    pub async fn proposals(&self) -> Vec<ChangeProposal> {
        self.tables.read().await.proposals.values().cloned().collect()
    }

    /// Attach the review reference returned by the proposal sink
    pub async fn set_review_ref(&self, proposal_id: &str, review_ref: String) -> Result<(), LedgerError> {
        let mut tables = self.tables.write().await;
        let previous = tables
            .proposals
            .get(proposal_id)
            .cloned()
            .ok_or_else(|| LedgerError::ProposalNotFound(proposal_id.to_string()))?;
        let mut checkpoint = Checkpoint::of(&tables);
        checkpoint.replaced_proposals.push(previous.clone());

        let mut updated = previous;
        updated.review_ref = Some(review_ref);
        tables.proposals.insert(proposal_id.to_string(), updated);
        self.commit(&mut tables, checkpoint)
    }

    /// Move every ProposalCreated member of a proposal to Implemented
    ///
    /// Members already rolled back are skipped; any other status aborts the
    /// whole write.
    pub async fn mark_proposal_implemented(
        &self,
        proposal_id: &str,
        reference: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<Opportunity>, LedgerError> {
        let mut tables = self.tables.write().await;
        let proposal = tables
            .proposals
            .get(proposal_id)
            .cloned()
            .ok_or_else(|| LedgerError::ProposalNotFound(proposal_id.to_string()))?;

        let request = TransitionRequest::new(
            OpportunityStatus::Implemented,
            TransitionCause::Implementation {
                proposal_id: proposal_id.to_string(),
                reference: reference.to_string(),
            },
        );
        let mut staged = Vec::new();
        for id in &proposal.opportunity_ids {
            let current = tables
                .opportunities
                .get(id)
                .ok_or_else(|| LedgerError::NotFound(id.clone()))?;
            if current.status == OpportunityStatus::RolledBack {
                continue;
            }
            staged.push(Self::stage_transition(&tables, id, current.version, &request, at)?);
        }

        let mut checkpoint = Checkpoint::of(&tables);
        for next in &staged {
            checkpoint.remember(&tables, &next.id);
        }
        for next in staged.iter().cloned() {
            Self::write_transition(&mut tables, next, request.clone(), at);
        }

        self.commit(&mut tables, checkpoint)?;
        Ok(staged)
    }

    /// Audit trail of one opportunity, oldest first
    pub async fn history(&self, id: &str) -> Vec<AuditEntry> {
        self.tables
            .read()
            .await
            .audit_log
            .iter()
            .filter(|e| e.opportunity_id == id)
            .cloned()
            .collect()
    }

    pub async fn decisions_for(&self, id: &str) -> Vec<GuardrailDecision> {
        self.tables
            .read()
            .await
            .guardrail_decisions
            .iter()
            .filter(|d| d.opportunity_ids.iter().any(|o| o == id))
            .cloned()
            .collect()
    }

    /// Store new baselines; one per workload and period, later copies ignored
    pub async fn ingest_baselines(&self, baselines: Vec<CostBaseline>) -> Result<usize, LedgerError> {
        let mut tables = self.tables.write().await;
        let fresh: Vec<CostBaseline> = baselines
            .into_iter()
            .filter(|b| {
                !tables.baselines.iter().any(|existing| {
                    existing.workload_id == b.workload_id
                        && existing.period_start == b.period_start
                        && existing.period_end == b.period_end
                })
            })
            .collect();
        if fresh.is_empty() {
            return Ok(0);
        }

        let mut checkpoint = Checkpoint::of(&tables);
        checkpoint.baselines = Some((tables.baselines.clone(), tables.cost_allocation.clone()));

        let mut count = 0;
        for baseline in fresh {
            let duplicate = tables.baselines.iter().any(|existing| {
                existing.workload_id == baseline.workload_id
                    && existing.period_start == baseline.period_start
                    && existing.period_end == baseline.period_end
            });
            if !duplicate {
                tables.baselines.push(baseline);
                count += 1;
            }
        }
        tables.cost_allocation = allocate_costs(&tables.baselines);

        self.commit(&mut tables, checkpoint)?;
        Ok(count)
    }

    pub async fn baselines(&self) -> Vec<CostBaseline> {
        self.tables.read().await.baselines.clone()
    }

    pub async fn cost_allocation(&self) -> Vec<CostAllocation> {
        self.tables.read().await.cost_allocation.clone()
    }

    pub async fn aggregate(&self, query: &AggregateQuery) -> SavingsAggregate {
        let tables = self.tables.read().await;
        aggregate(tables.opportunities.values(), query)
    }

    /// Persist a report; a colliding id gets a `-N` suffix
    pub async fn save_report(&self, mut report: ReportSummary) -> Result<ReportSummary, LedgerError> {
        let mut tables = self.tables.write().await;
        let taken = |id: &str, tables: &LedgerTables| tables.savings_reports.iter().any(|r| r.id == id);
        if taken(&report.id, &tables) {
            let base = report.id.clone();
            let mut n = 2;
            while taken(&format!("{}-{}", base, n), &tables) {
                n += 1;
            }
            report.id = format!("{}-{}", base, n);
        }
        let checkpoint = Checkpoint::of(&tables);
        tables.savings_reports.push(report.clone());
        self.commit(&mut tables, checkpoint)?;
        Ok(report)
    }

    pub async fn reports(&self) -> Vec<ReportSummary> {
        self.tables.read().await.savings_reports.clone()
    }

    /// Estimated savings approved per UTC day, for rebuilding the daily cap
    pub async fn approved_amounts_by_day(&self) -> BTreeMap<NaiveDate, f64> {
        let tables = self.tables.read().await;
        let mut amounts = BTreeMap::new();
        for opportunity in tables.opportunities.values() {
            if let Some(approved_at) = opportunity.approved_at {
                *amounts.entry(approved_at.date_naive()).or_insert(0.0) +=
                    opportunity.estimated_monthly_savings;
            }
        }
        amounts
    }
}
