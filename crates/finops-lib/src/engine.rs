//! Lifecycle orchestration
//!
//! `FinopsEngine` wires detectors, reconciliation, guardrails, the savings
//! ledger and the external collaborators into one detection cycle, and
//! exposes the command operations (approve, roll back, propose, mark
//! implemented, report) that move opportunities along their lifecycle.
//!
//! Cycles are serialized by an internal mutex; command operations may run
//! concurrently with a cycle and rely on the ledger's optimistic versioning.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::detector::{BaselineIndex, DetectionInput, DetectorConfig, DetectorRegistry};
use crate::error::{DetectorFailure, EngineError, LedgerError};
use crate::external::{with_retry, ApprovalChannel, ApprovalRequest, ProposalSink, RetryPolicy};
use crate::guardrail::{DailySpendLedger, FleetContext, GuardrailConfig, GuardrailEngine, GuardrailOutcome};
use crate::health::{components, HealthRegistry};
use crate::ledger::verification::{assess, realization_due, VerificationPolicy, Verdict};
use crate::ledger::{
    AggregateQuery, ApprovalSignal, Ledger, OpportunityFilter, SavingsAggregate, TransitionCause,
    TransitionRequest,
};
use crate::models::{ClusterSnapshot, CostBaseline, Opportunity, OpportunityCandidate, OpportunityStatus, PeriodGranularity};
use crate::observability::{EngineMetrics, StructuredLogger};
use crate::proposal::{ChangeProposal, ProposalGenerator, ProposalOutcome};
use crate::reconciler::Reconciler;
use crate::report::{rank_order, ReportAggregator, ReportPeriod, ReportSummary};

/// Re-read attempts after a stale-version conflict before giving up
const MAX_STALE_RETRIES: usize = 3;

/// Engine tuning, loaded from the agent configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Name attached to every structured log line
    pub instance: String,
    pub detectors: DetectorConfig,
    pub guardrails: GuardrailConfig,
    pub period_granularity: PeriodGranularity,
    pub detector_timeout_ms: u64,
    pub verification_cooldown_hours: i64,
    pub realization_days: i64,
    pub report_top_n: usize,
    pub retry: RetryPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            instance: "finops".to_string(),
            detectors: DetectorConfig::default(),
            guardrails: GuardrailConfig::default(),
            period_granularity: PeriodGranularity::Daily,
            detector_timeout_ms: 30_000,
            verification_cooldown_hours: 24,
            realization_days: 30,
            report_top_n: 10,
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineSettings {
    pub fn verification_policy(&self) -> VerificationPolicy {
        VerificationPolicy {
            cooldown: ChronoDuration::hours(self.verification_cooldown_hours),
            realization_period: ChronoDuration::days(self.realization_days),
        }
    }
}

/// Guardrail outcomes of one evaluation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionCounts {
    pub allowed: usize,
    pub pending_approval: usize,
    pub denied: usize,
}

impl DecisionCounts {
    fn record(&mut self, outcome: GuardrailOutcome) {
        match outcome {
            GuardrailOutcome::Allow => self.allowed += 1,
            GuardrailOutcome::RequireApproval => self.pending_approval += 1,
            GuardrailOutcome::Deny => self.denied += 1,
        }
    }
}

/// What one detection cycle did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub snapshot_id: String,
    pub period: String,
    pub started_at: DateTime<Utc>,
    pub candidates: usize,
    pub new_opportunities: Vec<String>,
    pub merged_in_cycle: usize,
    pub already_tracked: usize,
    pub detector_failures: Vec<DetectorFailure>,
    pub decisions: DecisionCounts,
    pub verified: usize,
    pub realized: usize,
    /// Non-fatal problems: failed notifications, skipped writes
    pub warnings: Vec<String>,
    pub duration_secs: f64,
}

/// The waste-opportunity lifecycle engine
pub struct FinopsEngine {
    ledger: Arc<Ledger>,
    detectors: DetectorRegistry,
    reconciler: Reconciler,
    guardrails: GuardrailEngine,
    proposals: ProposalGenerator,
    reports: ReportAggregator,
    verification: VerificationPolicy,
    approvals: Arc<dyn ApprovalChannel>,
    sink: Arc<dyn ProposalSink>,
    retry: RetryPolicy,
    detector_timeout: Duration,
    health: HealthRegistry,
    metrics: EngineMetrics,
    logger: StructuredLogger,
    cycle_lock: Mutex<()>,
}

impl FinopsEngine {
    /// Build an engine over an opened ledger
    ///
    /// The daily change counter is rebuilt from the approvals already
    /// recorded in the ledger, so a restart cannot reset today's cap.
    pub async fn new(
        settings: EngineSettings,
        ledger: Arc<Ledger>,
        approvals: Arc<dyn ApprovalChannel>,
        sink: Arc<dyn ProposalSink>,
    ) -> Result<Self, EngineError> {
        let spend = Arc::new(DailySpendLedger::new(settings.guardrails.max_daily_change_amount));
        spend.restore(ledger.approved_amounts_by_day().await);
        let guardrails = GuardrailEngine::from_config(&settings.guardrails, spend)?;

        let health = HealthRegistry::new();
        health.register_all().await;

        Ok(Self {
            detectors: DetectorRegistry::with_defaults(&settings.detectors),
            reconciler: Reconciler::new(settings.period_granularity),
            proposals: ProposalGenerator::new(settings.guardrails.max_blast_radius),
            reports: ReportAggregator::new(settings.report_top_n),
            verification: settings.verification_policy(),
            retry: settings.retry.clone(),
            detector_timeout: Duration::from_millis(settings.detector_timeout_ms),
            metrics: EngineMetrics::new(),
            logger: StructuredLogger::new(settings.instance.clone()),
            cycle_lock: Mutex::new(()),
            ledger,
            guardrails,
            approvals,
            sink,
            health,
        })
    }

    /// Replace the built-in detector set
    pub fn with_detectors(mut self, detectors: DetectorRegistry) -> Self {
        self.detectors = detectors;
        self
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn spend(&self) -> &Arc<DailySpendLedger> {
        self.guardrails.spend()
    }

    pub fn detector_names(&self) -> Vec<&'static str> {
        self.detectors.names()
    }

    pub fn policy_names(&self) -> Vec<String> {
        self.guardrails.policy_names()
    }

    /// Run one full detection cycle against a snapshot
    ///
    /// Detection, reconciliation, guardrail evaluation, verification and
    /// realization run in that order. Detector and collaborator failures
    /// are reported on the cycle; only ledger failures abort it.
    pub async fn run_cycle(
        &self,
        snapshot: ClusterSnapshot,
        baselines: Vec<CostBaseline>,
        now: DateTime<Utc>,
    ) -> Result<CycleReport, EngineError> {
        let _guard = self.cycle_lock.lock().await;
        let started = Instant::now();

        let result = self.cycle(snapshot, baselines, now, started).await;
        self.metrics
            .observe_cycle(started.elapsed().as_secs_f64(), result.is_ok());
        self.health.record(components::LEDGER, &result).await;
        result
    }

    async fn cycle(
        &self,
        snapshot: ClusterSnapshot,
        baselines: Vec<CostBaseline>,
        now: DateTime<Utc>,
        started: Instant,
    ) -> Result<CycleReport, EngineError> {
        let mut warnings = Vec::new();

        if !baselines.is_empty() {
            let ingested = self.ledger.ingest_baselines(baselines).await?;
            debug!(ingested, "Cost baselines ingested");
        }

        let period = self.reconciler.period_for(now);
        let fleet = fleet_context(&snapshot, now);
        let snapshot_id = snapshot.snapshot_id.clone();
        let input = Arc::new(DetectionInput {
            snapshot,
            baselines: BaselineIndex::new(self.ledger.baselines().await),
            period: period.clone(),
        });

        let detection = self.detectors.run_all(input, self.detector_timeout).await;
        for (detector, secs) in &detection.latencies {
            self.metrics.observe_detector(detector, *secs);
        }
        for failure in &detection.failures {
            self.metrics.inc_detector_failures(&failure.detector);
            self.logger.log_detector_failure(&failure.detector, &failure.reason);
        }
        if detection.failures.is_empty() {
            self.health.set_healthy(components::DETECTORS).await;
        } else {
            let message = format!(
                "{} of {} detectors failed",
                detection.failures.len(),
                self.detectors.len()
            );
            self.health.set_degraded(components::DETECTORS, message).await;
        }

        let fresh = detection.candidates;
        let candidates = fresh.len();
        let reconciled = self.reconciler.reconcile(&self.ledger, fresh.clone(), now).await?;
        for opportunity in &reconciled.new {
            self.metrics.inc_detected(opportunity.opportunity_type.as_str());
        }

        let decisions = self.evaluate_pending(&fleet, &mut warnings).await?;
        let verified = self.verify(&fresh, now, &mut warnings).await?;
        let realized = self.realize_due(now).await?;
        self.refresh_gauges(now).await;

        let duration_secs = started.elapsed().as_secs_f64();
        self.logger.log_cycle(
            &snapshot_id,
            candidates,
            reconciled.new.len(),
            detection.failures.len(),
            duration_secs,
        );

        Ok(CycleReport {
            snapshot_id,
            period: period.as_str().to_string(),
            started_at: now,
            candidates,
            new_opportunities: reconciled.new.iter().map(|o| o.id.clone()).collect(),
            merged_in_cycle: reconciled.merged_in_cycle,
            already_tracked: reconciled.already_tracked,
            detector_failures: detection.failures,
            decisions,
            verified,
            realized,
            warnings,
            duration_secs,
        })
    }

    /// Evaluate every Detected opportunity with no fleet fan-out data
    pub async fn evaluate_detected(&self, now: DateTime<Utc>) -> Result<DecisionCounts, EngineError> {
        let mut warnings = Vec::new();
        let counts = self.evaluate_pending(&FleetContext::at(now), &mut warnings).await?;
        for warning in warnings {
            warn!(warning = %warning, "Evaluation warning");
        }
        Ok(counts)
    }

    /// Guardrail pass over Detected opportunities, highest savings first
    ///
    /// Ranking first means the daily cap is spent on the most valuable
    /// changes when it cannot cover all of them.
    async fn evaluate_pending(
        &self,
        context: &FleetContext,
        warnings: &mut Vec<String>,
    ) -> Result<DecisionCounts, EngineError> {
        let mut detected = self
            .ledger
            .list(&OpportunityFilter::with_status(OpportunityStatus::Detected))
            .await;
        detected.sort_by(rank_order);

        let mut counts = DecisionCounts::default();
        for opportunity in detected {
            let id = opportunity.id.clone();
            match self.evaluate_one(opportunity, context).await {
                Ok(Some((outcome, updated))) => {
                    counts.record(outcome);
                    if updated.status == OpportunityStatus::PendingApproval {
                        self.request_approval(&updated, warnings).await;
                    }
                }
                Ok(None) => {}
                Err(e) if matches!(e, LedgerError::Persistence(_)) => return Err(e.into()),
                Err(e) => {
                    warn!(opportunity_id = %id, error = %e, "Guardrail decision not recorded");
                    warnings.push(format!("{}: {}", id, e));
                }
            }
        }
        Ok(counts)
    }

    async fn evaluate_one(
        &self,
        mut opportunity: Opportunity,
        context: &FleetContext,
    ) -> Result<Option<(GuardrailOutcome, Opportunity)>, LedgerError> {
        for _ in 0..MAX_STALE_RETRIES {
            // Someone else decided it in the meantime
            if opportunity.status != OpportunityStatus::Detected {
                return Ok(None);
            }

            let evaluation = self
                .guardrails
                .evaluate(std::slice::from_ref(&opportunity), context);
            let decision = evaluation.decision.clone();
            let request = TransitionRequest::from_decision(decision.clone());

            match self
                .ledger
                .transition(&opportunity.id, opportunity.version, request, context.now)
                .await
            {
                Ok(updated) => {
                    self.metrics.inc_guardrail_outcome(decision.outcome.as_str());
                    self.metrics.inc_transition(updated.status);
                    self.logger.log_guardrail_decision(&decision);
                    self.logger
                        .log_transition(&updated, OpportunityStatus::Detected);
                    return Ok(Some((decision.outcome, updated)));
                }
                Err(e) => {
                    evaluation.release();
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    opportunity = self
                        .ledger
                        .get(&opportunity.id)
                        .await
                        .ok_or_else(|| LedgerError::NotFound(opportunity.id.clone()))?;
                }
            }
        }
        Ok(None)
    }

    async fn request_approval(&self, opportunity: &Opportunity, warnings: &mut Vec<String>) {
        let request = ApprovalRequest::from(opportunity);
        let result = with_retry(&self.retry, "request_approval", || {
            self.approvals.request_approval(&request)
        })
        .await;
        self.health.record(components::APPROVAL_CHANNEL, &result).await;

        match result {
            Ok(()) => self
                .logger
                .log_approval_requested(&opportunity.id, self.approvals.name()),
            Err(e) => {
                self.metrics.inc_external_failures("request_approval");
                self.logger
                    .log_external_failure("request_approval", &e.to_string());
                warnings.push(e.to_string());
            }
        }
    }

    /// Apply a human approve/deny response to a PendingApproval opportunity
    ///
    /// An approval reserves against today's change cap first and fails with
    /// `DailyCapExhausted` when the cap cannot cover it.
    pub async fn apply_approval_signal(
        &self,
        id: &str,
        expected_version: Option<u64>,
        signal: ApprovalSignal,
        now: DateTime<Utc>,
    ) -> Result<Opportunity, EngineError> {
        let current = self
            .ledger
            .get(id)
            .await
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;
        let version = expected_version.unwrap_or(current.version);
        let to = if signal.approve {
            OpportunityStatus::Approved
        } else {
            OpportunityStatus::Denied
        };

        let spend = self.guardrails.spend();
        let day = now.date_naive();
        let amount = current.estimated_monthly_savings;
        let reserved = signal.approve && current.status == OpportunityStatus::PendingApproval;
        if reserved && !spend.try_reserve(day, amount) {
            return Err(LedgerError::DailyCapExhausted {
                day,
                requested: amount,
                remaining: spend.remaining(day),
            }
            .into());
        }

        let request = TransitionRequest::new(to, TransitionCause::Approval { signal });
        match self.ledger.transition(id, version, request, now).await {
            Ok(updated) => {
                self.metrics.inc_transition(updated.status);
                self.logger.log_transition(&updated, current.status);
                self.refresh_gauges(now).await;
                Ok(updated)
            }
            Err(e) => {
                if reserved {
                    spend.release(day, amount);
                }
                Err(e.into())
            }
        }
    }

    /// Roll an approved or implemented opportunity back
    pub async fn rollback(
        &self,
        id: &str,
        reason: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Opportunity, EngineError> {
        let current = self
            .ledger
            .get(id)
            .await
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;
        let request = TransitionRequest::new(
            OpportunityStatus::RolledBack,
            TransitionCause::Rollback {
                reason: reason.to_string(),
                actor: actor.to_string(),
            },
        );
        let updated = self
            .ledger
            .transition(id, current.version, request, now)
            .await?;
        self.metrics.inc_transition(updated.status);
        self.logger.log_rollback(&updated, actor);
        Ok(updated)
    }

    /// Generate a change proposal for approved opportunities and submit it
    ///
    /// Submission failures leave the proposal recorded without a review
    /// reference; proposing the same set again retries the submission.
    pub async fn propose(&self, ids: &[String], now: DateTime<Utc>) -> Result<ProposalOutcome, EngineError> {
        let outcome = self.proposals.generate(&self.ledger, ids, now).await?;
        let created = outcome.is_new();
        let proposal = outcome.into_proposal();
        self.logger.log_proposal(
            &proposal.id,
            proposal.opportunity_ids.len(),
            &proposal.content_hash,
            created,
        );
        if created {
            for _ in &proposal.opportunity_ids {
                self.metrics.inc_transition(OpportunityStatus::ProposalCreated);
            }
        }

        let proposal = if proposal.review_ref.is_none() {
            self.submit(proposal).await?
        } else {
            proposal
        };

        Ok(if created {
            ProposalOutcome::Created(proposal)
        } else {
            ProposalOutcome::Existing(proposal)
        })
    }

    async fn submit(&self, proposal: ChangeProposal) -> Result<ChangeProposal, EngineError> {
        let result = with_retry(&self.retry, "submit_proposal", || self.sink.submit(&proposal)).await;
        self.health.record(components::PROPOSAL_SINK, &result).await;

        match result {
            Ok(review_ref) => {
                self.ledger
                    .set_review_ref(&proposal.id, review_ref.clone())
                    .await?;
                Ok(ChangeProposal {
                    review_ref: Some(review_ref),
                    ..proposal
                })
            }
            Err(e) => {
                self.metrics.inc_external_failures("submit_proposal");
                self.logger
                    .log_external_failure("submit_proposal", &e.to_string());
                Ok(proposal)
            }
        }
    }

    /// Record that a proposal's change was applied
    pub async fn mark_implemented(
        &self,
        proposal_id: &str,
        reference: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Opportunity>, EngineError> {
        let updated = self
            .ledger
            .mark_proposal_implemented(proposal_id, reference, now)
            .await?;
        for opportunity in &updated {
            self.metrics.inc_transition(opportunity.status);
            self.logger
                .log_transition(opportunity, OpportunityStatus::ProposalCreated);
        }
        Ok(updated)
    }

    /// Verify Implemented opportunities against this cycle's detections
    pub async fn verify(
        &self,
        fresh: &[OpportunityCandidate],
        now: DateTime<Utc>,
        warnings: &mut Vec<String>,
    ) -> Result<usize, EngineError> {
        let implemented = self
            .ledger
            .list(&OpportunityFilter::with_status(OpportunityStatus::Implemented))
            .await;
        if implemented.is_empty() {
            return Ok(0);
        }

        let baselines = self.ledger.baselines().await;
        let mut verified = 0;
        for opportunity in implemented {
            let realized_savings = match assess(&opportunity, fresh, &baselines, now, &self.verification) {
                Verdict::Confirmed { realized_savings } => realized_savings,
                Verdict::StillWasteful => {
                    self.logger
                        .log_verification_deferred(&opportunity.id, "still_wasteful");
                    continue;
                }
                Verdict::AwaitingBaseline => {
                    self.logger
                        .log_verification_deferred(&opportunity.id, "awaiting_baseline");
                    continue;
                }
                Verdict::CoolingDown | Verdict::NotApplicable => continue,
            };

            let request = TransitionRequest::new(
                OpportunityStatus::Verified,
                TransitionCause::Verification { realized_savings },
            );
            match self
                .ledger
                .transition(&opportunity.id, opportunity.version, request, now)
                .await
            {
                Ok(updated) => {
                    verified += 1;
                    self.metrics.inc_transition(updated.status);
                    self.logger
                        .log_transition(&updated, OpportunityStatus::Implemented);
                }
                // Changed concurrently; the next cycle looks again
                Err(e) if e.is_retryable() => warnings.push(e.to_string()),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(verified)
    }

    /// Move Verified opportunities past the realization period to Realized
    pub async fn realize_due(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
        let verified = self
            .ledger
            .list(&OpportunityFilter::with_status(OpportunityStatus::Verified))
            .await;

        let mut realized = 0;
        for opportunity in verified
            .iter()
            .filter(|o| realization_due(o, now, &self.verification))
        {
            let request = TransitionRequest::new(OpportunityStatus::Realized, TransitionCause::Realization);
            match self
                .ledger
                .transition(&opportunity.id, opportunity.version, request, now)
                .await
            {
                Ok(updated) => {
                    realized += 1;
                    self.metrics.inc_transition(updated.status);
                    self.logger
                        .log_transition(&updated, OpportunityStatus::Verified);
                }
                Err(e) if e.is_retryable() => {
                    debug!(opportunity_id = %opportunity.id, "Realization deferred by concurrent write")
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(realized)
    }

    /// Build and persist a savings report
    pub async fn generate_report(&self, period: ReportPeriod, now: DateTime<Utc>) -> Result<ReportSummary, EngineError> {
        Ok(self.reports.generate_report(&self.ledger, period, now).await?)
    }

    pub async fn aggregate(&self, query: &AggregateQuery) -> SavingsAggregate {
        self.ledger.aggregate(query).await
    }

    async fn refresh_gauges(&self, now: DateTime<Utc>) {
        let totals = self.ledger.aggregate(&AggregateQuery::all()).await;
        self.metrics.set_savings(
            totals.total_estimated_monthly_savings,
            totals.total_realized_savings,
        );
        self.metrics
            .set_daily_change_reserved(self.spend().reserved(now.date_naive()));
    }
}

/// Dependency fan-out per workload as seen in the snapshot
fn fleet_context(snapshot: &ClusterSnapshot, now: DateTime<Utc>) -> FleetContext {
    snapshot
        .workloads
        .iter()
        .fold(FleetContext::at(now), |context, workload| {
            context.with_fanout(&workload.id, workload.dependency_fanout)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{async_trait, LogApprovalChannel};
    use crate::guardrail::ChangeWindow;
    use crate::testing::{baseline, baseline_for_period, snapshot, ts, workload};
    use chrono::NaiveTime;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingSink {
        submitted: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl ProposalSink for RecordingSink {
        async fn submit(&self, proposal: &ChangeProposal) -> anyhow::Result<String> {
            self.submitted.lock().unwrap().push(proposal.id.clone());
            Ok(format!("review/{}", proposal.id))
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    struct FailingChannel;

    #[async_trait]
    impl ApprovalChannel for FailingChannel {
        async fn request_approval(&self, _request: &ApprovalRequest) -> anyhow::Result<()> {
            anyhow::bail!("chat service unavailable")
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    fn fast_settings() -> EngineSettings {
        EngineSettings {
            retry: RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
                ..RetryPolicy::default()
            },
            ..EngineSettings::default()
        }
    }

    /// Every change needs a human: the only window is 09:00-10:00 and
    /// the tests run at midnight
    fn approval_settings(daily_cap: f64) -> EngineSettings {
        let mut settings = fast_settings();
        settings.guardrails.max_daily_change_amount = daily_cap;
        settings.guardrails.change_windows = vec![ChangeWindow {
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
        }];
        settings
    }

    async fn engine_with(settings: EngineSettings, channel: Arc<dyn ApprovalChannel>) -> (FinopsEngine, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let engine = FinopsEngine::new(settings, Arc::new(Ledger::in_memory()), channel, sink.clone())
            .await
            .unwrap();
        (engine, sink)
    }

    fn two_workload_snapshot() -> ClusterSnapshot {
        let mut snap = snapshot();
        snap.workloads = vec![
            workload("checkout", 2.0, 0.4, 4.0, 3.5),
            workload("cart", 2.0, 0.4, 4.0, 3.5),
        ];
        snap
    }

    fn approve(actor: &str) -> ApprovalSignal {
        ApprovalSignal {
            approve: true,
            actor: actor.to_string(),
            reason: None,
        }
    }

    #[tokio::test]
    async fn test_cycle_detects_and_approves() {
        let (engine, _) = engine_with(fast_settings(), Arc::new(LogApprovalChannel)).await;
        let mut snap = snapshot();
        snap.workloads.push(workload("checkout", 2.0, 0.4, 4.0, 3.5));
        let now = ts(2026, 10, 19);

        let report = engine
            .run_cycle(snap, vec![baseline("checkout", 200.0)], now)
            .await
            .unwrap();

        assert_eq!(report.candidates, 1);
        assert_eq!(report.new_opportunities.len(), 1);
        assert_eq!(report.decisions.allowed, 1);
        assert!(report.detector_failures.is_empty());

        let stored = engine.ledger().get(&report.new_opportunities[0]).await.unwrap();
        assert_eq!(stored.status, OpportunityStatus::Approved);
        assert!((engine.spend().reserved(now.date_naive()) - 84.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_repeated_cycle_tracks_existing() {
        let (engine, _) = engine_with(fast_settings(), Arc::new(LogApprovalChannel)).await;
        let now = ts(2026, 10, 19);

        let first = engine.run_cycle(two_workload_snapshot(), Vec::new(), now).await.unwrap();
        let second = engine.run_cycle(two_workload_snapshot(), Vec::new(), now).await.unwrap();

        assert_eq!(first.new_opportunities.len(), 2);
        assert!(second.new_opportunities.is_empty());
        assert_eq!(second.already_tracked, 2);
        assert_eq!(engine.ledger().count().await, 2);
    }

    #[tokio::test]
    async fn test_human_approval_respects_daily_cap() {
        let (engine, _) = engine_with(approval_settings(100.0), Arc::new(LogApprovalChannel)).await;
        let now = ts(2026, 10, 19);
        let baselines = vec![baseline("checkout", 200.0), baseline("cart", 200.0)];

        let report = engine.run_cycle(two_workload_snapshot(), baselines, now).await.unwrap();
        assert_eq!(report.decisions.pending_approval, 2);
        assert_eq!(engine.spend().reserved(now.date_naive()), 0.0);

        let ids = report.new_opportunities;
        let first = engine
            .apply_approval_signal(&ids[0], None, approve("alice"), now)
            .await
            .unwrap();
        assert_eq!(first.status, OpportunityStatus::Approved);

        let err = engine
            .apply_approval_signal(&ids[1], None, approve("alice"), now)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Ledger(LedgerError::DailyCapExhausted { .. })));
        let untouched = engine.ledger().get(&ids[1]).await.unwrap();
        assert_eq!(untouched.status, OpportunityStatus::PendingApproval);
        assert!((engine.spend().reserved(now.date_naive()) - 84.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_failed_transition_releases_reservation() {
        let (engine, _) = engine_with(approval_settings(1000.0), Arc::new(LogApprovalChannel)).await;
        let now = ts(2026, 10, 19);
        let mut snap = snapshot();
        snap.workloads.push(workload("checkout", 2.0, 0.4, 4.0, 3.5));
        let report = engine
            .run_cycle(snap, vec![baseline("checkout", 200.0)], now)
            .await
            .unwrap();
        let id = &report.new_opportunities[0];

        let err = engine
            .apply_approval_signal(id, Some(99), approve("bob"), now)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Ledger(LedgerError::StaleVersionConflict { .. })));
        assert_eq!(engine.spend().reserved(now.date_naive()), 0.0);
    }

    #[tokio::test]
    async fn test_unreachable_approval_channel_is_a_warning() {
        let (engine, _) = engine_with(approval_settings(1000.0), Arc::new(FailingChannel)).await;
        let mut snap = snapshot();
        snap.workloads.push(workload("checkout", 2.0, 0.4, 4.0, 3.5));

        let report = engine.run_cycle(snap, Vec::new(), ts(2026, 10, 19)).await.unwrap();
        assert_eq!(report.decisions.pending_approval, 1);
        assert_eq!(report.warnings.len(), 1);

        let health = engine.health().health().await;
        assert_eq!(
            health.components[components::APPROVAL_CHANNEL].status,
            crate::health::ComponentStatus::Degraded
        );
    }

    #[tokio::test]
    async fn test_full_lifecycle_to_realized() {
        let (engine, sink) = engine_with(fast_settings(), Arc::new(LogApprovalChannel)).await;
        let detected_at = ts(2026, 10, 19);
        let mut snap = snapshot();
        snap.workloads.push(workload("checkout", 2.0, 0.4, 4.0, 3.5));

        let report = engine
            .run_cycle(snap, vec![baseline("checkout", 200.0)], detected_at)
            .await
            .unwrap();
        let id = report.new_opportunities[0].clone();

        let outcome = engine.propose(&[id.clone()], detected_at).await.unwrap();
        assert!(outcome.is_new());
        let proposal = outcome.into_proposal();
        assert_eq!(proposal.review_ref.as_deref(), Some(format!("review/{}", proposal.id).as_str()));
        assert_eq!(sink.submitted.lock().unwrap().len(), 1);

        let again = engine.propose(&[id.clone()], detected_at).await.unwrap();
        assert!(!again.is_new());
        assert_eq!(sink.submitted.lock().unwrap().len(), 1);

        let implemented_at = ts(2026, 10, 20);
        let implemented = engine
            .mark_implemented(&proposal.id, "commit-abc123", implemented_at)
            .await
            .unwrap();
        assert_eq!(implemented[0].status, OpportunityStatus::Implemented);

        // Rightsized workload, and a cheaper baseline after the change
        let mut after = snapshot();
        after.snapshot_id = "snap-2".to_string();
        after.taken_at = ts(2026, 10, 22);
        after.workloads.push(workload("checkout", 0.6, 0.4, 4.0, 3.5));
        let post = baseline_for_period("checkout", 116.0, ts(2026, 10, 21), ts(2026, 11, 21));

        let report = engine.run_cycle(after, vec![post], ts(2026, 10, 22)).await.unwrap();
        assert_eq!(report.verified, 1);
        let verified = engine.ledger().get(&id).await.unwrap();
        assert_eq!(verified.status, OpportunityStatus::Verified);
        assert!((verified.realized_savings.unwrap() - 84.0).abs() < 1e-6);

        assert_eq!(engine.realize_due(ts(2026, 11, 10)).await.unwrap(), 0);
        assert_eq!(engine.realize_due(ts(2026, 11, 22)).await.unwrap(), 1);
        assert_eq!(
            engine.ledger().get(&id).await.unwrap().status,
            OpportunityStatus::Realized
        );
    }

    #[tokio::test]
    async fn test_rollback_from_approved() {
        let (engine, _) = engine_with(fast_settings(), Arc::new(LogApprovalChannel)).await;
        let mut snap = snapshot();
        snap.workloads.push(workload("checkout", 2.0, 0.4, 4.0, 3.5));
        let now = ts(2026, 10, 19);
        let report = engine.run_cycle(snap, Vec::new(), now).await.unwrap();
        let id = &report.new_opportunities[0];

        let rolled = engine.rollback(id, "latency regression", "sre-oncall", now).await.unwrap();
        assert_eq!(rolled.status, OpportunityStatus::RolledBack);
        assert_eq!(rolled.rollback_reason.as_deref(), Some("latency regression"));

        let err = engine.rollback(id, "again", "sre-oncall", now).await.unwrap_err();
        assert!(matches!(err, EngineError::Ledger(LedgerError::InvalidStateTransition { .. })));
    }

    #[tokio::test]
    async fn test_daily_cap_restored_on_restart() {
        let ledger = Arc::new(Ledger::in_memory());
        let now = ts(2026, 10, 19);
        let sink: Arc<dyn ProposalSink> = Arc::new(RecordingSink::default());
        let first = FinopsEngine::new(fast_settings(), ledger.clone(), Arc::new(LogApprovalChannel), sink.clone())
            .await
            .unwrap();
        first.run_cycle(two_workload_snapshot(), vec![baseline("checkout", 200.0), baseline("cart", 200.0)], now)
            .await
            .unwrap();
        drop(first);

        let second = FinopsEngine::new(fast_settings(), ledger, Arc::new(LogApprovalChannel), sink)
            .await
            .unwrap();
        assert!((second.spend().reserved(now.date_naive()) - 168.0).abs() < 1e-6);
    }
}
