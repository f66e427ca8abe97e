//! Guardrail policies
//!
//! A policy is a named predicate with a priority and the outcome it forces
//! when it fires. Policies hold configuration only; the daily cap is the
//! one policy that touches shared state, and it does so through the
//! injected `DailySpendLedger`.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use super::spend::DailySpendLedger;
use super::{FleetContext, GuardrailOutcome};
use crate::error::GuardrailError;
use crate::models::Opportunity;

/// What a policy sees for one evaluation
pub struct PolicyInput<'a> {
    pub opportunities: &'a [Opportunity],
    /// Risk score per opportunity, same order as `opportunities`
    pub risk_scores: &'a [f64],
    pub context: &'a FleetContext,
}

impl PolicyInput<'_> {
    pub fn total_savings(&self) -> f64 {
        self.opportunities
            .iter()
            .map(|o| o.estimated_monthly_savings)
            .sum()
    }

    pub fn distinct_workloads(&self) -> usize {
        self.opportunities
            .iter()
            .map(|o| o.workload_id.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }
}

/// A daily-cap reservation made during an evaluation
#[derive(Debug, Clone)]
pub struct Reservation {
    ledger: Arc<DailySpendLedger>,
    pub day: NaiveDate,
    pub amount: f64,
}

impl Reservation {
    pub fn release(&self) {
        self.ledger.release(self.day, self.amount);
    }
}

/// Side effects staged by policies during one evaluation
#[derive(Debug, Default)]
pub struct EvaluationScope {
    reservations: Vec<Reservation>,
}

impl EvaluationScope {
    pub fn stage(&mut self, ledger: Arc<DailySpendLedger>, day: NaiveDate, amount: f64) {
        self.reservations.push(Reservation { ledger, day, amount });
    }

    pub fn release_all(&mut self) {
        for reservation in self.reservations.drain(..) {
            reservation.release();
        }
    }

    pub fn into_reservations(self) -> Vec<Reservation> {
        self.reservations
    }
}

/// A guardrail policy
pub trait Policy: Send + Sync {
    fn name(&self) -> &str;

    /// Lower evaluates first
    fn priority(&self) -> u32;

    /// Outcome forced when the policy fires
    fn outcome(&self) -> GuardrailOutcome;

    /// Whether the policy fires for this input
    fn fires(&self, input: &PolicyInput<'_>, scope: &mut EvaluationScope) -> Result<bool, GuardrailError>;
}

fn evaluation_error(policy: &str, reason: impl Into<String>) -> GuardrailError {
    GuardrailError::PolicyEvaluation {
        policy: policy.to_string(),
        reason: reason.into(),
    }
}

/// Deny if any confidence is below the threshold
pub struct MinConfidenceThreshold {
    pub threshold: f64,
    pub priority: u32,
}

impl Policy for MinConfidenceThreshold {
    fn name(&self) -> &str {
        "min_confidence_threshold"
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn outcome(&self) -> GuardrailOutcome {
        GuardrailOutcome::Deny
    }

    fn fires(&self, input: &PolicyInput<'_>, _scope: &mut EvaluationScope) -> Result<bool, GuardrailError> {
        let mut fired = false;
        for opportunity in input.opportunities {
            if !opportunity.confidence.is_finite() {
                return Err(evaluation_error(
                    self.name(),
                    format!("confidence of {} is not a number", opportunity.id),
                ));
            }
            fired |= opportunity.confidence < self.threshold;
        }
        Ok(fired)
    }
}

/// Deny if any risk score exceeds the threshold
pub struct MaxRiskScore {
    pub threshold: f64,
    pub priority: u32,
}

impl Policy for MaxRiskScore {
    fn name(&self) -> &str {
        "max_risk_score"
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn outcome(&self) -> GuardrailOutcome {
        GuardrailOutcome::Deny
    }

    fn fires(&self, input: &PolicyInput<'_>, _scope: &mut EvaluationScope) -> Result<bool, GuardrailError> {
        if input.risk_scores.len() != input.opportunities.len() {
            return Err(evaluation_error(self.name(), "risk scores missing for batch"));
        }
        Ok(input.risk_scores.iter().any(|r| *r > self.threshold))
    }
}

/// Deny protected workloads unless an explicit override is set
pub struct ProtectedTags {
    pub tags: Vec<String>,
    pub priority: u32,
}

impl Policy for ProtectedTags {
    fn name(&self) -> &str {
        "protected_tags"
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn outcome(&self) -> GuardrailOutcome {
        GuardrailOutcome::Deny
    }

    fn fires(&self, input: &PolicyInput<'_>, _scope: &mut EvaluationScope) -> Result<bool, GuardrailError> {
        Ok(input.opportunities.iter().any(|o| {
            !o.protected_override && self.tags.iter().any(|t| o.has_tag(t))
        }))
    }
}

/// Deny any single change above the cap
pub struct MaxSingleChangeAmount {
    pub cap: f64,
    pub priority: u32,
}

impl Policy for MaxSingleChangeAmount {
    fn name(&self) -> &str {
        "max_single_change_amount"
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn outcome(&self) -> GuardrailOutcome {
        GuardrailOutcome::Deny
    }

    fn fires(&self, input: &PolicyInput<'_>, _scope: &mut EvaluationScope) -> Result<bool, GuardrailError> {
        Ok(input
            .opportunities
            .iter()
            .any(|o| o.estimated_monthly_savings > self.cap))
    }
}

/// Deny batches touching more distinct workloads than the limit
pub struct MaxBlastRadius {
    pub limit: usize,
    pub priority: u32,
}

impl MaxBlastRadius {
    pub fn exceeded_by(&self, workloads: usize) -> bool {
        workloads > self.limit
    }
}

impl Policy for MaxBlastRadius {
    fn name(&self) -> &str {
        "max_blast_radius"
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn outcome(&self) -> GuardrailOutcome {
        GuardrailOutcome::Deny
    }

    fn fires(&self, input: &PolicyInput<'_>, _scope: &mut EvaluationScope) -> Result<bool, GuardrailError> {
        Ok(self.exceeded_by(input.distinct_workloads()))
    }
}

/// UTC time-of-day window; `start > end` wraps past midnight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl ChangeWindow {
    pub fn contains(&self, at: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= at && at < self.end
        } else {
            at >= self.start || at < self.end
        }
    }
}

/// Require approval outside the configured change windows
pub struct AllowedChangeWindows {
    pub windows: Vec<ChangeWindow>,
    pub priority: u32,
}

impl Policy for AllowedChangeWindows {
    fn name(&self) -> &str {
        "allowed_change_windows"
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn outcome(&self) -> GuardrailOutcome {
        GuardrailOutcome::RequireApproval
    }

    fn fires(&self, input: &PolicyInput<'_>, _scope: &mut EvaluationScope) -> Result<bool, GuardrailError> {
        if self.windows.is_empty() {
            return Ok(false);
        }
        let now = input.context.now.time();
        Ok(!self.windows.iter().any(|w| w.contains(now)))
    }
}

/// Deny once the day's approved savings would exceed the cap
///
/// Reserves the batch total against the evaluation day when it fits; the
/// reservation is staged so the engine can release it if the final outcome
/// is not Allow.
pub struct MaxDailyChangeAmount {
    pub spend: Arc<DailySpendLedger>,
    pub priority: u32,
}

impl Policy for MaxDailyChangeAmount {
    fn name(&self) -> &str {
        "max_daily_change_amount"
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn outcome(&self) -> GuardrailOutcome {
        GuardrailOutcome::Deny
    }

    fn fires(&self, input: &PolicyInput<'_>, scope: &mut EvaluationScope) -> Result<bool, GuardrailError> {
        let amount = input.total_savings();
        if !amount.is_finite() {
            return Err(evaluation_error(self.name(), "batch savings total is not a number"));
        }
        let day = input.context.now.date_naive();
        if self.spend.try_reserve(day, amount) {
            scope.stage(Arc::clone(&self.spend), day, amount);
            Ok(false)
        } else {
            Ok(true)
        }
    }
}
