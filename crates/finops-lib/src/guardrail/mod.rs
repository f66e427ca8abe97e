//! Guardrail policy engine
//!
//! Policies are evaluated in ascending priority. The first Deny
//! short-circuits and becomes the outcome; otherwise any RequireApproval
//! wins over Allow. A policy that cannot be evaluated is treated as Deny
//! and the error is kept on the decision.

mod policy;
mod risk;
mod spend;

#[cfg(test)]
mod tests;

pub use policy::{
    AllowedChangeWindows, ChangeWindow, EvaluationScope, MaxBlastRadius, MaxDailyChangeAmount,
    MaxRiskScore, MaxSingleChangeAmount, MinConfidenceThreshold, Policy, PolicyInput,
    ProtectedTags, Reservation,
};
pub use risk::{RiskModel, RiskWeights};
pub use spend::DailySpendLedger;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::GuardrailError;
use crate::models::Opportunity;

/// Outcome of a guardrail evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailOutcome {
    Allow,
    RequireApproval,
    Deny,
}

impl GuardrailOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardrailOutcome::Allow => "allow",
            GuardrailOutcome::RequireApproval => "require_approval",
            GuardrailOutcome::Deny => "deny",
        }
    }
}

impl fmt::Display for GuardrailOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable audit record of one evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailDecision {
    pub opportunity_ids: Vec<String>,
    pub outcome: GuardrailOutcome,
    /// Policies that fired, in evaluation order
    pub triggered_policy_names: Vec<String>,
    /// Highest risk score in the evaluated set
    pub risk_score: f64,
    pub evaluated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Fleet-wide facts a single detector cannot see
#[derive(Debug, Clone, PartialEq)]
pub struct FleetContext {
    /// Evaluation instant; all time-dependent policies read this
    pub now: DateTime<Utc>,
    /// Current dependency fan-out per workload id
    pub dependency_fanout: HashMap<String, u32>,
}

impl FleetContext {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now,
            dependency_fanout: HashMap::new(),
        }
    }

    pub fn with_fanout(mut self, workload_id: &str, fanout: u32) -> Self {
        self.dependency_fanout.insert(workload_id.to_string(), fanout);
        self
    }
}

/// Default priority of each canonical policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyPriorities {
    pub min_confidence_threshold: u32,
    pub max_risk_score: u32,
    pub protected_tags: u32,
    pub max_single_change_amount: u32,
    pub max_blast_radius: u32,
    pub allowed_change_windows: u32,
    pub max_daily_change_amount: u32,
}

impl Default for PolicyPriorities {
    fn default() -> Self {
        Self {
            min_confidence_threshold: 10,
            max_risk_score: 20,
            protected_tags: 30,
            max_single_change_amount: 40,
            max_blast_radius: 50,
            allowed_change_windows: 60,
            max_daily_change_amount: 100,
        }
    }
}

/// Guardrail configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailConfig {
    pub min_confidence: f64,
    pub max_risk_score: f64,
    pub protected_tags: Vec<String>,
    pub max_single_change_amount: f64,
    pub max_daily_change_amount: f64,
    pub max_blast_radius: usize,
    /// Empty disables the change-window policy
    pub change_windows: Vec<ChangeWindow>,
    pub risk_weights: RiskWeights,
    pub fanout_ceiling: u32,
    pub magnitude_ceiling: f64,
    pub priorities: PolicyPriorities,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.7,
            max_risk_score: 0.5,
            protected_tags: vec!["production-critical".to_string()],
            max_single_change_amount: 500.0,
            max_daily_change_amount: 1000.0,
            max_blast_radius: 5,
            change_windows: Vec::new(),
            risk_weights: RiskWeights::default(),
            fanout_ceiling: 10,
            magnitude_ceiling: 500.0,
            priorities: PolicyPriorities::default(),
        }
    }
}

/// Decision plus the daily-cap reservations backing an Allow
#[derive(Debug)]
pub struct Evaluation {
    pub decision: GuardrailDecision,
    pub reservations: Vec<Reservation>,
}

impl Evaluation {
    /// Undo reservations when the decision could not be recorded
    pub fn release(self) {
        for reservation in &self.reservations {
            reservation.release();
        }
    }
}

/// Evaluates candidates and batches against an ordered policy set
pub struct GuardrailEngine {
    policies: Vec<Box<dyn Policy>>,
    risk: RiskModel,
    spend: Arc<DailySpendLedger>,
    blast_radius_limit: usize,
}

impl GuardrailEngine {
    /// Build the canonical policy set from configuration
    pub fn from_config(config: &GuardrailConfig, spend: Arc<DailySpendLedger>) -> Result<Self, GuardrailError> {
        if !(0.0..=1.0).contains(&config.min_confidence) || !(0.0..=1.0).contains(&config.max_risk_score) {
            return Err(GuardrailError::InvalidConfig(
                "confidence and risk thresholds must be within [0, 1]".to_string(),
            ));
        }
        let risk = RiskModel::new(
            config.risk_weights,
            config.fanout_ceiling,
            config.magnitude_ceiling,
            config.protected_tags.clone(),
        )?;
        let priorities = &config.priorities;
        let policies: Vec<Box<dyn Policy>> = vec![
            Box::new(MinConfidenceThreshold {
                threshold: config.min_confidence,
                priority: priorities.min_confidence_threshold,
            }),
            Box::new(MaxRiskScore {
                threshold: config.max_risk_score,
                priority: priorities.max_risk_score,
            }),
            Box::new(ProtectedTags {
                tags: config.protected_tags.clone(),
                priority: priorities.protected_tags,
            }),
            Box::new(MaxSingleChangeAmount {
                cap: config.max_single_change_amount,
                priority: priorities.max_single_change_amount,
            }),
            Box::new(MaxBlastRadius {
                limit: config.max_blast_radius,
                priority: priorities.max_blast_radius,
            }),
            Box::new(AllowedChangeWindows {
                windows: config.change_windows.clone(),
                priority: priorities.allowed_change_windows,
            }),
            Box::new(MaxDailyChangeAmount {
                spend: Arc::clone(&spend),
                priority: priorities.max_daily_change_amount,
            }),
        ];
        Ok(Self::new(policies, risk, spend, config.max_blast_radius))
    }

    pub fn new(
        mut policies: Vec<Box<dyn Policy>>,
        risk: RiskModel,
        spend: Arc<DailySpendLedger>,
        blast_radius_limit: usize,
    ) -> Self {
        // Stable sort keeps registration order among equal priorities
        policies.sort_by_key(|p| p.priority());
        Self {
            policies,
            risk,
            spend,
            blast_radius_limit,
        }
    }

    /// Register an additional policy
    pub fn with_policy(mut self, policy: Box<dyn Policy>) -> Self {
        self.policies.push(policy);
        self.policies.sort_by_key(|p| p.priority());
        self
    }

    pub fn policy_names(&self) -> Vec<String> {
        self.policies.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn spend(&self) -> &Arc<DailySpendLedger> {
        &self.spend
    }

    pub fn blast_radius_limit(&self) -> usize {
        self.blast_radius_limit
    }

    pub fn risk_score(&self, opportunity: &Opportunity, context: &FleetContext) -> f64 {
        self.risk.score(opportunity, context)
    }

    /// Evaluate one opportunity or a batch
    pub fn evaluate(&self, subject: &[Opportunity], context: &FleetContext) -> Evaluation {
        let ids = subject.iter().map(|o| o.id.clone()).collect();
        if subject.is_empty() {
            return Evaluation {
                decision: GuardrailDecision {
                    opportunity_ids: ids,
                    outcome: GuardrailOutcome::Deny,
                    triggered_policy_names: Vec::new(),
                    risk_score: 0.0,
                    evaluated_at: context.now,
                    error: Some("nothing to evaluate".to_string()),
                },
                reservations: Vec::new(),
            };
        }

        let risk_scores: Vec<f64> = subject.iter().map(|o| self.risk.score(o, context)).collect();
        let input = PolicyInput {
            opportunities: subject,
            risk_scores: &risk_scores,
            context,
        };

        let mut scope = EvaluationScope::default();
        let mut outcome = GuardrailOutcome::Allow;
        let mut triggered = Vec::new();
        let mut error = None;

        for policy in &self.policies {
            match policy.fires(&input, &mut scope) {
                Ok(false) => {}
                Ok(true) => {
                    triggered.push(policy.name().to_string());
                    match policy.outcome() {
                        GuardrailOutcome::Deny => {
                            outcome = GuardrailOutcome::Deny;
                            break;
                        }
                        GuardrailOutcome::RequireApproval => outcome = GuardrailOutcome::RequireApproval,
                        GuardrailOutcome::Allow => {}
                    }
                }
                Err(e) => {
                    triggered.push(policy.name().to_string());
                    outcome = GuardrailOutcome::Deny;
                    error = Some(e.to_string());
                    break;
                }
            }
        }

        if outcome != GuardrailOutcome::Allow {
            scope.release_all();
        }

        Evaluation {
            decision: GuardrailDecision {
                opportunity_ids: ids,
                outcome,
                triggered_policy_names: triggered,
                risk_score: risk_scores.iter().copied().fold(0.0, f64::max),
                evaluated_at: context.now,
                error,
            },
            reservations: scope.into_reservations(),
        }
    }
}
