//! Guardrail engine tests

use super::*;
use crate::models::OpportunityStatus;
use crate::testing::{opportunity_with, ts};
use chrono::{NaiveTime, TimeZone};

fn engine_with(config: GuardrailConfig) -> GuardrailEngine {
    let spend = Arc::new(DailySpendLedger::new(config.max_daily_change_amount));
    GuardrailEngine::from_config(&config, spend).unwrap()
}

fn detected(id: &str, savings: f64, confidence: f64) -> Opportunity {
    let mut opp = opportunity_with(id, OpportunityStatus::Detected, savings, None);
    opp.confidence = confidence;
    opp
}

fn noon() -> FleetContext {
    FleetContext::at(Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap())
}

struct FailingPolicy;

impl Policy for FailingPolicy {
    fn name(&self) -> &str {
        "cost_center_lookup"
    }

    fn priority(&self) -> u32 {
        5
    }

    fn outcome(&self) -> GuardrailOutcome {
        GuardrailOutcome::RequireApproval
    }

    fn fires(&self, _input: &PolicyInput<'_>, _scope: &mut EvaluationScope) -> Result<bool, GuardrailError> {
        Err(GuardrailError::PolicyEvaluation {
            policy: "cost_center_lookup".to_string(),
            reason: "cost center registry unavailable".to_string(),
        })
    }
}

#[test]
fn test_allows_confident_low_risk_change() {
    let engine = engine_with(GuardrailConfig::default());
    let evaluation = engine.evaluate(&[detected("a", 120.0, 0.8)], &noon());
    assert_eq!(evaluation.decision.outcome, GuardrailOutcome::Allow);
    assert!(evaluation.decision.triggered_policy_names.is_empty());
    assert_eq!(evaluation.reservations.len(), 1);
    assert_eq!(engine.spend().reserved(noon().now.date_naive()), 120.0);
}

#[test]
fn test_protected_tag_denies_without_override() {
    // A workload tagged production-critical with a high-confidence finding
    let engine = engine_with(GuardrailConfig::default());
    let mut opp = detected("a", 50.0, 0.95);
    opp.tags.push("production-critical".to_string());
    let evaluation = engine.evaluate(&[opp.clone()], &noon());
    assert_eq!(evaluation.decision.outcome, GuardrailOutcome::Deny);
    assert!(evaluation
        .decision
        .triggered_policy_names
        .contains(&"protected_tags".to_string()));
    assert_eq!(engine.spend().reserved(noon().now.date_naive()), 0.0);

    opp.protected_override = true;
    let weights = RiskWeights {
        dependency_fanout: 0.5,
        change_magnitude: 0.5,
        protected_tag: 0.0,
    };
    let engine = engine_with(GuardrailConfig {
        risk_weights: weights,
        ..Default::default()
    });
    assert_eq!(engine.evaluate(&[opp], &noon()).decision.outcome, GuardrailOutcome::Allow);
}

#[test]
fn test_first_deny_short_circuits_in_priority_order() {
    let engine = engine_with(GuardrailConfig::default());
    let opp = detected("a", 900.0, 0.3);
    let decision = engine.evaluate(&[opp], &noon()).decision;
    assert_eq!(decision.outcome, GuardrailOutcome::Deny);
    assert_eq!(decision.triggered_policy_names, vec!["min_confidence_threshold".to_string()]);
}

#[test]
fn test_daily_cap_across_sequential_candidates() {
    // Five approvable candidates of $400 against a $1000 daily cap
    let engine = engine_with(GuardrailConfig {
        max_risk_score: 0.9,
        ..Default::default()
    });
    let outcomes: Vec<_> = (0..5)
        .map(|i| {
            engine
                .evaluate(&[detected(&format!("opp-{}", i), 400.0, 0.9)], &noon())
                .decision
                .outcome
        })
        .collect();
    let allowed = outcomes.iter().filter(|o| **o == GuardrailOutcome::Allow).count();
    assert_eq!(allowed, 2);
    assert!(engine.spend().reserved(noon().now.date_naive()) <= 1000.0);
    assert_eq!(outcomes[2], GuardrailOutcome::Deny);
}

#[test]
fn test_policy_error_fails_closed() {
    let engine = engine_with(GuardrailConfig::default()).with_policy(Box::new(FailingPolicy));
    let decision = engine.evaluate(&[detected("a", 10.0, 0.99)], &noon()).decision;
    assert_eq!(decision.outcome, GuardrailOutcome::Deny);
    assert_eq!(decision.triggered_policy_names, vec!["cost_center_lookup".to_string()]);
    assert!(decision.error.unwrap().contains("registry unavailable"));
}

#[test]
fn test_require_approval_outside_window_releases_reservation() {
    let config = GuardrailConfig {
        change_windows: vec![ChangeWindow {
            start: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(4, 0, 0).unwrap(),
        }],
        ..Default::default()
    };
    let engine = engine_with(config);
    let evaluation = engine.evaluate(&[detected("a", 100.0, 0.9)], &noon());
    assert_eq!(evaluation.decision.outcome, GuardrailOutcome::RequireApproval);
    assert!(evaluation.reservations.is_empty());
    assert_eq!(engine.spend().reserved(noon().now.date_naive()), 0.0);

    let night = FleetContext::at(Utc.with_ymd_and_hms(2026, 10, 19, 23, 0, 0).unwrap());
    assert_eq!(
        engine.evaluate(&[detected("b", 100.0, 0.9)], &night).decision.outcome,
        GuardrailOutcome::Allow
    );
}

#[test]
fn test_decisions_are_deterministic() {
    let config = GuardrailConfig::default();
    let opp = detected("a", 300.0, 0.75);
    let first = engine_with(config.clone()).evaluate(&[opp.clone()], &noon()).decision;
    let second = engine_with(config).evaluate(&[opp], &noon()).decision;
    assert_eq!(first, second);
}

#[test]
fn test_batch_blast_radius() {
    let engine = engine_with(GuardrailConfig {
        max_daily_change_amount: 10_000.0,
        max_risk_score: 1.0,
        ..Default::default()
    });
    let batch: Vec<_> = (0..6)
        .map(|i| {
            let mut opp = detected(&format!("opp-{}", i), 10.0, 0.9);
            opp.workload_id = format!("svc-{}", i);
            opp
        })
        .collect();
    let decision = engine.evaluate(&batch, &noon()).decision;
    assert_eq!(decision.outcome, GuardrailOutcome::Deny);
    assert_eq!(decision.triggered_policy_names, vec!["max_blast_radius".to_string()]);
    assert_eq!(decision.opportunity_ids.len(), 6);
}

#[test]
fn test_invalid_weights_rejected() {
    let config = GuardrailConfig {
        risk_weights: RiskWeights {
            dependency_fanout: 0.9,
            change_magnitude: 0.3,
            protected_tag: 0.3,
        },
        ..Default::default()
    };
    let spend = Arc::new(DailySpendLedger::new(1000.0));
    assert!(GuardrailEngine::from_config(&config, spend).is_err());
}

#[test]
fn test_empty_subject_denied() {
    let engine = engine_with(GuardrailConfig::default());
    let decision = engine.evaluate(&[], &FleetContext::at(ts(2026, 10, 19))).decision;
    assert_eq!(decision.outcome, GuardrailOutcome::Deny);
    assert!(decision.error.is_some());
}
