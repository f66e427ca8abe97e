//! Opportunity lifecycle state machine
//!
//! The edge table below is the only place status changes are defined.
//! Every edge has exactly one kind of cause allowed to drive it; the
//! ledger rejects anything else with `InvalidStateTransition` or
//! `InvalidCause` before touching the stored record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::guardrail::{GuardrailDecision, GuardrailOutcome};
use crate::models::{Opportunity, OpportunityStatus};

use OpportunityStatus::*;

/// Whether `from -> to` is an edge of the lifecycle graph
pub fn is_allowed_edge(from: OpportunityStatus, to: OpportunityStatus) -> bool {
    matches!(
        (from, to),
        (Detected, Denied)
            | (Detected, PendingApproval)
            | (Detected, Approved)
            | (PendingApproval, Approved)
            | (PendingApproval, Denied)
            | (Approved, ProposalCreated)
            | (ProposalCreated, Implemented)
            | (Implemented, Verified)
            | (Verified, Realized)
            | (Approved, RolledBack)
            | (ProposalCreated, RolledBack)
            | (Implemented, RolledBack)
    )
}

/// Every status reachable from `from` in one step
pub fn successors(from: OpportunityStatus) -> Vec<OpportunityStatus> {
    OpportunityStatus::ALL
        .iter()
        .copied()
        .filter(|to| is_allowed_edge(from, *to))
        .collect()
}

/// Human decision on an opportunity awaiting approval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalSignal {
    pub approve: bool,
    pub actor: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// What drove a transition; recorded verbatim in the audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum TransitionCause {
    Guardrail { decision: GuardrailDecision },
    Approval { signal: ApprovalSignal },
    Proposal { proposal_id: String },
    Implementation {
        proposal_id: String,
        reference: String,
    },
    Verification { realized_savings: f64 },
    Realization,
    Rollback { reason: String, actor: String },
}

impl TransitionCause {
    pub fn kind(&self) -> &'static str {
        match self {
            TransitionCause::Guardrail { .. } => "guardrail",
            TransitionCause::Approval { .. } => "approval",
            TransitionCause::Proposal { .. } => "proposal",
            TransitionCause::Implementation { .. } => "implementation",
            TransitionCause::Verification { .. } => "verification",
            TransitionCause::Realization => "realization",
            TransitionCause::Rollback { .. } => "rollback",
        }
    }

    /// Whether this cause may drive the edge `from -> to`
    fn authorizes(&self, from: OpportunityStatus, to: OpportunityStatus) -> bool {
        match self {
            TransitionCause::Guardrail { decision } => {
                from == Detected
                    && match decision.outcome {
                        GuardrailOutcome::Allow => to == Approved,
                        GuardrailOutcome::RequireApproval => to == PendingApproval,
                        GuardrailOutcome::Deny => to == Denied,
                    }
            }
            TransitionCause::Approval { signal } => {
                from == PendingApproval && (if signal.approve { to == Approved } else { to == Denied })
            }
            TransitionCause::Proposal { .. } => from == Approved && to == ProposalCreated,
            TransitionCause::Implementation { .. } => from == ProposalCreated && to == Implemented,
            TransitionCause::Verification { realized_savings } => {
                from == Implemented && to == Verified && realized_savings.is_finite() && *realized_savings >= 0.0
            }
            TransitionCause::Realization => from == Verified && to == Realized,
            TransitionCause::Rollback { reason, .. } => to == RolledBack && !reason.trim().is_empty(),
        }
    }
}

/// A requested status change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub to: OpportunityStatus,
    pub cause: TransitionCause,
}

impl TransitionRequest {
    pub fn new(to: OpportunityStatus, cause: TransitionCause) -> Self {
        Self { to, cause }
    }

    /// Guardrail transitions derive their target from the decision
    pub fn from_decision(decision: GuardrailDecision) -> Self {
        let to = match decision.outcome {
            GuardrailOutcome::Allow => Approved,
            GuardrailOutcome::RequireApproval => PendingApproval,
            GuardrailOutcome::Deny => Denied,
        };
        Self::new(to, TransitionCause::Guardrail { decision })
    }
}

/// Check a request against the edge table and the cause rules
pub fn validate(opportunity: &Opportunity, request: &TransitionRequest) -> Result<(), LedgerError> {
    let from = opportunity.status;
    if !is_allowed_edge(from, request.to) {
        return Err(LedgerError::InvalidStateTransition {
            id: opportunity.id.clone(),
            from,
            to: request.to,
        });
    }
    if !request.cause.authorizes(from, request.to) {
        return Err(LedgerError::InvalidCause {
            id: opportunity.id.clone(),
            from,
            to: request.to,
            cause: request.cause.kind().to_string(),
        });
    }
    Ok(())
}

/// Produce the successor record; the input is left untouched
pub fn apply(opportunity: &Opportunity, request: &TransitionRequest, at: DateTime<Utc>) -> Opportunity {
    let mut next = opportunity.clone();
    next.status = request.to;
    next.version += 1;

    match &request.cause {
        TransitionCause::Guardrail { decision } => {
            next.risk_score = decision.risk_score;
            next.decided_at = Some(at);
            if request.to == Approved {
                next.approved_at = Some(at);
            }
        }
        TransitionCause::Approval { .. } => {
            next.decided_at = Some(at);
            if request.to == Approved {
                next.approved_at = Some(at);
            }
        }
        TransitionCause::Proposal { proposal_id } => {
            next.proposal_ref = Some(proposal_id.clone());
            next.proposal_created_at = Some(at);
        }
        TransitionCause::Implementation { .. } => {
            next.implemented_at = Some(at);
        }
        TransitionCause::Verification { realized_savings } => {
            next.realized_savings = Some(*realized_savings);
            next.verified_at = Some(at);
        }
        TransitionCause::Realization => {
            next.realized_at = Some(at);
        }
        TransitionCause::Rollback { reason, .. } => {
            next.rollback_reason = Some(reason.clone());
        }
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_have_no_successors() {
        for status in OpportunityStatus::ALL {
            if status.is_terminal() {
                assert!(successors(status).is_empty(), "{} has successors", status);
            } else {
                assert!(!successors(status).is_empty(), "{} is a dead end", status);
            }
        }
    }

    #[test]
    fn test_detected_cannot_skip_to_proposal() {
        assert!(!is_allowed_edge(Detected, ProposalCreated));
        assert!(!is_allowed_edge(Detected, Implemented));
        assert!(!is_allowed_edge(PendingApproval, RolledBack));
        assert!(!is_allowed_edge(Detected, RolledBack));
    }

    #[test]
    fn test_rollback_reachable_from_approved_through_implemented() {
        for from in [Approved, ProposalCreated, Implemented] {
            assert!(is_allowed_edge(from, RolledBack));
        }
        assert!(!is_allowed_edge(Verified, RolledBack));
        assert!(!is_allowed_edge(Realized, RolledBack));
    }

    #[test]
    fn test_rollback_requires_reason() {
        let cause = TransitionCause::Rollback {
            reason: "  ".to_string(),
            actor: "sre".to_string(),
        };
        assert!(!cause.authorizes(Approved, RolledBack));
        let cause = TransitionCause::Rollback {
            reason: "latency regression".to_string(),
            actor: "sre".to_string(),
        };
        assert!(cause.authorizes(Approved, RolledBack));
    }

    #[test]
    fn test_approval_signal_direction() {
        let approve = TransitionCause::Approval {
            signal: ApprovalSignal {
                approve: true,
                actor: "lead".to_string(),
                reason: None,
            },
        };
        assert!(approve.authorizes(PendingApproval, Approved));
        assert!(!approve.authorizes(PendingApproval, Denied));
        assert!(!approve.authorizes(Detected, Approved));
    }

    #[test]
    fn test_negative_realized_savings_rejected() {
        let cause = TransitionCause::Verification {
            realized_savings: -1.0,
        };
        assert!(!cause.authorizes(Implemented, Verified));
    }
}
