//! Error taxonomy for the lifecycle engine

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::OpportunityStatus;

/// A detector could not produce candidates this cycle
///
/// Isolated at the detector boundary: logged, counted, and the detector
/// contributes zero candidates while the rest of the cycle continues.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[error("detector {detector} failed: {reason}")]
pub struct DetectorFailure {
    pub detector: String,
    pub reason: String,
}

impl DetectorFailure {
    pub fn new(detector: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            detector: detector.into(),
            reason: reason.into(),
        }
    }
}

/// Guardrail evaluation failures; the engine treats every one as Deny
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GuardrailError {
    #[error("policy {policy} could not be evaluated: {reason}")]
    PolicyEvaluation { policy: String, reason: String },

    #[error("invalid guardrail configuration: {0}")]
    InvalidConfig(String),
}

/// Savings ledger write failures; a failed write leaves every record unchanged
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LedgerError {
    #[error("opportunity not found: {0}")]
    NotFound(String),

    #[error("invalid state transition for {id}: {from} -> {to}")]
    InvalidStateTransition {
        id: String,
        from: OpportunityStatus,
        to: OpportunityStatus,
    },

    #[error("stale version for {id}: expected {expected}, current {current}")]
    StaleVersionConflict {
        id: String,
        expected: u64,
        current: u64,
    },

    #[error("opportunity {id} rejected: {reason}")]
    InvalidOpportunity { id: String, reason: String },

    #[error("an opportunity with fingerprint {0} already exists")]
    DuplicateFingerprint(String),

    #[error("{cause} cannot move {id} from {from} to {to}")]
    InvalidCause {
        id: String,
        from: OpportunityStatus,
        to: OpportunityStatus,
        cause: String,
    },

    #[error("daily change cap exhausted for {day}: requested {requested:.2}, remaining {remaining:.2}")]
    DailyCapExhausted {
        day: NaiveDate,
        requested: f64,
        remaining: f64,
    },

    #[error("change proposal not found: {0}")]
    ProposalNotFound(String),

    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl LedgerError {
    /// Whether the caller should re-read and resubmit
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::StaleVersionConflict { .. })
    }
}

/// Change proposal generation failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProposalError {
    #[error("cannot generate a proposal for an empty opportunity set")]
    EmptyBatch,

    #[error("opportunity {id} is {status}, expected approved")]
    NotApproved {
        id: String,
        status: OpportunityStatus,
    },

    #[error("batch mixes target systems")]
    MixedTargetSystems,

    #[error("batch touches {workloads} workloads, blast radius limit is {limit}")]
    BlastRadiusExceeded { workloads: usize, limit: usize },

    #[error("failed to encode proposal content: {0}")]
    Encoding(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Failures of calls to external collaborators after bounded retry
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExternalError {
    #[error("{operation} timed out after {attempts} attempts")]
    Timeout { operation: String, attempts: u32 },

    #[error("{operation} failed after {attempts} attempts: {reason}")]
    Failed {
        operation: String,
        attempts: u32,
        reason: String,
    },
}

/// Errors surfaced by the engine's command operations
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Proposal(#[from] ProposalError),

    #[error(transparent)]
    External(#[from] ExternalError),

    #[error(transparent)]
    Guardrail(#[from] GuardrailError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_stale_version_is_retryable() {
        let stale = LedgerError::StaleVersionConflict {
            id: "opp-1".to_string(),
            expected: 1,
            current: 2,
        };
        assert!(stale.is_retryable());
        assert!(!LedgerError::NotFound("opp-1".to_string()).is_retryable());
    }

    #[test]
    fn test_error_messages() {
        let err = LedgerError::InvalidStateTransition {
            id: "opp-1".to_string(),
            from: OpportunityStatus::Detected,
            to: OpportunityStatus::Implemented,
        };
        assert_eq!(
            err.to_string(),
            "invalid state transition for opp-1: detected -> implemented"
        );
    }
}
