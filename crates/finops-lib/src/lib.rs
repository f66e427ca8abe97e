//! Waste-opportunity lifecycle engine
//!
//! This crate provides the core functionality for:
//! - Waste detection over immutable cluster snapshots
//! - Reconciliation of detections into a deduplicated savings ledger
//! - Guardrail policies gating every change
//! - Change proposal generation and savings reporting
//! - Health checks and observability

pub mod cycle;
pub mod detector;
pub mod engine;
pub mod error;
pub mod external;
pub mod guardrail;
pub mod health;
pub mod ledger;
pub mod models;
pub mod observability;
pub mod proposal;
pub mod reconciler;
pub mod report;
pub mod scoring;

#[cfg(test)]
mod testing;

pub use cycle::DetectionCycle;
pub use engine::{CycleReport, DecisionCounts, EngineSettings, FinopsEngine};
pub use error::{DetectorFailure, EngineError, ExternalError, GuardrailError, LedgerError, ProposalError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{EngineMetrics, StructuredLogger};
