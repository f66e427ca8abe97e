//! Post-change verification rules
//!
//! An Implemented opportunity is verified once its cool-down has elapsed,
//! the same waste is no longer detected, and a cost baseline taken after
//! the change exists to measure realized savings against.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{CostBaseline, Evidence, Opportunity, OpportunityCandidate, OpportunityStatus};
use crate::scoring::non_negative;

/// Timing of verification and realization
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerificationPolicy {
    pub cooldown: Duration,
    pub realization_period: Duration,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            cooldown: Duration::hours(24),
            realization_period: Duration::days(30),
        }
    }
}

/// Outcome of checking one Implemented opportunity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    CoolingDown,
    /// The original waste is still visible in the latest snapshot
    StillWasteful,
    AwaitingBaseline,
    Confirmed { realized_savings: f64 },
    NotApplicable,
}

/// Whether a fresh detection shows the change was never applied
pub fn still_wasteful(opportunity: &Opportunity, fresh: &[OpportunityCandidate]) -> bool {
    fresh.iter().any(|c| {
        c.opportunity_type == opportunity.opportunity_type
            && c.workload_id == opportunity.workload_id
            && c.before_state == opportunity.before_state
    })
}

/// Monthly cost the evidence recorded before the change, if any
pub fn pre_change_cost(evidence: &Evidence) -> Option<f64> {
    match evidence {
        Evidence::Rightsizing(e) => e.baseline.as_ref().map(|b| b.monthly_cost),
        Evidence::IdleNode(e) => e.baseline.as_ref().map(|b| b.monthly_cost),
        Evidence::OrphanVolume(e) => e.baseline.as_ref().map(|b| b.monthly_cost),
        Evidence::Autoscaling(e) => e.baseline.as_ref().map(|b| b.monthly_cost),
        Evidence::NodePool(_) => None,
    }
}

/// Earliest baseline for the workload starting at or after `since`
pub fn post_change_baseline<'a>(
    baselines: &'a [CostBaseline],
    workload_id: &str,
    since: DateTime<Utc>,
) -> Option<&'a CostBaseline> {
    baselines
        .iter()
        .filter(|b| b.workload_id == workload_id && b.period_start >= since)
        .min_by_key(|b| b.period_start)
}

/// Decide whether an Implemented opportunity can move to Verified
pub fn assess(
    opportunity: &Opportunity,
    fresh: &[OpportunityCandidate],
    baselines: &[CostBaseline],
    now: DateTime<Utc>,
    policy: &VerificationPolicy,
) -> Verdict {
    let implemented_at = match (opportunity.status, opportunity.implemented_at) {
        (OpportunityStatus::Implemented, Some(at)) => at,
        _ => return Verdict::NotApplicable,
    };
    if now < implemented_at + policy.cooldown {
        return Verdict::CoolingDown;
    }
    if still_wasteful(opportunity, fresh) {
        return Verdict::StillWasteful;
    }

    let Some(post) = post_change_baseline(baselines, &opportunity.workload_id, implemented_at) else {
        return Verdict::AwaitingBaseline;
    };
    // Without a pre-change figure the detector estimate is the best reference
    let realized = match pre_change_cost(&opportunity.evidence) {
        Some(pre) => non_negative(pre - post.monthly_cost),
        None => opportunity.estimated_monthly_savings,
    };
    Verdict::Confirmed {
        realized_savings: realized,
    }
}

/// Whether a Verified opportunity has held long enough to count as realized
pub fn realization_due(opportunity: &Opportunity, now: DateTime<Utc>, policy: &VerificationPolicy) -> bool {
    opportunity.status == OpportunityStatus::Verified
        && opportunity
            .verified_at
            .map(|at| now >= at + policy.realization_period)
            .unwrap_or(false)
}
