//! Deduplication of detector output against the ledger
//!
//! Candidates are keyed by fingerprint (type, workload, detection period).
//! Duplicates within one cycle collapse to the strongest candidate; a
//! fingerprint already in the ledger is never inserted twice.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::LedgerError;
use crate::ledger::Ledger;
use crate::models::{fingerprint, DetectionPeriod, Opportunity, OpportunityCandidate, PeriodGranularity};

/// Result of reconciling one cycle's candidates
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    /// Opportunities inserted as Detected this cycle
    pub new: Vec<Opportunity>,
    /// Candidates folded into a stronger duplicate from the same cycle
    pub merged_in_cycle: usize,
    /// Candidates whose fingerprint the ledger already holds
    pub already_tracked: usize,
}

/// Higher confidence wins, then higher savings
fn stronger(a: &OpportunityCandidate, b: &OpportunityCandidate) -> bool {
    a.confidence
        .total_cmp(&b.confidence)
        .then_with(|| a.estimated_monthly_savings.total_cmp(&b.estimated_monthly_savings))
        .is_gt()
}

pub struct Reconciler {
    granularity: PeriodGranularity,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(PeriodGranularity::default())
    }
}

impl Reconciler {
    pub fn new(granularity: PeriodGranularity) -> Self {
        Self { granularity }
    }

    pub fn granularity(&self) -> PeriodGranularity {
        self.granularity
    }

    pub fn period_for(&self, at: DateTime<Utc>) -> DetectionPeriod {
        DetectionPeriod::containing(at, self.granularity)
    }

    /// Collapse same-fingerprint candidates, keeping first-seen order
    pub fn merge(
        &self,
        candidates: Vec<OpportunityCandidate>,
        period: &DetectionPeriod,
    ) -> (Vec<(String, OpportunityCandidate)>, usize) {
        let mut order: Vec<String> = Vec::new();
        let mut best: HashMap<String, OpportunityCandidate> = HashMap::new();
        let mut merged = 0;

        for candidate in candidates {
            let fp = fingerprint(candidate.opportunity_type, &candidate.workload_id, period);
            match best.get_mut(&fp) {
                Some(existing) => {
                    merged += 1;
                    if stronger(&candidate, existing) {
                        *existing = candidate;
                    }
                }
                None => {
                    order.push(fp.clone());
                    best.insert(fp, candidate);
                }
            }
        }

        let merged_list = order
            .into_iter()
            .filter_map(|fp| best.remove(&fp).map(|c| (fp, c)))
            .collect();
        (merged_list, merged)
    }

    /// Insert every candidate whose fingerprint is new to the ledger
    pub async fn reconcile(
        &self,
        ledger: &Ledger,
        candidates: Vec<OpportunityCandidate>,
        detected_at: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, LedgerError> {
        let period = self.period_for(detected_at);
        let (merged, merged_in_cycle) = self.merge(candidates, &period);
        let mut outcome = ReconcileOutcome {
            merged_in_cycle,
            ..Default::default()
        };

        for (fp, candidate) in merged {
            if ledger.contains_fingerprint(&fp).await {
                outcome.already_tracked += 1;
                continue;
            }
            let opportunity = Opportunity::from_candidate(candidate, period.clone(), detected_at);
            match ledger.insert(opportunity).await {
                Ok(inserted) => {
                    debug!(
                        opportunity = %inserted.id,
                        opportunity_type = %inserted.opportunity_type,
                        workload = %inserted.workload_id,
                        "Opportunity detected"
                    );
                    outcome.new.push(inserted);
                }
                // Lost a race with a concurrent cycle
                Err(LedgerError::DuplicateFingerprint(_)) => outcome.already_tracked += 1,
                Err(e) => {
                    warn!(fingerprint = %fp, error = %e, "Failed to record opportunity");
                    return Err(e);
                }
            }
        }

        Ok(outcome)
    }
}
