//! Risk scoring for guardrail evaluation

use serde::{Deserialize, Serialize};

use super::FleetContext;
use crate::error::GuardrailError;
use crate::models::Opportunity;
use crate::scoring::clamp_unit;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Weights of the three risk components; must sum to 1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskWeights {
    pub dependency_fanout: f64,
    pub change_magnitude: f64,
    pub protected_tag: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            dependency_fanout: 0.4,
            change_magnitude: 0.3,
            protected_tag: 0.3,
        }
    }
}

impl RiskWeights {
    pub fn validate(&self) -> Result<(), GuardrailError> {
        let weights = [self.dependency_fanout, self.change_magnitude, self.protected_tag];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(GuardrailError::InvalidConfig(
                "risk weights must be finite and non-negative".to_string(),
            ));
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(GuardrailError::InvalidConfig(format!(
                "risk weights must sum to 1, got {:.4}",
                sum
            )));
        }
        Ok(())
    }
}

/// Weighted sum of normalized fan-out, change magnitude and protection
#[derive(Debug, Clone)]
pub struct RiskModel {
    weights: RiskWeights,
    fanout_ceiling: u32,
    magnitude_ceiling: f64,
    protected_tags: Vec<String>,
}

impl RiskModel {
    pub fn new(
        weights: RiskWeights,
        fanout_ceiling: u32,
        magnitude_ceiling: f64,
        protected_tags: Vec<String>,
    ) -> Result<Self, GuardrailError> {
        weights.validate()?;
        if fanout_ceiling == 0 || !(magnitude_ceiling.is_finite() && magnitude_ceiling > 0.0) {
            return Err(GuardrailError::InvalidConfig(
                "risk normalization ceilings must be positive".to_string(),
            ));
        }
        Ok(Self {
            weights,
            fanout_ceiling,
            magnitude_ceiling,
            protected_tags,
        })
    }

    pub fn score(&self, opportunity: &Opportunity, context: &FleetContext) -> f64 {
        let fanout = context
            .dependency_fanout
            .get(&opportunity.workload_id)
            .copied()
            .unwrap_or(opportunity.dependency_fanout);
        let fanout_norm = (fanout as f64 / self.fanout_ceiling as f64).min(1.0);
        let magnitude_norm = clamp_unit(opportunity.estimated_monthly_savings / self.magnitude_ceiling);
        let protected = if self.protected_tags.iter().any(|t| opportunity.has_tag(t)) {
            1.0
        } else {
            0.0
        };

        clamp_unit(
            self.weights.dependency_fanout * fanout_norm
                + self.weights.change_magnitude * magnitude_norm
                + self.weights.protected_tag * protected,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OpportunityStatus;
    use crate::testing::{opportunity_with, ts};

    fn model() -> RiskModel {
        RiskModel::new(RiskWeights::default(), 10, 500.0, vec!["production-critical".to_string()]).unwrap()
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let weights = RiskWeights {
            dependency_fanout: 0.5,
            change_magnitude: 0.5,
            protected_tag: 0.5,
        };
        assert!(weights.validate().is_err());
        assert!(RiskWeights::default().validate().is_ok());
    }

    #[test]
    fn test_score_components() {
        let mut opp = opportunity_with("a", OpportunityStatus::Detected, 250.0, None);
        opp.dependency_fanout = 5;
        let ctx = FleetContext::at(ts(2026, 10, 19));
        // 0.4 * 0.5 + 0.3 * 0.5 + 0
        assert!((model().score(&opp, &ctx) - 0.35).abs() < 1e-9);

        opp.tags.push("production-critical".to_string());
        assert!((model().score(&opp, &ctx) - 0.65).abs() < 1e-9);
    }

    #[test]
    fn test_fleet_context_fanout_overrides() {
        let opp = opportunity_with("a", OpportunityStatus::Detected, 0.0, None);
        let ctx = FleetContext::at(ts(2026, 10, 19)).with_fanout(&opp.workload_id, 40);
        assert!((model().score(&opp, &ctx) - 0.4).abs() < 1e-9);
    }
}
