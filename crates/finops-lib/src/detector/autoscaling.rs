//! Autoscaler minimum-replica misconfiguration

use tracing::debug;

use super::{DetectionInput, DetectorConfig, WasteDetector};
use crate::error::DetectorFailure;
use crate::models::{
    Attribution, AutoscalingEvidence, Evidence, OpportunityCandidate, OpportunityType, ResourceSpec,
    TargetSystem,
};
use crate::scoring::{apply_baseline_penalty, below_threshold_margin, non_negative, SCALING_ACTIVITY_FACTOR};

/// Headroom applied to observed utilization when shrinking the floor
const MIN_REPLICA_HEADROOM: f64 = 1.2;

/// Flags autoscalers whose minimum keeps idle replicas running
pub struct AutoscalingDetector {
    config: DetectorConfig,
}

impl AutoscalingDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }
}

fn proposed_min(min: u32, utilization: f64) -> u32 {
    ((min as f64 * utilization * MIN_REPLICA_HEADROOM).floor() as u32).max(1)
}

impl WasteDetector for AutoscalingDetector {
    fn name(&self) -> &'static str {
        "autoscaling_misconfig"
    }

    fn detect(&self, input: &DetectionInput) -> Result<Vec<OpportunityCandidate>, DetectorFailure> {
        let threshold = self.config.autoscaler_utilization_threshold;
        let observed_at = input.observed_at();
        let mut candidates = Vec::new();

        for hpa in &input.snapshot.autoscalers {
            if !hpa.is_well_formed() {
                debug!(target_workload = %hpa.target, "Skipping malformed autoscaler record");
                continue;
            }
            if hpa.min <= 1 || hpa.avg_cpu_utilization >= threshold {
                continue;
            }
            let proposed = proposed_min(hpa.min, hpa.avg_cpu_utilization);
            if proposed >= hpa.min {
                continue;
            }

            let reference = input
                .baselines
                .lookup(&hpa.target, observed_at)
                .map(|b| b.reference(None));
            let savings = reference
                .as_ref()
                .map(|b| {
                    let per_replica = b.monthly_cost / hpa.current_replicas.max(hpa.min) as f64;
                    non_negative(per_replica * (hpa.min - proposed) as f64)
                })
                .unwrap_or(0.0);

            let mut raw = below_threshold_margin(hpa.avg_cpu_utilization, threshold);
            if hpa.observed_scaling_events > 0 {
                raw *= SCALING_ACTIVITY_FACTOR;
            }
            let confidence = apply_baseline_penalty(raw, reference.is_some());

            let workload = input.snapshot.workloads.iter().find(|w| w.id == hpa.target);

            candidates.push(OpportunityCandidate {
                opportunity_type: OpportunityType::AutoscalingMisconfig,
                workload_id: hpa.target.clone(),
                attribution: Attribution {
                    cluster: hpa.cluster.clone(),
                    namespace: hpa.namespace.clone(),
                    workload: hpa.target.clone(),
                    team: hpa.team.clone(),
                },
                tags: workload.map(|w| w.tags.clone()).unwrap_or_default(),
                estimated_monthly_savings: savings,
                confidence,
                evidence: Evidence::Autoscaling(AutoscalingEvidence {
                    target: hpa.target.clone(),
                    min_replicas: hpa.min,
                    max_replicas: hpa.max,
                    proposed_min_replicas: proposed,
                    avg_cpu_utilization: hpa.avg_cpu_utilization,
                    utilization_threshold: threshold,
                    observed_scaling_events: hpa.observed_scaling_events,
                    observation_window: hpa.observation_window.clone(),
                    snapshot_id: input.snapshot.snapshot_id.clone(),
                    baseline: reference,
                }),
                before_state: ResourceSpec::Autoscaler {
                    target: hpa.target.clone(),
                    min_replicas: hpa.min,
                    max_replicas: hpa.max,
                },
                after_state: ResourceSpec::Autoscaler {
                    target: hpa.target.clone(),
                    min_replicas: proposed,
                    max_replicas: hpa.max,
                },
                recommendation: format!(
                    "Lower minReplicas of {}/{} from {} to {} (avg CPU {:.0}%, {} scaling events)",
                    hpa.namespace,
                    hpa.target,
                    hpa.min,
                    proposed,
                    hpa.avg_cpu_utilization * 100.0,
                    hpa.observed_scaling_events
                ),
                target_system: TargetSystem::Manifest,
                dependency_fanout: workload.map(|w| w.dependency_fanout).unwrap_or(0),
                protected_override: workload.map(|w| w.guardrail_override).unwrap_or(false),
                observed_at,
            });
        }

        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::BaselineIndex;
    use crate::models::{AutoscalerView, CostBaseline, DetectionPeriod};
    use crate::testing::{autoscaler, baseline, snapshot, workload};

    fn run(autoscalers: Vec<AutoscalerView>, baselines: Vec<CostBaseline>) -> Vec<OpportunityCandidate> {
        let mut snap = snapshot();
        let mut wl = workload("search", 1.0, 0.5, 2.0, 1.5);
        wl.tags = vec!["tier-1".to_string()];
        wl.dependency_fanout = 4;
        snap.workloads.push(wl);
        snap.autoscalers = autoscalers;
        let input = DetectionInput {
            snapshot: snap,
            baselines: BaselineIndex::new(baselines),
            period: DetectionPeriod("2026-10-19".to_string()),
        };
        AutoscalingDetector::new(DetectorConfig::default()).detect(&input).unwrap()
    }

    #[test]
    fn test_proposed_min_formula() {
        assert_eq!(proposed_min(10, 0.1), 1);
        assert_eq!(proposed_min(10, 0.2), 2);
        assert_eq!(proposed_min(2, 0.0), 1);
    }

    #[test]
    fn test_low_utilization_floor() {
        let candidates = run(vec![autoscaler("search", 10, 20, 0.1, 0)], vec![baseline("search", 500.0)]);

        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        // 50 per replica, 9 replicas removed
        assert!((c.estimated_monthly_savings - 450.0).abs() < 1e-9);
        assert!((c.confidence - (1.0 - 0.1 / 0.3)).abs() < 1e-9);
        assert_eq!(c.tags, vec!["tier-1".to_string()]);
        assert_eq!(c.dependency_fanout, 4);
        assert!((c.evidence.recompute_confidence() - c.confidence).abs() < 1e-12);
    }

    #[test]
    fn test_scaling_events_reduce_confidence() {
        let quiet = run(vec![autoscaler("search", 4, 8, 0.15, 0)], vec![baseline("search", 100.0)]);
        let busy = run(vec![autoscaler("search", 4, 8, 0.15, 12)], vec![baseline("search", 100.0)]);
        assert!((busy[0].confidence - quiet[0].confidence * 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_single_replica_or_busy_autoscaler_ignored() {
        let candidates = run(
            vec![autoscaler("search", 1, 5, 0.05, 0), autoscaler("search", 6, 10, 0.45, 0)],
            vec![],
        );
        assert!(candidates.is_empty());
    }
}
