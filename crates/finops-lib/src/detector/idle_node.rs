//! Idle node detection

use std::collections::BTreeMap;
use tracing::debug;

use super::{infrastructure_attribution, DetectionInput, DetectorConfig, WasteDetector};
use crate::error::DetectorFailure;
use crate::models::{
    Evidence, IdleNodeEvidence, NodeView, OpportunityCandidate, OpportunityType, ResourceSpec, TargetSystem,
};
use crate::scoring::{apply_baseline_penalty, below_threshold_margin};

/// Flags nodes whose utilization stays under the idle threshold
///
/// Removals are capped per cluster so that at least
/// `min_nodes_per_cluster` nodes remain; the least utilized nodes are
/// proposed first.
pub struct IdleNodeDetector {
    config: DetectorConfig,
}

impl IdleNodeDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }
}

impl WasteDetector for IdleNodeDetector {
    fn name(&self) -> &'static str {
        "idle_node"
    }

    fn detect(&self, input: &DetectionInput) -> Result<Vec<OpportunityCandidate>, DetectorFailure> {
        let threshold = self.config.idle_node_threshold;
        let observed_at = input.observed_at();

        let mut by_cluster: BTreeMap<&str, Vec<&NodeView>> = BTreeMap::new();
        for node in &input.snapshot.nodes {
            if !node.is_well_formed() {
                debug!(node = %node.id, "Skipping malformed node record");
                continue;
            }
            by_cluster.entry(node.cluster.as_str()).or_default().push(node);
        }

        let mut candidates = Vec::new();
        for (cluster, nodes) in by_cluster {
            let active = nodes.len();
            let removable = active.saturating_sub(self.config.min_nodes_per_cluster);
            if removable == 0 {
                continue;
            }

            let mut idle: Vec<&NodeView> = nodes.into_iter().filter(|n| n.utilization < threshold).collect();
            idle.sort_by(|a, b| a.utilization.total_cmp(&b.utilization).then_with(|| a.id.cmp(&b.id)));

            for node in idle.into_iter().take(removable) {
                let baseline = input.baselines.lookup(&node.id, observed_at);
                let reference = baseline.map(|b| b.reference(None));
                let savings = reference.as_ref().map(|b| b.monthly_cost).unwrap_or(0.0);
                let confidence = apply_baseline_penalty(
                    below_threshold_margin(node.utilization, threshold),
                    reference.is_some(),
                );

                candidates.push(OpportunityCandidate {
                    opportunity_type: OpportunityType::IdleNode,
                    workload_id: node.id.clone(),
                    attribution: infrastructure_attribution(cluster, &node.id, &self.config, baseline),
                    tags: Vec::new(),
                    estimated_monthly_savings: savings,
                    confidence,
                    evidence: Evidence::IdleNode(IdleNodeEvidence {
                        node_id: node.id.clone(),
                        instance_class: node.instance_class.clone(),
                        utilization: node.utilization,
                        idle_threshold: threshold,
                        active_nodes_in_cluster: active as u32,
                        snapshot_id: input.snapshot.snapshot_id.clone(),
                        baseline: reference,
                    }),
                    before_state: ResourceSpec::Node {
                        node_id: node.id.clone(),
                        instance_class: node.instance_class.clone(),
                        present: true,
                    },
                    after_state: ResourceSpec::Node {
                        node_id: node.id.clone(),
                        instance_class: node.instance_class.clone(),
                        present: false,
                    },
                    recommendation: format!(
                        "Drain and remove node {} ({}) in {}: {:.0}% utilized",
                        node.id,
                        node.instance_class,
                        cluster,
                        node.utilization * 100.0
                    ),
                    target_system: TargetSystem::InfraConfig,
                    dependency_fanout: 0,
                    protected_override: false,
                    observed_at,
                });
            }
        }

        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::BaselineIndex;
    use crate::models::DetectionPeriod;
    use crate::testing::{baseline, node, snapshot};

    fn run(nodes: Vec<NodeView>, baselines: Vec<crate::models::CostBaseline>) -> Vec<OpportunityCandidate> {
        let mut snap = snapshot();
        snap.nodes = nodes;
        let input = DetectionInput {
            snapshot: snap,
            baselines: BaselineIndex::new(baselines),
            period: DetectionPeriod("2026-10-19".to_string()),
        };
        IdleNodeDetector::new(DetectorConfig::default()).detect(&input).unwrap()
    }

    #[test]
    fn test_idle_node_uses_whole_node_cost() {
        let candidates = run(
            vec![node("n1", 0.05, "m5.large"), node("n2", 0.6, "m5.large"), node("n3", 0.7, "m5.large")],
            vec![baseline("n1", 140.0)],
        );

        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.workload_id, "n1");
        assert_eq!(c.estimated_monthly_savings, 140.0);
        assert!((c.confidence - 0.75).abs() < 1e-9);
        assert_eq!(c.target_system, TargetSystem::InfraConfig);
        assert!((c.evidence.recompute_confidence() - c.confidence).abs() < 1e-12);
    }

    #[test]
    fn test_never_drops_below_minimum_nodes() {
        let candidates = run(
            vec![node("n1", 0.05, "m5.large"), node("n2", 0.1, "m5.large"), node("n3", 0.15, "m5.large")],
            vec![],
        );

        // Three idle nodes, minimum two: only the least utilized goes
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].workload_id, "n1");
    }

    #[test]
    fn test_two_node_cluster_untouched() {
        let candidates = run(vec![node("n1", 0.01, "m5.large"), node("n2", 0.01, "m5.large")], vec![]);
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_infrastructure_team_without_baseline() {
        let candidates = run(
            vec![node("n1", 0.0, "m5.large"), node("n2", 0.6, "m5.large"), node("n3", 0.6, "m5.large")],
            vec![],
        );
        assert_eq!(candidates[0].attribution.team, "infrastructure");
        assert_eq!(candidates[0].estimated_monthly_savings, 0.0);
        assert!((candidates[0].confidence - 0.9).abs() < 1e-9);
    }
}
