//! Under-packed node pool consolidation

use std::collections::BTreeMap;
use tracing::debug;

use super::{infrastructure_attribution, DetectionInput, DetectorConfig, WasteDetector};
use crate::error::DetectorFailure;
use crate::models::{
    Evidence, NodePoolEvidence, NodeView, OpportunityCandidate, OpportunityType, ResourceSpec, TargetSystem,
};
use crate::scoring::{apply_baseline_penalty, below_threshold_margin, non_negative};

/// Packing headroom kept when sizing the consolidated pool
const PACKING_HEADROOM: f64 = 1.3;

/// Workload id a node pool finding is keyed by
pub fn pool_id(cluster: &str, instance_class: &str) -> String {
    format!("pool:{}/{}", cluster, instance_class)
}

fn proposed_count(nodes: usize, mean_utilization: f64) -> u32 {
    ((nodes as f64 * mean_utilization * PACKING_HEADROOM).ceil() as u32).max(1)
}

/// Flags (cluster, instance class) pools whose load fits on fewer nodes
pub struct NodeConsolidationDetector {
    config: DetectorConfig,
}

impl NodeConsolidationDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }
}

impl WasteDetector for NodeConsolidationDetector {
    fn name(&self) -> &'static str {
        "node_consolidation"
    }

    fn detect(&self, input: &DetectionInput) -> Result<Vec<OpportunityCandidate>, DetectorFailure> {
        let threshold = self.config.consolidation_utilization_threshold;
        let observed_at = input.observed_at();

        let mut pools: BTreeMap<(&str, &str), Vec<&NodeView>> = BTreeMap::new();
        for node in &input.snapshot.nodes {
            if !node.is_well_formed() {
                debug!(node = %node.id, "Skipping malformed node record");
                continue;
            }
            pools
                .entry((node.cluster.as_str(), node.instance_class.as_str()))
                .or_default()
                .push(node);
        }

        let mut candidates = Vec::new();
        for ((cluster, instance_class), nodes) in pools {
            let count = nodes.len();
            if count < 2 {
                continue;
            }
            let mean = nodes.iter().map(|n| n.utilization).sum::<f64>() / count as f64;
            if mean >= threshold {
                continue;
            }
            let proposed = proposed_count(count, mean);
            if proposed as usize >= count {
                continue;
            }

            let node_costs: Vec<f64> = nodes
                .iter()
                .filter_map(|n| input.baselines.lookup(&n.id, observed_at))
                .map(|b| b.monthly_cost)
                .collect();
            let baselines_found = node_costs.len();
            let savings = if baselines_found == 0 {
                0.0
            } else {
                let average = node_costs.iter().sum::<f64>() / baselines_found as f64;
                non_negative(average * (count - proposed as usize) as f64)
            };
            let confidence = apply_baseline_penalty(below_threshold_margin(mean, threshold), baselines_found > 0);

            let id = pool_id(cluster, instance_class);
            let mut node_ids: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();
            node_ids.sort();

            candidates.push(OpportunityCandidate {
                opportunity_type: OpportunityType::NodeConsolidation,
                workload_id: id.clone(),
                attribution: infrastructure_attribution(cluster, &id, &self.config, None),
                tags: Vec::new(),
                estimated_monthly_savings: savings,
                confidence,
                evidence: Evidence::NodePool(NodePoolEvidence {
                    cluster: cluster.to_string(),
                    instance_class: instance_class.to_string(),
                    node_ids,
                    mean_utilization: mean,
                    utilization_threshold: threshold,
                    proposed_node_count: proposed,
                    snapshot_id: input.snapshot.snapshot_id.clone(),
                    baselines_found,
                }),
                before_state: ResourceSpec::NodePool {
                    cluster: cluster.to_string(),
                    instance_class: instance_class.to_string(),
                    node_count: count as u32,
                },
                after_state: ResourceSpec::NodePool {
                    cluster: cluster.to_string(),
                    instance_class: instance_class.to_string(),
                    node_count: proposed,
                },
                recommendation: format!(
                    "Consolidate {} pool in {} from {} to {} nodes (mean utilization {:.0}%)",
                    instance_class,
                    cluster,
                    count,
                    proposed,
                    mean * 100.0
                ),
                target_system: TargetSystem::InfraConfig,
                dependency_fanout: 0,
                protected_override: false,
                observed_at,
            });
        }

        Ok(candidates)
    }
}
