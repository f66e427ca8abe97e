//! CPU and memory request rightsizing

use tracing::debug;

use super::{DetectionInput, DetectorConfig, WasteDetector};
use crate::error::DetectorFailure;
use crate::models::{
    Evidence, OpportunityCandidate, OpportunityType, ResourceClass, ResourceSpec, RightsizingEvidence,
    TargetSystem, WorkloadView,
};
use crate::scoring::{apply_baseline_penalty, prorate, rightsizing_margin};

/// Limit-to-request ratio assumed when the workload declares no limit
const DEFAULT_LIMIT_RATIO: f64 = 2.0;

/// The resource a rightsizing detector looks at
#[derive(Debug, Clone, Copy)]
struct Dimension {
    class: ResourceClass,
    kind: OpportunityType,
    unit: &'static str,
}

impl Dimension {
    fn request(&self, w: &WorkloadView) -> f64 {
        match self.class {
            ResourceClass::Memory => w.mem_request_gb,
            _ => w.cpu_request,
        }
    }

    fn usage_p95(&self, w: &WorkloadView) -> f64 {
        match self.class {
            ResourceClass::Memory => w.mem_usage_p95_gb,
            _ => w.cpu_usage_p95,
        }
    }

    fn limit(&self, w: &WorkloadView) -> Option<f64> {
        match self.class {
            ResourceClass::Memory => w.mem_limit_gb,
            _ => w.cpu_limit,
        }
    }

    fn floor(&self, config: &DetectorConfig) -> f64 {
        match self.class {
            ResourceClass::Memory => config.min_memory_request_gb,
            _ => config.min_cpu_request,
        }
    }

    fn spec(&self, request: f64, limit: Option<f64>) -> ResourceSpec {
        match self.class {
            ResourceClass::Memory => ResourceSpec::ContainerMemory {
                mem_request_gb: request,
                mem_limit_gb: limit,
            },
            _ => ResourceSpec::ContainerCpu {
                cpu_request: request,
                cpu_limit: limit,
            },
        }
    }
}

fn proposed_limit(current_limit: Option<f64>, request: f64, proposed: f64) -> f64 {
    let ratio = match current_limit {
        Some(limit) if request > 0.0 && limit >= request => limit / request,
        _ => DEFAULT_LIMIT_RATIO,
    };
    proposed * ratio
}

fn detect_dimension(
    dimension: Dimension,
    config: &DetectorConfig,
    input: &DetectionInput,
) -> Vec<OpportunityCandidate> {
    let observed_at = input.observed_at();
    let mut candidates = Vec::new();

    for workload in &input.snapshot.workloads {
        if !workload.is_well_formed() {
            debug!(workload = %workload.id, "Skipping malformed workload record");
            continue;
        }

        let request = dimension.request(workload);
        let usage_p95 = dimension.usage_p95(workload);
        let margin = rightsizing_margin(request, usage_p95);
        if margin < config.min_rightsizing_margin || margin <= 0.0 {
            continue;
        }

        let proposed = (usage_p95 * (1.0 + config.rightsizing_headroom)).max(dimension.floor(config));
        if proposed >= request {
            continue;
        }

        let baseline = input
            .baselines
            .lookup(&workload.id, observed_at)
            .map(|b| b.reference(Some(dimension.class)));
        let savings = baseline
            .as_ref()
            .map(|b| prorate(b.resource_cost, request, proposed))
            .unwrap_or(0.0);
        let confidence = apply_baseline_penalty(margin, baseline.is_some());

        let current_limit = dimension.limit(workload);
        let recommendation = format!(
            "Reduce {} request of {}/{} from {:.2} to {:.2} {} (p95 usage {:.2} over {:.0}h)",
            match dimension.class {
                ResourceClass::Memory => "memory",
                _ => "CPU",
            },
            workload.namespace,
            workload.id,
            request,
            proposed,
            dimension.unit,
            usage_p95,
            workload.observation_window.hours(),
        );

        candidates.push(OpportunityCandidate {
            opportunity_type: dimension.kind,
            workload_id: workload.id.clone(),
            attribution: workload.attribution(),
            tags: workload.tags.clone(),
            estimated_monthly_savings: savings,
            confidence,
            evidence: Evidence::Rightsizing(RightsizingEvidence {
                resource: dimension.class,
                request,
                usage_p95,
                proposed_request: proposed,
                observation_window: workload.observation_window.clone(),
                snapshot_id: input.snapshot.snapshot_id.clone(),
                baseline,
            }),
            before_state: dimension.spec(request, current_limit),
            after_state: dimension.spec(proposed, Some(proposed_limit(current_limit, request, proposed))),
            recommendation,
            target_system: TargetSystem::Manifest,
            dependency_fanout: workload.dependency_fanout,
            protected_override: workload.guardrail_override,
            observed_at,
        });
    }

    candidates
}

/// Flags CPU requests far above p95 usage
pub struct CpuRightsizingDetector {
    config: DetectorConfig,
}

impl CpuRightsizingDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }
}

impl WasteDetector for CpuRightsizingDetector {
    fn name(&self) -> &'static str {
        "cpu_rightsizing"
    }

    fn detect(&self, input: &DetectionInput) -> Result<Vec<OpportunityCandidate>, DetectorFailure> {
        let dimension = Dimension {
            class: ResourceClass::Cpu,
            kind: OpportunityType::CpuRightsizing,
            unit: "cores",
        };
        Ok(detect_dimension(dimension, &self.config, input))
    }
}

/// Flags memory requests far above p95 usage
pub struct MemoryRightsizingDetector {
    config: DetectorConfig,
}

impl MemoryRightsizingDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }
}

impl WasteDetector for MemoryRightsizingDetector {
    fn name(&self) -> &'static str {
        "memory_rightsizing"
    }

    fn detect(&self, input: &DetectionInput) -> Result<Vec<OpportunityCandidate>, DetectorFailure> {
        let dimension = Dimension {
            class: ResourceClass::Memory,
            kind: OpportunityType::MemoryRightsizing,
            unit: "GiB",
        };
        Ok(detect_dimension(dimension, &self.config, input))
    }
}
