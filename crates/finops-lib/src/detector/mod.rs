//! Waste detectors
//!
//! Each detector is a pure function of one `DetectionInput`. The registry
//! runs every registered detector concurrently on the blocking pool and
//! joins them against a shared deadline; a detector that errors, panics or
//! misses the deadline contributes nothing and is reported as a failure.

mod autoscaling;
mod consolidation;
mod idle_node;
mod orphan_volume;
mod rightsizing;

pub use autoscaling::AutoscalingDetector;
pub use consolidation::NodeConsolidationDetector;
pub use idle_node::IdleNodeDetector;
pub use orphan_volume::OrphanVolumeDetector;
pub use rightsizing::{CpuRightsizingDetector, MemoryRightsizingDetector};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::DetectorFailure;
use crate::models::{Attribution, ClusterSnapshot, CostBaseline, DetectionPeriod, OpportunityCandidate};

/// Baselines indexed by workload id
#[derive(Debug, Clone, Default)]
pub struct BaselineIndex {
    by_workload: HashMap<String, Vec<CostBaseline>>,
}

impl BaselineIndex {
    pub fn new(baselines: impl IntoIterator<Item = CostBaseline>) -> Self {
        let mut by_workload: HashMap<String, Vec<CostBaseline>> = HashMap::new();
        for baseline in baselines {
            by_workload
                .entry(baseline.workload_id.clone())
                .or_default()
                .push(baseline);
        }
        for list in by_workload.values_mut() {
            list.sort_by_key(|b| b.period_start);
        }
        Self { by_workload }
    }

    /// Baseline covering `at`, else the latest one that started before it
    pub fn lookup(&self, workload_id: &str, at: DateTime<Utc>) -> Option<&CostBaseline> {
        let list = self.by_workload.get(workload_id)?;
        list.iter()
            .find(|b| b.covers(at))
            .or_else(|| list.iter().rev().find(|b| b.period_start <= at))
    }

    pub fn len(&self) -> usize {
        self.by_workload.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_workload.is_empty()
    }
}

/// Everything a detector may read
#[derive(Debug, Clone)]
pub struct DetectionInput {
    pub snapshot: ClusterSnapshot,
    pub baselines: BaselineIndex,
    pub period: DetectionPeriod,
}

impl DetectionInput {
    /// Instant detections are stamped with
    pub fn observed_at(&self) -> DateTime<Utc> {
        self.snapshot.taken_at
    }
}

/// Attribution for cluster-level resources; the baseline owner wins if known
pub(crate) fn infrastructure_attribution(
    cluster: &str,
    resource_id: &str,
    config: &DetectorConfig,
    baseline: Option<&CostBaseline>,
) -> Attribution {
    Attribution {
        cluster: cluster.to_string(),
        namespace: baseline.map(|b| b.namespace.clone()).unwrap_or_default(),
        workload: resource_id.to_string(),
        team: baseline
            .map(|b| b.team.clone())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| config.infrastructure_team.clone()),
    }
}

/// A pluggable waste analyzer
pub trait WasteDetector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Analyze the snapshot; malformed records are skipped, never fatal
    fn detect(&self, input: &DetectionInput) -> Result<Vec<OpportunityCandidate>, DetectorFailure>;
}

/// Detector thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Minimum (request - p95) / request margin to report rightsizing
    pub min_rightsizing_margin: f64,
    /// Headroom added on top of p95 usage for the proposed request
    pub rightsizing_headroom: f64,
    pub min_cpu_request: f64,
    pub min_memory_request_gb: f64,
    pub idle_node_threshold: f64,
    pub min_nodes_per_cluster: usize,
    pub min_orphan_age_days: u32,
    pub autoscaler_utilization_threshold: f64,
    pub consolidation_utilization_threshold: f64,
    /// Team credited with infrastructure-level findings
    pub infrastructure_team: String,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_rightsizing_margin: 0.5,
            rightsizing_headroom: 0.5,
            min_cpu_request: 0.1,
            min_memory_request_gb: 0.5,
            idle_node_threshold: 0.2,
            min_nodes_per_cluster: 2,
            min_orphan_age_days: 7,
            autoscaler_utilization_threshold: 0.3,
            consolidation_utilization_threshold: 0.5,
            infrastructure_team: "infrastructure".to_string(),
        }
    }
}

/// Result of running the whole detector set once
#[derive(Debug, Default)]
pub struct DetectionOutcome {
    pub candidates: Vec<OpportunityCandidate>,
    pub failures: Vec<DetectorFailure>,
    /// Wall time per detector that completed, in seconds
    pub latencies: Vec<(String, f64)>,
}

/// Registration-based set of detectors
#[derive(Clone, Default)]
pub struct DetectorRegistry {
    detectors: Vec<Arc<dyn WasteDetector>>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The six built-in detectors
    pub fn with_defaults(config: &DetectorConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CpuRightsizingDetector::new(config.clone())));
        registry.register(Arc::new(MemoryRightsizingDetector::new(config.clone())));
        registry.register(Arc::new(IdleNodeDetector::new(config.clone())));
        registry.register(Arc::new(OrphanVolumeDetector::new(config.clone())));
        registry.register(Arc::new(AutoscalingDetector::new(config.clone())));
        registry.register(Arc::new(NodeConsolidationDetector::new(config.clone())));
        registry
    }

    pub fn register(&mut self, detector: Arc<dyn WasteDetector>) {
        self.detectors.push(detector);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Run every detector concurrently, each bounded by `timeout`
    pub async fn run_all(&self, input: Arc<DetectionInput>, timeout: Duration) -> DetectionOutcome {
        let deadline = tokio::time::Instant::now() + timeout;
        let handles: Vec<_> = self
            .detectors
            .iter()
            .map(|detector| {
                let detector = Arc::clone(detector);
                let input = Arc::clone(&input);
                let name = detector.name();
                let handle = tokio::task::spawn_blocking(move || {
                    let started = Instant::now();
                    let result = detector.detect(&input);
                    (result, started.elapsed().as_secs_f64())
                });
                (name, handle)
            })
            .collect();

        let mut outcome = DetectionOutcome::default();
        for (name, handle) in handles {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok((Ok(candidates), elapsed))) => {
                    debug!(detector = name, candidates = candidates.len(), elapsed_secs = elapsed, "Detector finished");
                    outcome.latencies.push((name.to_string(), elapsed));
                    outcome.candidates.extend(candidates);
                }
                Ok(Ok((Err(failure), _))) => {
                    warn!(detector = name, error = %failure, "Detector failed");
                    outcome.failures.push(failure);
                }
                Ok(Err(join_error)) => {
                    warn!(detector = name, error = %join_error, "Detector panicked");
                    outcome
                        .failures
                        .push(DetectorFailure::new(name, format!("panicked: {}", join_error)));
                }
                Err(_) => {
                    warn!(detector = name, timeout_ms = timeout.as_millis() as u64, "Detector timed out");
                    outcome.failures.push(DetectorFailure::new(
                        name,
                        format!("timed out after {}ms", timeout.as_millis()),
                    ));
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OpportunityType;
    use crate::testing::{baseline, snapshot, ts, workload};

    struct Failing;

    impl WasteDetector for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn detect(&self, _input: &DetectionInput) -> Result<Vec<OpportunityCandidate>, DetectorFailure> {
            Err(DetectorFailure::new("failing", "metrics source missing"))
        }
    }

    struct Panicking;

    impl WasteDetector for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn detect(&self, _input: &DetectionInput) -> Result<Vec<OpportunityCandidate>, DetectorFailure> {
            panic!("index out of bounds")
        }
    }

    struct Slow;

    impl WasteDetector for Slow {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn detect(&self, _input: &DetectionInput) -> Result<Vec<OpportunityCandidate>, DetectorFailure> {
            std::thread::sleep(Duration::from_secs(1));
            Ok(Vec::new())
        }
    }

    fn input() -> Arc<DetectionInput> {
        let mut snap = snapshot();
        snap.workloads.push(workload("checkout", 2.0, 0.4, 4.0, 3.5));
        Arc::new(DetectionInput {
            snapshot: snap,
            baselines: BaselineIndex::new(vec![baseline("checkout", 200.0)]),
            period: DetectionPeriod("2026-10-19".to_string()),
        })
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let mut registry = DetectorRegistry::with_defaults(&DetectorConfig::default());
        registry.register(Arc::new(Failing));
        registry.register(Arc::new(Panicking));
        registry.register(Arc::new(Slow));

        let outcome = registry.run_all(input(), Duration::from_millis(250)).await;

        let failed: Vec<_> = outcome.failures.iter().map(|f| f.detector.as_str()).collect();
        assert_eq!(failed, vec!["failing", "panicking", "slow"]);
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].opportunity_type, OpportunityType::CpuRightsizing);
    }

    #[test]
    fn test_baseline_lookup_prefers_covering_period() {
        let older = crate::testing::baseline_for_period("a", 50.0, ts(2026, 9, 1), ts(2026, 10, 1));
        let current = baseline("a", 80.0);
        let index = BaselineIndex::new(vec![current, older]);
        assert_eq!(index.lookup("a", ts(2026, 10, 19)).unwrap().monthly_cost, 80.0);
        assert_eq!(index.lookup("a", ts(2026, 9, 15)).unwrap().monthly_cost, 50.0);
        assert_eq!(index.lookup("a", ts(2026, 12, 1)).unwrap().monthly_cost, 80.0);
        assert!(index.lookup("a", ts(2026, 8, 1)).is_none());
        assert!(index.lookup("b", ts(2026, 10, 19)).is_none());
    }
}
