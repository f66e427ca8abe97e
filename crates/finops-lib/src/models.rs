//! Core data models for the waste-opportunity engine

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::scoring::{
    apply_baseline_penalty, below_threshold_margin, clamp_unit, non_negative,
    orphan_age_confidence, rightsizing_margin, SCALING_ACTIVITY_FACTOR,
};

/// Snapshot schema version understood by this engine
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Window of metric samples a usage statistic was computed over
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub samples: u32,
}

impl ObservationWindow {
    pub fn is_valid(&self) -> bool {
        self.end > self.start && self.samples > 0
    }

    pub fn hours(&self) -> f64 {
        (self.end - self.start).num_seconds() as f64 / 3600.0
    }
}

/// Workload resource view from the snapshot provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadView {
    pub id: String,
    pub cluster: String,
    pub namespace: String,
    pub team: String,
    pub cpu_request: f64,
    pub cpu_usage_p95: f64,
    #[serde(default)]
    pub cpu_limit: Option<f64>,
    pub mem_request_gb: f64,
    pub mem_usage_p95_gb: f64,
    #[serde(default)]
    pub mem_limit_gb: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub observation_window: ObservationWindow,
    /// Number of services depending on this workload
    #[serde(default)]
    pub dependency_fanout: u32,
    /// Explicit operator override for protected-tag guardrails
    #[serde(default)]
    pub guardrail_override: bool,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
}

fn default_replicas() -> u32 {
    1
}

fn finite_non_negative(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

impl WorkloadView {
    /// Whether the record can be analyzed at all
    pub fn is_well_formed(&self) -> bool {
        !self.id.is_empty()
            && finite_non_negative(self.cpu_request)
            && finite_non_negative(self.cpu_usage_p95)
            && finite_non_negative(self.mem_request_gb)
            && finite_non_negative(self.mem_usage_p95_gb)
            && self.cpu_limit.map(finite_non_negative).unwrap_or(true)
            && self.mem_limit_gb.map(finite_non_negative).unwrap_or(true)
            && self.observation_window.is_valid()
    }

    pub fn attribution(&self) -> Attribution {
        Attribution {
            cluster: self.cluster.clone(),
            namespace: self.namespace.clone(),
            workload: self.id.clone(),
            team: self.team.clone(),
        }
    }
}

/// Node view from the snapshot provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeView {
    pub id: String,
    pub cluster: String,
    /// Mean utilization over the observation window, 0.0-1.0
    pub utilization: f64,
    pub instance_class: String,
}

impl NodeView {
    pub fn is_well_formed(&self) -> bool {
        !self.id.is_empty() && !self.instance_class.is_empty() && finite_non_negative(self.utilization)
    }
}

/// Persistent volume view from the snapshot provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeView {
    pub id: String,
    pub cluster: String,
    pub attached: bool,
    pub size_gb: f64,
    #[serde(default)]
    pub age_days: u32,
}

impl VolumeView {
    pub fn is_well_formed(&self) -> bool {
        !self.id.is_empty() && finite_non_negative(self.size_gb)
    }
}

/// Horizontal autoscaler view from the snapshot provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoscalerView {
    /// Workload id the autoscaler scales
    pub target: String,
    pub cluster: String,
    pub namespace: String,
    pub team: String,
    pub min: u32,
    pub max: u32,
    pub observed_scaling_events: u32,
    pub avg_cpu_utilization: f64,
    #[serde(default)]
    pub current_replicas: u32,
    pub observation_window: ObservationWindow,
}

impl AutoscalerView {
    pub fn is_well_formed(&self) -> bool {
        !self.target.is_empty()
            && self.min <= self.max
            && finite_non_negative(self.avg_cpu_utilization)
            && self.observation_window.is_valid()
    }
}

/// Point-in-time view of a cluster, immutable for the duration of a cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub schema_version: u32,
    pub snapshot_id: String,
    pub taken_at: DateTime<Utc>,
    pub cluster: String,
    #[serde(default)]
    pub workloads: Vec<WorkloadView>,
    #[serde(default)]
    pub nodes: Vec<NodeView>,
    #[serde(default)]
    pub volumes: Vec<VolumeView>,
    #[serde(default)]
    pub autoscalers: Vec<AutoscalerView>,
}

impl ClusterSnapshot {
    pub fn empty(snapshot_id: impl Into<String>, cluster: impl Into<String>, taken_at: DateTime<Utc>) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            snapshot_id: snapshot_id.into(),
            taken_at,
            cluster: cluster.into(),
            workloads: Vec::new(),
            nodes: Vec::new(),
            volumes: Vec::new(),
            autoscalers: Vec::new(),
        }
    }
}

/// Monthly cost split by resource class
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    #[serde(default)]
    pub cpu: f64,
    #[serde(default)]
    pub memory: f64,
    #[serde(default)]
    pub storage: f64,
    #[serde(default)]
    pub network: f64,
}

/// Resource class a cost share or evidence sample refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    Cpu,
    Memory,
    Storage,
    Network,
}

impl CostBreakdown {
    pub fn share(&self, class: ResourceClass) -> f64 {
        match class {
            ResourceClass::Cpu => self.cpu,
            ResourceClass::Memory => self.memory,
            ResourceClass::Storage => self.storage,
            ResourceClass::Network => self.network,
        }
    }
}

/// Cost baseline for one workload over one billing period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBaseline {
    pub workload_id: String,
    pub cluster: String,
    pub namespace: String,
    pub team: String,
    pub monthly_cost: f64,
    #[serde(default)]
    pub breakdown: CostBreakdown,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

impl CostBaseline {
    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        self.period_start <= at && at < self.period_end
    }

    pub fn reference(&self, class: Option<ResourceClass>) -> BaselineRef {
        BaselineRef {
            period_start: self.period_start,
            period_end: self.period_end,
            monthly_cost: self.monthly_cost,
            resource_cost: class.map(|c| self.breakdown.share(c)).unwrap_or(self.monthly_cost),
        }
    }
}

/// Baseline figures copied into evidence at emission time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineRef {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub monthly_cost: f64,
    pub resource_cost: f64,
}

/// Kind of waste an opportunity describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityType {
    CpuRightsizing,
    MemoryRightsizing,
    IdleNode,
    OrphanVolume,
    AutoscalingMisconfig,
    NodeConsolidation,
}

impl OpportunityType {
    pub const ALL: [OpportunityType; 6] = [
        OpportunityType::CpuRightsizing,
        OpportunityType::MemoryRightsizing,
        OpportunityType::IdleNode,
        OpportunityType::OrphanVolume,
        OpportunityType::AutoscalingMisconfig,
        OpportunityType::NodeConsolidation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OpportunityType::CpuRightsizing => "cpu_rightsizing",
            OpportunityType::MemoryRightsizing => "memory_rightsizing",
            OpportunityType::IdleNode => "idle_node",
            OpportunityType::OrphanVolume => "orphan_volume",
            OpportunityType::AutoscalingMisconfig => "autoscaling_misconfig",
            OpportunityType::NodeConsolidation => "node_consolidation",
        }
    }
}

impl fmt::Display for OpportunityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpportunityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OpportunityType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown opportunity type: {}", s))
    }
}

/// Lifecycle status of an opportunity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityStatus {
    Detected,
    Denied,
    PendingApproval,
    Approved,
    ProposalCreated,
    Implemented,
    Verified,
    Realized,
    RolledBack,
}

impl OpportunityStatus {
    pub const ALL: [OpportunityStatus; 9] = [
        OpportunityStatus::Detected,
        OpportunityStatus::Denied,
        OpportunityStatus::PendingApproval,
        OpportunityStatus::Approved,
        OpportunityStatus::ProposalCreated,
        OpportunityStatus::Implemented,
        OpportunityStatus::Verified,
        OpportunityStatus::Realized,
        OpportunityStatus::RolledBack,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OpportunityStatus::Detected => "detected",
            OpportunityStatus::Denied => "denied",
            OpportunityStatus::PendingApproval => "pending_approval",
            OpportunityStatus::Approved => "approved",
            OpportunityStatus::ProposalCreated => "proposal_created",
            OpportunityStatus::Implemented => "implemented",
            OpportunityStatus::Verified => "verified",
            OpportunityStatus::Realized => "realized",
            OpportunityStatus::RolledBack => "rolled_back",
        }
    }

    /// No edge leaves a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OpportunityStatus::Denied | OpportunityStatus::Realized | OpportunityStatus::RolledBack
        )
    }

    /// Statuses whose savings count as confirmed
    pub fn is_verified_or_later(&self) -> bool {
        matches!(self, OpportunityStatus::Verified | OpportunityStatus::Realized)
    }
}

impl fmt::Display for OpportunityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpportunityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OpportunityStatus::ALL
            .iter()
            .copied()
            .find(|st| st.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown opportunity status: {}", s))
    }
}

/// Ownership attribution of an opportunity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
    pub cluster: String,
    pub namespace: String,
    pub workload: String,
    pub team: String,
}

/// System a change proposal is submitted against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetSystem {
    Manifest,
    InfraConfig,
}

impl fmt::Display for TargetSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetSystem::Manifest => write!(f, "manifest"),
            TargetSystem::InfraConfig => write!(f, "infra_config"),
        }
    }
}

/// Resource specification before or after a proposed change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceSpec {
    ContainerCpu {
        cpu_request: f64,
        cpu_limit: Option<f64>,
    },
    ContainerMemory {
        mem_request_gb: f64,
        mem_limit_gb: Option<f64>,
    },
    Node {
        node_id: String,
        instance_class: String,
        present: bool,
    },
    NodePool {
        cluster: String,
        instance_class: String,
        node_count: u32,
    },
    Volume {
        volume_id: String,
        size_gb: f64,
        present: bool,
    },
    Autoscaler {
        target: String,
        min_replicas: u32,
        max_replicas: u32,
    },
}

/// Evidence for a rightsizing finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RightsizingEvidence {
    pub resource: ResourceClass,
    pub request: f64,
    pub usage_p95: f64,
    pub proposed_request: f64,
    pub observation_window: ObservationWindow,
    pub snapshot_id: String,
    pub baseline: Option<BaselineRef>,
}

/// Evidence for an idle node finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdleNodeEvidence {
    pub node_id: String,
    pub instance_class: String,
    pub utilization: f64,
    pub idle_threshold: f64,
    pub active_nodes_in_cluster: u32,
    pub snapshot_id: String,
    pub baseline: Option<BaselineRef>,
}

/// Evidence for an orphaned volume finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrphanVolumeEvidence {
    pub volume_id: String,
    pub size_gb: f64,
    pub age_days: u32,
    pub min_age_days: u32,
    pub snapshot_id: String,
    pub baseline: Option<BaselineRef>,
}

/// Evidence for an autoscaler misconfiguration finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoscalingEvidence {
    pub target: String,
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub proposed_min_replicas: u32,
    pub avg_cpu_utilization: f64,
    pub utilization_threshold: f64,
    pub observed_scaling_events: u32,
    pub observation_window: ObservationWindow,
    pub snapshot_id: String,
    pub baseline: Option<BaselineRef>,
}

/// Evidence for an under-packed node pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodePoolEvidence {
    pub cluster: String,
    pub instance_class: String,
    pub node_ids: Vec<String>,
    pub mean_utilization: f64,
    pub utilization_threshold: f64,
    pub proposed_node_count: u32,
    pub snapshot_id: String,
    /// Number of pool nodes that had a cost baseline
    pub baselines_found: usize,
}

/// Versioned evidence bundle, self-contained at emission time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "schema", content = "payload")]
pub enum Evidence {
    #[serde(rename = "rightsizing.v1")]
    Rightsizing(RightsizingEvidence),
    #[serde(rename = "idle_node.v1")]
    IdleNode(IdleNodeEvidence),
    #[serde(rename = "orphan_volume.v1")]
    OrphanVolume(OrphanVolumeEvidence),
    #[serde(rename = "autoscaling.v1")]
    Autoscaling(AutoscalingEvidence),
    #[serde(rename = "node_pool.v1")]
    NodePool(NodePoolEvidence),
}

impl Evidence {
    pub fn schema_id(&self) -> &'static str {
        match self {
            Evidence::Rightsizing(_) => "rightsizing.v1",
            Evidence::IdleNode(_) => "idle_node.v1",
            Evidence::OrphanVolume(_) => "orphan_volume.v1",
            Evidence::Autoscaling(_) => "autoscaling.v1",
            Evidence::NodePool(_) => "node_pool.v1",
        }
    }

    pub fn snapshot_id(&self) -> &str {
        match self {
            Evidence::Rightsizing(e) => &e.snapshot_id,
            Evidence::IdleNode(e) => &e.snapshot_id,
            Evidence::OrphanVolume(e) => &e.snapshot_id,
            Evidence::Autoscaling(e) => &e.snapshot_id,
            Evidence::NodePool(e) => &e.snapshot_id,
        }
    }

    pub fn baseline_present(&self) -> bool {
        match self {
            Evidence::Rightsizing(e) => e.baseline.is_some(),
            Evidence::IdleNode(e) => e.baseline.is_some(),
            Evidence::OrphanVolume(e) => e.baseline.is_some(),
            Evidence::Autoscaling(e) => e.baseline.is_some(),
            Evidence::NodePool(e) => e.baselines_found > 0,
        }
    }

    /// Recompute the detector confidence from the evidence alone
    pub fn recompute_confidence(&self) -> f64 {
        let raw = match self {
            Evidence::Rightsizing(e) => rightsizing_margin(e.request, e.usage_p95),
            Evidence::IdleNode(e) => below_threshold_margin(e.utilization, e.idle_threshold),
            Evidence::OrphanVolume(e) => orphan_age_confidence(e.age_days, e.min_age_days),
            Evidence::Autoscaling(e) => {
                let margin = below_threshold_margin(e.avg_cpu_utilization, e.utilization_threshold);
                if e.observed_scaling_events > 0 {
                    margin * SCALING_ACTIVITY_FACTOR
                } else {
                    margin
                }
            }
            Evidence::NodePool(e) => below_threshold_margin(e.mean_utilization, e.utilization_threshold),
        };
        apply_baseline_penalty(raw, self.baseline_present())
    }
}

/// Granularity of the detection period used in fingerprints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PeriodGranularity {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

/// Detection period key, e.g. `2026-10-19`, `2026-W42`, `2026-10`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetectionPeriod(pub String);

impl DetectionPeriod {
    pub fn containing(at: DateTime<Utc>, granularity: PeriodGranularity) -> Self {
        let key = match granularity {
            PeriodGranularity::Daily => at.format("%Y-%m-%d").to_string(),
            PeriodGranularity::Weekly => {
                let week = at.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            PeriodGranularity::Monthly => at.format("%Y-%m").to_string(),
        };
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DetectionPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable identity of a waste condition: hash(type, workload, period)
pub fn fingerprint(kind: OpportunityType, workload_id: &str, period: &DetectionPeriod) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(workload_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(period.as_str().as_bytes());
    hex::encode(hasher.finalize())
}

/// Opportunity id derived from its fingerprint
pub fn opportunity_id(fingerprint: &str) -> String {
    format!("opp-{}", &fingerprint[..16.min(fingerprint.len())])
}

/// Detector output before reconciliation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpportunityCandidate {
    pub opportunity_type: OpportunityType,
    pub workload_id: String,
    pub attribution: Attribution,
    #[serde(default)]
    pub tags: Vec<String>,
    pub estimated_monthly_savings: f64,
    pub confidence: f64,
    pub evidence: Evidence,
    pub before_state: ResourceSpec,
    pub after_state: ResourceSpec,
    pub recommendation: String,
    pub target_system: TargetSystem,
    #[serde(default)]
    pub dependency_fanout: u32,
    #[serde(default)]
    pub protected_override: bool,
    pub observed_at: DateTime<Utc>,
}

/// A detected, trackable instance of resource waste
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: String,
    pub fingerprint: String,
    pub detection_period: DetectionPeriod,
    #[serde(rename = "type")]
    pub opportunity_type: OpportunityType,
    pub status: OpportunityStatus,
    pub attribution: Attribution,
    pub workload_id: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub estimated_monthly_savings: f64,
    pub confidence: f64,
    pub risk_score: f64,
    pub evidence: Evidence,
    pub before_state: ResourceSpec,
    pub after_state: ResourceSpec,
    pub recommendation: String,
    pub target_system: TargetSystem,
    pub dependency_fanout: u32,
    pub protected_override: bool,
    pub proposal_ref: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    /// When the opportunity reached Approved; keys the daily change cap
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    pub proposal_created_at: Option<DateTime<Utc>>,
    pub implemented_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
    pub realized_at: Option<DateTime<Utc>>,
    pub realized_savings: Option<f64>,
    pub rollback_reason: Option<String>,
    pub version: u64,
}

impl Opportunity {
    /// Build a Detected opportunity, enforcing the range invariants
    pub fn from_candidate(
        candidate: OpportunityCandidate,
        period: DetectionPeriod,
        detected_at: DateTime<Utc>,
    ) -> Self {
        let fingerprint = fingerprint(candidate.opportunity_type, &candidate.workload_id, &period);
        Self {
            id: opportunity_id(&fingerprint),
            fingerprint,
            detection_period: period,
            opportunity_type: candidate.opportunity_type,
            status: OpportunityStatus::Detected,
            attribution: candidate.attribution,
            workload_id: candidate.workload_id,
            tags: candidate.tags,
            estimated_monthly_savings: non_negative(candidate.estimated_monthly_savings),
            confidence: clamp_unit(candidate.confidence),
            risk_score: 0.0,
            evidence: candidate.evidence,
            before_state: candidate.before_state,
            after_state: candidate.after_state,
            recommendation: candidate.recommendation,
            target_system: candidate.target_system,
            dependency_fanout: candidate.dependency_fanout,
            protected_override: candidate.protected_override,
            proposal_ref: None,
            detected_at,
            decided_at: None,
            approved_at: None,
            proposal_created_at: None,
            implemented_at: None,
            verified_at: None,
            realized_at: None,
            realized_savings: None,
            rollback_reason: None,
            version: 1,
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn window() -> ObservationWindow {
        ObservationWindow {
            start: Utc.with_ymd_and_hms(2026, 10, 12, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap(),
            samples: 2016,
        }
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let period = DetectionPeriod("2026-10-19".to_string());
        let a = fingerprint(OpportunityType::CpuRightsizing, "checkout", &period);
        let b = fingerprint(OpportunityType::CpuRightsizing, "checkout", &period);
        let c = fingerprint(OpportunityType::MemoryRightsizing, "checkout", &period);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert!(opportunity_id(&a).starts_with("opp-"));
    }

    #[test]
    fn test_detection_period_keys() {
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 13, 30, 0).unwrap();
        assert_eq!(DetectionPeriod::containing(at, PeriodGranularity::Daily).as_str(), "2026-10-19");
        assert_eq!(DetectionPeriod::containing(at, PeriodGranularity::Weekly).as_str(), "2026-W43");
        assert_eq!(DetectionPeriod::containing(at, PeriodGranularity::Monthly).as_str(), "2026-10");
    }

    #[test]
    fn test_status_round_trip_from_str() {
        for status in OpportunityStatus::ALL {
            assert_eq!(status.as_str().parse::<OpportunityStatus>().unwrap(), status);
        }
        assert!("merged".parse::<OpportunityStatus>().is_err());
    }

    #[test]
    fn test_evidence_serializes_with_schema_tag() {
        let evidence = Evidence::Rightsizing(RightsizingEvidence {
            resource: ResourceClass::Cpu,
            request: 2.0,
            usage_p95: 0.4,
            proposed_request: 0.6,
            observation_window: window(),
            snapshot_id: "snap-1".to_string(),
            baseline: None,
        });
        let json = serde_json::to_value(&evidence).unwrap();
        assert_eq!(json["schema"], "rightsizing.v1");
        assert_eq!(json["payload"]["request"], 2.0);

        let back: Evidence = serde_json::from_value(json).unwrap();
        assert_eq!(back, evidence);
    }

    #[test]
    fn test_evidence_recomputes_confidence() {
        let evidence = Evidence::Rightsizing(RightsizingEvidence {
            resource: ResourceClass::Cpu,
            request: 2.0,
            usage_p95: 0.4,
            proposed_request: 0.6,
            observation_window: window(),
            snapshot_id: "snap-1".to_string(),
            baseline: None,
        });
        // No baseline: 0.8 * 0.9
        assert!((evidence.recompute_confidence() - 0.72).abs() < 1e-9);
    }

    #[test]
    fn test_workload_well_formed() {
        let mut workload = WorkloadView {
            id: "api".to_string(),
            cluster: "prod-eu".to_string(),
            namespace: "shop".to_string(),
            team: "payments".to_string(),
            cpu_request: 1.0,
            cpu_usage_p95: 0.2,
            cpu_limit: None,
            mem_request_gb: 2.0,
            mem_usage_p95_gb: 1.0,
            mem_limit_gb: None,
            tags: vec![],
            observation_window: window(),
            dependency_fanout: 0,
            guardrail_override: false,
            replicas: 1,
        };
        assert!(workload.is_well_formed());
        workload.cpu_usage_p95 = f64::NAN;
        assert!(!workload.is_well_formed());
        workload.cpu_usage_p95 = -1.0;
        assert!(!workload.is_well_formed());
    }
}
