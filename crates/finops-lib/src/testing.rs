//! Shared fixtures for unit tests

use chrono::{DateTime, TimeZone, Utc};

use crate::guardrail::{GuardrailDecision, GuardrailOutcome};
use crate::ledger::{Ledger, TransitionCause, TransitionRequest};
use crate::models::*;

pub fn ts(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

pub fn window() -> ObservationWindow {
    ObservationWindow {
        start: ts(2026, 10, 12),
        end: ts(2026, 10, 19),
        samples: 2016,
    }
}

pub fn workload(id: &str, cpu_request: f64, cpu_p95: f64, mem_request: f64, mem_p95: f64) -> WorkloadView {
    WorkloadView {
        id: id.to_string(),
        cluster: "prod-eu".to_string(),
        namespace: "shop".to_string(),
        team: "payments".to_string(),
        cpu_request,
        cpu_usage_p95: cpu_p95,
        cpu_limit: None,
        mem_request_gb: mem_request,
        mem_usage_p95_gb: mem_p95,
        mem_limit_gb: None,
        tags: Vec::new(),
        observation_window: window(),
        dependency_fanout: 0,
        guardrail_override: false,
        replicas: 1,
    }
}

pub fn node(id: &str, utilization: f64, instance_class: &str) -> NodeView {
    NodeView {
        id: id.to_string(),
        cluster: "prod-eu".to_string(),
        utilization,
        instance_class: instance_class.to_string(),
    }
}

pub fn volume(id: &str, attached: bool, size_gb: f64, age_days: u32) -> VolumeView {
    VolumeView {
        id: id.to_string(),
        cluster: "prod-eu".to_string(),
        attached,
        size_gb,
        age_days,
    }
}

pub fn autoscaler(target: &str, min: u32, max: u32, utilization: f64, events: u32) -> AutoscalerView {
    AutoscalerView {
        target: target.to_string(),
        cluster: "prod-eu".to_string(),
        namespace: "shop".to_string(),
        team: "payments".to_string(),
        min,
        max,
        observed_scaling_events: events,
        avg_cpu_utilization: utilization,
        current_replicas: min,
        observation_window: window(),
    }
}

pub fn snapshot() -> ClusterSnapshot {
    ClusterSnapshot::empty("snap-1", "prod-eu", ts(2026, 10, 19))
}

/// October 2026 baseline split 60/40 between CPU and memory
pub fn baseline(workload_id: &str, monthly_cost: f64) -> CostBaseline {
    baseline_for_period(workload_id, monthly_cost, ts(2026, 10, 1), ts(2026, 11, 1))
}

pub fn baseline_for_period(
    workload_id: &str,
    monthly_cost: f64,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
) -> CostBaseline {
    CostBaseline {
        workload_id: workload_id.to_string(),
        cluster: "prod-eu".to_string(),
        namespace: "shop".to_string(),
        team: "payments".to_string(),
        monthly_cost,
        breakdown: CostBreakdown {
            cpu: monthly_cost * 0.6,
            memory: monthly_cost * 0.4,
            storage: 0.0,
            network: 0.0,
        },
        period_start,
        period_end,
    }
}

pub fn rightsizing_candidate(workload_id: &str, request: f64, usage_p95: f64) -> OpportunityCandidate {
    let wl = workload(workload_id, request, usage_p95, 4.0, 3.5);
    OpportunityCandidate {
        opportunity_type: OpportunityType::CpuRightsizing,
        workload_id: workload_id.to_string(),
        attribution: wl.attribution(),
        tags: Vec::new(),
        estimated_monthly_savings: 0.0,
        confidence: 0.8,
        evidence: Evidence::Rightsizing(RightsizingEvidence {
            resource: ResourceClass::Cpu,
            request,
            usage_p95,
            proposed_request: usage_p95 * 1.5,
            observation_window: window(),
            snapshot_id: "snap-1".to_string(),
            baseline: None,
        }),
        before_state: ResourceSpec::ContainerCpu {
            cpu_request: request,
            cpu_limit: None,
        },
        after_state: ResourceSpec::ContainerCpu {
            cpu_request: usage_p95 * 1.5,
            cpu_limit: None,
        },
        recommendation: format!("Reduce CPU request of {} to {:.2} cores", workload_id, usage_p95 * 1.5),
        target_system: TargetSystem::Manifest,
        dependency_fanout: 0,
        protected_override: false,
        observed_at: ts(2026, 10, 19),
    }
}

/// Opportunity keyed by `id` for both its id and workload
pub fn opportunity_with(
    id: &str,
    status: OpportunityStatus,
    savings: f64,
    realized: Option<f64>,
) -> Opportunity {
    let mut candidate = rightsizing_candidate(id, 2.0, 0.4);
    candidate.estimated_monthly_savings = savings;
    let period = DetectionPeriod("2026-10-19".to_string());
    let mut opp = Opportunity::from_candidate(candidate, period, ts(2026, 10, 19));
    opp.id = id.to_string();
    opp.status = status;
    opp.realized_savings = realized;
    opp
}

/// Insert a detected opportunity and let an allowing guardrail approve it
pub async fn approved_in(ledger: &Ledger, id: &str, savings: f64) -> Opportunity {
    let detected = ledger
        .insert(opportunity_with(id, OpportunityStatus::Detected, savings, None))
        .await
        .unwrap();
    let decision = GuardrailDecision {
        opportunity_ids: vec![id.to_string()],
        outcome: GuardrailOutcome::Allow,
        triggered_policy_names: Vec::new(),
        risk_score: 0.1,
        evaluated_at: ts(2026, 10, 19),
        error: None,
    };
    let request = TransitionRequest::new(OpportunityStatus::Approved, TransitionCause::Guardrail { decision });
    ledger
        .transition(id, detected.version, request, ts(2026, 10, 19))
        .await
        .unwrap()
}

/// Implemented CPU rightsizing whose evidence recorded a $200 baseline
pub fn implemented_rightsizing(implemented_at: DateTime<Utc>) -> Opportunity {
    let mut candidate = rightsizing_candidate("checkout", 2.0, 0.4);
    let reference = baseline("checkout", 200.0).reference(Some(ResourceClass::Cpu));
    if let Evidence::Rightsizing(ref mut evidence) = candidate.evidence {
        evidence.baseline = Some(reference);
    }
    candidate.estimated_monthly_savings = 84.0;
    let period = DetectionPeriod::containing(implemented_at, PeriodGranularity::Daily);
    let mut opp = Opportunity::from_candidate(candidate, period, implemented_at);
    opp.status = OpportunityStatus::Implemented;
    opp.implemented_at = Some(implemented_at);
    opp
}
