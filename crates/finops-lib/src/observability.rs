//! Observability for the lifecycle engine
//!
//! Provides:
//! - Prometheus metrics (cycle and detector latency, detections, guardrail
//!   outcomes, transitions, savings totals, daily change reservations)
//! - Structured JSON logging with tracing

use prometheus::{
    register_gauge, register_histogram, register_histogram_vec, register_int_counter,
    register_int_counter_vec, Encoder, Gauge, Histogram, HistogramVec, IntCounter, IntCounterVec,
    TextEncoder,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::guardrail::GuardrailDecision;
use crate::models::{Opportunity, OpportunityStatus};

/// Histogram buckets for cycle and detector latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<EngineMetricsInner> = OnceLock::new();

struct EngineMetricsInner {
    cycle_duration_seconds: Histogram,
    cycles: IntCounterVec,
    detector_duration_seconds: HistogramVec,
    detector_failures: IntCounterVec,
    opportunities_detected: IntCounterVec,
    guardrail_decisions: IntCounterVec,
    transitions: IntCounterVec,
    snapshot_records_skipped: IntCounter,
    external_failures: IntCounterVec,
    estimated_savings: Gauge,
    realized_savings: Gauge,
    daily_change_reserved: Gauge,
}

impl EngineMetricsInner {
    fn new() -> Self {
        Self {
            cycle_duration_seconds: register_histogram!(
                "finops_cycle_duration_seconds",
                "Wall time of one detection cycle",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_duration_seconds"),

            cycles: register_int_counter_vec!(
                "finops_cycles_total",
                "Detection cycles by result",
                &["result"]
            )
            .expect("Failed to register cycles_total"),

            detector_duration_seconds: register_histogram_vec!(
                "finops_detector_duration_seconds",
                "Wall time of a single detector run",
                &["detector"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register detector_duration_seconds"),

            detector_failures: register_int_counter_vec!(
                "finops_detector_failures_total",
                "Detector runs that errored, panicked or timed out",
                &["detector"]
            )
            .expect("Failed to register detector_failures_total"),

            opportunities_detected: register_int_counter_vec!(
                "finops_opportunities_detected_total",
                "New opportunities recorded in the ledger",
                &["type"]
            )
            .expect("Failed to register opportunities_detected_total"),

            guardrail_decisions: register_int_counter_vec!(
                "finops_guardrail_decisions_total",
                "Guardrail evaluations by outcome",
                &["outcome"]
            )
            .expect("Failed to register guardrail_decisions_total"),

            transitions: register_int_counter_vec!(
                "finops_transitions_total",
                "Lifecycle transitions by target status",
                &["to"]
            )
            .expect("Failed to register transitions_total"),

            snapshot_records_skipped: register_int_counter!(
                "finops_snapshot_records_skipped_total",
                "Malformed snapshot records skipped at load time"
            )
            .expect("Failed to register snapshot_records_skipped_total"),

            external_failures: register_int_counter_vec!(
                "finops_external_failures_total",
                "External calls that failed after retries",
                &["operation"]
            )
            .expect("Failed to register external_failures_total"),

            estimated_savings: register_gauge!(
                "finops_estimated_monthly_savings",
                "Estimated monthly savings across all tracked opportunities"
            )
            .expect("Failed to register estimated_monthly_savings"),

            realized_savings: register_gauge!(
                "finops_realized_monthly_savings",
                "Realized monthly savings across verified opportunities"
            )
            .expect("Failed to register realized_monthly_savings"),

            daily_change_reserved: register_gauge!(
                "finops_daily_change_reserved",
                "Estimated savings approved so far today against the daily cap"
            )
            .expect("Failed to register daily_change_reserved"),
        }
    }
}

/// Lightweight handle to the global engine metrics
#[derive(Clone)]
pub struct EngineMetrics {
    inner: &'static EngineMetricsInner,
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        Self {
            inner: GLOBAL_METRICS.get_or_init(EngineMetricsInner::new),
        }
    }

    pub fn observe_cycle(&self, duration_secs: f64, succeeded: bool) {
        self.inner.cycle_duration_seconds.observe(duration_secs);
        let result = if succeeded { "success" } else { "failure" };
        self.inner.cycles.with_label_values(&[result]).inc();
    }

    pub fn observe_detector(&self, detector: &str, duration_secs: f64) {
        self.inner
            .detector_duration_seconds
            .with_label_values(&[detector])
            .observe(duration_secs);
    }

    pub fn inc_detector_failures(&self, detector: &str) {
        self.inner.detector_failures.with_label_values(&[detector]).inc();
    }

    pub fn inc_detected(&self, opportunity_type: &str) {
        self.inner
            .opportunities_detected
            .with_label_values(&[opportunity_type])
            .inc();
    }

    pub fn inc_guardrail_outcome(&self, outcome: &str) {
        self.inner.guardrail_decisions.with_label_values(&[outcome]).inc();
    }

    pub fn inc_transition(&self, to: OpportunityStatus) {
        self.inner.transitions.with_label_values(&[to.as_str()]).inc();
    }

    pub fn add_skipped_records(&self, count: u64) {
        self.inner.snapshot_records_skipped.inc_by(count);
    }

    pub fn inc_external_failures(&self, operation: &str) {
        self.inner.external_failures.with_label_values(&[operation]).inc();
    }

    pub fn set_savings(&self, estimated: f64, realized: f64) {
        self.inner.estimated_savings.set(estimated);
        self.inner.realized_savings.set(realized);
    }

    pub fn set_daily_change_reserved(&self, amount: f64) {
        self.inner.daily_change_reserved.set(amount);
    }

    /// Render every registered metric in the text exposition format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&prometheus::gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Structured logger for lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(&self, version: &str, detectors: usize, opportunities: usize) {
        info!(
            event = "engine_started",
            instance = %self.instance,
            engine_version = %version,
            detectors = detectors,
            opportunities = opportunities,
            "Waste-opportunity engine started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "engine_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Waste-opportunity engine shutting down"
        );
    }

    pub fn log_cycle(
        &self,
        snapshot_id: &str,
        candidates: usize,
        new_opportunities: usize,
        detector_failures: usize,
        duration_secs: f64,
    ) {
        info!(
            event = "cycle_completed",
            instance = %self.instance,
            snapshot_id = %snapshot_id,
            candidates = candidates,
            new_opportunities = new_opportunities,
            detector_failures = detector_failures,
            duration_secs = duration_secs,
            "Detection cycle completed"
        );
    }

    pub fn log_cycle_skipped(&self, reason: &str) {
        warn!(
            event = "cycle_skipped",
            instance = %self.instance,
            reason = %reason,
            "Detection cycle skipped"
        );
    }

    pub fn log_detector_failure(&self, detector: &str, reason: &str) {
        warn!(
            event = "detector_failed",
            instance = %self.instance,
            detector = %detector,
            reason = %reason,
            "Detector failed, continuing without its candidates"
        );
    }

    pub fn log_guardrail_decision(&self, decision: &GuardrailDecision) {
        let policies = decision.triggered_policy_names.join(",");
        match &decision.error {
            Some(error) => warn!(
                event = "guardrail_decision",
                instance = %self.instance,
                opportunities = ?decision.opportunity_ids,
                outcome = %decision.outcome,
                triggered_policies = %policies,
                risk_score = decision.risk_score,
                error = %error,
                "Guardrail evaluation failed closed"
            ),
            None => info!(
                event = "guardrail_decision",
                instance = %self.instance,
                opportunities = ?decision.opportunity_ids,
                outcome = %decision.outcome,
                triggered_policies = %policies,
                risk_score = decision.risk_score,
                "Guardrail decision recorded"
            ),
        }
    }

    pub fn log_transition(&self, opportunity: &Opportunity, from: OpportunityStatus) {
        info!(
            event = "opportunity_transition",
            instance = %self.instance,
            opportunity_id = %opportunity.id,
            workload = %opportunity.workload_id,
            team = %opportunity.attribution.team,
            from = %from,
            to = %opportunity.status,
            version = opportunity.version,
            "Opportunity moved"
        );
    }

    pub fn log_rollback(&self, opportunity: &Opportunity, actor: &str) {
        warn!(
            event = "opportunity_rolled_back",
            instance = %self.instance,
            opportunity_id = %opportunity.id,
            workload = %opportunity.workload_id,
            actor = %actor,
            reason = opportunity.rollback_reason.as_deref().unwrap_or_default(),
            "Opportunity rolled back"
        );
    }

    pub fn log_proposal(&self, proposal_id: &str, opportunities: usize, content_hash: &str, created: bool) {
        info!(
            event = "proposal_created",
            instance = %self.instance,
            proposal_id = %proposal_id,
            opportunities = opportunities,
            content_hash = %content_hash,
            created = created,
            "Change proposal ready"
        );
    }

    pub fn log_approval_requested(&self, opportunity_id: &str, channel: &str) {
        info!(
            event = "approval_requested",
            instance = %self.instance,
            opportunity_id = %opportunity_id,
            channel = %channel,
            "Approval requested"
        );
    }

    pub fn log_external_failure(&self, operation: &str, error: &str) {
        warn!(
            event = "external_call_failed",
            instance = %self.instance,
            operation = %operation,
            error = %error,
            "External collaborator call failed after retries"
        );
    }

    pub fn log_verification_deferred(&self, opportunity_id: &str, verdict: &str) {
        info!(
            event = "verification_deferred",
            instance = %self.instance,
            opportunity_id = %opportunity_id,
            verdict = %verdict,
            "Opportunity not yet verifiable"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_render_after_observation() {
        let metrics = EngineMetrics::new();
        metrics.observe_cycle(0.12, true);
        metrics.inc_detected("cpu_rightsizing");
        metrics.inc_guardrail_outcome("allow");
        metrics.inc_transition(OpportunityStatus::Approved);
        metrics.set_daily_change_reserved(300.0);

        let text = metrics.render().unwrap();
        assert!(text.contains("finops_cycle_duration_seconds"));
        assert!(text.contains("finops_guardrail_decisions_total{outcome=\"allow\"}"));
    }

    #[test]
    fn test_handles_share_the_registry() {
        let a = EngineMetrics::new();
        let b = EngineMetrics::new();
        assert!(std::ptr::eq(a.inner, b.inner));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("finops-eu");
        assert_eq!(logger.instance, "finops-eu");
    }
}
