//! Change proposal generation
//!
//! A proposal bundles approved opportunities into one reviewable change
//! against a single target system. Its content hash covers everything but
//! timestamps, so regenerating it from the same opportunities yields the
//! same hash and the ledger returns the stored proposal instead of a copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use crate::error::ProposalError;
use crate::guardrail::MaxBlastRadius;
use crate::ledger::Ledger;
use crate::models::{Opportunity, OpportunityStatus, ResourceSpec, TargetSystem};

/// Before/after spec for one change target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDiff {
    pub opportunity_id: String,
    pub workload_id: String,
    /// Path of the file the change applies to in the target repository
    pub path: String,
    pub before: ResourceSpec,
    pub after: ResourceSpec,
}

/// A reviewable change against a manifest or infrastructure repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeProposal {
    pub id: String,
    pub opportunity_ids: Vec<String>,
    pub diff: Vec<ResourceDiff>,
    pub rationale: String,
    pub target_system: TargetSystem,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub review_ref: Option<String>,
}

/// Result of a generate call
#[derive(Debug, Clone, PartialEq)]
pub enum ProposalOutcome {
    Created(ChangeProposal),
    /// An identical proposal was already stored
    Existing(ChangeProposal),
}

impl ProposalOutcome {
    pub fn proposal(&self) -> &ChangeProposal {
        match self {
            ProposalOutcome::Created(p) | ProposalOutcome::Existing(p) => p,
        }
    }

    pub fn into_proposal(self) -> ChangeProposal {
        match self {
            ProposalOutcome::Created(p) | ProposalOutcome::Existing(p) => p,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, ProposalOutcome::Created(_))
    }
}

/// Hash input; field order is part of the hash
#[derive(Serialize)]
struct HashedContent<'a> {
    opportunity_ids: &'a [String],
    diff: &'a [ResourceDiff],
    rationale: &'a str,
    target_system: TargetSystem,
}

/// File the change for one opportunity lands in
pub fn target_path(opportunity: &Opportunity) -> String {
    let attribution = &opportunity.attribution;
    match &opportunity.after_state {
        ResourceSpec::ContainerCpu { .. } | ResourceSpec::ContainerMemory { .. } => {
            format!("k8s/{}/{}.yaml", attribution.namespace, attribution.workload)
        }
        ResourceSpec::Autoscaler { target, .. } => {
            format!("k8s/{}/{}-hpa.yaml", attribution.namespace, target)
        }
        ResourceSpec::Node { node_id, .. } => {
            format!("infrastructure/{}/nodes/{}.tf", attribution.cluster, node_id)
        }
        ResourceSpec::NodePool {
            cluster,
            instance_class,
            ..
        } => format!("infrastructure/{}/node-pools/{}.tf", cluster, instance_class),
        ResourceSpec::Volume { volume_id, .. } => {
            format!("infrastructure/{}/volumes/{}.tf", attribution.cluster, volume_id)
        }
    }
}

/// Low below 0.3, medium below 0.6, high otherwise
pub fn risk_band(score: f64) -> &'static str {
    if score < 0.3 {
        "low"
    } else if score < 0.6 {
        "medium"
    } else {
        "high"
    }
}

fn fanout_band(fanout: u32) -> &'static str {
    match fanout {
        0 => "none",
        1..=3 => "low",
        4..=10 => "medium",
        _ => "high",
    }
}

/// Expected serving-path effect of applying `after`
fn latency_impact(after: &ResourceSpec) -> &'static str {
    match after {
        ResourceSpec::ContainerCpu { .. } | ResourceSpec::ContainerMemory { .. } => {
            "none expected, requests stay above observed p95 usage"
        }
        ResourceSpec::Autoscaler { .. } => "possible cold-start latency while scaling up from the lower floor",
        ResourceSpec::Node { .. } | ResourceSpec::NodePool { .. } => {
            "none expected, remaining capacity absorbs rescheduled pods"
        }
        ResourceSpec::Volume { .. } => "none, the volume is not attached",
    }
}

/// Batch-level risk section: blast radius, dependencies, latency, SLO
fn write_risk_analysis(text: &mut String, opportunities: &[Opportunity]) {
    let workloads: BTreeSet<&str> = opportunities.iter().map(|o| o.workload_id.as_str()).collect();
    let namespaces: BTreeSet<(&str, &str)> = opportunities
        .iter()
        .map(|o| (o.attribution.cluster.as_str(), o.attribution.namespace.as_str()))
        .collect();
    let fanout = opportunities.iter().map(|o| o.dependency_fanout).max().unwrap_or(0);
    let risk = opportunities.iter().map(|o| o.risk_score).fold(0.0, f64::max);
    let confidence = opportunities.iter().map(|o| o.confidence).fold(1.0, f64::min);
    let slo = risk_band(risk);
    let availability = if risk < 0.3 { "none" } else { "minimal" };

    let _ = writeln!(text);
    let _ = writeln!(text, "## Risk analysis");
    let _ = writeln!(
        text,
        "- Blast radius: {} workload(s) across {} namespace(s), {} risk",
        workloads.len(),
        namespaces.len(),
        risk_band(risk)
    );
    let _ = writeln!(
        text,
        "- Dependency risk: {} (up to {} downstream dependents)",
        fanout_band(fanout),
        fanout
    );
    let mut latency: Vec<&str> = opportunities.iter().map(|o| latency_impact(&o.after_state)).collect();
    latency.sort_unstable();
    latency.dedup();
    let _ = writeln!(text, "- Latency impact: {}", latency.join("; "));
    let _ = writeln!(
        text,
        "- SLO impact: {} violation risk, availability impact {} (max risk score {:.2})",
        slo, availability, risk
    );
    let _ = writeln!(text, "- Overall confidence: {:.0}%", confidence * 100.0);
}

/// Review text citing each opportunity's evidence verbatim
pub fn rationale(opportunities: &[Opportunity]) -> Result<String, ProposalError> {
    let total: f64 = opportunities.iter().map(|o| o.estimated_monthly_savings).sum();
    let mut text = String::new();
    let noun = if opportunities.len() == 1 { "opportunity" } else { "opportunities" };
    let _ = writeln!(text, "# Waste remediation: {} {}", opportunities.len(), noun);
    let _ = writeln!(text);
    let _ = writeln!(text, "Estimated monthly savings: ${:.2}", total);
    write_risk_analysis(&mut text, opportunities);

    for opportunity in opportunities {
        let evidence = serde_json::to_string_pretty(&opportunity.evidence)
            .map_err(|e| ProposalError::Encoding(e.to_string()))?;
        let a = &opportunity.attribution;
        let _ = writeln!(text);
        let _ = writeln!(text, "## {} ({})", opportunity.id, opportunity.opportunity_type);
        let _ = writeln!(text, "Workload: {}/{}/{} (team {})", a.cluster, a.namespace, a.workload, a.team);
        let _ = writeln!(
            text,
            "Estimated monthly savings: ${:.2}, confidence {:.0}%, risk {:.2}",
            opportunity.estimated_monthly_savings,
            opportunity.confidence * 100.0,
            opportunity.risk_score
        );
        let _ = writeln!(text, "Recommendation: {}", opportunity.recommendation);
        let _ = writeln!(text, "Evidence ({}):", opportunity.evidence.schema_id());
        let _ = writeln!(text, "```json\n{}\n```", evidence);
    }
    Ok(text)
}

/// Kubernetes quantity for CPU cores, in millicores
fn millicores(cores: f64) -> String {
    format!("{}m", (cores * 1000.0).round() as u64)
}

/// Kubernetes quantity for memory, in mebibytes
fn mebibytes(gb: f64) -> String {
    format!("{}Mi", (gb * 1024.0).round() as u64)
}

/// Terraform identifier derived from an arbitrary resource name
fn tf_ident(name: &str) -> String {
    let ident: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if ident.starts_with(|c: char| c.is_ascii_digit()) {
        format!("r_{}", ident)
    } else {
        ident
    }
}

fn removed_block(text: &mut String, address: &str) {
    let _ = writeln!(text, "removed {{");
    let _ = writeln!(text, "  from = {}", address);
    let _ = writeln!(text);
    let _ = writeln!(text, "  lifecycle {{");
    let _ = writeln!(text, "    destroy = true");
    let _ = writeln!(text, "  }}");
    let _ = writeln!(text, "}}");
}

/// Strategic-merge patch setting one resource of the workload's container
fn container_resources(text: &mut String, workload: &str, resource: &str, request: &str, limit: Option<&str>) {
    let _ = writeln!(text, "apiVersion: apps/v1");
    let _ = writeln!(text, "kind: Deployment");
    let _ = writeln!(text, "metadata:");
    let _ = writeln!(text, "  name: {}", workload);
    let _ = writeln!(text, "spec:");
    let _ = writeln!(text, "  template:");
    let _ = writeln!(text, "    spec:");
    let _ = writeln!(text, "      containers:");
    let _ = writeln!(text, "        - name: {}", workload);
    let _ = writeln!(text, "          resources:");
    let _ = writeln!(text, "            requests:");
    let _ = writeln!(text, "              {}: \"{}\"", resource, request);
    if let Some(limit) = limit {
        let _ = writeln!(text, "            limits:");
        let _ = writeln!(text, "              {}: \"{}\"", resource, limit);
    }
}

/// Manifest or Terraform content that applies one diff
pub fn render_change(diff: &ResourceDiff) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "# finops {}: {}", diff.opportunity_id, diff.workload_id);
    match &diff.after {
        ResourceSpec::ContainerCpu { cpu_request, cpu_limit } => {
            let limit = cpu_limit.map(millicores);
            container_resources(&mut text, &diff.workload_id, "cpu", &millicores(*cpu_request), limit.as_deref());
        }
        ResourceSpec::ContainerMemory {
            mem_request_gb,
            mem_limit_gb,
        } => {
            let limit = mem_limit_gb.map(mebibytes);
            container_resources(&mut text, &diff.workload_id, "memory", &mebibytes(*mem_request_gb), limit.as_deref());
        }
        ResourceSpec::Autoscaler {
            target,
            min_replicas,
            max_replicas,
        } => {
            let _ = writeln!(text, "apiVersion: autoscaling/v2");
            let _ = writeln!(text, "kind: HorizontalPodAutoscaler");
            let _ = writeln!(text, "metadata:");
            let _ = writeln!(text, "  name: {}", target);
            let _ = writeln!(text, "spec:");
            let _ = writeln!(text, "  scaleTargetRef:");
            let _ = writeln!(text, "    apiVersion: apps/v1");
            let _ = writeln!(text, "    kind: Deployment");
            let _ = writeln!(text, "    name: {}", target);
            let _ = writeln!(text, "  minReplicas: {}", min_replicas);
            let _ = writeln!(text, "  maxReplicas: {}", max_replicas);
        }
        ResourceSpec::NodePool {
            cluster,
            instance_class,
            node_count,
        } => {
            if let ResourceSpec::NodePool { node_count: before, .. } = &diff.before {
                let _ = writeln!(text, "# node_count {} -> {}", before, node_count);
            }
            let _ = writeln!(
                text,
                "resource \"aws_eks_node_group\" \"{}\" {{",
                tf_ident(&format!("{}_{}", cluster, instance_class))
            );
            let _ = writeln!(text, "  cluster_name   = \"{}\"", cluster);
            let _ = writeln!(text, "  instance_types = [\"{}\"]", instance_class);
            let _ = writeln!(text);
            let _ = writeln!(text, "  scaling_config {{");
            let _ = writeln!(text, "    desired_size = {}", node_count);
            let _ = writeln!(text, "  }}");
            let _ = writeln!(text, "}}");
        }
        ResourceSpec::Node {
            node_id,
            instance_class,
            present,
        } => {
            let address = format!("aws_instance.{}", tf_ident(node_id));
            if *present {
                let _ = writeln!(text, "resource \"aws_instance\" \"{}\" {{", tf_ident(node_id));
                let _ = writeln!(text, "  instance_type = \"{}\"", instance_class);
                let _ = writeln!(text, "}}");
            } else {
                removed_block(&mut text, &address);
            }
        }
        ResourceSpec::Volume {
            volume_id,
            size_gb,
            present,
        } => {
            let address = format!("aws_ebs_volume.{}", tf_ident(volume_id));
            if *present {
                let _ = writeln!(text, "resource \"aws_ebs_volume\" \"{}\" {{", tf_ident(volume_id));
                let _ = writeln!(text, "  size = {}", size_gb.ceil() as u64);
                let _ = writeln!(text, "}}");
            } else {
                removed_block(&mut text, &address);
            }
        }
    }
    text
}

impl ChangeProposal {
    /// Rendered file contents keyed by repository path
    ///
    /// Diffs landing in the same manifest become separate YAML documents;
    /// Terraform blocks for the same file are concatenated.
    pub fn files(&self) -> BTreeMap<String, String> {
        let separator = match self.target_system {
            TargetSystem::Manifest => "---\n",
            TargetSystem::InfraConfig => "\n",
        };
        let mut files: BTreeMap<String, String> = BTreeMap::new();
        for diff in &self.diff {
            let rendered = render_change(diff);
            files
                .entry(diff.path.clone())
                .and_modify(|existing| {
                    existing.push_str(separator);
                    existing.push_str(&rendered);
                })
                .or_insert(rendered);
        }
        files
    }
}

fn content_hash(content: &HashedContent<'_>) -> Result<String, ProposalError> {
    let bytes = serde_json::to_vec(content).map_err(|e| ProposalError::Encoding(e.to_string()))?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Builds proposals and records them in the ledger
pub struct ProposalGenerator {
    blast_radius: MaxBlastRadius,
}

impl ProposalGenerator {
    pub fn new(max_blast_radius: usize) -> Self {
        Self {
            blast_radius: MaxBlastRadius {
                limit: max_blast_radius,
                priority: 0,
            },
        }
    }

    /// Build a proposal from opportunities without touching the ledger
    pub fn build(&self, opportunities: &[Opportunity], at: DateTime<Utc>) -> Result<ChangeProposal, ProposalError> {
        if opportunities.is_empty() {
            return Err(ProposalError::EmptyBatch);
        }

        let mut sorted: Vec<&Opportunity> = opportunities.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));
        sorted.dedup_by(|a, b| a.id == b.id);

        let target_system = sorted[0].target_system;
        if sorted.iter().any(|o| o.target_system != target_system) {
            return Err(ProposalError::MixedTargetSystems);
        }

        let workloads = sorted
            .iter()
            .map(|o| o.workload_id.as_str())
            .collect::<BTreeSet<_>>()
            .len();
        if self.blast_radius.exceeded_by(workloads) {
            return Err(ProposalError::BlastRadiusExceeded {
                workloads,
                limit: self.blast_radius.limit,
            });
        }

        let opportunity_ids: Vec<String> = sorted.iter().map(|o| o.id.clone()).collect();
        let diff: Vec<ResourceDiff> = sorted
            .iter()
            .map(|o| ResourceDiff {
                opportunity_id: o.id.clone(),
                workload_id: o.workload_id.clone(),
                path: target_path(o),
                before: o.before_state.clone(),
                after: o.after_state.clone(),
            })
            .collect();
        let owned: Vec<Opportunity> = sorted.into_iter().cloned().collect();
        let rationale = rationale(&owned)?;

        let hash = content_hash(&HashedContent {
            opportunity_ids: &opportunity_ids,
            diff: &diff,
            rationale: &rationale,
            target_system,
        })?;

        Ok(ChangeProposal {
            id: format!("cp-{}", &hash[..16]),
            opportunity_ids,
            diff,
            rationale,
            target_system,
            content_hash: hash,
            created_at: at,
            review_ref: None,
        })
    }

    /// Generate a proposal for approved opportunities and record it
    ///
    /// Returns `Existing` with the stored proposal when an identical one
    /// was generated before; members are only moved on first creation.
    pub async fn generate(
        &self,
        ledger: &Ledger,
        opportunity_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<ProposalOutcome, ProposalError> {
        let mut opportunities = Vec::with_capacity(opportunity_ids.len());
        for id in opportunity_ids.iter().collect::<BTreeSet<_>>() {
            let opportunity = ledger
                .get(id)
                .await
                .ok_or_else(|| crate::error::LedgerError::NotFound(id.clone()))?;
            opportunities.push(opportunity);
        }

        let proposal = self.build(&opportunities, at)?;
        if let Some(existing) = ledger.proposal_by_hash(&proposal.content_hash).await {
            return Ok(ProposalOutcome::Existing(existing));
        }

        if let Some(o) = opportunities
            .iter()
            .find(|o| o.status != OpportunityStatus::Approved)
        {
            return Err(ProposalError::NotApproved {
                id: o.id.clone(),
                status: o.status,
            });
        }

        let expected: Vec<(String, u64)> = opportunities.iter().map(|o| (o.id.clone(), o.version)).collect();
        Ok(ledger.record_proposal(proposal, &expected, at).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{approved_in, opportunity_with, ts};

    fn approved(id: &str) -> Opportunity {
        opportunity_with(id, OpportunityStatus::Approved, 100.0, None)
    }

    #[test]
    fn test_hash_independent_of_order_and_time() {
        let generator = ProposalGenerator::new(5);
        let a = generator.build(&[approved("a"), approved("b")], ts(2026, 10, 19)).unwrap();
        let b = generator.build(&[approved("b"), approved("a")], ts(2026, 10, 20)).unwrap();
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(a.id, b.id);
        assert!(a.id.starts_with("cp-"));
    }

    #[test]
    fn test_rationale_cites_evidence() {
        let generator = ProposalGenerator::new(5);
        let proposal = generator.build(&[approved("a")], ts(2026, 10, 19)).unwrap();
        assert!(proposal.rationale.contains("rightsizing.v1"));
        assert!(proposal.rationale.contains("\"usage_p95\": 0.4"));
        assert!(proposal.rationale.contains("Recommendation: Reduce CPU request"));
        assert_eq!(proposal.diff[0].path, "k8s/shop/a.yaml");
    }

    #[test]
    fn test_rationale_carries_risk_analysis() {
        let mut a = approved("a");
        a.risk_score = 0.45;
        a.dependency_fanout = 5;
        let mut b = approved("b");
        b.risk_score = 0.1;
        b.confidence = 0.6;
        let proposal = ProposalGenerator::new(5).build(&[a, b], ts(2026, 10, 19)).unwrap();

        let text = &proposal.rationale;
        assert!(text.contains("## Risk analysis"));
        assert!(text.contains("Blast radius: 2 workload(s) across 1 namespace(s), medium risk"));
        assert!(text.contains("Dependency risk: medium (up to 5 downstream dependents)"));
        assert!(text.contains("Latency impact: none expected, requests stay above observed p95 usage"));
        assert!(text.contains("SLO impact: medium violation risk, availability impact minimal"));
        assert!(text.contains("Overall confidence: 60%"));
    }

    #[test]
    fn test_risk_bands() {
        assert_eq!(risk_band(0.0), "low");
        assert_eq!(risk_band(0.3), "medium");
        assert_eq!(risk_band(0.59), "medium");
        assert_eq!(risk_band(0.6), "high");
    }

    #[test]
    fn test_manifest_files_render_resource_patches() {
        let mut memory = approved("a");
        memory.id = "a-mem".to_string();
        memory.after_state = ResourceSpec::ContainerMemory {
            mem_request_gb: 1.5,
            mem_limit_gb: Some(2.0),
        };
        let proposal = ProposalGenerator::new(5)
            .build(&[approved("a"), memory], ts(2026, 10, 19))
            .unwrap();

        let files = proposal.files();
        assert_eq!(files.len(), 1);
        let manifest = &files["k8s/shop/a.yaml"];
        assert!(manifest.contains("kind: Deployment"));
        assert!(manifest.contains("cpu: \"600m\""));
        assert!(manifest.contains("memory: \"1536Mi\""));
        assert!(manifest.contains("limits:\n              memory: \"2048Mi\""));
        assert_eq!(manifest.matches("---\n").count(), 1);
    }

    #[test]
    fn test_infra_changes_render_terraform() {
        let pool = ResourceDiff {
            opportunity_id: "opp-pool".to_string(),
            workload_id: "pool".to_string(),
            path: "infrastructure/prod-eu/node-pools/m5.large.tf".to_string(),
            before: ResourceSpec::NodePool {
                cluster: "prod-eu".to_string(),
                instance_class: "m5.large".to_string(),
                node_count: 6,
            },
            after: ResourceSpec::NodePool {
                cluster: "prod-eu".to_string(),
                instance_class: "m5.large".to_string(),
                node_count: 4,
            },
        };
        let rendered = render_change(&pool);
        assert!(rendered.contains("# node_count 6 -> 4"));
        assert!(rendered.contains("resource \"aws_eks_node_group\" \"prod_eu_m5_large\""));
        assert!(rendered.contains("desired_size = 4"));

        let volume = ResourceDiff {
            opportunity_id: "opp-vol".to_string(),
            workload_id: "vol-0a1".to_string(),
            path: "infrastructure/prod-eu/volumes/vol-0a1.tf".to_string(),
            before: ResourceSpec::Volume {
                volume_id: "vol-0a1".to_string(),
                size_gb: 100.0,
                present: true,
            },
            after: ResourceSpec::Volume {
                volume_id: "vol-0a1".to_string(),
                size_gb: 100.0,
                present: false,
            },
        };
        let rendered = render_change(&volume);
        assert!(rendered.contains("removed {"));
        assert!(rendered.contains("from = aws_ebs_volume.vol_0a1"));
        assert!(rendered.contains("destroy = true"));
    }

    #[test]
    fn test_rejects_mixed_target_systems() {
        let generator = ProposalGenerator::new(5);
        let mut infra = approved("b");
        infra.target_system = TargetSystem::InfraConfig;
        let err = generator.build(&[approved("a"), infra], ts(2026, 10, 19)).unwrap_err();
        assert_eq!(err, ProposalError::MixedTargetSystems);
    }

    #[test]
    fn test_rejects_blast_radius() {
        let generator = ProposalGenerator::new(2);
        let batch = vec![approved("a"), approved("b"), approved("c")];
        let err = generator.build(&batch, ts(2026, 10, 19)).unwrap_err();
        assert_eq!(err, ProposalError::BlastRadiusExceeded { workloads: 3, limit: 2 });
    }

    #[test]
    fn test_rejects_empty_batch() {
        let generator = ProposalGenerator::new(5);
        assert_eq!(generator.build(&[], ts(2026, 10, 19)).unwrap_err(), ProposalError::EmptyBatch);
    }

    #[tokio::test]
    async fn test_generate_is_idempotent() {
        let ledger = Ledger::in_memory();
        approved_in(&ledger, "a", 100.0).await;
        approved_in(&ledger, "b", 100.0).await;
        let generator = ProposalGenerator::new(5);
        let ids = vec!["a".to_string(), "b".to_string()];

        let first = generator.generate(&ledger, &ids, ts(2026, 10, 19)).await.unwrap();
        assert!(first.is_new());
        let second = generator.generate(&ledger, &ids, ts(2026, 10, 20)).await.unwrap();
        assert!(!second.is_new());
        assert_eq!(first.proposal().id, second.proposal().id);
        assert_eq!(ledger.proposals().await.len(), 1);

        let member = ledger.get("a").await.unwrap();
        assert_eq!(member.status, OpportunityStatus::ProposalCreated);
        assert_eq!(member.proposal_ref.as_deref(), Some(first.proposal().id.as_str()));
    }

    #[tokio::test]
    async fn test_generate_requires_approved() {
        let ledger = Ledger::in_memory();
        ledger
            .insert(opportunity_with("a", OpportunityStatus::Detected, 10.0, None))
            .await
            .unwrap();
        let generator = ProposalGenerator::new(5);
        let err = generator
            .generate(&ledger, &["a".to_string()], ts(2026, 10, 19))
            .await
            .unwrap_err();
        assert!(matches!(err, ProposalError::NotApproved { .. }));
    }
}
