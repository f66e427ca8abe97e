//! Unattached volume detection

use tracing::debug;

use super::{infrastructure_attribution, DetectionInput, DetectorConfig, WasteDetector};
use crate::error::DetectorFailure;
use crate::models::{
    Evidence, OpportunityCandidate, OpportunityType, OrphanVolumeEvidence, ResourceSpec, TargetSystem,
};
use crate::scoring::{apply_baseline_penalty, orphan_age_confidence};

/// Flags volumes that stayed unattached past the minimum age
pub struct OrphanVolumeDetector {
    config: DetectorConfig,
}

impl OrphanVolumeDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }
}

impl WasteDetector for OrphanVolumeDetector {
    fn name(&self) -> &'static str {
        "orphan_volume"
    }

    fn detect(&self, input: &DetectionInput) -> Result<Vec<OpportunityCandidate>, DetectorFailure> {
        let min_age = self.config.min_orphan_age_days;
        let observed_at = input.observed_at();
        let mut candidates = Vec::new();

        for volume in &input.snapshot.volumes {
            if !volume.is_well_formed() {
                debug!(volume = %volume.id, "Skipping malformed volume record");
                continue;
            }
            if volume.attached || volume.age_days <= min_age {
                continue;
            }

            let baseline = input.baselines.lookup(&volume.id, observed_at);
            let reference = baseline.map(|b| b.reference(None));
            let savings = reference.as_ref().map(|b| b.monthly_cost).unwrap_or(0.0);
            let confidence =
                apply_baseline_penalty(orphan_age_confidence(volume.age_days, min_age), reference.is_some());

            candidates.push(OpportunityCandidate {
                opportunity_type: OpportunityType::OrphanVolume,
                workload_id: volume.id.clone(),
                attribution: infrastructure_attribution(&volume.cluster, &volume.id, &self.config, baseline),
                tags: Vec::new(),
                estimated_monthly_savings: savings,
                confidence,
                evidence: Evidence::OrphanVolume(OrphanVolumeEvidence {
                    volume_id: volume.id.clone(),
                    size_gb: volume.size_gb,
                    age_days: volume.age_days,
                    min_age_days: min_age,
                    snapshot_id: input.snapshot.snapshot_id.clone(),
                    baseline: reference,
                }),
                before_state: ResourceSpec::Volume {
                    volume_id: volume.id.clone(),
                    size_gb: volume.size_gb,
                    present: true,
                },
                after_state: ResourceSpec::Volume {
                    volume_id: volume.id.clone(),
                    size_gb: volume.size_gb,
                    present: false,
                },
                recommendation: format!(
                    "Delete unattached volume {} ({:.0} GiB, unattached for {} days)",
                    volume.id, volume.size_gb, volume.age_days
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::BaselineIndex;
    use crate::models::DetectionPeriod;
    use crate::scoring::ORPHAN_CONFIDENCE_CEILING;
    use crate::testing::{baseline, snapshot, volume};

    #[test]
    fn test_only_old_unattached_volumes() {
        let mut snap = snapshot();
        snap.volumes = vec![
            volume("pv-attached", true, 100.0, 90),
            volume("pv-fresh", false, 100.0, 3),
            volume("pv-edge", false, 100.0, 7),
            volume("pv-old", false, 250.0, 400),
        ];
        let input = DetectionInput {
            snapshot: snap,
            baselines: BaselineIndex::new(vec![baseline("pv-old", 25.0)]),
            period: DetectionPeriod("2026-10-19".to_string()),
        };

        let candidates = OrphanVolumeDetector::new(DetectorConfig::default()).detect(&input).unwrap();

        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.workload_id, "pv-old");
        assert_eq!(c.estimated_monthly_savings, 25.0);
        assert_eq!(c.confidence, ORPHAN_CONFIDENCE_CEILING);
        assert_eq!(c.attribution.team, "payments");
    }
}
