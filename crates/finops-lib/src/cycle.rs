//! Periodic detection cycle driver

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::engine::{CycleReport, FinopsEngine};
use crate::error::EngineError;
use crate::external::{with_retry, BaselineSource, SnapshotProvider};
use crate::health::components;
use crate::models::CostBaseline;

/// Fetches inputs and runs the engine on a fixed interval
pub struct DetectionCycle {
    engine: Arc<FinopsEngine>,
    snapshots: Arc<dyn SnapshotProvider>,
    baselines: Arc<dyn BaselineSource>,
    interval: Duration,
}

impl DetectionCycle {
    pub fn new(
        engine: Arc<FinopsEngine>,
        snapshots: Arc<dyn SnapshotProvider>,
        baselines: Arc<dyn BaselineSource>,
        interval: Duration,
    ) -> Self {
        Self {
            engine,
            snapshots,
            baselines,
            interval,
        }
    }

    pub fn engine(&self) -> &Arc<FinopsEngine> {
        &self.engine
    }

    /// Fetch a snapshot and baselines, then run one cycle
    ///
    /// A snapshot that cannot be fetched skips the cycle. Baselines that
    /// cannot be fetched only degrade it: detection still runs against the
    /// baselines already in the ledger.
    pub async fn run_once(&self) -> Result<CycleReport, EngineError> {
        let retry = self.engine.retry_policy().clone();
        let health = self.engine.health();

        let snapshot = with_retry(&retry, "fetch_snapshot", || self.snapshots.fetch()).await;
        health.record(components::SNAPSHOT_PROVIDER, &snapshot).await;
        let snapshot = match snapshot {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.engine.logger().log_cycle_skipped(&e.to_string());
                return Err(e.into());
            }
        };

        let baselines = with_retry(&retry, "fetch_baselines", || self.baselines.fetch()).await;
        health.record(components::BASELINE_SOURCE, &baselines).await;
        let (baselines, warning) = match baselines {
            Ok(baselines) => (baselines, None),
            Err(e) => {
                self.engine
                    .logger()
                    .log_external_failure("fetch_baselines", &e.to_string());
                (Vec::<CostBaseline>::new(), Some(e.to_string()))
            }
        };

        let mut report = self.engine.run_cycle(snapshot, baselines, Utc::now()).await?;
        report.warnings.extend(warning);
        Ok(report)
    }

    /// Run cycles until shutdown is signalled
    ///
    /// A cycle in flight when shutdown arrives is allowed to finish, so the
    /// ledger is never left mid-write.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            source = %self.snapshots.describe(),
            interval_secs = self.interval.as_secs(),
            "Detection cycle started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(report) => debug!(
                            snapshot_id = %report.snapshot_id,
                            new = report.new_opportunities.len(),
                            "Cycle finished"
                        ),
                        Err(e) => debug!(error = %e, "Cycle did not complete"),
                    }
                }
                _ = shutdown.recv() => {
                    info!("Detection cycle stopping");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineSettings;
    use crate::external::{async_trait, LogApprovalChannel, ProposalSink, RetryPolicy, StaticSnapshotProvider};
    use crate::health::ComponentStatus;
    use crate::ledger::Ledger;
    use crate::proposal::ChangeProposal;
    use crate::testing::{snapshot, workload};

    struct NoSink;

    #[async_trait]
    impl ProposalSink for NoSink {
        async fn submit(&self, proposal: &ChangeProposal) -> anyhow::Result<String> {
            Ok(proposal.id.clone())
        }

        fn name(&self) -> &'static str {
            "none"
        }
    }

    struct BrokenBaselines;

    #[async_trait]
    impl BaselineSource for BrokenBaselines {
        async fn fetch(&self) -> anyhow::Result<Vec<CostBaseline>> {
            anyhow::bail!("billing export unavailable")
        }
    }

    async fn cycle_with(
        snapshots: Arc<dyn SnapshotProvider>,
        baselines: Arc<dyn BaselineSource>,
    ) -> Arc<DetectionCycle> {
        let settings = EngineSettings {
            retry: RetryPolicy {
                max_attempts: 1,
                initial_backoff: Duration::from_millis(1),
                ..RetryPolicy::default()
            },
            ..EngineSettings::default()
        };
        let engine = FinopsEngine::new(
            settings,
            Arc::new(Ledger::in_memory()),
            Arc::new(LogApprovalChannel),
            Arc::new(NoSink),
        )
        .await
        .unwrap();
        Arc::new(DetectionCycle::new(
            Arc::new(engine),
            snapshots,
            baselines,
            Duration::from_millis(20),
        ))
    }

    #[tokio::test]
    async fn test_missing_snapshot_skips_cycle() {
        let cycle = cycle_with(Arc::new(StaticSnapshotProvider::default()), Arc::new(BrokenBaselines)).await;

        let err = cycle.run_once().await.unwrap_err();
        assert!(matches!(err, EngineError::External(_)));

        let health = cycle.engine().health().health().await;
        assert_eq!(
            health.components[components::SNAPSHOT_PROVIDER].status,
            ComponentStatus::Degraded
        );
        assert_eq!(cycle.engine().ledger().count().await, 0);
    }

    #[tokio::test]
    async fn test_baseline_failure_degrades_but_runs() {
        let mut snap = snapshot();
        snap.workloads.push(workload("checkout", 2.0, 0.4, 4.0, 3.5));
        let cycle = cycle_with(Arc::new(StaticSnapshotProvider::new(Some(snap))), Arc::new(BrokenBaselines)).await;

        let report = cycle.run_once().await.unwrap();
        assert_eq!(report.new_opportunities.len(), 1);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("fetch_baselines"));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let mut snap = snapshot();
        snap.workloads.push(workload("checkout", 2.0, 0.4, 4.0, 3.5));
        let cycle = cycle_with(Arc::new(StaticSnapshotProvider::new(Some(snap))), Arc::new(BrokenBaselines)).await;

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(Arc::clone(&cycle).run(rx));
        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cycle.engine().ledger().count().await, 1);
    }
}
