//! Savings aggregation and cost allocation over ledger records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::models::{CostBaseline, Opportunity, OpportunityStatus};

/// Half-open time window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

/// Filter for aggregate queries; `None` fields match everything
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateQuery {
    #[serde(default)]
    pub statuses: Option<BTreeSet<OpportunityStatus>>,
    /// Matched against `detected_at`
    #[serde(default)]
    pub window: Option<TimeWindow>,
}

impl AggregateQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = OpportunityStatus>) -> Self {
        self.statuses = Some(statuses.into_iter().collect());
        self
    }

    pub fn within(mut self, window: TimeWindow) -> Self {
        self.window = Some(window);
        self
    }

    fn in_window(&self, opportunity: &Opportunity) -> bool {
        self.window
            .map(|w| w.contains(opportunity.detected_at))
            .unwrap_or(true)
    }

    pub fn matches(&self, opportunity: &Opportunity) -> bool {
        let status_ok = self
            .statuses
            .as_ref()
            .map(|s| s.contains(&opportunity.status))
            .unwrap_or(true);
        status_ok && self.in_window(opportunity)
    }
}

/// Savings totals for one grouping key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SavingsBucket {
    pub count: usize,
    pub estimated_monthly_savings: f64,
    pub realized_savings: f64,
}

impl SavingsBucket {
    fn add(&mut self, opportunity: &Opportunity) {
        self.count += 1;
        self.estimated_monthly_savings += opportunity.estimated_monthly_savings;
        self.realized_savings += opportunity.realized_savings.unwrap_or(0.0);
    }
}

/// Savings aggregated by team, type and cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SavingsAggregate {
    pub opportunity_count: usize,
    pub total_estimated_monthly_savings: f64,
    pub total_realized_savings: f64,
    /// Realized over estimated for Verified and Realized opportunities in
    /// the window; absent when nothing has been verified
    pub realization_rate: Option<f64>,
    pub by_team: BTreeMap<String, SavingsBucket>,
    pub by_type: BTreeMap<String, SavingsBucket>,
    pub by_cluster: BTreeMap<String, SavingsBucket>,
    pub by_status: BTreeMap<String, usize>,
}

/// Fold opportunities into a savings aggregate
pub fn aggregate<'a>(
    opportunities: impl IntoIterator<Item = &'a Opportunity>,
    query: &AggregateQuery,
) -> SavingsAggregate {
    let mut result = SavingsAggregate::default();
    let mut verified_estimate = 0.0;
    let mut verified_realized = 0.0;
    let mut verified_count = 0usize;

    for opportunity in opportunities {
        if query.in_window(opportunity) && opportunity.status.is_verified_or_later() {
            verified_count += 1;
            verified_estimate += opportunity.estimated_monthly_savings;
            verified_realized += opportunity.realized_savings.unwrap_or(0.0);
        }

        if !query.matches(opportunity) {
            continue;
        }

        result.opportunity_count += 1;
        result.total_estimated_monthly_savings += opportunity.estimated_monthly_savings;
        result.total_realized_savings += opportunity.realized_savings.unwrap_or(0.0);
        result
            .by_team
            .entry(opportunity.attribution.team.clone())
            .or_default()
            .add(opportunity);
        result
            .by_type
            .entry(opportunity.opportunity_type.to_string())
            .or_default()
            .add(opportunity);
        result
            .by_cluster
            .entry(opportunity.attribution.cluster.clone())
            .or_default()
            .add(opportunity);
        *result
            .by_status
            .entry(opportunity.status.to_string())
            .or_default() += 1;
    }

    result.realization_rate = if verified_count == 0 || verified_estimate <= 0.0 {
        None
    } else {
        Some(verified_realized / verified_estimate)
    };
    result
}

/// Cost attributed to one team/cluster/namespace for one billing period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostAllocation {
    pub team: String,
    pub cluster: String,
    pub namespace: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub monthly_cost: f64,
    pub workloads: usize,
}

/// Roll baselines up into per-team allocation rows
pub fn allocate_costs(baselines: &[CostBaseline]) -> Vec<CostAllocation> {
    let mut rows: BTreeMap<(String, String, String, DateTime<Utc>, DateTime<Utc>), (f64, usize)> =
        BTreeMap::new();
    for baseline in baselines {
        let key = (
            baseline.team.clone(),
            baseline.cluster.clone(),
            baseline.namespace.clone(),
            baseline.period_start,
            baseline.period_end,
        );
        let entry = rows.entry(key).or_insert((0.0, 0));
        entry.0 += baseline.monthly_cost;
        entry.1 += 1;
    }
    rows.into_iter()
        .map(
            |((team, cluster, namespace, period_start, period_end), (monthly_cost, workloads))| {
                CostAllocation {
                    team,
                    cluster,
                    namespace,
                    period_start,
                    period_end,
                    monthly_cost,
                    workloads,
                }
            },
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{opportunity_with, ts};

    #[test]
    fn test_realization_rate_absent_without_verified() {
        let opps = vec![opportunity_with("a", OpportunityStatus::Detected, 100.0, None)];
        let agg = aggregate(&opps, &AggregateQuery::all());
        assert_eq!(agg.opportunity_count, 1);
        assert_eq!(agg.realization_rate, None);
    }

    #[test]
    fn test_realization_rate_over_verified() {
        let opps = vec![
            opportunity_with("a", OpportunityStatus::Verified, 100.0, Some(80.0)),
            opportunity_with("b", OpportunityStatus::Realized, 100.0, Some(100.0)),
            opportunity_with("c", OpportunityStatus::Approved, 400.0, None),
        ];
        let agg = aggregate(&opps, &AggregateQuery::all());
        assert_eq!(agg.realization_rate, Some(0.9));
        assert_eq!(agg.total_estimated_monthly_savings, 600.0);
        assert_eq!(agg.by_status.get("verified"), Some(&1));
    }

    #[test]
    fn test_status_and_window_filters() {
        let mut old = opportunity_with("old", OpportunityStatus::Approved, 50.0, None);
        old.detected_at = ts(2026, 9, 1);
        let opps = vec![
            old,
            opportunity_with("new", OpportunityStatus::Approved, 70.0, None),
            opportunity_with("denied", OpportunityStatus::Denied, 90.0, None),
        ];
        let query = AggregateQuery::all()
            .with_statuses([OpportunityStatus::Approved])
            .within(TimeWindow::new(ts(2026, 10, 1), ts(2026, 11, 1)));
        let agg = aggregate(&opps, &query);
        assert_eq!(agg.opportunity_count, 1);
        assert_eq!(agg.total_estimated_monthly_savings, 70.0);
    }

    #[test]
    fn test_allocate_costs_groups_by_team() {
        let baselines = vec![
            crate::testing::baseline("api", 120.0),
            crate::testing::baseline("worker", 80.0),
        ];
        let rows = allocate_costs(&baselines);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].monthly_cost, 200.0);
        assert_eq!(rows[0].workloads, 2);
    }
}
