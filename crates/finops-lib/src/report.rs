//! Savings reports over a time window

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::error::LedgerError;
use crate::ledger::{aggregate, AggregateQuery, Ledger, SavingsAggregate, TimeWindow};
use crate::models::{Opportunity, OpportunityStatus, OpportunityType};

/// Confidence at or above which a finding counts as high-confidence
const HIGH_CONFIDENCE: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Weekly,
    Monthly,
    Custom,
}

/// Reporting window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReportPeriod {
    pub kind: ReportKind,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ReportPeriod {
    /// The seven days ending at `now`
    pub fn weekly(now: DateTime<Utc>) -> Self {
        Self {
            kind: ReportKind::Weekly,
            start: now - Duration::days(7),
            end: now,
        }
    }

    /// From the first of the current month up to `now`
    pub fn month_to_date(now: DateTime<Utc>) -> Self {
        let start = Utc
            .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
            .single()
            .unwrap_or(now);
        Self {
            kind: ReportKind::Monthly,
            start,
            end: now,
        }
    }

    pub fn since(start: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            kind: ReportKind::Custom,
            start,
            end: now,
        }
    }

    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.start, self.end)
    }
}

/// One row of the ranked opportunity list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedOpportunity {
    pub rank: usize,
    pub id: String,
    #[serde(rename = "type")]
    pub opportunity_type: OpportunityType,
    pub status: OpportunityStatus,
    pub workload: String,
    pub namespace: String,
    pub cluster: String,
    pub team: String,
    pub estimated_monthly_savings: f64,
    pub confidence: f64,
    pub detected_at: DateTime<Utc>,
}

/// Persisted summary of one report run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub id: String,
    pub period: ReportPeriod,
    pub generated_at: DateTime<Utc>,
    pub savings: SavingsAggregate,
    pub high_confidence_count: usize,
    pub top_opportunities: Vec<RankedOpportunity>,
    pub recommendations: Vec<String>,
}

/// Savings desc, then confidence desc, then oldest first
pub fn rank_order(a: &Opportunity, b: &Opportunity) -> Ordering {
    b.estimated_monthly_savings
        .total_cmp(&a.estimated_monthly_savings)
        .then_with(|| b.confidence.total_cmp(&a.confidence))
        .then_with(|| a.detected_at.cmp(&b.detected_at))
        .then_with(|| a.id.cmp(&b.id))
}

fn focus_line(kind: OpportunityType, count: usize, savings: f64) -> String {
    let focus = match kind {
        OpportunityType::CpuRightsizing => "Right-size CPU requests",
        OpportunityType::MemoryRightsizing => "Right-size memory requests",
        OpportunityType::IdleNode => "Drain and remove idle nodes",
        OpportunityType::OrphanVolume => "Delete unattached volumes",
        OpportunityType::AutoscalingMisconfig => "Lower autoscaler minimum replicas",
        OpportunityType::NodeConsolidation => "Consolidate under-packed node pools",
    };
    format!("{}: {} opportunities, ${:.2}/month", focus, count, savings)
}

pub struct ReportAggregator {
    top_n: usize,
}

impl Default for ReportAggregator {
    fn default() -> Self {
        Self::new(10)
    }
}

impl ReportAggregator {
    pub fn new(top_n: usize) -> Self {
        Self { top_n }
    }

    /// Build a report from opportunities detected within the period
    pub fn build(&self, opportunities: &[Opportunity], period: ReportPeriod, now: DateTime<Utc>) -> ReportSummary {
        let window = period.window();
        let query = AggregateQuery::all().within(window);
        let savings = aggregate(opportunities, &query);

        let mut in_window: Vec<&Opportunity> = opportunities
            .iter()
            .filter(|o| window.contains(o.detected_at))
            .collect();
        in_window.sort_by(|a, b| rank_order(a, b));

        let top_opportunities = in_window
            .iter()
            .take(self.top_n)
            .enumerate()
            .map(|(i, o)| RankedOpportunity {
                rank: i + 1,
                id: o.id.clone(),
                opportunity_type: o.opportunity_type,
                status: o.status,
                workload: o.attribution.workload.clone(),
                namespace: o.attribution.namespace.clone(),
                cluster: o.attribution.cluster.clone(),
                team: o.attribution.team.clone(),
                estimated_monthly_savings: o.estimated_monthly_savings,
                confidence: o.confidence,
                detected_at: o.detected_at,
            })
            .collect();

        let high_confidence_count = in_window
            .iter()
            .filter(|o| o.confidence >= HIGH_CONFIDENCE)
            .count();

        let mut per_type: BTreeMap<OpportunityType, (usize, f64)> = BTreeMap::new();
        for o in &in_window {
            let entry = per_type.entry(o.opportunity_type).or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += o.estimated_monthly_savings;
        }
        let mut ranked_types: Vec<_> = per_type.into_iter().collect();
        ranked_types.sort_by(|a, b| (b.1).1.total_cmp(&(a.1).1).then_with(|| a.0.cmp(&b.0)));

        let mut recommendations: Vec<String> = ranked_types
            .into_iter()
            .map(|(kind, (count, total))| focus_line(kind, count, total))
            .collect();
        if high_confidence_count > 0 {
            recommendations.push(format!(
                "{} high-confidence opportunities (>= {:.0}%) are ready for review",
                high_confidence_count,
                HIGH_CONFIDENCE * 100.0
            ));
        }

        ReportSummary {
            id: format!("report-{}", now.format("%Y%m%dT%H%M%S%3f")),
            period,
            generated_at: now,
            savings,
            high_confidence_count,
            top_opportunities,
            recommendations,
        }
    }

    /// Build a report from the ledger and persist it
    pub async fn generate_report(
        &self,
        ledger: &Ledger,
        period: ReportPeriod,
        now: DateTime<Utc>,
    ) -> Result<ReportSummary, LedgerError> {
        let opportunities = ledger.list(&Default::default()).await;
        let report = self.build(&opportunities, period, now);
        ledger.save_report(report).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{opportunity_with, ts};

    #[test]
    fn test_ranking_tie_breaks() {
        let mut a = opportunity_with("a", OpportunityStatus::Detected, 100.0, None);
        let mut b = opportunity_with("b", OpportunityStatus::Detected, 100.0, None);
        let c = opportunity_with("c", OpportunityStatus::Detected, 300.0, None);
        a.confidence = 0.9;
        b.confidence = 0.9;
        b.detected_at = ts(2026, 10, 18);

        let report = ReportAggregator::new(10).build(
            &[a, b, c],
            ReportPeriod::since(ts(2026, 10, 1), ts(2026, 10, 20)),
            ts(2026, 10, 20),
        );
        let order: Vec<_> = report.top_opportunities.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(order, vec!["c", "b", "a"]);
        assert_eq!(report.top_opportunities[0].rank, 1);
    }

    #[test]
    fn test_empty_window_has_no_realization_rate() {
        let report = ReportAggregator::default().build(&[], ReportPeriod::weekly(ts(2026, 10, 19)), ts(2026, 10, 19));
        assert_eq!(report.savings.realization_rate, None);
        assert!(report.top_opportunities.is_empty());
        assert!(report.recommendations.is_empty());
    }

    #[test]
    fn test_top_n_and_recommendations() {
        let opps: Vec<_> = (0..5)
            .map(|i| opportunity_with(&format!("o{}", i), OpportunityStatus::Detected, 10.0 * i as f64, None))
            .collect();
        let report = ReportAggregator::new(3).build(
            &opps,
            ReportPeriod::month_to_date(ts(2026, 10, 25)),
            ts(2026, 10, 25),
        );
        assert_eq!(report.top_opportunities.len(), 3);
        assert_eq!(report.high_confidence_count, 5);
        assert!(report.recommendations[0].starts_with("Right-size CPU requests: 5 opportunities"));
    }

    #[test]
    fn test_month_to_date_starts_on_first() {
        let period = ReportPeriod::month_to_date(ts(2026, 10, 19));
        assert_eq!(period.start, ts(2026, 10, 1));
        assert_eq!(period.kind, ReportKind::Monthly);
    }

    #[tokio::test]
    async fn test_reports_in_the_same_instant_keep_distinct_ids() {
        let ledger = Ledger::in_memory();
        let aggregator = ReportAggregator::default();
        let now = ts(2026, 10, 19) + chrono::Duration::milliseconds(250);
        let period = ReportPeriod::weekly(now);

        let first = aggregator.generate_report(&ledger, period, now).await.unwrap();
        let second = aggregator.generate_report(&ledger, period, now).await.unwrap();
        let third = aggregator.generate_report(&ledger, period, now).await.unwrap();

        assert_eq!(first.id, "report-20261019T000000250");
        assert_eq!(second.id, "report-20261019T000000250-2");
        assert_eq!(third.id, "report-20261019T000000250-3");
        let stored: Vec<_> = ledger.reports().await.into_iter().map(|r| r.id).collect();
        assert_eq!(stored, vec![first.id, second.id, third.id]);
    }
}
