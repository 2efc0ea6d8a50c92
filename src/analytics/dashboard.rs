use std::borrow::Borrow;
use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::rates::{as_session, rate, OutcomeRates};
use super::segments::{group_by_dimension, Dimension};
use crate::storage::{Outcome, Session};

/// Headline rates for the whole population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardMetrics {
    pub checkout_starts: usize,
    pub conversion_rate: f64,
    pub abandonment_rate: f64,
    pub payment_fail_rate: f64,
    pub prepaid_share: f64,
    /// Average order value over converted sessions.
    pub aov: f64,
}

/// Outcome rates for one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyTrend {
    pub date: NaiveDate,
    pub conversion: f64,
    pub abandonment: f64,
    pub payment_failures: f64,
}

/// Outcome rates for one value of a dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentStat {
    pub label: String,
    pub sessions: usize,
    pub conversion: f64,
    pub abandonment: f64,
    pub payment_failures: f64,
}

/// Every value of one dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionStats {
    pub dimension: Dimension,
    pub segments: Vec<SegmentStat>,
}

pub fn dashboard_metrics<S: Borrow<Session>>(sessions: &[S]) -> DashboardMetrics {
    let rates = OutcomeRates::of(sessions);

    let (orders, revenue) = sessions
        .iter()
        .map(|s| as_session(s))
        .filter(|s| s.outcome == Outcome::Converted)
        .fold((0usize, 0.0f64), |(n, sum), s| (n + 1, sum + s.order_value));

    DashboardMetrics {
        checkout_starts: sessions.len(),
        conversion_rate: rates.conversion,
        abandonment_rate: rates.abandonment,
        payment_fail_rate: rates.payment_failure,
        prepaid_share: rate(sessions, |s| s.prepaid),
        aov: if orders == 0 { 0.0 } else { revenue / orders as f64 },
    }
}

/// One row per UTC calendar date, oldest first.
pub fn daily_trends<S: Borrow<Session>>(sessions: &[S]) -> Vec<DailyTrend> {
    let mut by_day: BTreeMap<NaiveDate, Vec<&Session>> = BTreeMap::new();
    for item in sessions {
        let session = as_session(item);
        by_day
            .entry(session.started_at.date_naive())
            .or_default()
            .push(session);
    }

    by_day
        .into_iter()
        .map(|(date, day)| {
            let rates = OutcomeRates::of(&day);
            DailyTrend {
                date,
                conversion: rates.conversion,
                abandonment: rates.abandonment,
                payment_failures: rates.payment_failure,
            }
        })
        .collect()
}

/// Per-dimension table of every segment value, without volume gating.
pub fn segment_stats<S: Borrow<Session>>(sessions: &[S]) -> Vec<DimensionStats> {
    Dimension::ALL
        .iter()
        .map(|dimension| DimensionStats {
            dimension: *dimension,
            segments: group_by_dimension(sessions, *dimension)
                .into_iter()
                .map(|group| {
                    let rates = OutcomeRates::of(&group.sessions);
                    SegmentStat {
                        sessions: group.volume(),
                        label: group.label,
                        conversion: rates.conversion,
                        abandonment: rates.abandonment,
                        payment_failures: rates.payment_failure,
                    }
                })
                .collect(),
        })
        .collect()
}
