use std::borrow::Borrow;
use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::drivers::select_drivers;
use super::rates::{as_session, Metric, OutcomeRates};
use super::segments::{group_by_dimension, Dimension};
use crate::config::AnalysisConfig;
use crate::storage::Session;

/// Calendar-date span covered by the mined sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Quantitative core of a finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftMetrics {
    pub metric_label: String,
    /// `segment_rate - baseline_rate`, in percentage points.
    pub lift: f64,
    pub baseline_rate: f64,
    pub segment_rate: f64,
    pub segment_volume: usize,
}

/// A mined (segment, metric) finding awaiting narration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightDraft {
    /// `"<dimension> = <value>"`.
    pub segment_label: String,
    pub targeting: BTreeMap<String, String>,
    pub window: ObservationWindow,
    pub metrics: DraftMetrics,
    pub drivers: Vec<String>,
}

impl InsightDraft {
    /// `|lift| * segment volume`.
    pub fn impact_score(&self) -> f64 {
        self.metrics.lift.abs() * self.metrics.segment_volume as f64
    }
}

/// Earliest and latest `started_at` in a population.
pub fn observation_span<S: Borrow<Session>>(
    sessions: &[S],
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let mut iter = sessions.iter().map(|s| as_session(s).started_at);
    let first = iter.next()?;
    Some(iter.fold((first, first), |(lo, hi), t| (lo.min(t), hi.max(t))))
}

/// Enumerates segments and emits drafts for those deviating from baseline.
#[derive(Debug, Clone)]
pub struct InsightMiner {
    config: AnalysisConfig,
}

impl InsightMiner {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    /// All drafts clearing the volume and lift thresholds, unranked.
    pub fn mine<S: Borrow<Session>>(&self, sessions: &[S]) -> Vec<InsightDraft> {
        let Some((first, last)) = observation_span(sessions) else {
            return Vec::new();
        };
        let window = ObservationWindow {
            start: first.date_naive(),
            end: last.date_naive(),
        };

        let baseline = OutcomeRates::of(sessions);
        let drivers: Vec<String> =
            select_drivers(sessions, self.config.driver_min_lift, self.config.max_drivers)
                .iter()
                .map(ToString::to_string)
                .collect();

        let mut drafts = Vec::new();

        for dimension in Dimension::MINED {
            for group in group_by_dimension(sessions, dimension) {
                if group.volume() < self.config.min_segment_volume {
                    continue;
                }
                let rates = OutcomeRates::of(&group.sessions);

                for metric in Metric::MINING_ORDER {
                    let segment_rate = rates.get(metric);
                    let baseline_rate = baseline.get(metric);
                    let lift = segment_rate - baseline_rate;
                    if lift.abs() < self.config.min_abs_lift {
                        continue;
                    }

                    drafts.push(InsightDraft {
                        segment_label: dimension.segment_label(&group.label),
                        targeting: BTreeMap::from([(
                            dimension.key().to_string(),
                            group.label.clone(),
                        )]),
                        window,
                        metrics: DraftMetrics {
                            metric_label: metric.label().to_string(),
                            lift,
                            baseline_rate,
                            segment_rate,
                            segment_volume: group.volume(),
                        },
                        drivers: drivers.clone(),
                    });
                }
            }
        }

        debug!(
            sessions = sessions.len(),
            drafts = drafts.len(),
            drivers = drivers.len(),
            "Mined insight drafts"
        );

        drafts
    }

    /// Rank by impact and keep the configured top K.
    pub fn select(&self, drafts: Vec<InsightDraft>) -> Vec<InsightDraft> {
        rank_and_select(drafts, self.config.top_k)
    }
}

/// Stable sort by `|lift| * volume` descending, truncated to `top_k`.
pub fn rank_and_select(mut drafts: Vec<InsightDraft>, top_k: usize) -> Vec<InsightDraft> {
    drafts.sort_by(|a, b| b.impact_score().total_cmp(&a.impact_score()));
    drafts.truncate(top_k);
    drafts
}
