use std::borrow::Borrow;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::rates::{as_session, Metric};
use crate::storage::Session;

/// Change of a headline rate between the recent and the preceding window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub label: String,
    pub current: f64,
    pub previous: f64,
    /// `current - previous`, in percentage points.
    pub delta: f64,
}

/// Compare `[now - recent_days, now]` against `(now - previous_days, now - recent_days)`.
///
/// There is no minimum volume; sparse windows produce noisy deltas and an
/// empty window reports 0.
pub fn detect_anomalies<S: Borrow<Session>>(
    sessions: &[S],
    now: DateTime<Utc>,
    recent_days: i64,
    previous_days: i64,
) -> Vec<Anomaly> {
    let recent_limit = Duration::days(recent_days);
    let previous_limit = Duration::days(previous_days);

    let mut recent: Vec<&Session> = Vec::new();
    let mut previous: Vec<&Session> = Vec::new();
    for item in sessions {
        let session = as_session(item);
        let age = now - session.started_at;
        if age <= recent_limit {
            recent.push(session);
        } else if age <= previous_limit {
            previous.push(session);
        }
    }

    Metric::HEADLINE_ORDER
        .iter()
        .map(|metric| {
            let current = metric.rate_of(&recent);
            let prior = metric.rate_of(&previous);
            Anomaly {
                label: metric.label().to_string(),
                current,
                previous: prior,
                delta: current - prior,
            }
        })
        .collect()
}
