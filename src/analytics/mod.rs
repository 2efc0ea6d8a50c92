//! Segment analytics over an in-memory session snapshot.
//!
//! Everything in this module is synchronous and pure: callers load sessions
//! from a [`SessionStore`](crate::storage::SessionStore) and pass slices in.
//! Empty populations never fail; every rate degrades to 0.

mod anomaly;
mod comparator;
mod dashboard;
mod drivers;
mod miner;
mod rates;
mod segments;

pub use anomaly::{detect_anomalies, Anomaly};
pub use comparator::{
    compare_segment, matches_targeting, DeviceBreakdown, FunnelStep, RateComparison,
    SegmentComparison, FUNNEL_STEPS,
};
pub use dashboard::{
    daily_trends, dashboard_metrics, segment_stats, DailyTrend, DashboardMetrics,
    DimensionStats, SegmentStat,
};
pub use drivers::{select_drivers, Driver};
pub use miner::{
    observation_span, rank_and_select, DraftMetrics, InsightDraft, InsightMiner,
    ObservationWindow,
};
pub use rates::{rate, Metric, OutcomeRates};
pub use segments::{cart_bucket, group_by, group_by_dimension, pincode_bucket, Dimension, Group};
