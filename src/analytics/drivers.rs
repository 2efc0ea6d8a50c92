//! Population-wide abandonment drivers.
//!
//! For each candidate feature the population is grouped by that feature's
//! value and the value with the highest abandonment lift over the population
//! baseline is kept. Features whose best value clears the minimum lift become
//! driver strings such as `Coupon status: invalid (+12.4% abandonment lift)`.

use std::borrow::Borrow;

use serde::{Deserialize, Serialize};

use super::rates::Metric;
use super::segments::{cart_bucket, group_by};
use crate::storage::Session;

type FeatureKey = fn(&Session) -> String;

fn yes_no(flag: bool) -> String {
    let text = if flag { "Yes" } else { "No" };
    text.to_string()
}

/// Candidate features, in reporting order.
const FEATURES: [(&str, FeatureKey); 8] = [
    ("Device", |s| s.device.to_string()),
    ("User type", |s| s.user_type.to_string()),
    ("Payment method", |s| s.payment_method.to_string()),
    ("Gateway", |s| s.gateway.to_string()),
    ("Shipping ETA shown", |s| yes_no(s.shipping_eta_shown)),
    ("Coupon status", |s| s.coupon_status.to_string()),
    ("Prepaid", |s| yes_no(s.prepaid)),
    ("Cart bucket", |s| cart_bucket(s.cart_value).to_string()),
];

/// A feature value that elevates abandonment over the baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    pub feature: String,
    pub value: String,
    /// Abandonment lift in percentage points.
    pub lift: f64,
}

impl std::fmt::Display for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} (+{:.1}% abandonment lift)",
            self.feature, self.value, self.lift
        )
    }
}

/// Best abandonment driver per feature, keeping features whose best value
/// lifts abandonment by more than `min_lift`, at most `max_drivers`, in
/// feature order.
pub fn select_drivers<S: Borrow<Session>>(
    population: &[S],
    min_lift: f64,
    max_drivers: usize,
) -> Vec<Driver> {
    let baseline = Metric::Abandonment.rate_of(population);

    FEATURES
        .iter()
        .filter_map(|(label, key)| {
            let mut best: Option<(String, f64)> = None;
            for group in group_by(population, key) {
                let lift = Metric::Abandonment.rate_of(&group.sessions) - baseline;
                // Strictly greater keeps the first-encountered value on ties.
                if best.as_ref().map_or(true, |(_, top)| lift > *top) {
                    best = Some((group.label, lift));
                }
            }

            best.filter(|(_, lift)| *lift > min_lift)
                .map(|(value, lift)| Driver {
                    feature: label.to_string(),
                    value,
                    lift,
                })
        })
        .take(max_drivers)
        .collect()
}
