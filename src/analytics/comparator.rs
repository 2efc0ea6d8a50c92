//! Baseline-versus-segment recomputation for a single insight's detail view.

use std::borrow::Borrow;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::rates::{as_session, Metric};
use super::segments::{cart_bucket, pincode_bucket, Dimension};
use crate::storage::{Device, EventType, Session};

/// Funnel steps counted for the detail view, in funnel order.
pub const FUNNEL_STEPS: [EventType; 5] = [
    EventType::CheckoutStarted,
    EventType::AddressAdded,
    EventType::PaymentMethodSelected,
    EventType::PaymentAttempt,
    EventType::Converted,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateComparison {
    pub baseline_conversion: f64,
    pub segment_conversion: f64,
    pub baseline_abandonment: f64,
    pub segment_abandonment: f64,
    /// Number of sessions matching the targeting.
    pub volume: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceBreakdown {
    pub label: String,
    pub conversion: f64,
    pub abandonment: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelStep {
    pub step: EventType,
    pub baseline: usize,
    pub segment: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentComparison {
    pub targeting: BTreeMap<String, String>,
    pub comparison: RateComparison,
    pub breakdown_by_device: Vec<DeviceBreakdown>,
    pub funnel: Vec<FunnelStep>,
}

/// Whether a session satisfies every key/value pair of a targeting map.
///
/// Bucketed dimensions compare bucket labels; other keys compare the field's
/// string form exactly. Keys naming no session field never match.
pub fn matches_targeting(session: &Session, targeting: &BTreeMap<String, String>) -> bool {
    targeting.iter().all(|(key, value)| match key.parse::<Dimension>() {
        Ok(Dimension::CartValue) => cart_bucket(session.cart_value) == value.as_str(),
        Ok(Dimension::Pincode) => pincode_bucket(&session.pincode) == *value,
        _ => session.field_value(key).as_deref() == Some(value.as_str()),
    })
}

/// Recompute the baseline/segment comparison, device breakdown and funnel.
pub fn compare_segment<S: Borrow<Session>>(
    sessions: &[S],
    targeting: &BTreeMap<String, String>,
) -> SegmentComparison {
    let baseline: Vec<&Session> = sessions.iter().map(|s| as_session(s)).collect();
    let matches: Vec<&Session> = baseline
        .iter()
        .copied()
        .filter(|s| matches_targeting(s, targeting))
        .collect();

    let comparison = RateComparison {
        baseline_conversion: Metric::Conversion.rate_of(&baseline),
        segment_conversion: Metric::Conversion.rate_of(&matches),
        baseline_abandonment: Metric::Abandonment.rate_of(&baseline),
        segment_abandonment: Metric::Abandonment.rate_of(&matches),
        volume: matches.len(),
    };

    let breakdown_by_device = Device::ALL
        .iter()
        .map(|device| {
            let group: Vec<&Session> = matches
                .iter()
                .copied()
                .filter(|s| s.device == *device)
                .collect();
            DeviceBreakdown {
                label: device.to_string(),
                conversion: Metric::Conversion.rate_of(&group),
                abandonment: Metric::Abandonment.rate_of(&group),
            }
        })
        .collect();

    let funnel = FUNNEL_STEPS
        .iter()
        .map(|step| FunnelStep {
            step: *step,
            baseline: baseline.iter().filter(|s| s.has_event(*step)).count(),
            segment: matches.iter().filter(|s| s.has_event(*step)).count(),
        })
        .collect();

    SegmentComparison {
        targeting: targeting.clone(),
        comparison,
        breakdown_by_device,
        funnel,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Event, Outcome, PaymentMethod};
    use chrono::Utc;

    fn targeting(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_matches_bucketed_keys() {
        let session = Session::new(Utc::now())
            .with_cart_value(6500.0)
            .with_location("Mumbai", "400078");

        assert!(matches_targeting(&session, &targeting(&[("cartValue", "6k+")])));
        assert!(matches_targeting(&session, &targeting(&[("pincode", "40xxx")])));
        assert!(!matches_targeting(&session, &targeting(&[("pincode", "400078")])));
    }

    #[test]
    fn test_matches_requires_all_pairs() {
        let session = Session::new(Utc::now())
            .with_device(Device::Ios)
            .with_payment_method(PaymentMethod::Cod);

        assert!(matches_targeting(
            &session,
            &targeting(&[("device", "ios"), ("paymentMethod", "cod"), ("prepaid", "false")])
        ));
        assert!(!matches_targeting(
            &session,
            &targeting(&[("device", "ios"), ("paymentMethod", "card")])
        ));
        assert!(!matches_targeting(&session, &targeting(&[("browser", "chrome")])));
        assert!(matches_targeting(&session, &BTreeMap::new()));
    }

    #[test]
    fn test_compare_segment_empty_match_set() {
        let sessions = vec![Session::new(Utc::now()).with_outcome(Outcome::Abandoned)];
        let result = compare_segment(&sessions, &targeting(&[("device", "web")]));

        assert_eq!(result.comparison.volume, 0);
        assert_eq!(result.comparison.segment_conversion, 0.0);
        assert_eq!(result.comparison.baseline_abandonment, 100.0);
        assert!(result.breakdown_by_device.iter().all(|d| d.conversion == 0.0));
        assert!(result.funnel.iter().all(|f| f.segment == 0));
    }

    #[test]
    fn test_funnel_counts_presence_not_order() {
        let now = Utc::now();
        let sessions = vec![
            Session::new(now).with_device(Device::Web).with_events(vec![
                Event::new(EventType::PaymentAttempt, now),
                Event::new(EventType::CheckoutStarted, now),
            ]),
            Session::new(now).with_events(vec![Event::new(EventType::CheckoutStarted, now)]),
        ];

        let result = compare_segment(&sessions, &targeting(&[("device", "web")]));
        let started = &result.funnel[0];
        assert_eq!(started.step, EventType::CheckoutStarted);
        assert_eq!(started.baseline, 2);
        assert_eq!(started.segment, 1);
        assert_eq!(result.funnel[3].segment, 1);
        assert_eq!(result.funnel[4].baseline, 0);
    }
}
