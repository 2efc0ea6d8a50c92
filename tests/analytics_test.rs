//! Integration tests for the analytics core
//!
//! Exercises mining, ranking, anomaly detection and segment comparison over
//! hand-built populations with known rates.

use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;

use checkout_insights::analytics::{
    cart_bucket, compare_segment, detect_anomalies, pincode_bucket, rank_and_select, rate,
    InsightMiner, Metric,
};
use checkout_insights::config::AnalysisConfig;
use checkout_insights::storage::{Device, Outcome, PaymentMethod, Session};

/// `count` sessions on `device`, the first `abandoned` of them abandoned.
fn sessions(device: Device, count: usize, abandoned: usize) -> Vec<Session> {
    let now = Utc::now() - Duration::hours(1);
    (0..count)
        .map(|i| {
            let outcome = if i < abandoned {
                Outcome::Abandoned
            } else {
                Outcome::Converted
            };
            Session::new(now).with_device(device).with_outcome(outcome)
        })
        .collect()
}

fn android_scenario() -> Vec<Session> {
    // 200 android at 75% abandonment plus 300 iOS at 16.7%: 40% overall
    let mut population = sessions(Device::Android, 200, 150);
    population.extend(sessions(Device::Ios, 300, 50));
    population
}

fn targeting(key: &str, value: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(key.to_string(), value.to_string())])
}

#[cfg(test)]
mod rate_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_rate_bounds() {
        let population = android_scenario();
        for metric in Metric::HEADLINE_ORDER {
            let r = metric.rate_of(&population);
            assert!((0.0..=100.0).contains(&r), "{} out of range: {}", metric, r);
        }
        assert_eq!(rate(&population, |_| true), 100.0);
        assert_eq!(rate(&population, |_| false), 0.0);
    }

    #[test]
    fn test_rate_of_empty_population_is_zero() {
        let empty: Vec<Session> = Vec::new();
        assert_eq!(rate(&empty, |_| true), 0.0);
        assert_eq!(Metric::Conversion.rate_of(&empty), 0.0);
    }

    #[test]
    fn test_bucket_boundaries() {
        let cases = [
            (999.0, "<1k"),
            (1000.0, "1k-2k"),
            (1999.0, "1k-2k"),
            (2000.0, "2k-4k"),
            (3999.0, "2k-4k"),
            (4000.0, "4k-6k"),
            (5999.0, "4k-6k"),
            (6000.0, "6k+"),
        ];
        for (value, bucket) in cases {
            assert_eq!(cart_bucket(value), bucket, "cart value {}", value);
        }
        assert_eq!(pincode_bucket("400078"), "40xxx");
        assert_eq!(pincode_bucket("110001"), "11xxx");
    }
}

#[cfg(test)]
mod miner_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_android_abandonment_draft() {
        let miner = InsightMiner::new(AnalysisConfig::default());
        let drafts = miner.mine(&android_scenario());

        let android = drafts
            .iter()
            .find(|d| d.segment_label == "device = android" && d.metrics.metric_label == "Abandonment")
            .expect("android abandonment draft");

        assert_eq!(android.metrics.lift, 35.0);
        assert_eq!(android.metrics.segment_rate, 75.0);
        assert_eq!(android.metrics.baseline_rate, 40.0);
        assert_eq!(android.metrics.segment_volume, 200);
        assert_eq!(android.targeting, targeting("device", "android"));
        assert_eq!(android.impact_score(), 35.0 * 200.0);
    }

    #[test]
    fn test_small_segment_is_discarded() {
        // 80 web sessions all abandoned: lift far above 3 but volume below 120
        let mut population = sessions(Device::Android, 300, 30);
        population.extend(sessions(Device::Web, 80, 80));

        let miner = InsightMiner::new(AnalysisConfig::default());
        let drafts = miner.select(miner.mine(&population));

        assert!(drafts.iter().all(|d| d.segment_label != "device = web"));
    }

    #[test]
    fn test_thresholds_hold_for_every_draft() {
        let mut population = android_scenario();
        population.extend(
            sessions(Device::Web, 150, 20)
                .into_iter()
                .map(|s| s.with_payment_method(PaymentMethod::Cod)),
        );

        let config = AnalysisConfig::default();
        let drafts = InsightMiner::new(config.clone()).mine(&population);

        assert!(!drafts.is_empty());
        for draft in &drafts {
            assert!(draft.metrics.segment_volume >= config.min_segment_volume);
            assert!(draft.metrics.lift.abs() >= config.min_abs_lift);
        }
    }

    #[test]
    fn test_mining_is_idempotent() {
        let population = android_scenario();
        let miner = InsightMiner::new(AnalysisConfig::default());

        let key = |d: &checkout_insights::analytics::InsightDraft| {
            (
                d.segment_label.clone(),
                d.metrics.metric_label.clone(),
                d.metrics.lift.to_bits(),
                d.metrics.segment_volume,
            )
        };
        let first: Vec<_> = miner.mine(&population).iter().map(key).collect();
        let second: Vec<_> = miner.mine(&population).iter().map(key).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_ranking_law_and_top_k() {
        let mut population = android_scenario();
        population.extend(sessions(Device::Web, 250, 200));

        let miner = InsightMiner::new(AnalysisConfig::default());
        let drafts = miner.mine(&population);
        let selected = rank_and_select(drafts.clone(), 3);

        assert_eq!(selected.len(), 3.min(drafts.len()));
        for pair in selected.windows(2) {
            assert!(pair[0].impact_score() >= pair[1].impact_score());
        }
        let best = drafts
            .iter()
            .map(|d| d.impact_score())
            .fold(f64::MIN, f64::max);
        assert_eq!(selected[0].impact_score(), best);
    }

    #[test]
    fn test_drivers_identical_across_drafts() {
        let miner = InsightMiner::new(AnalysisConfig::default());
        let drafts = miner.mine(&android_scenario());

        assert!(drafts.len() > 1);
        let first = &drafts[0].drivers;
        assert!(first.iter().any(|d| d.starts_with("Device: android")));
        assert!(drafts.iter().all(|d| &d.drivers == first));
    }
}

#[cfg(test)]
mod anomaly_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_conversion_drop_scenario() {
        let now = Utc::now();
        let at = |days: i64, converted: bool| {
            let outcome = if converted {
                Outcome::Converted
            } else {
                Outcome::Abandoned
            };
            Session::new(now - Duration::days(days)).with_outcome(outcome)
        };

        let mut population: Vec<Session> = (0..10).map(|i| at(1, i < 4)).collect();
        population.extend((0..20).map(|i| at(4, i < 11)));
        // Outside both windows
        population.extend((0..5).map(|_| at(10, false)));

        let anomalies = detect_anomalies(&population, now, 2, 7);
        let conversion = &anomalies[0];

        assert_eq!(conversion.label, "Conversion");
        assert_eq!(conversion.current, 40.0);
        assert_eq!(conversion.previous, 55.0);
        assert!((conversion.delta - -15.0).abs() < 1e-9);
    }
}

#[cfg(test)]
mod comparator_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_ios_detail_scenario() {
        let mut population = sessions(Device::Ios, 100, 30);
        population.extend(sessions(Device::Android, 100, 10));

        let detail = compare_segment(&population, &targeting("device", "ios"));

        assert_eq!(detail.comparison.segment_abandonment, 30.0);
        assert_eq!(detail.comparison.baseline_abandonment, 20.0);
        assert_eq!(detail.comparison.volume, 100);
        assert_eq!(detail.comparison.segment_conversion, 70.0);

        let ios = detail
            .breakdown_by_device
            .iter()
            .find(|d| d.label == "ios")
            .unwrap();
        assert_eq!(ios.abandonment, 30.0);
        let android = detail
            .breakdown_by_device
            .iter()
            .find(|d| d.label == "android")
            .unwrap();
        assert_eq!(android.conversion, 0.0);
    }
}
