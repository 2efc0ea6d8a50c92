//! Synthetic checkout sessions for demos and tests.
//!
//! The generator plants a handful of known effects so that mining has
//! something to find: invalid coupons and new-user COD without a delivery
//! ETA raise abandonment, high carts raise failures (prepaid) or abandonment
//! (COD), UPI intent on android through gateway g1 fails heavily in the last
//! two days, and COD abandons more in two specific pincodes.

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

use crate::storage::{
    CouponStatus, Device, Event, EventType, Gateway, Outcome, PaymentMethod, Session, UserType,
};

pub const DEFAULT_SESSIONS: usize = 7500;
pub const DEFAULT_DAYS: u32 = 14;
pub const MAX_SESSIONS: usize = 100_000;
pub const MAX_DAYS: u32 = 365;

/// Reject demo population sizes outside `1..=MAX_SESSIONS` sessions and
/// `1..=MAX_DAYS` days.
pub fn check_bounds(sessions: usize, days: u32) -> Result<(), String> {
    if !(1..=MAX_SESSIONS).contains(&sessions) {
        return Err(format!(
            "sessions must be between 1 and {}, got {}",
            MAX_SESSIONS, sessions
        ));
    }
    if !(1..=MAX_DAYS).contains(&days) {
        return Err(format!("days must be between 1 and {}, got {}", MAX_DAYS, days));
    }
    Ok(())
}

const CITIES: [&str; 6] = ["Mumbai", "Delhi", "Bengaluru", "Hyderabad", "Pune", "Chennai"];
const PINCODES: [&str; 8] = [
    "400001", "400078", "560034", "560102", "110001", "110045", "500081", "500032",
];
const COD_HOTSPOT_PINCODES: [&str; 2] = ["400078", "500081"];
const RECENT_DAYS: u32 = 2;

const BASE_ABANDON: f64 = 0.12;
const BASE_PAYMENT_FAIL: f64 = 0.06;
const HIGH_CART: f64 = 6000.0;

/// Produces a reproducible (when seeded) population of sessions with events.
pub struct FixtureGenerator {
    sessions: usize,
    days: u32,
    rng: StdRng,
}

impl FixtureGenerator {
    pub fn new(sessions: usize, days: u32) -> Self {
        Self {
            sessions,
            days: days.max(1),
            rng: StdRng::from_os_rng(),
        }
    }

    /// Fix the RNG seed for deterministic output.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Sessions spread uniformly over the `days` days ending at `now`.
    pub fn generate(&mut self, now: DateTime<Utc>) -> Vec<Session> {
        let base = now - Duration::days(i64::from(self.days));
        (0..self.sessions)
            .map(|_| {
                let day = self.rng.random_range(0..self.days);
                let minute = self.rng.random_range(0..1440);
                let started_at =
                    base + Duration::days(i64::from(day)) + Duration::minutes(minute);
                let recent = day + RECENT_DAYS >= self.days;
                self.session(started_at, recent)
            })
            .collect()
    }

    fn session(&mut self, started_at: DateTime<Utc>, recent: bool) -> Session {
        let user_type = self.weighted(&[(UserType::New, 0.55), (UserType::Returning, 0.45)]);
        let device = self.weighted(&[
            (Device::Android, 0.55),
            (Device::Ios, 0.2),
            (Device::Web, 0.25),
        ]);
        let payment_method = self.weighted(&[
            (PaymentMethod::UpiIntent, 0.35),
            (PaymentMethod::UpiCollect, 0.15),
            (PaymentMethod::Card, 0.25),
            (PaymentMethod::Netbanking, 0.1),
            (PaymentMethod::Cod, 0.15),
        ]);
        let gateway = self.weighted(&[(Gateway::G1, 0.45), (Gateway::G2, 0.35), (Gateway::G3, 0.2)]);
        let shipping_eta_shown = self.rng.random::<f64>() > 0.35;
        let cart_value = self.weighted(&[
            (799.0, 0.25),
            (1299.0, 0.25),
            (1999.0, 0.2),
            (3499.0, 0.15),
            (5999.0, 0.1),
            (8999.0, 0.05),
        ]);
        let coupon_status = self.weighted(&[
            (CouponStatus::None, 0.5),
            (CouponStatus::Applied, 0.35),
            (CouponStatus::Invalid, 0.15),
        ]);
        let city = CITIES[self.rng.random_range(0..CITIES.len())];
        let pincode = PINCODES[self.rng.random_range(0..PINCODES.len())];

        let mut session = Session::new(started_at)
            .with_user_type(user_type)
            .with_device(device)
            .with_payment_method(payment_method)
            .with_gateway(gateway)
            .with_shipping_eta(shipping_eta_shown)
            .with_cart_value(cart_value)
            .with_coupon_status(coupon_status)
            .with_location(city, pincode);

        session.modules_used = modules_for(&session);

        let (abandon, fail) = outcome_chances(&session, recent);
        let roll = self.rng.random::<f64>();
        let outcome = if roll < fail {
            Outcome::PaymentFailed
        } else if roll < fail + abandon {
            Outcome::Abandoned
        } else {
            Outcome::Converted
        };

        let session = session.with_outcome(outcome);
        let events = event_trail(&session);
        session.with_events(events)
    }

    fn weighted<T: Copy>(&mut self, choices: &[(T, f64)]) -> T {
        let total: f64 = choices.iter().map(|(_, w)| w).sum();
        let mut roll = self.rng.random::<f64>() * total;
        for (value, weight) in choices {
            if roll < *weight {
                return *value;
            }
            roll -= weight;
        }
        choices[choices.len() - 1].0
    }
}

fn modules_for(session: &Session) -> Vec<String> {
    let mut modules = vec!["address_autofill".to_string(), "trust_badges".to_string()];
    if session.shipping_eta_shown {
        modules.push("shipping_eta".to_string());
    }
    if session.coupon_status == CouponStatus::Applied {
        modules.push("promo_banner".to_string());
    }
    modules
}

/// `(abandon, payment_fail)` probabilities for a session's attributes.
pub(crate) fn outcome_chances(session: &Session, recent: bool) -> (f64, f64) {
    let mut abandon = BASE_ABANDON;
    let mut fail = BASE_PAYMENT_FAIL;

    if session.coupon_status == CouponStatus::Invalid {
        abandon += 0.18;
    }
    if session.user_type == UserType::New
        && session.payment_method == PaymentMethod::Cod
        && !session.shipping_eta_shown
    {
        abandon += 0.22;
    }
    if session.cart_value >= HIGH_CART {
        if session.prepaid {
            fail += 0.05;
        } else {
            abandon += 0.2;
        }
    }
    if recent
        && session.payment_method == PaymentMethod::UpiIntent
        && session.device == Device::Android
        && session.gateway == Gateway::G1
    {
        fail += 0.35;
    }
    if session.payment_method == PaymentMethod::Cod
        && COD_HOTSPOT_PINCODES.contains(&session.pincode.as_str())
    {
        abandon += 0.12;
    }

    (abandon, fail)
}

/// Funnel events implied by a session's outcome, in time order.
pub fn event_trail(session: &Session) -> Vec<Event> {
    let at = |minutes: i64| session.started_at + Duration::minutes(minutes);

    let mut events = vec![
        Event::new(EventType::CheckoutStarted, at(0)).with_meta(json!({"step": "checkout"})),
        Event::new(EventType::AddressAdded, at(2)).with_meta(json!({"step": "address"})),
        Event::new(EventType::PaymentMethodSelected, at(4)).with_meta(json!({
            "step": "payment_method",
            "couponStatus": session.coupon_status.as_str(),
        })),
    ];

    match session.outcome {
        Outcome::Abandoned => {
            events.push(
                Event::new(EventType::Abandoned, at(6)).with_meta(json!({"reason": "drop_off"})),
            );
        }
        Outcome::PaymentFailed | Outcome::Converted => {
            events.push(
                Event::new(EventType::PaymentAttempt, at(6))
                    .with_meta(json!({"step": "payment_attempt"})),
            );
            if session.outcome == Outcome::PaymentFailed {
                events.push(
                    Event::new(EventType::PaymentFailed, at(7))
                        .with_meta(json!({"code": "PMT_FAIL"})),
                );
            } else {
                events.push(
                    Event::new(EventType::Converted, at(8))
                        .with_meta(json!({"orderStatus": "success"})),
                );
            }
        }
    }

    events
}
