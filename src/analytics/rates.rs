use std::borrow::Borrow;

use serde::{Deserialize, Serialize};

use crate::storage::{Outcome, Session};

/// Percentage of `population` matching `predicate`, in `[0, 100]`.
///
/// An empty population has rate 0.
pub fn rate<S: Borrow<Session>>(population: &[S], predicate: impl Fn(&Session) -> bool) -> f64 {
    if population.is_empty() {
        return 0.0;
    }
    let matches = population.iter().filter(|s| predicate(as_session(*s))).count();
    100.0 * matches as f64 / population.len() as f64
}

/// View any borrowed population element as a session.
pub(crate) fn as_session<S: Borrow<Session>>(item: &S) -> &Session {
    Borrow::<Session>::borrow(item)
}

/// Outcome-rate metrics compared between a segment and its baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    Abandonment,
    PaymentFailures,
    Conversion,
}

impl Metric {
    /// Order in which the miner evaluates metrics for a segment.
    pub const MINING_ORDER: [Metric; 3] =
        [Metric::Abandonment, Metric::PaymentFailures, Metric::Conversion];

    /// Order in which headline metrics are reported.
    pub const HEADLINE_ORDER: [Metric; 3] =
        [Metric::Conversion, Metric::Abandonment, Metric::PaymentFailures];

    /// Human label used in drafts, insights and anomalies.
    pub fn label(&self) -> &'static str {
        match self {
            Metric::Abandonment => "Abandonment",
            Metric::PaymentFailures => "Payment failures",
            Metric::Conversion => "Conversion",
        }
    }

    /// The session outcome this metric counts.
    pub fn outcome(&self) -> Outcome {
        match self {
            Metric::Abandonment => Outcome::Abandoned,
            Metric::PaymentFailures => Outcome::PaymentFailed,
            Metric::Conversion => Outcome::Converted,
        }
    }

    /// Rate of this metric's outcome over a population.
    pub fn rate_of<S: Borrow<Session>>(&self, population: &[S]) -> f64 {
        let outcome = self.outcome();
        rate(population, |s| s.outcome == outcome)
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Conversion, abandonment and payment-failure rates of one population.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRates {
    pub conversion: f64,
    pub abandonment: f64,
    pub payment_failure: f64,
}

impl OutcomeRates {
    /// Compute all three rates in a single pass.
    pub fn of<S: Borrow<Session>>(population: &[S]) -> Self {
        if population.is_empty() {
            return Self::default();
        }

        let (mut converted, mut abandoned, mut failed) = (0usize, 0usize, 0usize);
        for session in population {
            match as_session(session).outcome {
                Outcome::Converted => converted += 1,
                Outcome::Abandoned => abandoned += 1,
                Outcome::PaymentFailed => failed += 1,
            }
        }

        let total = population.len() as f64;
        Self {
            conversion: 100.0 * converted as f64 / total,
            abandonment: 100.0 * abandoned as f64 / total,
            payment_failure: 100.0 * failed as f64 / total,
        }
    }

    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Abandonment => self.abandonment,
            Metric::PaymentFailures => self.payment_failure,
            Metric::Conversion => self.conversion,
        }
    }
}
