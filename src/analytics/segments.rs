use std::borrow::Borrow;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::rates::as_session;
use crate::storage::Session;

/// Label for a cart value, using half-open `[lower, upper)` buckets.
pub fn cart_bucket(cart_value: f64) -> &'static str {
    if cart_value < 1000.0 {
        "<1k"
    } else if cart_value < 2000.0 {
        "1k-2k"
    } else if cart_value < 4000.0 {
        "2k-4k"
    } else if cart_value < 6000.0 {
        "4k-6k"
    } else {
        "6k+"
    }
}

/// First two characters of a pincode followed by `xxx`, e.g. `40xxx`.
pub fn pincode_bucket(pincode: &str) -> String {
    let prefix: String = pincode.chars().take(2).collect();
    format!("{}xxx", prefix)
}

/// Session attributes a population can be partitioned by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Dimension {
    Device,
    UserType,
    PaymentMethod,
    Gateway,
    CartValue,
    Pincode,
    City,
}

impl Dimension {
    /// Dimensions the insight miner enumerates.
    pub const MINED: [Dimension; 6] = [
        Dimension::Device,
        Dimension::UserType,
        Dimension::PaymentMethod,
        Dimension::Gateway,
        Dimension::CartValue,
        Dimension::Pincode,
    ];

    /// Dimensions reported by the segment explorer.
    pub const ALL: [Dimension; 7] = [
        Dimension::Device,
        Dimension::UserType,
        Dimension::PaymentMethod,
        Dimension::Gateway,
        Dimension::CartValue,
        Dimension::Pincode,
        Dimension::City,
    ];

    /// Targeting key, also used as the left side of segment labels.
    pub fn key(&self) -> &'static str {
        match self {
            Dimension::Device => "device",
            Dimension::UserType => "userType",
            Dimension::PaymentMethod => "paymentMethod",
            Dimension::Gateway => "gateway",
            Dimension::CartValue => "cartValue",
            Dimension::Pincode => "pincode",
            Dimension::City => "city",
        }
    }

    /// Group label of a session along this dimension.
    pub fn value_of(&self, session: &Session) -> String {
        match self {
            Dimension::Device => session.device.to_string(),
            Dimension::UserType => session.user_type.to_string(),
            Dimension::PaymentMethod => session.payment_method.to_string(),
            Dimension::Gateway => session.gateway.to_string(),
            Dimension::CartValue => cart_bucket(session.cart_value).to_string(),
            Dimension::Pincode => pincode_bucket(&session.pincode),
            Dimension::City => session.city.clone(),
        }
    }

    /// `"<key> = <value>"`.
    pub fn segment_label(&self, value: &str) -> String {
        format!("{} = {}", self.key(), value)
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

impl std::str::FromStr for Dimension {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dimension::ALL
            .iter()
            .copied()
            .find(|d| d.key() == s)
            .ok_or_else(|| format!("Unknown dimension: {}", s))
    }
}

/// One labeled sub-population.
#[derive(Debug, Clone)]
pub struct Group<'a> {
    pub label: String,
    pub sessions: Vec<&'a Session>,
}

impl Group<'_> {
    pub fn volume(&self) -> usize {
        self.sessions.len()
    }
}

/// Partition a population by `key_fn`, keeping labels in first-seen order.
pub fn group_by<'a, S, F>(population: &'a [S], key_fn: F) -> Vec<Group<'a>>
where
    S: Borrow<Session>,
    F: Fn(&Session) -> String,
{
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Group<'a>> = Vec::new();

    for item in population {
        let session = as_session(item);
        let label = key_fn(session);
        match index.get(&label) {
            Some(&i) => groups[i].sessions.push(session),
            None => {
                index.insert(label.clone(), groups.len());
                groups.push(Group {
                    label,
                    sessions: vec![session],
                });
            }
        }
    }

    groups
}

/// Partition a population along one of the known dimensions.
pub fn group_by_dimension<S: Borrow<Session>>(population: &[S], dimension: Dimension) -> Vec<Group<'_>> {
    group_by(population, |s| dimension.value_of(s))
}
