//! Session store for checkout sessions, their event trails and the
//! materialized insight collection.
//!
//! The analytics engine only depends on the [`SessionStore`] trait. The crate
//! ships a SQLite implementation ([`SqliteStorage`]) with embedded migrations.

mod sqlite;


pub use sqlite::SqliteStorage;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageResult;
use crate::narrative::ExperimentPlan;

/// Declares a closed set of snake_case string values with `Display`,
/// `FromStr` and an `ALL` listing in declaration order.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            /// Every value, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// The stored/wire string form.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(format!("Unknown {}: {}", stringify!($name), s)),
                }
            }
        }
    };
}

string_enum! {
    /// Whether the shopper has ordered before.
    UserType {
        New => "new",
        Returning => "returning",
    }
}

string_enum! {
    /// Client platform the checkout ran on.
    Device {
        Android => "android",
        Ios => "ios",
        Web => "web",
    }
}

string_enum! {
    /// Payment instrument chosen at checkout.
    PaymentMethod {
        UpiIntent => "upi_intent",
        UpiCollect => "upi_collect",
        Card => "card",
        Netbanking => "netbanking",
        Cod => "cod",
    }
}

string_enum! {
    /// Payment gateway that processed the attempt.
    Gateway {
        G1 => "g1",
        G2 => "g2",
        G3 => "g3",
    }
}

string_enum! {
    /// Coupon state at the time of checkout.
    CouponStatus {
        None => "none",
        Applied => "applied",
        Invalid => "invalid",
    }
}

string_enum! {
    /// Terminal outcome of a checkout session.
    Outcome {
        Converted => "converted",
        Abandoned => "abandoned",
        PaymentFailed => "payment_failed",
    }
}

string_enum! {
    /// Checkout funnel event kinds.
    EventType {
        CheckoutStarted => "checkout_started",
        AddressAdded => "address_added",
        PaymentMethodSelected => "payment_method_selected",
        PaymentAttempt => "payment_attempt",
        Converted => "converted",
        PaymentFailed => "payment_failed",
        Abandoned => "abandoned",
    }
}

string_enum! {
    /// Lifecycle status of a persisted insight.
    InsightStatus {
        New => "new",
    }
}

/// A single checkout session with its event trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier.
    pub id: String,
    /// When checkout started.
    pub started_at: DateTime<Utc>,
    pub user_type: UserType,
    pub device: Device,
    pub payment_method: PaymentMethod,
    pub gateway: Gateway,
    pub coupon_status: CouponStatus,
    pub city: String,
    pub pincode: String,
    /// Cart value in rupees.
    pub cart_value: f64,
    /// Whether a delivery ETA was displayed during checkout.
    pub shipping_eta_shown: bool,
    pub prepaid: bool,
    /// Checkout UI modules rendered for this session.
    #[serde(default)]
    pub modules_used: Vec<String>,
    pub outcome: Outcome,
    /// Order value; zero unless the session converted.
    pub order_value: f64,
    /// Ordered event trail.
    #[serde(default)]
    pub events: Vec<Event>,
}

/// A funnel event recorded against a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub ts: DateTime<Utc>,
    /// Free-form metadata object.
    pub meta: serde_json::Value,
}

/// Structured filter payload stored alongside an insight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightFilters {
    /// Human segment label, e.g. `device = android`.
    pub segment: String,
    /// Targeting map (single key for mined insights).
    pub targeting: BTreeMap<String, String>,
    pub drivers: Vec<String>,
    pub metric_label: String,
    /// Segment rate minus baseline rate, in percentage points.
    pub lift: f64,
}

/// A persisted insight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub id: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub filters: InsightFilters,
    pub title: String,
    pub evidence: Vec<String>,
    /// `|lift| * segment volume`; never negative.
    pub impact_score: f64,
    pub recommended_fixes: Vec<String>,
    pub experiment_plan: ExperimentPlan,
    pub status: InsightStatus,
    pub created_at: DateTime<Utc>,
}

/// Sort direction on `started_at`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Optional restrictions for [`SessionStore::list_sessions`].
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    /// Only sessions that started at or after this instant.
    pub started_after: Option<DateTime<Utc>>,
    pub order: SortOrder,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl Session {
    /// Create a converted android/UPI session with neutral attributes.
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            started_at,
            user_type: UserType::New,
            device: Device::Android,
            payment_method: PaymentMethod::UpiIntent,
            gateway: Gateway::G1,
            coupon_status: CouponStatus::None,
            city: "Mumbai".to_string(),
            pincode: "400001".to_string(),
            cart_value: 799.0,
            shipping_eta_shown: true,
            prepaid: true,
            modules_used: Vec::new(),
            outcome: Outcome::Converted,
            order_value: 799.0,
            events: Vec::new(),
        }
    }

    /// Set the outcome, keeping `order_value` consistent with it.
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self.order_value = if outcome == Outcome::Converted {
            self.cart_value
        } else {
            0.0
        };
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_user_type(mut self, user_type: UserType) -> Self {
        self.user_type = user_type;
        self
    }

    /// Set the payment method; cash on delivery is the only non-prepaid method.
    pub fn with_payment_method(mut self, payment_method: PaymentMethod) -> Self {
        self.payment_method = payment_method;
        self.prepaid = payment_method != PaymentMethod::Cod;
        self
    }

    pub fn with_gateway(mut self, gateway: Gateway) -> Self {
        self.gateway = gateway;
        self
    }

    pub fn with_coupon_status(mut self, coupon_status: CouponStatus) -> Self {
        self.coupon_status = coupon_status;
        self
    }

    pub fn with_location(mut self, city: impl Into<String>, pincode: impl Into<String>) -> Self {
        self.city = city.into();
        self.pincode = pincode.into();
        self
    }

    /// Set the cart value; a converted session's order value follows it.
    pub fn with_cart_value(mut self, cart_value: f64) -> Self {
        self.cart_value = cart_value;
        if self.outcome == Outcome::Converted {
            self.order_value = cart_value;
        }
        self
    }

    pub fn with_shipping_eta(mut self, shown: bool) -> Self {
        self.shipping_eta_shown = shown;
        self
    }

    pub fn with_events(mut self, events: Vec<Event>) -> Self {
        self.events = events;
        self
    }

    /// String form of a field addressed by its camelCase targeting key.
    ///
    /// Returns `None` for keys that do not name a session field.
    pub fn field_value(&self, key: &str) -> Option<String> {
        let value = match key {
            "id" => self.id.clone(),
            "userType" => self.user_type.to_string(),
            "device" => self.device.to_string(),
            "paymentMethod" => self.payment_method.to_string(),
            "gateway" => self.gateway.to_string(),
            "couponStatus" => self.coupon_status.to_string(),
            "city" => self.city.clone(),
            "pincode" => self.pincode.clone(),
            "cartValue" => self.cart_value.to_string(),
            "shippingEtaShown" => self.shipping_eta_shown.to_string(),
            "prepaid" => self.prepaid.to_string(),
            "outcome" => self.outcome.to_string(),
            "orderValue" => self.order_value.to_string(),
            _ => return None,
        };
        Some(value)
    }

    /// Whether any event of the given type was recorded, in any position.
    pub fn has_event(&self, event_type: EventType) -> bool {
        self.events.iter().any(|e| e.event_type == event_type)
    }
}

impl Event {
    /// Create an event with an empty metadata object.
    pub fn new(event_type: EventType, ts: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type,
            ts,
            meta: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = meta;
        self
    }
}

impl SessionFilter {
    /// Newest-first page of `per_page` sessions; pages start at 1.
    pub fn page(page: u32, per_page: u32) -> Self {
        Self {
            started_after: None,
            order: SortOrder::Descending,
            limit: Some(per_page),
            offset: Some(page.saturating_sub(1).saturating_mul(per_page)),
        }
    }

    pub fn started_after(mut self, instant: DateTime<Utc>) -> Self {
        self.started_after = Some(instant);
        self
    }
}

/// Persistence operations consumed by the insight engine.
///
/// Any error is fatal for the calling operation; implementations own their
/// own retry policy, if any.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// List sessions with their events.
    async fn list_sessions(&self, filter: &SessionFilter) -> StorageResult<Vec<Session>>;
    /// Total number of stored sessions.
    async fn count_sessions(&self) -> StorageResult<u64>;
    /// Insert sessions along with their events.
    async fn insert_sessions(&self, sessions: &[Session]) -> StorageResult<()>;
    /// Remove every session and event. Insights are left for the next
    /// `replace_insights`.
    async fn clear_sessions(&self) -> StorageResult<()>;
    /// Atomically delete every insight and insert the new batch.
    async fn replace_insights(&self, insights: &[Insight]) -> StorageResult<()>;
    /// All insights, highest impact first.
    async fn list_insights(&self) -> StorageResult<Vec<Insight>>;
    /// A single insight, or `None` if the id is unknown.
    async fn get_insight(&self, id: &str) -> StorageResult<Option<Insight>>;
}
