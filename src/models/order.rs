use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderItem {
    pub name: String,
    pub quantity: u32,
}

/// Server-reported phase of an order.
///
/// Only two phases move the flow; everything else is carried verbatim so the
/// screens can show it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OrderStatus {
    #[default]
    InProgress,
    Reported(String),
    TryPhaseCompleted,
    Complete,
}

impl OrderStatus {
    pub fn parse(raw: &str) -> Self {
        let normalized: String = raw
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .flat_map(char::to_lowercase)
            .collect();

        match normalized.as_str() {
            "complete" | "completed" | "delivered" => Self::Complete,
            "completedtryphase" | "tryphasecompleted" | "tryperiodcompleted" => {
                Self::TryPhaseCompleted
            }
            "" | "inprogress" => Self::InProgress,
            _ => Self::Reported(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::InProgress => "inProgress",
            Self::Reported(raw) => raw,
            Self::TryPhaseCompleted => "completedTryPhase",
            Self::Complete => "complete",
        }
    }

    fn phase(&self) -> u8 {
        match self {
            Self::InProgress | Self::Reported(_) => 0,
            Self::TryPhaseCompleted => 1,
            Self::Complete => 2,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for OrderStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OrderStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerificationKind {
    PickupCode,
    ReturnCode,
    ReturnPhoto,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Verification {
    pub kind: VerificationKind,
    pub verified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderSnapshot {
    pub order_id: String,
    pub shop_name: String,
    pub pickup_address: String,
    pub pickup_location: Option<GeoPoint>,
    pub customer_address: String,
    pub customer_location: Option<GeoPoint>,
    pub items: Vec<OrderItem>,
    pub delivery_amount: f64,
    pub delivery_charge: f64,
    pub delivery_distance: f64,
    pub order_status: OrderStatus,
    #[serde(default)]
    pub verifications: Vec<Verification>,
    #[serde(default)]
    pub return_photo: Option<String>,
}

/// Partial order data carried by an order-update event. `None` leaves the
/// snapshot field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderPatch {
    pub shop_name: Option<String>,
    pub pickup_address: Option<String>,
    pub pickup_location: Option<GeoPoint>,
    pub customer_address: Option<String>,
    pub customer_location: Option<GeoPoint>,
    pub items: Option<Vec<OrderItem>>,
    pub delivery_amount: Option<f64>,
    pub delivery_charge: Option<f64>,
    pub delivery_distance: Option<f64>,
    pub order_status: Option<OrderStatus>,
}

impl OrderSnapshot {
    pub fn merge(&mut self, patch: OrderPatch) {
        if let Some(shop_name) = patch.shop_name {
            self.shop_name = shop_name;
        }
        if let Some(address) = patch.pickup_address {
            self.pickup_address = address;
        }
        if let Some(location) = patch.pickup_location {
            self.pickup_location = Some(location);
        }
        if let Some(address) = patch.customer_address {
            self.customer_address = address;
        }
        if let Some(location) = patch.customer_location {
            self.customer_location = Some(location);
        }
        if let Some(items) = patch.items {
            self.items = items;
        }
        if let Some(amount) = patch.delivery_amount {
            self.delivery_amount = amount;
        }
        if let Some(charge) = patch.delivery_charge {
            self.delivery_charge = charge;
        }
        if let Some(distance) = patch.delivery_distance {
            self.delivery_distance = distance;
        }
        // Completed phases are sticky; a late in-progress status only
        // replaces another in-progress one.
        if let Some(status) = patch.order_status {
            if status.phase() >= self.order_status.phase() {
                self.order_status = status;
            }
        }
    }

    pub fn record_verification(&mut self, kind: VerificationKind, at: DateTime<Utc>) {
        self.verifications.push(Verification {
            kind,
            verified_at: at,
        });
    }
}
