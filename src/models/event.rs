use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;
use crate::models::order::{GeoPoint, OrderItem, OrderPatch, OrderSnapshot, OrderStatus};

pub const UNKNOWN_SHOP: &str = "Unknown Shop";
pub const UNKNOWN_ADDRESS: &str = "Address unavailable";
const UNNAMED_ITEM: &str = "Item";

/// Raw frame as it travels over the real-time channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Messages the rider side emits on the channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "registerRider")]
    RegisterRider {
        #[serde(rename = "riderId")]
        rider_id: String,
    },
    #[serde(rename = "joinOrderRoom")]
    JoinOrderRoom {
        #[serde(rename = "orderId")]
        order_id: String,
    },
    #[serde(rename = "updateLocation")]
    UpdateLocation {
        #[serde(rename = "riderId")]
        rider_id: String,
        lat: f64,
        lng: f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    OrderAssigned(OrderAssignedEvent),
    OrderUpdate(OrderUpdateEvent),
}

impl ChannelEvent {
    /// Decodes a server frame. Unknown event names yield `None`.
    pub fn decode(frame: &Frame) -> Option<Self> {
        match frame.event.as_str() {
            "orderAssigned" => Some(Self::OrderAssigned(OrderAssignedEvent::from_payload(
                &frame.data,
            ))),
            "orderUpdate" => Some(Self::OrderUpdate(OrderUpdateEvent::from_payload(
                &frame.data,
            ))),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderAssignedEvent {
    pub order_id: Option<String>,
    pub fields: OrderPatch,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderUpdateEvent {
    pub order_id: Option<String>,
    pub fields: OrderPatch,
}

/// Result of mapping an assignment onto the snapshot shape, with the names of
/// the fields that fell back to defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedAssignment {
    pub snapshot: OrderSnapshot,
    pub defaulted: Vec<&'static str>,
}

impl OrderAssignedEvent {
    pub fn from_payload(payload: &Value) -> Self {
        let (order_id, fields) = extract_order(payload);
        Self { order_id, fields }
    }

    pub fn into_snapshot(self) -> Result<MappedAssignment, AppError> {
        let order_id = self.order_id.ok_or_else(|| {
            AppError::MalformedAssignment("assignment carries no order id".to_string())
        })?;

        let mut defaulted = Vec::new();
        let fields = self.fields;

        let mut or_default = |value: Option<String>, name: &'static str, fallback: &str| {
            value.unwrap_or_else(|| {
                defaulted.push(name);
                fallback.to_string()
            })
        };
        let shop_name = or_default(fields.shop_name, "shop_name", UNKNOWN_SHOP);
        let pickup_address = or_default(fields.pickup_address, "pickup_address", UNKNOWN_ADDRESS);
        let customer_address =
            or_default(fields.customer_address, "customer_address", UNKNOWN_ADDRESS);

        let mut number_or_zero = |value: Option<f64>, name: &'static str| {
            value.unwrap_or_else(|| {
                defaulted.push(name);
                0.0
            })
        };
        let delivery_amount = number_or_zero(fields.delivery_amount, "delivery_amount");
        let delivery_charge = number_or_zero(fields.delivery_charge, "delivery_charge");
        let delivery_distance = number_or_zero(fields.delivery_distance, "delivery_distance");

        let items = fields.items.unwrap_or_else(|| {
            defaulted.push("items");
            Vec::new()
        });

        Ok(MappedAssignment {
            snapshot: OrderSnapshot {
                order_id,
                shop_name,
                pickup_address,
                pickup_location: fields.pickup_location,
                customer_address,
                customer_location: fields.customer_location,
                items,
                delivery_amount,
                delivery_charge,
                delivery_distance,
                order_status: fields.order_status.unwrap_or_default(),
                verifications: Vec::new(),
                return_photo: None,
            },
            defaulted,
        })
    }
}

impl OrderUpdateEvent {
    pub fn from_payload(payload: &Value) -> Self {
        let (order_id, fields) = extract_order(payload);
        Self { order_id, fields }
    }
}

fn extract_order(payload: &Value) -> (Option<String>, OrderPatch) {
    // `{orderId, orderPayload}` envelopes carry the order one level down.
    let envelope_id = lookup(payload, &["orderId"]).and_then(as_text);
    let payload = lookup(payload, &["orderPayload"])
        .filter(|inner| inner.is_object())
        .unwrap_or(payload);

    let order_id = first_text(payload, &[&["_doc", "_id"], &["orderId"], &["_id"]]).or(envelope_id);

    let fields = OrderPatch {
        shop_name: first_text(payload, &[&["_doc", "merchantId", "shopName"]]),
        pickup_address: first_text(payload, &[&["_doc", "address"]]),
        pickup_location: lookup(payload, &["pickupLocation"]).and_then(as_point),
        customer_address: first_text(
            payload,
            &[&["_doc", "cutomerAddress"], &["_doc", "customerAddress"]],
        ),
        customer_location: lookup(payload, &["customerLocation"]).and_then(as_point),
        items: lookup(payload, &["_doc", "items"]).and_then(as_items),
        delivery_amount: lookup(payload, &["deliveryAmount"]).and_then(as_number),
        delivery_charge: lookup(payload, &["_doc", "deliveryCharge"]).and_then(as_number),
        delivery_distance: lookup(payload, &["_doc", "deliveryDistance"]).and_then(as_number),
        order_status: first_text(
            payload,
            &[&["orderStatus"], &["_doc", "orderStatus"], &["_doc", "status"]],
        )
        .map(|raw| OrderStatus::parse(&raw)),
    };

    (order_id, fields)
}

fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter()
        .try_fold(value, |current, key| current.get(key))
        .filter(|found| !found.is_null())
}

fn first_text(value: &Value, paths: &[&[&str]]) -> Option<String> {
    paths
        .iter()
        .find_map(|path| lookup(value, path).and_then(as_text))
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => {
            let trimmed = text.trim();
            (!trimmed.is_empty() && trimmed != "null").then(|| trimmed.to_string())
        }
        Value::Number(number) => Some(number.to_string()),
        // Mongo extended JSON: {"$oid": "..."}
        Value::Object(map) => map.get("$oid").and_then(as_text),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

fn as_point(value: &Value) -> Option<GeoPoint> {
    let pair = |lat: Option<&Value>, lng: Option<&Value>| -> Option<GeoPoint> {
        Some(GeoPoint {
            lat: lat.and_then(as_number)?,
            lng: lng.and_then(as_number)?,
        })
    };

    pair(value.get("lat"), value.get("lng"))
        .or_else(|| pair(value.get("latitude"), value.get("longitude")))
        .or_else(|| {
            // GeoJSON order is [lng, lat].
            let coordinates = value.get("coordinates")?.as_array()?;
            pair(coordinates.get(1), coordinates.first())
        })
}

fn as_items(value: &Value) -> Option<Vec<OrderItem>> {
    let entries = value.as_array()?;
    Some(
        entries
            .iter()
            .filter(|entry| entry.is_object())
            .map(|entry| OrderItem {
                name: first_text(entry, &[&["name"], &["productName"]])
                    .unwrap_or_else(|| UNNAMED_ITEM.to_string()),
                quantity: first_number(entry, &[&["quantity"], &["qty"]])
                    .filter(|quantity| *quantity >= 1.0)
                    .map(|quantity| quantity as u32)
                    .unwrap_or(1),
            })
            .collect(),
    )
}

fn first_number(value: &Value, paths: &[&[&str]]) -> Option<f64> {
    paths
        .iter()
        .find_map(|path| lookup(value, path).and_then(as_number))
}
