use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::order::OrderSnapshot;
use crate::models::step::FlowStep;

/// Durable mirror of the flow, read once at start-up to resume a delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub order: OrderSnapshot,
    pub step: FlowStep,
    pub try_started_at: Option<DateTime<Utc>>,
}
