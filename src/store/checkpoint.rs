use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::AppError;
use crate::models::checkpoint::Checkpoint;
use crate::models::order::OrderSnapshot;
use crate::models::step::FlowStep;
use crate::store::KeyValueStore;

pub const ORDER_SNAPSHOT_KEY: &str = "currentOrderSnapshot";
pub const FLOW_STEP_KEY: &str = "currentFlowStep";
pub const TRY_STARTED_AT_KEY: &str = "tryPeriodStartedAt";

/// Reads and writes the checkpoint keys. Only the flow engine writes through
/// this type.
#[derive(Clone)]
pub struct CheckpointStore {
    store: Arc<dyn KeyValueStore>,
}

impl CheckpointStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn load(&self) -> Result<Option<Checkpoint>, AppError> {
        let Some(raw_order) = self.store.get(ORDER_SNAPSHOT_KEY).await? else {
            return Ok(None);
        };

        let order: OrderSnapshot = match serde_json::from_str(&raw_order) {
            Ok(order) => order,
            Err(err) => {
                warn!(error = %err, "discarding unreadable order snapshot");
                return Ok(None);
            }
        };

        let step = match self.store.get(FLOW_STEP_KEY).await? {
            Some(raw) => parse_step(&raw).unwrap_or_else(|| {
                warn!(raw = %raw, "unreadable flow step; resuming at accept");
                FlowStep::Accept
            }),
            None => FlowStep::Accept,
        };

        let try_started_at = match self.store.get(TRY_STARTED_AT_KEY).await? {
            Some(raw) => match DateTime::parse_from_rfc3339(&raw) {
                Ok(at) => Some(at.with_timezone(&Utc)),
                Err(err) => {
                    warn!(error = %err, "ignoring unreadable try-period timestamp");
                    None
                }
            },
            None => None,
        };

        Ok(Some(Checkpoint {
            order,
            step,
            try_started_at,
        }))
    }

    /// Writes snapshot and timestamp first and the step marker last, so the
    /// step never points past the data it belongs to.
    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<(), AppError> {
        let order = serde_json::to_string(&checkpoint.order)
            .map_err(|err| AppError::Storage(format!("failed to encode order snapshot: {err}")))?;
        self.store.set(ORDER_SNAPSHOT_KEY, &order).await?;

        match checkpoint.try_started_at {
            Some(at) => self.store.set(TRY_STARTED_AT_KEY, &at.to_rfc3339()).await?,
            None => self.store.delete(TRY_STARTED_AT_KEY).await?,
        }

        self.store
            .set(FLOW_STEP_KEY, &checkpoint.step.index().to_string())
            .await
    }

    /// Removes the snapshot first: it is the key that marks an active order,
    /// so a failure here leaves the checkpoint untouched. Leftover step and
    /// timestamp keys without a snapshot are never loaded.
    pub async fn clear(&self) -> Result<(), AppError> {
        self.store.delete(ORDER_SNAPSHOT_KEY).await?;

        for key in [FLOW_STEP_KEY, TRY_STARTED_AT_KEY] {
            if let Err(err) = self.store.delete(key).await {
                warn!(key, error = %err, "leaving orphaned checkpoint key behind");
            }
        }
        Ok(())
    }

    /// Order id of the persisted snapshot, used to rejoin the order room after
    /// a reconnect.
    pub async fn persisted_order_id(&self) -> Result<Option<String>, AppError> {
        Ok(self.load().await?.map(|checkpoint| checkpoint.order.order_id))
    }
}

fn parse_step(raw: &str) -> Option<FlowStep> {
    // Older builds stored the step JSON-encoded ("\"3\"").
    let trimmed = raw.trim().trim_matches('"');
    trimmed.parse::<u8>().ok().and_then(FlowStep::from_index)
}
