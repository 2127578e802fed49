//! Screen actions. Each action runs from one step, makes at most one backend
//! call and then asks the flow engine to advance. The flow only moves once the
//! backend call succeeded.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::client::api::RiderApi;
use crate::engine::flow::FlowHandle;
use crate::engine::machine::{AdvanceOutcome, Attachment};
use crate::error::AppError;
use crate::location::LocationService;
use crate::models::checkpoint::Checkpoint;
use crate::models::order::{GeoPoint, VerificationKind};
use crate::models::step::FlowStep;
use crate::observability::metrics::Metrics;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FlowAction {
    Accept,
    ReachedPickup,
    VerifyPickup { code: String },
    ReachedCustomer,
    Handover,
    ReportReturn,
    VerifyReturn { code: String },
    CaptureReturnItems { photo_ref: String },
    ReachedReturnLocation,
}

impl FlowAction {
    pub fn name(&self) -> &'static str {
        match self {
            FlowAction::Accept => "accept",
            FlowAction::ReachedPickup => "reached_pickup",
            FlowAction::VerifyPickup { .. } => "verify_pickup",
            FlowAction::ReachedCustomer => "reached_customer",
            FlowAction::Handover => "handover",
            FlowAction::ReportReturn => "report_return",
            FlowAction::VerifyReturn { .. } => "verify_return",
            FlowAction::CaptureReturnItems { .. } => "capture_return_items",
            FlowAction::ReachedReturnLocation => "reached_return_location",
        }
    }

    pub fn from(&self) -> FlowStep {
        match self {
            FlowAction::Accept => FlowStep::Accept,
            FlowAction::ReachedPickup => FlowStep::ReachPickup,
            FlowAction::VerifyPickup { .. } => FlowStep::PickupVerify,
            FlowAction::ReachedCustomer => FlowStep::ReachDelivery,
            FlowAction::Handover | FlowAction::ReportReturn => FlowStep::Try,
            FlowAction::VerifyReturn { .. } => FlowStep::ReturnVerify,
            FlowAction::CaptureReturnItems { .. } => FlowStep::ReturnItemCapture,
            FlowAction::ReachedReturnLocation => FlowStep::ReachReturnLocation,
        }
    }

    pub fn target(&self) -> FlowStep {
        match self {
            FlowAction::Accept => FlowStep::ReachPickup,
            FlowAction::ReachedPickup => FlowStep::PickupVerify,
            FlowAction::VerifyPickup { .. } => FlowStep::ReachDelivery,
            FlowAction::ReachedCustomer => FlowStep::Try,
            FlowAction::Handover => FlowStep::Earnings,
            FlowAction::ReportReturn => FlowStep::ReturnVerify,
            FlowAction::VerifyReturn { .. } => FlowStep::ReturnItemCapture,
            FlowAction::CaptureReturnItems { .. } => FlowStep::ReachReturnLocation,
            FlowAction::ReachedReturnLocation => FlowStep::MerchantReturnVerify,
        }
    }

    fn validate(&self) -> Result<(), AppError> {
        match self {
            FlowAction::VerifyPickup { code } | FlowAction::VerifyReturn { code } => {
                if code.len() == 4 && code.bytes().all(|b| b.is_ascii_digit()) {
                    Ok(())
                } else {
                    Err(AppError::BadRequest("code must be 4 digits".to_string()))
                }
            }
            FlowAction::CaptureReturnItems { photo_ref } if photo_ref.trim().is_empty() => Err(
                AppError::BadRequest("return photo reference is empty".to_string()),
            ),
            _ => Ok(()),
        }
    }

    fn needs_position(&self) -> bool {
        matches!(
            self,
            FlowAction::ReachedPickup
                | FlowAction::ReachedCustomer
                | FlowAction::ReachedReturnLocation
        )
    }

    fn attachment(&self) -> Option<Attachment> {
        match self {
            FlowAction::VerifyPickup { .. } => {
                Some(Attachment::Verification(VerificationKind::PickupCode))
            }
            FlowAction::VerifyReturn { .. } => {
                Some(Attachment::Verification(VerificationKind::ReturnCode))
            }
            FlowAction::CaptureReturnItems { photo_ref } => {
                Some(Attachment::ReturnPhoto(photo_ref.trim().to_string()))
            }
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct FlowActions {
    api: Arc<dyn RiderApi>,
    flow: FlowHandle,
    location: Arc<dyn LocationService>,
    metrics: Metrics,
    timeout: Duration,
}

impl FlowActions {
    pub fn new(
        api: Arc<dyn RiderApi>,
        flow: FlowHandle,
        location: Arc<dyn LocationService>,
        metrics: Metrics,
        timeout: Duration,
    ) -> Self {
        Self {
            api,
            flow,
            location,
            metrics,
            timeout,
        }
    }

    /// Runs `action` against the active order and returns the flow state
    /// afterwards. Repeating an action that already took effect is a no-op.
    pub async fn perform(&self, action: FlowAction) -> Result<Option<Checkpoint>, AppError> {
        let name = action.name();
        let current = self
            .flow
            .current()
            .await?
            .ok_or_else(|| AppError::Conflict("no active order".to_string()))?;

        if current.step >= action.target() {
            self.record(name, "skipped");
            return Ok(Some(current));
        }
        if current.step != action.from() {
            return Err(AppError::Conflict(format!(
                "{name} needs step {} but flow is at {}",
                action.from(),
                current.step
            )));
        }

        action.validate()?;
        let position = if action.needs_position() {
            Some(self.location.current_position().await.ok_or_else(|| {
                AppError::BadRequest("current position is not available".to_string())
            })?)
        } else {
            None
        };

        let order_id = current.order.order_id.as_str();
        let started = Instant::now();
        let result = timeout(self.timeout, self.call(&action, order_id, position)).await;
        self.metrics
            .action_latency_seconds
            .with_label_values(&[name])
            .observe(started.elapsed().as_secs_f64());

        let result = match result {
            Ok(result) => result,
            Err(_) => Err(AppError::action_failed(name, "request timed out")),
        };
        if let Err(err) = result {
            self.record(name, "failed");
            warn!(action = name, order_id = %order_id, error = %err, "action failed");
            return Err(err);
        }

        let outcome = self
            .flow
            .complete_action(action.from(), action.target(), action.attachment())
            .await?;
        match outcome {
            AdvanceOutcome::Superseded { current } => {
                self.record(name, "superseded");
                info!(
                    action = name,
                    order_id = %order_id,
                    current = %current,
                    "action confirmed after a server jump moved the flow"
                );
            }
            AdvanceOutcome::Advanced { .. } | AdvanceOutcome::AlreadyAt(_) => {
                self.record(name, "ok");
                info!(action = name, order_id = %order_id, "action completed");
            }
        }

        self.flow.current().await
    }

    async fn call(
        &self,
        action: &FlowAction,
        order_id: &str,
        position: Option<GeoPoint>,
    ) -> Result<(), AppError> {
        let at = || {
            position.ok_or_else(|| AppError::Internal("position was not resolved".to_string()))
        };

        match action {
            FlowAction::Accept => self.api.accept_order(order_id).await?,
            FlowAction::ReachedPickup => self.api.reached_pickup_location(order_id, at()?).await?,
            FlowAction::VerifyPickup { code } => self.api.verify_pickup_code(order_id, code).await?,
            FlowAction::ReachedCustomer => {
                self.api.reached_customer_location(order_id, at()?).await?
            }
            FlowAction::Handover => self.api.handover_package(order_id).await?,
            FlowAction::VerifyReturn { code } => self.api.verify_return(order_id, code).await?,
            FlowAction::ReachedReturnLocation => {
                self.api.reached_return_location(order_id, at()?).await?
            }
            FlowAction::ReportReturn | FlowAction::CaptureReturnItems { .. } => return Ok(()),
        };
        Ok(())
    }

    fn record(&self, action: &str, outcome: &str) {
        self.metrics
            .actions_total
            .with_label_values(&[action, outcome])
            .inc();
    }
}
