//! Single-writer order-flow engine.
//!
//! Screen advances, server events and resets all travel through one command
//! queue, so step and snapshot are never mutated concurrently. Every change is
//! applied in memory first and then written to the checkpoint; a failed write
//! rolls the in-memory state back.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::engine::machine::{
    AdvanceOutcome, AssignOutcome, Attachment, FlowMachine, ResetOutcome, UpdateOutcome,
};
use crate::engine::try_period::{self, TryPeriod};
use crate::error::AppError;
use crate::geo::distance_to_target_km;
use crate::models::checkpoint::Checkpoint;
use crate::models::event::{ChannelEvent, OrderAssignedEvent, OrderUpdateEvent};
use crate::models::order::{GeoPoint, OrderSnapshot};
use crate::models::step::FlowStep;
use crate::observability::metrics::Metrics;
use crate::store::checkpoint::CheckpointStore;

/// Outcome of feeding one channel event to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Assigned {
        order_id: String,
        outcome: AssignOutcome,
    },
    Updated(UpdateOutcome),
}

enum FlowCommand {
    Advance {
        from: Option<FlowStep>,
        target: FlowStep,
        attachment: Option<Attachment>,
        reply: oneshot::Sender<Result<AdvanceOutcome, AppError>>,
    },
    ServerEvent {
        event: ChannelEvent,
        reply: oneshot::Sender<Result<EventOutcome, AppError>>,
    },
    Reset {
        reply: oneshot::Sender<Result<ResetOutcome, AppError>>,
    },
    Current {
        reply: oneshot::Sender<Option<Checkpoint>>,
    },
}

/// Cloneable front door to the engine task.
#[derive(Clone)]
pub struct FlowHandle {
    cmd_tx: mpsc::Sender<FlowCommand>,
    changes_tx: broadcast::Sender<Option<Checkpoint>>,
}

impl FlowHandle {
    pub async fn advance(
        &self,
        target: FlowStep,
        attachment: Option<Attachment>,
    ) -> Result<AdvanceOutcome, AppError> {
        self.request(|reply| FlowCommand::Advance {
            from: None,
            target,
            attachment,
            reply,
        })
        .await?
    }

    /// Advance on behalf of a confirmed screen action that ran from `from`.
    pub async fn complete_action(
        &self,
        from: FlowStep,
        target: FlowStep,
        attachment: Option<Attachment>,
    ) -> Result<AdvanceOutcome, AppError> {
        self.request(|reply| FlowCommand::Advance {
            from: Some(from),
            target,
            attachment,
            reply,
        })
        .await?
    }

    pub async fn apply_server_event(&self, event: ChannelEvent) -> Result<EventOutcome, AppError> {
        self.request(|reply| FlowCommand::ServerEvent { event, reply })
            .await?
    }

    pub async fn accept_assignment(
        &self,
        event: OrderAssignedEvent,
    ) -> Result<EventOutcome, AppError> {
        self.apply_server_event(ChannelEvent::OrderAssigned(event))
            .await
    }

    pub async fn apply_update(&self, event: OrderUpdateEvent) -> Result<EventOutcome, AppError> {
        self.apply_server_event(ChannelEvent::OrderUpdate(event))
            .await
    }

    pub async fn reset(&self) -> Result<ResetOutcome, AppError> {
        self.request(|reply| FlowCommand::Reset { reply }).await?
    }

    pub async fn current(&self) -> Result<Option<Checkpoint>, AppError> {
        self.request(|reply| FlowCommand::Current { reply }).await
    }

    /// Receives the new flow state after every committed change.
    pub fn subscribe(&self) -> broadcast::Receiver<Option<Checkpoint>> {
        self.changes_tx.subscribe()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> FlowCommand,
    ) -> Result<T, AppError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(command(reply))
            .await
            .map_err(|_| AppError::Internal("flow engine is not running".to_string()))?;
        rx.await
            .map_err(|_| AppError::Internal("flow engine dropped the request".to_string()))
    }
}

pub struct FlowEngine {
    machine: FlowMachine,
    checkpoints: CheckpointStore,
    metrics: Metrics,
    changes_tx: broadcast::Sender<Option<Checkpoint>>,
    cmd_rx: mpsc::Receiver<FlowCommand>,
}

impl FlowEngine {
    /// Restores the flow from the checkpoint and returns the engine together
    /// with its handle. The engine does nothing until [`FlowEngine::run`].
    pub async fn initialize(
        checkpoints: CheckpointStore,
        metrics: Metrics,
        queue_size: usize,
        event_buffer_size: usize,
    ) -> Result<(Self, FlowHandle), AppError> {
        let checkpoint = checkpoints.load().await?;

        match &checkpoint {
            Some(resumed) => {
                let elapsed = (resumed.step == FlowStep::Try)
                    .then_some(resumed.try_started_at)
                    .flatten()
                    .map(|started_at| try_period::elapsed(Utc::now(), started_at).as_secs());
                info!(
                    order_id = %resumed.order.order_id,
                    step = %resumed.step,
                    try_elapsed_secs = ?elapsed,
                    "resuming order flow from checkpoint"
                );
            }
            None => debug!("no checkpoint; flow is idle"),
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(queue_size);
        let (changes_tx, _unused_rx) = broadcast::channel(event_buffer_size);

        let engine = Self {
            machine: FlowMachine::resume(checkpoint),
            checkpoints,
            metrics,
            changes_tx: changes_tx.clone(),
            cmd_rx,
        };
        let handle = FlowHandle { cmd_tx, changes_tx };

        Ok((engine, handle))
    }

    pub async fn run(mut self) {
        info!("flow engine started");

        while let Some(command) = self.cmd_rx.recv().await {
            match command {
                FlowCommand::Advance {
                    from,
                    target,
                    attachment,
                    reply,
                } => {
                    let result = self.advance(from, target, attachment).await;
                    let _ = reply.send(result);
                }
                FlowCommand::ServerEvent { event, reply } => {
                    let result = self.server_event(event).await;
                    let _ = reply.send(result);
                }
                FlowCommand::Reset { reply } => {
                    let result = self.reset().await;
                    let _ = reply.send(result);
                }
                FlowCommand::Current { reply } => {
                    let _ = reply.send(self.machine.current().cloned());
                }
            }
        }

        warn!("flow engine stopped: command channel closed");
    }

    async fn advance(
        &mut self,
        action_from: Option<FlowStep>,
        target: FlowStep,
        attachment: Option<Attachment>,
    ) -> Result<AdvanceOutcome, AppError> {
        let previous = self.machine.clone();
        let now = Utc::now();
        let outcome = match action_from {
            Some(from) => self.machine.complete_action(from, target, attachment, now)?,
            None => self.machine.advance(target, attachment, now)?,
        };

        match outcome {
            AdvanceOutcome::Advanced { from, to } => {
                self.commit(previous).await?;
                self.metrics
                    .flow_transitions_total
                    .with_label_values(&["user"])
                    .inc();
                info!(from = %from, to = %to, "flow advanced");
            }
            AdvanceOutcome::AlreadyAt(step) => debug!(step = %step, "advance is a no-op"),
            AdvanceOutcome::Superseded { current } => {
                info!(
                    requested = %target,
                    current = %current,
                    "advance superseded by a server jump"
                );
            }
        }

        Ok(outcome)
    }

    async fn server_event(&mut self, event: ChannelEvent) -> Result<EventOutcome, AppError> {
        match event {
            ChannelEvent::OrderAssigned(event) => self.assignment(event).await,
            ChannelEvent::OrderUpdate(event) => self.update(event).await,
        }
    }

    async fn assignment(&mut self, event: OrderAssignedEvent) -> Result<EventOutcome, AppError> {
        let mapped = event.into_snapshot().inspect_err(|err| {
            warn!(error = %err, "dropping order assignment");
        })?;
        if !mapped.defaulted.is_empty() {
            warn!(
                order_id = %mapped.snapshot.order_id,
                defaulted = ?mapped.defaulted,
                "order assignment is missing fields; using fallbacks"
            );
        }

        let order_id = mapped.snapshot.order_id.clone();
        let previous = self.machine.clone();
        let outcome = self.machine.accept_assignment(mapped);

        match outcome {
            AssignOutcome::Accepted => {
                self.commit(previous).await?;
                self.metrics
                    .flow_transitions_total
                    .with_label_values(&["assignment"])
                    .inc();
                info!(order_id = %order_id, "order assigned");
            }
            AssignOutcome::Duplicate => debug!(order_id = %order_id, "duplicate assignment"),
            AssignOutcome::Busy => {
                warn!(order_id = %order_id, "assignment ignored: another order is active")
            }
        }

        Ok(EventOutcome::Assigned { order_id, outcome })
    }

    async fn update(&mut self, event: OrderUpdateEvent) -> Result<EventOutcome, AppError> {
        let previous = self.machine.clone();
        let outcome = self.machine.apply_update(event);

        match outcome {
            UpdateOutcome::NoActiveOrder => debug!("order update ignored: flow is idle"),
            UpdateOutcome::OtherOrder => debug!("order update ignored: not the active order"),
            UpdateOutcome::Merged => self.commit(previous).await?,
            UpdateOutcome::Jumped { from, to } => {
                self.commit(previous).await?;
                self.metrics
                    .flow_transitions_total
                    .with_label_values(&["server"])
                    .inc();
                info!(from = %from, to = %to, "flow jumped on server update");
            }
            UpdateOutcome::Stale { current, implied } => {
                self.commit(previous).await?;
                self.metrics.stale_events_total.inc();
                warn!(
                    error = %AppError::StaleEvent { current, implied },
                    "dropping stale order update"
                );
            }
        }

        Ok(EventOutcome::Updated(outcome))
    }

    async fn reset(&mut self) -> Result<ResetOutcome, AppError> {
        let previous = self.machine.clone();
        let outcome = self.machine.reset()?;

        if outcome == ResetOutcome::Cleared {
            if let Err(err) = self.checkpoints.clear().await {
                self.machine = previous;
                return Err(err);
            }
            self.metrics
                .flow_transitions_total
                .with_label_values(&["reset"])
                .inc();
            let _ = self.changes_tx.send(None);
            info!("order finished; flow reset");
        }

        Ok(outcome)
    }

    /// Persists the current machine state, restoring `previous` if the write
    /// fails.
    async fn commit(&mut self, previous: FlowMachine) -> Result<(), AppError> {
        let Some(checkpoint) = self.machine.current().cloned() else {
            return Ok(());
        };

        if let Err(err) = self.checkpoints.save(&checkpoint).await {
            error!(error = %err, "checkpoint write failed; rolling back");
            self.machine = previous;
            return Err(err);
        }

        let _ = self.changes_tx.send(Some(checkpoint));
        Ok(())
    }
}

/// Read model handed to screens.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FlowView {
    pub active: bool,
    pub step: Option<FlowStep>,
    pub step_index: Option<u8>,
    pub next_steps: Vec<FlowStep>,
    pub order: Option<OrderSnapshot>,
    pub try_period: Option<TryPeriod>,
    pub distance_to_target_km: Option<f64>,
}

impl FlowView {
    pub fn build(
        state: Option<&Checkpoint>,
        now: DateTime<Utc>,
        try_window: Duration,
        position: Option<GeoPoint>,
    ) -> Self {
        let Some(active) = state else {
            return Self {
                active: false,
                step: None,
                step_index: None,
                next_steps: Vec::new(),
                order: None,
                try_period: None,
                distance_to_target_km: None,
            };
        };

        let try_period = (active.step == FlowStep::Try)
            .then_some(active.try_started_at)
            .flatten()
            .map(|started_at| try_period::report(now, started_at, try_window));

        Self {
            active: true,
            step: Some(active.step),
            step_index: Some(active.step.index()),
            next_steps: active.step.next_steps().to_vec(),
            order: Some(active.order.clone()),
            try_period,
            distance_to_target_km: distance_to_target_km(active.step, &active.order, position),
        }
    }
}

/// Spawns the engine on the current runtime and returns its handle.
pub async fn spawn_flow_engine(
    checkpoints: CheckpointStore,
    metrics: Metrics,
    queue_size: usize,
    event_buffer_size: usize,
) -> Result<FlowHandle, AppError> {
    let (engine, handle) =
        FlowEngine::initialize(checkpoints, metrics, queue_size, event_buffer_size).await?;
    tokio::spawn(engine.run());
    Ok(handle)
}
