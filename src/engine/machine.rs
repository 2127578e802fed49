//! Pure order-flow state machine. No I/O happens here; the flow engine wraps it
//! with persistence and serialises every call.

use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::models::checkpoint::Checkpoint;
use crate::models::event::{MappedAssignment, OrderUpdateEvent};
use crate::models::order::{OrderStatus, VerificationKind};
use crate::models::step::FlowStep;

/// Result a screen attaches to the snapshot together with an advance.
#[derive(Debug, Clone, PartialEq)]
pub enum Attachment {
    Verification(VerificationKind),
    ReturnPhoto(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    Advanced { from: FlowStep, to: FlowStep },
    AlreadyAt(FlowStep),
    /// A server jump moved the flow past the requested step first.
    Superseded { current: FlowStep },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    NoActiveOrder,
    OtherOrder,
    Merged,
    Jumped { from: FlowStep, to: FlowStep },
    Stale { current: FlowStep, implied: FlowStep },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOutcome {
    Accepted,
    Duplicate,
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    Cleared,
    Idle,
}

/// Step a server-reported status forces the flow to, if any.
pub fn implied_step(status: &OrderStatus) -> Option<FlowStep> {
    match status {
        OrderStatus::Complete => Some(FlowStep::Earnings),
        OrderStatus::TryPhaseCompleted => Some(FlowStep::ReturnVerify),
        OrderStatus::InProgress | OrderStatus::Reported(_) => None,
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowMachine {
    active: Option<Checkpoint>,
}

impl FlowMachine {
    pub fn resume(checkpoint: Option<Checkpoint>) -> Self {
        Self { active: checkpoint }
    }

    pub fn current(&self) -> Option<&Checkpoint> {
        self.active.as_ref()
    }

    pub fn step(&self) -> Option<FlowStep> {
        self.active.as_ref().map(|active| active.step)
    }

    pub fn advance(
        &mut self,
        target: FlowStep,
        attachment: Option<Attachment>,
        now: DateTime<Utc>,
    ) -> Result<AdvanceOutcome, AppError> {
        let active = self
            .active
            .as_mut()
            .ok_or_else(|| AppError::Conflict("no active order".to_string()))?;
        let from = active.step;

        if target == from {
            return Ok(AdvanceOutcome::AlreadyAt(from));
        }
        if target < from {
            return Ok(AdvanceOutcome::Superseded { current: from });
        }
        if !from.can_advance_to(target) {
            return Err(AppError::Conflict(format!(
                "cannot advance from {from} to {target}"
            )));
        }

        active.step = target;
        if target == FlowStep::Try {
            active.try_started_at = Some(now);
        }
        match attachment {
            Some(Attachment::Verification(kind)) => active.order.record_verification(kind, now),
            Some(Attachment::ReturnPhoto(reference)) => {
                active.order.record_verification(VerificationKind::ReturnPhoto, now);
                active.order.return_photo = Some(reference);
            }
            None => {}
        }

        Ok(AdvanceOutcome::Advanced { from, to: target })
    }

    /// Advance for a screen action that started at `from` and whose backend
    /// call already succeeded. If a server jump moved the flow off `from` in
    /// the meantime, the action is superseded rather than rejected.
    pub fn complete_action(
        &mut self,
        from: FlowStep,
        target: FlowStep,
        attachment: Option<Attachment>,
        now: DateTime<Utc>,
    ) -> Result<AdvanceOutcome, AppError> {
        match self.step() {
            Some(current) if current != target && current > from => {
                Ok(AdvanceOutcome::Superseded { current })
            }
            _ => self.advance(target, attachment, now),
        }
    }

    pub fn apply_update(&mut self, event: OrderUpdateEvent) -> UpdateOutcome {
        let Some(active) = self.active.as_mut() else {
            return UpdateOutcome::NoActiveOrder;
        };
        if let Some(order_id) = &event.order_id {
            if *order_id != active.order.order_id {
                return UpdateOutcome::OtherOrder;
            }
        }

        let mut fields = event.fields;
        let implied = fields.order_status.as_ref().and_then(implied_step);
        let current = active.step;

        match implied {
            Some(implied) if implied < current => {
                // Stale: keep the data, not the phase it reports.
                fields.order_status = None;
                active.order.merge(fields);
                UpdateOutcome::Stale { current, implied }
            }
            Some(implied) if implied > current => {
                active.order.merge(fields);
                active.step = implied;
                UpdateOutcome::Jumped {
                    from: current,
                    to: implied,
                }
            }
            _ => {
                active.order.merge(fields);
                UpdateOutcome::Merged
            }
        }
    }

    pub fn accept_assignment(&mut self, mapped: MappedAssignment) -> AssignOutcome {
        match &self.active {
            Some(active) if active.order.order_id == mapped.snapshot.order_id => {
                AssignOutcome::Duplicate
            }
            Some(_) => AssignOutcome::Busy,
            None => {
                self.active = Some(Checkpoint {
                    order: mapped.snapshot,
                    step: FlowStep::Accept,
                    try_started_at: None,
                });
                AssignOutcome::Accepted
            }
        }
    }

    pub fn reset(&mut self) -> Result<ResetOutcome, AppError> {
        match self.step() {
            None => Ok(ResetOutcome::Idle),
            Some(FlowStep::Earnings) => {
                self.active = None;
                Ok(ResetOutcome::Cleared)
            }
            Some(step) => Err(AppError::Conflict(format!(
                "order can only be finished from earnings, flow is at {step}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use serde_json::json;

    use super::*;
    use crate::models::event::OrderAssignedEvent;
    use crate::models::order::OrderPatch;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn assigned(order_id: &str) -> FlowMachine {
        let payload = json!({
            "_doc": { "_id": order_id, "merchantId": { "shopName": "ABC Restaurant" } },
            "deliveryAmount": 120
        });
        let mapped = OrderAssignedEvent::from_payload(&payload)
            .into_snapshot()
            .unwrap();
        let mut machine = FlowMachine::default();
        assert_eq!(machine.accept_assignment(mapped), AssignOutcome::Accepted);
        machine
    }

    fn update(status: &str) -> OrderUpdateEvent {
        OrderUpdateEvent {
            order_id: None,
            fields: OrderPatch {
                order_status: Some(OrderStatus::parse(status)),
                ..OrderPatch::default()
            },
        }
    }

    fn walk_to(machine: &mut FlowMachine, target: FlowStep) {
        while machine.step().unwrap() < target {
            let next = machine.step().unwrap().next_steps()[0];
            machine.advance(next, None, now()).unwrap();
        }
    }

    #[test]
    fn advance_follows_the_transition_table() {
        let mut machine = assigned("ord-1");
        let outcome = machine.advance(FlowStep::ReachPickup, None, now()).unwrap();
        assert_eq!(
            outcome,
            AdvanceOutcome::Advanced {
                from: FlowStep::Accept,
                to: FlowStep::ReachPickup
            }
        );

        let skipped = machine.advance(FlowStep::ReachDelivery, None, now());
        assert!(matches!(skipped, Err(AppError::Conflict(_))));
        assert_eq!(machine.step(), Some(FlowStep::ReachPickup));
    }

    #[test]
    fn advancing_to_current_step_changes_nothing() {
        let mut machine = assigned("ord-1");
        machine.advance(FlowStep::ReachPickup, None, now()).unwrap();
        let before = machine.clone();

        let outcome = machine
            .advance(
                FlowStep::ReachPickup,
                Some(Attachment::Verification(VerificationKind::PickupCode)),
                now(),
            )
            .unwrap();

        assert_eq!(outcome, AdvanceOutcome::AlreadyAt(FlowStep::ReachPickup));
        assert_eq!(machine, before);
    }

    #[test]
    fn entering_try_stamps_start_time() {
        let mut machine = assigned("ord-1");
        walk_to(&mut machine, FlowStep::Try);
        assert_eq!(machine.current().unwrap().try_started_at, Some(now()));
    }

    #[test]
    fn complete_status_jumps_to_earnings_and_keeps_snapshot() {
        let mut machine = assigned("ord-1");
        machine.advance(FlowStep::ReachPickup, None, now()).unwrap();

        let outcome = machine.apply_update(update("complete"));

        assert_eq!(
            outcome,
            UpdateOutcome::Jumped {
                from: FlowStep::ReachPickup,
                to: FlowStep::Earnings
            }
        );
        let active = machine.current().unwrap();
        assert_eq!(active.order.shop_name, "ABC Restaurant");
        assert_eq!(active.order.order_status, OrderStatus::Complete);
    }

    #[test]
    fn late_in_progress_status_keeps_order_complete() {
        let mut machine = assigned("ord-1");
        machine.apply_update(update("complete"));

        let outcome = machine.apply_update(update("inProgress"));

        assert_eq!(outcome, UpdateOutcome::Merged);
        let active = machine.current().unwrap();
        assert_eq!(active.step, FlowStep::Earnings);
        assert_eq!(active.order.order_status, OrderStatus::Complete);
    }

    #[test]
    fn stale_update_does_not_regress_but_merges_data() {
        let mut machine = assigned("ord-1");
        walk_to(&mut machine, FlowStep::Try);
        machine
            .advance(FlowStep::ReturnVerify, None, now())
            .unwrap();

        let mut event = update("completed try phase");
        event.fields.delivery_amount = Some(99.0);
        machine.advance(FlowStep::ReturnItemCapture, None, now()).unwrap();
        let outcome = machine.apply_update(event);

        assert_eq!(
            outcome,
            UpdateOutcome::Stale {
                current: FlowStep::ReturnItemCapture,
                implied: FlowStep::ReturnVerify
            }
        );
        let active = machine.current().unwrap();
        assert_eq!(active.step, FlowStep::ReturnItemCapture);
        assert_eq!(active.order.delivery_amount, 99.0);
        assert_eq!(active.order.order_status, OrderStatus::InProgress);
    }

    #[test]
    fn user_advance_after_server_jump_is_superseded() {
        let mut machine = assigned("ord-1");
        machine.apply_update(update("complete"));

        let outcome = machine.advance(FlowStep::ReachPickup, None, now()).unwrap();
        assert_eq!(
            outcome,
            AdvanceOutcome::Superseded {
                current: FlowStep::Earnings
            }
        );
        assert_eq!(machine.step(), Some(FlowStep::Earnings));
    }

    #[test]
    fn action_on_a_branch_left_by_a_server_jump_is_superseded() {
        let mut machine = assigned("ord-1");
        walk_to(&mut machine, FlowStep::Try);
        machine.apply_update(update("completedTryPhase"));

        let outcome = machine
            .complete_action(FlowStep::Try, FlowStep::Earnings, None, now())
            .unwrap();

        assert_eq!(
            outcome,
            AdvanceOutcome::Superseded {
                current: FlowStep::ReturnVerify
            }
        );
        assert_eq!(machine.step(), Some(FlowStep::ReturnVerify));
        assert!(machine
            .advance(FlowStep::Earnings, None, now())
            .is_err());
    }

    #[test]
    fn update_for_other_order_is_ignored() {
        let mut machine = assigned("ord-1");
        let mut event = update("complete");
        event.order_id = Some("ord-2".to_string());

        assert_eq!(machine.apply_update(event), UpdateOutcome::OtherOrder);
        assert_eq!(machine.step(), Some(FlowStep::Accept));
    }

    #[test]
    fn assignment_while_busy_is_ignored() {
        let mut machine = assigned("ord-1");
        let other = OrderAssignedEvent::from_payload(&json!({ "_id": "ord-2" }))
            .into_snapshot()
            .unwrap();
        let same = OrderAssignedEvent::from_payload(&json!({ "_id": "ord-1" }))
            .into_snapshot()
            .unwrap();

        assert_eq!(machine.accept_assignment(other), AssignOutcome::Busy);
        assert_eq!(machine.accept_assignment(same), AssignOutcome::Duplicate);
        assert_eq!(machine.current().unwrap().order.order_id, "ord-1");
    }

    #[test]
    fn reset_only_from_earnings() {
        let mut machine = assigned("ord-1");
        assert!(matches!(machine.reset(), Err(AppError::Conflict(_))));

        machine.apply_update(update("complete"));
        assert_eq!(machine.reset().unwrap(), ResetOutcome::Cleared);
        assert_eq!(machine.current(), None);
        assert_eq!(machine.reset().unwrap(), ResetOutcome::Idle);
    }

    #[test]
    fn step_never_regresses_over_mixed_sequence() {
        let mut machine = assigned("ord-1");
        let statuses = ["inProgress", "completedTryPhase", "pickedUp", "complete"];
        let mut highest = machine.step().unwrap();
        let mut at = now();

        for round in 0..12 {
            at += TimeDelta::seconds(1);
            if round % 3 == 0 {
                machine.apply_update(update(statuses[round % statuses.len()]));
            } else if let Some(next) = machine.step().unwrap().next_steps().first() {
                machine.advance(*next, None, at).unwrap();
            }
            let step = machine.step().unwrap();
            assert!(step >= highest, "regressed from {highest} to {step}");
            highest = step;
        }
    }
}
