use std::fmt;

use serde::{Deserialize, Serialize};

/// Stage of a delivery. The discriminant is the stage index persisted in the
/// checkpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FlowStep {
    Accept = 0,
    ReachPickup = 1,
    PickupVerify = 2,
    ReachDelivery = 3,
    Try = 4,
    ReturnVerify = 5,
    ReturnItemCapture = 6,
    ReachReturnLocation = 7,
    MerchantReturnVerify = 8,
    Earnings = 9,
}

impl FlowStep {
    pub const ALL: [FlowStep; 10] = [
        FlowStep::Accept,
        FlowStep::ReachPickup,
        FlowStep::PickupVerify,
        FlowStep::ReachDelivery,
        FlowStep::Try,
        FlowStep::ReturnVerify,
        FlowStep::ReturnItemCapture,
        FlowStep::ReachReturnLocation,
        FlowStep::MerchantReturnVerify,
        FlowStep::Earnings,
    ];

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    /// Steps a user action may move to from `self`.
    pub fn next_steps(self) -> &'static [FlowStep] {
        match self {
            FlowStep::Accept => &[FlowStep::ReachPickup],
            FlowStep::ReachPickup => &[FlowStep::PickupVerify],
            FlowStep::PickupVerify => &[FlowStep::ReachDelivery],
            FlowStep::ReachDelivery => &[FlowStep::Try],
            FlowStep::Try => &[FlowStep::ReturnVerify, FlowStep::Earnings],
            FlowStep::ReturnVerify => &[FlowStep::ReturnItemCapture],
            FlowStep::ReturnItemCapture => &[FlowStep::ReachReturnLocation],
            FlowStep::ReachReturnLocation => &[FlowStep::MerchantReturnVerify],
            FlowStep::MerchantReturnVerify => &[FlowStep::Earnings],
            FlowStep::Earnings => &[],
        }
    }

    pub fn can_advance_to(self, target: FlowStep) -> bool {
        self.next_steps().contains(&target)
    }

    pub fn is_terminal(self) -> bool {
        self == FlowStep::Earnings
    }
}

impl fmt::Display for FlowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.index())
    }
}
