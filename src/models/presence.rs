use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PresenceStatus {
    pub online: bool,
    pub channel_open: bool,
    pub tracking: bool,
}
