pub mod tracker;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::models::order::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    Granted,
    Denied,
    #[default]
    Undetermined,
}

/// On-device location access.
#[async_trait]
pub trait LocationService: Send + Sync {
    /// Asks for foreground permission and returns the resulting status.
    async fn request_permission(&self) -> PermissionStatus;
    async fn services_enabled(&self) -> bool;
    async fn current_position(&self) -> Option<GeoPoint>;
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct DeviceState {
    pub permission: PermissionStatus,
    pub services_enabled: bool,
    pub position: Option<GeoPoint>,
}

/// Partial device report; absent fields keep their last value.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct DeviceReport {
    pub permission: Option<PermissionStatus>,
    pub services_enabled: Option<bool>,
    pub position: Option<GeoPoint>,
}

/// Location service fed by the host: the platform layer reports permission,
/// GPS state and fixes, and the agent reads them back.
#[derive(Default)]
pub struct DeviceLocation {
    state: RwLock<DeviceState>,
}

impl DeviceLocation {
    pub fn new(initial: DeviceState) -> Self {
        Self {
            state: RwLock::new(initial),
        }
    }

    pub async fn report(&self, report: DeviceReport) -> DeviceState {
        let mut state = self.state.write().await;
        if let Some(permission) = report.permission {
            state.permission = permission;
        }
        if let Some(enabled) = report.services_enabled {
            state.services_enabled = enabled;
        }
        if let Some(position) = report.position {
            state.position = Some(position);
        }
        *state
    }

    pub async fn state(&self) -> DeviceState {
        *self.state.read().await
    }
}

#[async_trait]
impl LocationService for DeviceLocation {
    async fn request_permission(&self) -> PermissionStatus {
        self.state.read().await.permission
    }

    async fn services_enabled(&self) -> bool {
        self.state.read().await.services_enabled
    }

    async fn current_position(&self) -> Option<GeoPoint> {
        let state = self.state.read().await;
        // No fixes leave the device without permission.
        (state.permission == PermissionStatus::Granted)
            .then_some(state.position)
            .flatten()
    }
}
