use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::channel::ChannelConnector;
use crate::client::api::RiderApi;
use crate::config::Config;
use crate::engine::actions::FlowActions;
use crate::engine::flow::{spawn_flow_engine, FlowHandle, FlowView};
use crate::engine::presence::PresenceController;
use crate::error::AppError;
use crate::location::{DeviceLocation, LocationService};
use crate::models::checkpoint::Checkpoint;
use crate::observability::metrics::Metrics;
use crate::store::checkpoint::CheckpointStore;
use crate::store::session::SessionStore;
use crate::store::KeyValueStore;

pub struct AppState {
    pub flow: FlowHandle,
    pub actions: FlowActions,
    pub presence: PresenceController,
    pub session: SessionStore,
    pub device: Arc<DeviceLocation>,
    pub api: Arc<dyn RiderApi>,
    pub metrics: Metrics,
    pub try_period: Duration,
}

impl AppState {
    /// Restores the flow from `store` and wires every component around it.
    pub async fn new(
        config: &Config,
        store: Arc<dyn KeyValueStore>,
        api: Arc<dyn RiderApi>,
        connector: Arc<dyn ChannelConnector>,
    ) -> Result<Self, AppError> {
        let metrics = Metrics::new();
        let checkpoints = CheckpointStore::new(store.clone());
        let session = SessionStore::new(store);
        let device = Arc::new(DeviceLocation::default());
        let location: Arc<dyn LocationService> = device.clone();

        let flow = spawn_flow_engine(
            checkpoints.clone(),
            metrics.clone(),
            config.command_queue_size,
            config.event_buffer_size,
        )
        .await?;

        let actions = FlowActions::new(
            api.clone(),
            flow.clone(),
            location.clone(),
            metrics.clone(),
            config.api_timeout,
        );
        let presence = PresenceController::new(
            location,
            connector,
            session.clone(),
            checkpoints,
            flow.clone(),
            metrics.clone(),
            config.location_interval,
            config.reconnect_delay,
        );

        Ok(Self {
            flow,
            actions,
            presence,
            session,
            device,
            api,
            metrics,
            try_period: config.try_period,
        })
    }

    pub async fn view_of(&self, state: Option<&Checkpoint>) -> FlowView {
        let position = self.device.current_position().await;
        FlowView::build(state, Utc::now(), self.try_period, position)
    }

    pub async fn flow_view(&self) -> Result<FlowView, AppError> {
        let current = self.flow.current().await?;
        Ok(self.view_of(current.as_ref()).await)
    }
}
