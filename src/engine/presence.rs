//! Online/offline toggle. Going online checks location access, opens the event
//! channel, feeds its events into the flow engine and starts streaming the
//! rider's position. Going offline tears all of it down.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{ChannelConnector, EventChannel};
use crate::engine::flow::{EventOutcome, FlowHandle};
use crate::engine::machine::AssignOutcome;
use crate::error::AppError;
use crate::location::tracker::{watch_position, TrackingHandle};
use crate::location::{LocationService, PermissionStatus};
use crate::models::event::{ChannelEvent, ClientMessage};
use crate::models::presence::PresenceStatus;
use crate::observability::metrics::Metrics;
use crate::store::checkpoint::CheckpointStore;
use crate::store::session::SessionStore;

#[derive(Default)]
struct Online {
    channel: Option<EventChannel>,
    tracker: Option<TrackingHandle>,
    pump: Option<JoinHandle<()>>,
}

pub struct PresenceController {
    online: Mutex<Online>,
    location: Arc<dyn LocationService>,
    connector: Arc<dyn ChannelConnector>,
    session: SessionStore,
    checkpoints: CheckpointStore,
    flow: FlowHandle,
    metrics: Metrics,
    location_interval: Duration,
    reconnect_delay: Duration,
}

impl PresenceController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        location: Arc<dyn LocationService>,
        connector: Arc<dyn ChannelConnector>,
        session: SessionStore,
        checkpoints: CheckpointStore,
        flow: FlowHandle,
        metrics: Metrics,
        location_interval: Duration,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            online: Mutex::new(Online::default()),
            location,
            connector,
            session,
            checkpoints,
            flow,
            metrics,
            location_interval,
            reconnect_delay,
        }
    }

    pub async fn go_online(&self) -> Result<PresenceStatus, AppError> {
        let mut online = self.online.lock().await;
        if online.channel.is_some() {
            return Ok(status_of(&online));
        }

        if self.location.request_permission().await != PermissionStatus::Granted {
            return Err(AppError::PermissionDenied);
        }
        if !self.location.services_enabled().await {
            return Err(AppError::LocationServicesOff);
        }
        let rider_id = self
            .session
            .rider_id()
            .await?
            .ok_or_else(|| AppError::NotAuthenticated("no rider id stored".to_string()))?;

        let (events_tx, events_rx) = mpsc::channel(64);
        let channel = EventChannel::open(
            self.connector.clone(),
            rider_id.clone(),
            self.checkpoints.clone(),
            self.reconnect_delay,
            self.metrics.clone(),
            events_tx,
        );
        let sender = channel.sender();

        let pump = tokio::spawn(pump_events(self.flow.clone(), events_rx, sender.clone()));

        let metrics = self.metrics.clone();
        let tracker_rider = rider_id.clone();
        let tracker = watch_position(self.location.clone(), self.location_interval, move |fix| {
            let update = ClientMessage::UpdateLocation {
                rider_id: tracker_rider.clone(),
                lat: fix.lat,
                lng: fix.lng,
            };
            match sender.try_send(update) {
                Ok(()) => metrics.location_updates_total.inc(),
                Err(err) => debug!(error = %err, "location update not queued"),
            }
        });

        online.channel = Some(channel);
        online.tracker = Some(tracker);
        online.pump = Some(pump);
        self.metrics.presence_online.set(1);
        info!(rider_id = %rider_id, "rider is online");

        Ok(status_of(&online))
    }

    /// Safe to call when already offline.
    pub async fn go_offline(&self) -> PresenceStatus {
        let mut online = self.online.lock().await;

        if let Some(tracker) = online.tracker.take() {
            tracker.stop();
        }
        if let Some(channel) = online.channel.take() {
            channel.close().await;
            info!("rider is offline");
        }
        if let Some(pump) = online.pump.take() {
            // Ends on its own once the channel has dropped its event sender.
            if let Err(err) = pump.await {
                warn!(error = %err, "event pump ended abnormally");
            }
        }
        self.metrics.presence_online.set(0);

        status_of(&online)
    }

    pub async fn status(&self) -> PresenceStatus {
        status_of(&*self.online.lock().await)
    }
}

fn status_of(online: &Online) -> PresenceStatus {
    PresenceStatus {
        online: online.channel.is_some(),
        channel_open: online
            .channel
            .as_ref()
            .is_some_and(|channel| channel.is_connected()),
        tracking: online
            .tracker
            .as_ref()
            .is_some_and(|tracker| tracker.is_running()),
    }
}

async fn pump_events(
    flow: FlowHandle,
    mut events: mpsc::Receiver<ChannelEvent>,
    sender: mpsc::Sender<ClientMessage>,
) {
    while let Some(event) = events.recv().await {
        match flow.apply_server_event(event).await {
            Ok(EventOutcome::Assigned {
                order_id,
                outcome: AssignOutcome::Accepted,
            }) => {
                if sender
                    .send(ClientMessage::JoinOrderRoom { order_id })
                    .await
                    .is_err()
                {
                    debug!("channel closed before joining order room");
                }
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "channel event rejected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::time::timeout;

    use super::*;
    use crate::channel::testing::{MemoryConnector, ServerSide};
    use crate::engine::flow::spawn_flow_engine;
    use crate::location::{DeviceLocation, DeviceReport, DeviceState};
    use crate::models::event::Frame;
    use crate::models::order::GeoPoint;
    use crate::models::step::FlowStep;
    use crate::store::MemoryStore;

    struct Harness {
        presence: PresenceController,
        device: Arc<DeviceLocation>,
        accepted: mpsc::UnboundedReceiver<ServerSide>,
        flow: FlowHandle,
        metrics: Metrics,
        session: SessionStore,
    }

    async fn harness(state: DeviceState) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let checkpoints = CheckpointStore::new(store.clone());
        let session = SessionStore::new(store);
        let metrics = Metrics::new();
        let flow = spawn_flow_engine(checkpoints.clone(), metrics.clone(), 16, 16)
            .await
            .unwrap();
        let device = Arc::new(DeviceLocation::new(state));
        let (connector, accepted) = MemoryConnector::new();

        let presence = PresenceController::new(
            device.clone(),
            Arc::new(connector),
            session.clone(),
            checkpoints,
            flow.clone(),
            metrics.clone(),
            Duration::from_millis(20),
            Duration::from_millis(10),
        );

        Harness {
            presence,
            device,
            accepted,
            flow,
            metrics,
            session,
        }
    }

    fn ready() -> DeviceState {
        DeviceState {
            permission: PermissionStatus::Granted,
            services_enabled: true,
            position: None,
        }
    }

    async fn next_message(server: &mut ServerSide) -> ClientMessage {
        timeout(Duration::from_secs(2), server.from_client.recv())
            .await
            .expect("message within deadline")
            .expect("connection open")
    }

    #[tokio::test]
    async fn denied_permission_keeps_rider_offline() {
        let h = harness(DeviceState {
            permission: PermissionStatus::Denied,
            ..ready()
        })
        .await;
        h.session.save("token", "rider-1", true).await.unwrap();

        let result = h.presence.go_online().await;

        assert!(matches!(result, Err(AppError::PermissionDenied)));
        assert!(!h.presence.status().await.online);
    }

    #[tokio::test]
    async fn disabled_services_keep_rider_offline() {
        let h = harness(DeviceState {
            services_enabled: false,
            ..ready()
        })
        .await;
        h.session.save("token", "rider-1", true).await.unwrap();

        let result = h.presence.go_online().await;

        assert!(matches!(result, Err(AppError::LocationServicesOff)));
        assert_eq!(h.presence.status().await, PresenceStatus::default());
    }

    #[tokio::test]
    async fn going_online_needs_a_rider_id() {
        let h = harness(ready()).await;

        let result = h.presence.go_online().await;

        assert!(matches!(result, Err(AppError::NotAuthenticated(_))));
    }

    #[tokio::test]
    async fn assignment_enters_flow_and_joins_room() {
        let mut h = harness(ready()).await;
        h.session.save("token", "rider-1", true).await.unwrap();

        let status = h.presence.go_online().await.unwrap();
        assert!(status.online);
        assert_eq!(h.metrics.presence_online.get(), 1);

        let mut server = h.accepted.recv().await.unwrap();
        assert_eq!(
            next_message(&mut server).await,
            ClientMessage::RegisterRider {
                rider_id: "rider-1".to_string()
            }
        );

        server
            .to_client
            .send(Frame {
                event: "orderAssigned".to_string(),
                data: json!({ "orderId": "ord-7", "orderPayload": { "deliveryAmount": 80 } }),
            })
            .await
            .unwrap();

        assert_eq!(
            next_message(&mut server).await,
            ClientMessage::JoinOrderRoom {
                order_id: "ord-7".to_string()
            }
        );
        let state = h.flow.current().await.unwrap().unwrap();
        assert_eq!(state.step, FlowStep::Accept);
        assert_eq!(state.order.order_id, "ord-7");

        let status = h.presence.go_offline().await;
        assert!(!status.online);
        assert_eq!(h.metrics.presence_online.get(), 0);
        // Second call is a no-op.
        assert_eq!(h.presence.go_offline().await, PresenceStatus::default());
    }

    #[tokio::test]
    async fn position_fixes_are_streamed_while_online() {
        let mut h = harness(ready()).await;
        h.session.save("token", "rider-1", true).await.unwrap();
        h.device
            .report(DeviceReport {
                position: Some(GeoPoint {
                    lat: 14.68,
                    lng: 77.6,
                }),
                ..DeviceReport::default()
            })
            .await;

        h.presence.go_online().await.unwrap();
        let mut server = h.accepted.recv().await.unwrap();

        loop {
            if let ClientMessage::UpdateLocation { rider_id, lat, lng } =
                next_message(&mut server).await
            {
                assert_eq!(rider_id, "rider-1");
                assert_eq!((lat, lng), (14.68, 77.6));
                break;
            }
        }
        assert!(h.metrics.location_updates_total.get() >= 1);
        assert!(h.presence.status().await.tracking);

        h.presence.go_offline().await;
    }

    #[tokio::test]
    async fn going_online_twice_keeps_one_channel() {
        let mut h = harness(ready()).await;
        h.session.save("token", "rider-1", true).await.unwrap();

        h.presence.go_online().await.unwrap();
        h.presence.go_online().await.unwrap();
        let _server = h.accepted.recv().await.unwrap();

        h.presence.go_offline().await;
        assert!(h.accepted.try_recv().is_err());
    }
}
