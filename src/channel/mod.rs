//! Real-time event channel.
//!
//! [`EventChannel`] owns one logical connection for as long as the rider is
//! online. It reconnects on its own, and after every (re)connect it registers
//! the rider and rejoins the room of the persisted order before forwarding any
//! server events.

pub mod ws;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::event::{ChannelEvent, ClientMessage, Frame};
use crate::observability::metrics::Metrics;
use crate::store::checkpoint::CheckpointStore;

/// Aborts the wrapped task when dropped.
pub struct TaskGuard(JoinHandle<()>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// One live transport connection. It is considered gone once `inbound`
/// yields `None` or `outbound` rejects a send.
pub struct Connection {
    pub outbound: mpsc::Sender<ClientMessage>,
    pub inbound: mpsc::Receiver<Frame>,
    tasks: Vec<TaskGuard>,
}

impl Connection {
    pub fn new(outbound: mpsc::Sender<ClientMessage>, inbound: mpsc::Receiver<Frame>) -> Self {
        Self {
            outbound,
            inbound,
            tasks: Vec::new(),
        }
    }

    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.tasks.push(TaskGuard(task));
        self
    }
}

#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self, rider_id: &str) -> Result<Connection, AppError>;
}

enum PumpExit {
    Disconnected,
    Shutdown,
}

/// Handle to a running channel supervisor.
pub struct EventChannel {
    sender: mpsc::Sender<ClientMessage>,
    shutdown_tx: watch::Sender<bool>,
    connected: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl EventChannel {
    pub fn open(
        connector: Arc<dyn ChannelConnector>,
        rider_id: String,
        checkpoints: CheckpointStore,
        reconnect_delay: Duration,
        metrics: Metrics,
        events_tx: mpsc::Sender<ChannelEvent>,
    ) -> Self {
        let (sender, app_rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connected = Arc::new(AtomicBool::new(false));

        let supervisor = Supervisor {
            connector,
            rider_id,
            checkpoints,
            reconnect_delay,
            metrics,
            events_tx,
            app_rx,
            shutdown_rx,
            connected: connected.clone(),
        };
        let task = tokio::spawn(supervisor.run());

        Self {
            sender,
            shutdown_tx,
            connected,
            task,
        }
    }

    /// Queue for messages to the server. Messages queued while disconnected go
    /// out after the next handshake.
    pub fn sender(&self) -> mpsc::Sender<ClientMessage> {
        self.sender.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub async fn close(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(err) = self.task.await {
            if !err.is_cancelled() {
                warn!(error = %err, "channel supervisor ended abnormally");
            }
        }
    }
}

struct Supervisor {
    connector: Arc<dyn ChannelConnector>,
    rider_id: String,
    checkpoints: CheckpointStore,
    reconnect_delay: Duration,
    metrics: Metrics,
    events_tx: mpsc::Sender<ChannelEvent>,
    app_rx: mpsc::Receiver<ClientMessage>,
    shutdown_rx: watch::Receiver<bool>,
    connected: Arc<AtomicBool>,
}

impl Supervisor {
    async fn run(mut self) {
        info!(rider_id = %self.rider_id, "event channel opened");

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            match self.connector.connect(&self.rider_id).await {
                Ok(mut connection) => {
                    let connection_id = Uuid::new_v4();
                    info!(connection_id = %connection_id, "channel connected");

                    let exit = match self.handshake(&connection).await {
                        Ok(()) => {
                            self.connected.store(true, Ordering::SeqCst);
                            let exit = self.pump(&mut connection).await;
                            self.connected.store(false, Ordering::SeqCst);
                            exit
                        }
                        Err(err) => {
                            warn!(connection_id = %connection_id, error = %err, "channel handshake failed");
                            PumpExit::Disconnected
                        }
                    };

                    if let PumpExit::Shutdown = exit {
                        break;
                    }
                    warn!(connection_id = %connection_id, "channel disconnected");
                }
                Err(err) => warn!(error = %err, "channel connect failed"),
            }

            self.metrics.channel_reconnects_total.inc();
            tokio::select! {
                _ = sleep(self.reconnect_delay) => {}
                changed = self.shutdown_rx.changed() => {
                    // The handle was dropped without `close`.
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(rider_id = %self.rider_id, "event channel closed");
    }

    async fn handshake(&self, connection: &Connection) -> Result<(), AppError> {
        let closed = |_| AppError::Channel("connection closed during handshake".to_string());

        connection
            .outbound
            .send(ClientMessage::RegisterRider {
                rider_id: self.rider_id.clone(),
            })
            .await
            .map_err(closed)?;

        if let Some(order_id) = self.checkpoints.persisted_order_id().await? {
            debug!(order_id = %order_id, "rejoining order room");
            connection
                .outbound
                .send(ClientMessage::JoinOrderRoom { order_id })
                .await
                .map_err(closed)?;
        }

        Ok(())
    }

    async fn pump(&mut self, connection: &mut Connection) -> PumpExit {
        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => return PumpExit::Shutdown,
                message = self.app_rx.recv() => {
                    let Some(message) = message else {
                        return PumpExit::Shutdown;
                    };
                    if connection.outbound.send(message).await.is_err() {
                        return PumpExit::Disconnected;
                    }
                }
                frame = connection.inbound.recv() => {
                    let Some(frame) = frame else {
                        return PumpExit::Disconnected;
                    };
                    match ChannelEvent::decode(&frame) {
                        Some(event) => {
                            if self.events_tx.send(event).await.is_err() {
                                return PumpExit::Shutdown;
                            }
                        }
                        None => debug!(event = %frame.event, "ignoring unknown channel event"),
                    }
                }
            }
        }
    }
}
