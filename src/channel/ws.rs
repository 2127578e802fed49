use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use url::Url;

use crate::channel::{ChannelConnector, Connection};
use crate::error::AppError;
use crate::models::event::{ClientMessage, Frame};

const RIDER_ROLE: &str = "deliveryRider";

/// WebSocket transport speaking JSON `{event, data}` text frames.
pub struct WsConnector {
    endpoint: Url,
}

impl WsConnector {
    pub fn new(backend_url: &str) -> Result<Self, AppError> {
        Ok(Self {
            endpoint: socket_endpoint(backend_url)?,
        })
    }

    pub fn url_for(&self, rider_id: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("riderId", rider_id)
            .append_pair("role", RIDER_ROLE);
        url
    }
}

fn socket_endpoint(backend_url: &str) -> Result<Url, AppError> {
    let invalid = |reason: String| AppError::Internal(format!("invalid backend url {backend_url}: {reason}"));

    let mut url = Url::parse(backend_url).map_err(|err| invalid(err.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(invalid(format!("unsupported scheme {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|_| invalid("cannot switch scheme".to_string()))?;

    let path = format!("{}/socket", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_query(None);
    Ok(url)
}

#[async_trait]
impl ChannelConnector for WsConnector {
    async fn connect(&self, rider_id: &str) -> Result<Connection, AppError> {
        let url = self.url_for(rider_id);
        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|err| AppError::Channel(format!("connect to {url} failed: {err}")))?;
        let (mut sink, mut source) = stream.split();

        let (outbound, mut outbound_rx) = mpsc::channel::<ClientMessage>(64);
        let (inbound_tx, inbound) = mpsc::channel::<Frame>(64);

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(error = %err, "failed to encode channel message");
                        continue;
                    }
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = sink.send(Message::Close(None)).await;
        });

        let reader = tokio::spawn(async move {
            while let Some(Ok(message)) = source.next().await {
                let text = match message {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    _ => continue,
                };
                match serde_json::from_str::<Frame>(&text) {
                    Ok(frame) => {
                        if inbound_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => debug!(error = %err, "ignoring undecodable frame"),
                }
            }
        });

        Ok(Connection::new(outbound, inbound)
            .with_task(reader)
            .with_task(writer))
    }
}
