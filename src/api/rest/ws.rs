use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::engine::flow::FlowView;
use crate::state::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

fn encode(view: &FlowView) -> Option<Message> {
    match serde_json::to_string(view) {
        Ok(json) => Some(Message::Text(json)),
        Err(err) => {
            warn!(error = %err, "failed to serialize flow view for ws");
            None
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut changes = BroadcastStream::new(state.flow.subscribe());

    info!("websocket client connected");

    let send_task = tokio::spawn(async move {
        // Current state first, then every change.
        if let Ok(view) = state.flow_view().await {
            if let Some(message) = encode(&view) {
                if sender.send(message).await.is_err() {
                    return;
                }
            }
        }

        while let Some(change) = changes.next().await {
            let view = match change {
                Ok(change) => state.view_of(change.as_ref()).await,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "ws client lagged; resending current flow");
                    match state.flow_view().await {
                        Ok(view) => view,
                        Err(_) => break,
                    }
                }
            };

            let Some(message) = encode(&view) else {
                continue;
            };
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!("websocket client disconnected");
}
