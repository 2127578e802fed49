use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;

use crate::error::AppError;
use crate::models::presence::PresenceStatus;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/presence", get(get_presence))
        .route("/presence/online", post(go_online))
        .route("/presence/offline", post(go_offline))
}

async fn get_presence(State(state): State<Arc<AppState>>) -> Json<PresenceStatus> {
    Json(state.presence.status().await)
}

async fn go_online(State(state): State<Arc<AppState>>) -> Result<Json<PresenceStatus>, AppError> {
    Ok(Json(state.presence.go_online().await?))
}

async fn go_offline(State(state): State<Arc<AppState>>) -> Json<PresenceStatus> {
    Json(state.presence.go_offline().await)
}
