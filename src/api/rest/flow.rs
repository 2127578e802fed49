use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;

use crate::engine::actions::FlowAction;
use crate::engine::flow::FlowView;
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/flow", get(get_flow))
        .route("/flow/actions", post(perform_action))
        .route("/flow/finish", post(finish))
}

async fn get_flow(State(state): State<Arc<AppState>>) -> Result<Json<FlowView>, AppError> {
    Ok(Json(state.flow_view().await?))
}

async fn perform_action(
    State(state): State<Arc<AppState>>,
    Json(action): Json<FlowAction>,
) -> Result<Json<FlowView>, AppError> {
    let current = state.actions.perform(action).await?;
    Ok(Json(state.view_of(current.as_ref()).await))
}

/// Leaves the earnings screen; the flow becomes idle.
async fn finish(State(state): State<Arc<AppState>>) -> Result<Json<FlowView>, AppError> {
    state.flow.reset().await?;
    Ok(Json(state.flow_view().await?))
}
