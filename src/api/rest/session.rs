use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::client::api::RiderProfile;
use crate::engine::session::{resolve_landing, verify_otp, Landing};
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/session", get(get_session))
        .route("/session/verify-otp", post(login))
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub landing: Landing,
}

#[derive(Deserialize)]
pub struct VerifyOtpRequest {
    pub phone: String,
    pub otp: String,
}

#[derive(Serialize)]
pub struct LoginResult {
    pub landing: Landing,
    pub rider_id: String,
    pub is_verified: bool,
}

async fn get_session(State(state): State<Arc<AppState>>) -> Json<SessionResponse> {
    Json(SessionResponse {
        landing: resolve_landing(&state.session).await,
    })
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<VerifyOtpRequest>,
) -> Result<Json<LoginResult>, AppError> {
    let RiderProfile { id, is_verified } =
        verify_otp(state.api.as_ref(), &state.session, &payload.phone, &payload.otp).await?;

    Ok(Json(LoginResult {
        landing: resolve_landing(&state.session).await,
        rider_id: id,
        is_verified,
    }))
}
