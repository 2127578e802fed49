use std::sync::Arc;

use axum::extract::State;
use axum::routing::put;
use axum::Json;
use axum::Router;

use crate::error::AppError;
use crate::location::{DeviceReport, DeviceState};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/device/location", put(report_location))
}

async fn report_location(
    State(state): State<Arc<AppState>>,
    Json(report): Json<DeviceReport>,
) -> Result<Json<DeviceState>, AppError> {
    if let Some(position) = report.position {
        let valid = (-90.0..=90.0).contains(&position.lat)
            && (-180.0..=180.0).contains(&position.lng);
        if !valid {
            return Err(AppError::BadRequest(
                "position is outside valid coordinates".to_string(),
            ));
        }
    }

    Ok(Json(state.device.report(report).await))
}
