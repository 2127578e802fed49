use serde::Serialize;
use tracing::{info, warn};

use crate::client::api::{RiderApi, RiderProfile};
use crate::error::AppError;
use crate::store::session::SessionStore;

/// First screen to show at startup.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Landing {
    Auth,
    Register,
    Home,
}

pub async fn resolve_landing(session: &SessionStore) -> Landing {
    let resolved = async {
        if session.auth_token().await?.is_none() {
            return Ok::<_, AppError>(Landing::Auth);
        }
        Ok(match session.is_verified().await? {
            Some(false) => Landing::Register,
            _ => Landing::Home,
        })
    }
    .await;

    resolved.unwrap_or_else(|err| {
        warn!(error = %err, "could not read session; sending rider to auth");
        Landing::Auth
    })
}

/// Logs the rider in with a phone OTP and stores the session keys.
pub async fn verify_otp(
    api: &dyn RiderApi,
    session: &SessionStore,
    phone: &str,
    otp: &str,
) -> Result<RiderProfile, AppError> {
    if phone.trim().is_empty() || otp.trim().is_empty() {
        return Err(AppError::BadRequest("phone and otp are required".to_string()));
    }

    let login = api.verify_phone_otp(phone.trim(), otp.trim()).await?;
    session
        .save(
            &login.token,
            &login.delivery_rider.id,
            login.delivery_rider.is_verified,
        )
        .await?;

    info!(rider_id = %login.delivery_rider.id, verified = login.delivery_rider.is_verified, "rider logged in");
    Ok(login.delivery_rider)
}
