use std::sync::Arc;

use crate::error::AppError;
use crate::store::KeyValueStore;

pub const AUTH_TOKEN_KEY: &str = "authToken";
pub const RIDER_ID_KEY: &str = "riderId";
pub const IS_VERIFIED_KEY: &str = "isVerified";

/// Auth-side keys. The flow engine never touches these.
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
}

impl SessionStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn auth_token(&self) -> Result<Option<String>, AppError> {
        self.store.get(AUTH_TOKEN_KEY).await
    }

    pub async fn rider_id(&self) -> Result<Option<String>, AppError> {
        self.store.get(RIDER_ID_KEY).await
    }

    /// `None` when the flag was never written.
    pub async fn is_verified(&self) -> Result<Option<bool>, AppError> {
        Ok(self
            .store
            .get(IS_VERIFIED_KEY)
            .await?
            .map(|raw| raw.trim() != "false"))
    }

    pub async fn save(&self, token: &str, rider_id: &str, verified: bool) -> Result<(), AppError> {
        self.store.set(AUTH_TOKEN_KEY, token).await?;
        self.store.set(RIDER_ID_KEY, rider_id).await?;
        self.store
            .set(IS_VERIFIED_KEY, if verified { "true" } else { "false" })
            .await
    }
}
