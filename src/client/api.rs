use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use crate::error::AppError;
use crate::models::order::GeoPoint;
use crate::store::session::SessionStore;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RiderProfile {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub is_verified: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub delivery_rider: RiderProfile,
}

/// Backend calls made by the rider screens. Any error means the action did not
/// happen as far as the flow is concerned.
#[async_trait]
pub trait RiderApi: Send + Sync {
    async fn accept_order(&self, order_id: &str) -> Result<Value, AppError>;
    async fn reached_pickup_location(&self, order_id: &str, at: GeoPoint)
        -> Result<Value, AppError>;
    async fn verify_pickup_code(&self, order_id: &str, code: &str) -> Result<Value, AppError>;
    async fn reached_customer_location(
        &self,
        order_id: &str,
        at: GeoPoint,
    ) -> Result<Value, AppError>;
    async fn handover_package(&self, order_id: &str) -> Result<Value, AppError>;
    async fn verify_return(&self, order_id: &str, code: &str) -> Result<Value, AppError>;
    async fn reached_return_location(&self, order_id: &str, at: GeoPoint)
        -> Result<Value, AppError>;
    async fn verify_phone_otp(&self, phone: &str, otp: &str) -> Result<LoginResponse, AppError>;
}

pub struct HttpRiderApi {
    client: reqwest::Client,
    base: Url,
    session: SessionStore,
}

impl HttpRiderApi {
    pub fn new(backend_url: &str, timeout: Duration, session: SessionStore) -> Result<Self, AppError> {
        let root = format!("{}/", backend_url.trim_end_matches('/'));
        let base = Url::parse(&root)
            .and_then(|url| url.join("api/"))
            .map_err(|err| AppError::Internal(format!("invalid backend url {backend_url}: {err}")))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::Internal(format!("failed to build http client: {err}")))?;

        Ok(Self {
            client,
            base,
            session,
        })
    }

    async fn post(&self, action: &str, path: &str, body: Value) -> Result<Value, AppError> {
        let url = self
            .base
            .join(path)
            .map_err(|err| AppError::Internal(format!("invalid path {path}: {err}")))?;

        let mut request = self.client.post(url).json(&body);
        if let Some(token) = self.session.auth_token().await? {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|err| AppError::action_failed(action, err))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            warn!(action, status = %status, detail = %detail, "backend rejected action");
            return Err(AppError::action_failed(
                action,
                format!("backend returned {status}"),
            ));
        }

        let payload = response
            .json::<Value>()
            .await
            .unwrap_or(Value::Null);
        debug!(action, "backend accepted action");
        Ok(payload)
    }

    async fn post_position(
        &self,
        action: &str,
        path: &str,
        order_id: &str,
        at: GeoPoint,
    ) -> Result<Value, AppError> {
        self.post(
            action,
            path,
            json!({ "orderId": order_id, "latitude": at.lat, "longitude": at.lng }),
        )
        .await
    }
}

#[async_trait]
impl RiderApi for HttpRiderApi {
    async fn accept_order(&self, order_id: &str) -> Result<Value, AppError> {
        self.post(
            "accept_order",
            "deliveryRider/order/acceptOrder",
            json!({ "orderId": order_id }),
        )
        .await
    }

    async fn reached_pickup_location(
        &self,
        order_id: &str,
        at: GeoPoint,
    ) -> Result<Value, AppError> {
        self.post_position(
            "reached_pickup_location",
            "deliveryRider/order/reachedPickupLocation",
            order_id,
            at,
        )
        .await
    }

    async fn verify_pickup_code(&self, order_id: &str, code: &str) -> Result<Value, AppError> {
        self.post(
            "verify_pickup_code",
            "deliveryRider/order/verifyPickupOtp",
            json!({ "orderId": order_id, "otp": code }),
        )
        .await
    }

    async fn reached_customer_location(
        &self,
        order_id: &str,
        at: GeoPoint,
    ) -> Result<Value, AppError> {
        self.post_position(
            "reached_customer_location",
            "deliveryRider/order/reachedCustomerLocation",
            order_id,
            at,
        )
        .await
    }

    async fn handover_package(&self, order_id: &str) -> Result<Value, AppError> {
        self.post(
            "handover_package",
            "deliveryRider/order/handoverPackage",
            json!({ "orderId": order_id }),
        )
        .await
    }

    async fn verify_return(&self, order_id: &str, code: &str) -> Result<Value, AppError> {
        self.post(
            "verify_return",
            "deliveryRider/order/verifyReturnOtp",
            json!({ "orderId": order_id, "otp": code }),
        )
        .await
    }

    async fn reached_return_location(
        &self,
        order_id: &str,
        at: GeoPoint,
    ) -> Result<Value, AppError> {
        self.post_position(
            "reached_return_location",
            "deliveryRider/order/reachedReturnLocation",
            order_id,
            at,
        )
        .await
    }

    async fn verify_phone_otp(&self, phone: &str, otp: &str) -> Result<LoginResponse, AppError> {
        let payload = self
            .post(
                "verify_phone_otp",
                "deliveryRider/auth/verify-otp",
                json!({ "phone": phone, "otp": otp }),
            )
            .await?;

        serde_json::from_value(payload)
            .map_err(|err| AppError::action_failed("verify_phone_otp", format!("bad response: {err}")))
    }
}
