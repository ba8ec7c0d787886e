use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use tracing::{error, instrument};
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::errors::ServiceError;

type HmacSha512 = Hmac<Sha512>;

/// Hosted-checkout initialization request sent to the gateway.
#[derive(Debug, Clone, Serialize)]
pub struct InitializeTransaction {
    /// Amount in the currency's smallest unit (pesewas).
    pub amount: i64,
    pub email: String,
    pub reference: String,
    pub callback_url: String,
    pub currency: String,
    pub metadata: serde_json::Value,
}

/// Hosted-checkout session returned by a successful initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySession {
    pub authorization_url: String,
    pub access_code: String,
    pub reference: String,
}

/// The gateway's authoritative view of a charge.
#[derive(Debug, Clone)]
pub struct GatewayCharge {
    pub reference: String,
    /// Gateway-side charge status string; "success" is the only value that
    /// reconciles a payment.
    pub status: String,
    pub amount_minor: i64,
    pub currency: String,
    /// Full response payload, retained verbatim for audit.
    pub raw: serde_json::Value,
}

impl GatewayCharge {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// Seam to the external payment gateway. The HTTP client below is the
/// production implementation; tests substitute an in-memory one.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initialize_transaction(
        &self,
        request: InitializeTransaction,
    ) -> Result<GatewaySession, ServiceError>;

    async fn verify_transaction(&self, reference: &str) -> Result<GatewayCharge, ServiceError>;
}

/// Paystack response envelope wrapping every API payload.
#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    status: bool,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// HTTP client for the Paystack API.
pub struct PaystackClient {
    http: reqwest::Client,
    secret_key: String,
    base_url: String,
}

impl PaystackClient {
    pub fn new(config: &GatewayConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client init failed: {e}")))?;

        Ok(Self {
            http,
            secret_key: config.secret_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PaymentGateway for PaystackClient {
    #[instrument(skip(self, request), fields(reference = %request.reference))]
    async fn initialize_transaction(
        &self,
        request: InitializeTransaction,
    ) -> Result<GatewaySession, ServiceError> {
        let url = format!("{}/transaction/initialize", self.base_url);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.secret_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "gateway initialize call failed");
                ServiceError::GatewayUnavailable(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::GatewayUnavailable(format!(
                "gateway returned HTTP {status}"
            )));
        }

        let envelope: ApiEnvelope = response
            .json()
            .await
            .map_err(|e| ServiceError::GatewayUnavailable(e.to_string()))?;

        if !envelope.status {
            return Err(ServiceError::GatewayUnavailable(envelope.message));
        }

        serde_json::from_value(envelope.data)
            .map_err(|e| ServiceError::GatewayUnavailable(format!("malformed session: {e}")))
    }

    #[instrument(skip(self))]
    async fn verify_transaction(&self, reference: &str) -> Result<GatewayCharge, ServiceError> {
        let url = format!("{}/transaction/verify/{reference}", self.base_url);

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "gateway verify call failed");
                ServiceError::VerificationFailed(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::VerificationFailed(format!(
                "gateway returned HTTP {status}"
            )));
        }

        let envelope: ApiEnvelope = response
            .json()
            .await
            .map_err(|e| ServiceError::VerificationFailed(e.to_string()))?;

        if !envelope.status {
            return Err(ServiceError::VerificationFailed(envelope.message));
        }

        Ok(charge_from_payload(reference, envelope.data))
    }
}

/// Builds a [`GatewayCharge`] from a gateway payload, reading only the fields
/// the reconciliation path needs and keeping the rest opaque.
pub fn charge_from_payload(reference: &str, data: serde_json::Value) -> GatewayCharge {
    let status = data
        .get("status")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();
    let amount_minor = data.get("amount").and_then(|v| v.as_i64()).unwrap_or(0);
    let currency = data
        .get("currency")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    GatewayCharge {
        reference: reference.to_string(),
        status,
        amount_minor,
        currency,
        raw: data,
    }
}

/// Converts a major-unit amount to the gateway's smallest unit. Exact for
/// values with at most two decimal places; anything finer rounds to the
/// nearest pesewa.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * dec!(100)).round().to_i64().ok_or_else(|| {
        ServiceError::ValidationError(format!("Amount {amount} out of range for gateway"))
    })
}

/// Generates a collision-resistant gateway reference: timestamp plus a
/// random UUID segment.
pub fn generate_reference() -> String {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let random = Uuid::new_v4()
        .to_string()
        .split('-')
        .next()
        .unwrap_or_default()
        .to_uppercase();
    format!("CM-{timestamp}-{random}")
}

/// Computes the hex HMAC-SHA512 signature the gateway attaches to webhook
/// deliveries.
pub fn sign_payload(secret: &str, raw_body: &[u8]) -> String {
    let mut mac =
        HmacSha512::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(raw_body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a webhook signature against the exact raw request bytes.
/// Comparison happens inside the MAC in constant time.
pub fn verify_signature(secret: &str, raw_body: &[u8], signature: &str) -> Result<(), ServiceError> {
    let provided = hex::decode(signature.trim()).map_err(|_| ServiceError::InvalidSignature)?;

    let mut mac =
        HmacSha512::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(raw_body);
    mac.verify_slice(&provided)
        .map_err(|_| ServiceError::InvalidSignature)
}
