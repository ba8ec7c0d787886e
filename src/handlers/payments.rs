use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    errors::ServiceError, services::payments::InitializePaymentRequest, ApiResponse, AppState,
};

use super::ActorId;

const SIGNATURE_HEADER: &str = "x-paystack-signature";

#[derive(Debug, Deserialize)]
pub struct PaymentListQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}

pub async fn initialize_payment(
    State(state): State<AppState>,
    actor: ActorId,
    Json(payload): Json<InitializePaymentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let session = state.services.payments.initialize(actor.0, payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message(
            session,
            "Payment initialized successfully",
        )),
    ))
}

pub async fn verify_payment(
    State(state): State<AppState>,
    _actor: ActorId,
    Path(reference): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let payment = state.services.payments.verify(&reference).await?;
    Ok(Json(ApiResponse::with_message(
        payment,
        "Payment verified successfully",
    )))
}

pub async fn list_payments(
    State(state): State<AppState>,
    actor: ActorId,
    Query(query): Query<PaymentListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let payments = state
        .services
        .payments
        .list_payments(actor.0, query.page, query.per_page)
        .await?;
    Ok(Json(ApiResponse::success(payments)))
}

pub async fn get_payment(
    State(state): State<AppState>,
    actor: ActorId,
    Path(payment_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let payment = state
        .services
        .payments
        .get_payment(payment_id, actor.0)
        .await?;
    Ok(Json(ApiResponse::success(payment)))
}

/// Inbound gateway webhook. The exact raw body bytes are handed to the
/// service so signature verification never depends on re-serialization.
pub async fn paystack_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(ServiceError::InvalidSignature)?;

    state.services.payments.handle_webhook(&body, signature).await?;

    Ok(Json(json!({ "status": "success" })))
}
