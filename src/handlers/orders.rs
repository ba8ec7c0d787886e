use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    models::{OrderPaymentStatus, OrderStatus},
    services::orders::{CreateOrderRequest, OrderFilter},
    ApiResponse, AppState,
};

use super::ActorId;

#[derive(Debug, Default, Deserialize)]
pub struct OrderListQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
    pub status: Option<OrderStatus>,
    pub payment_status: Option<OrderPaymentStatus>,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}

/// Optional note accompanying a status transition.
#[derive(Debug, Default, Deserialize)]
pub struct TransitionRequest {
    pub note: Option<String>,
}

pub async fn create_order(
    State(state): State<AppState>,
    actor: ActorId,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.create_order(actor.0, payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message(order, "Order created successfully")),
    ))
}

pub async fn list_orders(
    State(state): State<AppState>,
    actor: ActorId,
    Query(query): Query<OrderListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let filter = OrderFilter {
        status: query.status,
        payment_status: query.payment_status,
    };
    let orders = state
        .services
        .orders
        .list_orders(actor.0, filter, query.page, query.per_page)
        .await?;
    Ok(Json(ApiResponse::success(orders)))
}

pub async fn get_order(
    State(state): State<AppState>,
    actor: ActorId,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.get_order(order_id, actor.0).await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn confirm_order(
    State(state): State<AppState>,
    actor: ActorId,
    Path(order_id): Path<Uuid>,
    payload: Option<Json<TransitionRequest>>,
) -> Result<impl IntoResponse, ServiceError> {
    let note = payload.and_then(|Json(p)| p.note);
    let order = state.services.orders.confirm(order_id, actor.0, note).await?;
    Ok(Json(ApiResponse::with_message(
        order,
        "Order confirmed successfully",
    )))
}

pub async fn ship_order(
    State(state): State<AppState>,
    actor: ActorId,
    Path(order_id): Path<Uuid>,
    payload: Option<Json<TransitionRequest>>,
) -> Result<impl IntoResponse, ServiceError> {
    let note = payload.and_then(|Json(p)| p.note);
    let order = state.services.orders.ship(order_id, actor.0, note).await?;
    Ok(Json(ApiResponse::with_message(
        order,
        "Order shipped successfully",
    )))
}

pub async fn deliver_order(
    State(state): State<AppState>,
    actor: ActorId,
    Path(order_id): Path<Uuid>,
    payload: Option<Json<TransitionRequest>>,
) -> Result<impl IntoResponse, ServiceError> {
    let note = payload.and_then(|Json(p)| p.note);
    let order = state.services.orders.deliver(order_id, actor.0, note).await?;
    Ok(Json(ApiResponse::with_message(
        order,
        "Order marked as delivered successfully",
    )))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    actor: ActorId,
    Path(order_id): Path<Uuid>,
    payload: Option<Json<TransitionRequest>>,
) -> Result<impl IntoResponse, ServiceError> {
    let note = payload.and_then(|Json(p)| p.note);
    let order = state.services.orders.cancel(order_id, actor.0, note).await?;
    Ok(Json(ApiResponse::with_message(
        order,
        "Order cancelled successfully",
    )))
}

pub async fn refund_order(
    State(state): State<AppState>,
    actor: ActorId,
    Path(order_id): Path<Uuid>,
    payload: Option<Json<TransitionRequest>>,
) -> Result<impl IntoResponse, ServiceError> {
    let note = payload.and_then(|Json(p)| p.note);
    let order = state.services.orders.refund(order_id, actor.0, note).await?;
    Ok(Json(ApiResponse::with_message(
        order,
        "Order refunded successfully",
    )))
}

pub async fn delete_order(
    State(state): State<AppState>,
    actor: ActorId,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.orders.soft_delete(order_id, actor.0).await?;
    Ok(Json(ApiResponse::with_message(
        serde_json::json!({ "id": order_id }),
        "Order deleted successfully",
    )))
}
