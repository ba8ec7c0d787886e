use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::services::{orders::OrderService, payments::PaymentService};

pub mod health;
pub mod orders;
pub mod payments;

/// Service handles shared by every handler.
#[derive(Clone)]
pub struct AppServices {
    pub orders: OrderService,
    pub payments: PaymentService,
}

/// The acting user's id, taken from the `x-user-id` header set by the
/// upstream authentication gateway. Token verification happens there; by the
/// time a request reaches this service the identity is trusted.
pub struct ActorId(pub Uuid);

const ACTOR_HEADER: &str = "x-user-id";

#[async_trait]
impl<S> FromRequestParts<S> for ActorId
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                ServiceError::Unauthorized(format!("Missing {ACTOR_HEADER} header"))
            })?;

        let id = Uuid::parse_str(raw).map_err(|_| {
            ServiceError::Unauthorized(format!("Invalid {ACTOR_HEADER} header"))
        })?;

        Ok(ActorId(id))
    }
}
