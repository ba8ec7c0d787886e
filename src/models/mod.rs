use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

/// Enum representing the possible statuses of an order.
///
/// `Delivered`, `Cancelled` and `Refunded` are terminal: no transition leads
/// out of them through the buyer/seller operation set.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Refunded
        )
    }

    /// The order state graph for buyer/seller transitions. `Refunded` is only
    /// reachable through the separately gated administrative refund.
    pub fn can_transition_to(self, target: OrderStatus) -> bool {
        matches!(
            (self, target),
            (OrderStatus::Pending, OrderStatus::Confirmed)
                | (OrderStatus::Pending, OrderStatus::Cancelled)
                | (OrderStatus::Confirmed, OrderStatus::Shipped)
                | (OrderStatus::Confirmed, OrderStatus::Cancelled)
                | (OrderStatus::Shipped, OrderStatus::Delivered)
        )
    }
}

/// Payment axis of an order. Independent from [`OrderStatus`]; the two are
/// never conflated into a single field.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OrderPaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

/// Status of a payment record. Moves from `Pending` to a terminal state
/// exactly once.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PaymentState {
    Pending,
    Success,
    Failed,
    Cancelled,
}

/// What a payment buys. Stored as a nullable `plan` tag on the payment row;
/// an absent tag means an order payment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentPurpose {
    Order,
    Premium,
    Bundle,
    Hostel,
}

impl PaymentPurpose {
    /// Parses the stored `plan` tag. Unknown tags are an error so a mistyped
    /// plan can never be silently reconciled as an order payment.
    pub fn from_plan_tag(tag: Option<&str>) -> Result<Self, ServiceError> {
        match tag {
            None => Ok(PaymentPurpose::Order),
            Some("premium") => Ok(PaymentPurpose::Premium),
            Some("bundle") => Ok(PaymentPurpose::Bundle),
            Some("hostel") => Ok(PaymentPurpose::Hostel),
            Some(other) => Err(ServiceError::ValidationError(format!(
                "Unknown payment plan tag: {other}"
            ))),
        }
    }

    pub fn plan_tag(self) -> Option<&'static str> {
        match self {
            PaymentPurpose::Order => None,
            PaymentPurpose::Premium => Some("premium"),
            PaymentPurpose::Bundle => Some("bundle"),
            PaymentPurpose::Hostel => Some("hostel"),
        }
    }

    /// Premium credits granted to the payer when a payment with this purpose
    /// succeeds.
    pub fn credits_granted(self) -> i32 {
        match self {
            PaymentPurpose::Premium => 1,
            PaymentPurpose::Bundle => 3,
            PaymentPurpose::Order | PaymentPurpose::Hostel => 0,
        }
    }
}

/// The role an actor plays relative to a specific order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderActor {
    Buyer,
    Seller,
    Admin,
}

impl OrderActor {
    /// Role gate for each target status: seller drives fulfilment, buyer
    /// acknowledges delivery, either party may cancel, refunds are
    /// administrative.
    pub fn may_set(self, target: OrderStatus) -> bool {
        match target {
            OrderStatus::Confirmed | OrderStatus::Shipped => self == OrderActor::Seller,
            OrderStatus::Delivered => self == OrderActor::Buyer,
            OrderStatus::Cancelled => matches!(self, OrderActor::Buyer | OrderActor::Seller),
            OrderStatus::Refunded => self == OrderActor::Admin,
            OrderStatus::Pending => false,
        }
    }
}

/// One append-only audit entry; every status transition writes exactly one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
    pub note: String,
}

impl TimelineEntry {
    pub fn new(status: OrderStatus, note: impl Into<String>) -> Self {
        Self {
            status,
            timestamp: Utc::now(),
            note: note.into(),
        }
    }
}
