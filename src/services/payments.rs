use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use prometheus::IntCounter;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    config::{GatewayConfig, PricingConfig},
    db::DbPool,
    entities::order::{self, Entity as OrderEntity},
    entities::payment::{self, Entity as PaymentEntity, Model as PaymentModel},
    entities::user::{self, Entity as UserEntity},
    errors::ServiceError,
    events::{Event, EventSender},
    models::{OrderPaymentStatus, PaymentPurpose, PaymentState},
    services::orders::OrderService,
    services::paystack::{
        self, GatewayCharge, InitializeTransaction, PaymentGateway,
    },
};

lazy_static! {
    static ref PAYMENTS_INITIALIZED: IntCounter = IntCounter::new(
        "payments_initialized_total",
        "Total number of payments initialized with the gateway"
    )
    .expect("metric can be created");
    static ref PAYMENTS_RECONCILED: IntCounter = IntCounter::new(
        "payments_reconciled_total",
        "Total number of payments reconciled as successful"
    )
    .expect("metric can be created");
    static ref PAYMENTS_FAILED: IntCounter = IntCounter::new(
        "payments_failed_total",
        "Total number of payments marked failed"
    )
    .expect("metric can be created");
    static ref WEBHOOKS_REJECTED: IntCounter = IntCounter::new(
        "webhooks_rejected_total",
        "Total number of webhook deliveries rejected for a bad signature"
    )
    .expect("metric can be created");
}

fn validate_positive_amount(value: &Decimal) -> Result<(), ValidationError> {
    if *value > Decimal::ZERO {
        Ok(())
    } else {
        let mut err = ValidationError::new("range");
        err.message = Some("Amount must be greater than 0".into());
        Err(err)
    }
}

/// Request to initialize a hosted-checkout payment.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct InitializePaymentRequest {
    #[validate(custom = "validate_positive_amount")]
    pub amount: Decimal,
    #[validate(email(message = "A valid email is required"))]
    pub email: String,
    /// Set for order payments; null for premium/bundle/hostel purchases.
    pub order_id: Option<Uuid>,
    /// Purpose tag; null means an order payment.
    pub plan: Option<String>,
    #[validate(length(max = 500, message = "Description must be at most 500 characters"))]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializePaymentResponse {
    pub payment_id: Uuid,
    pub reference: String,
    pub authorization_url: String,
    pub access_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_id: Option<Uuid>,
    pub amount: Decimal,
    pub currency: String,
    pub reference: String,
    pub status: PaymentState,
    pub plan: Option<String>,
    pub description: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentListResponse {
    pub payments: Vec<PaymentResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Inbound webhook body: `{event, data}` with the charge payload in `data`.
#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Drives a payment from `pending` to a terminal status exactly once and
/// fans out its effects.
///
/// The pending→success compare-and-set on the payment row is the idempotency
/// gate: however many verify calls and webhook deliveries race for one
/// reference, a single caller wins it and performs the fan-out; every other
/// caller observes the terminal state and no-ops.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DbPool>,
    gateway: Arc<dyn PaymentGateway>,
    gateway_config: GatewayConfig,
    pricing: PricingConfig,
    orders: OrderService,
    event_sender: Option<Arc<EventSender>>,
}

impl PaymentService {
    pub fn new(
        db: Arc<DbPool>,
        gateway: Arc<dyn PaymentGateway>,
        gateway_config: GatewayConfig,
        pricing: PricingConfig,
        orders: OrderService,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            gateway,
            gateway_config,
            pricing,
            orders,
            event_sender,
        }
    }

    /// Creates a gateway checkout session and records the pending payment.
    /// The local row is only written once the gateway has accepted the
    /// initialization, so a gateway failure leaves nothing behind.
    #[instrument(skip(self, request), fields(user_id = %user_id, order_id = ?request.order_id, plan = ?request.plan))]
    pub async fn initialize(
        &self,
        user_id: Uuid,
        request: InitializePaymentRequest,
    ) -> Result<InitializePaymentResponse, ServiceError> {
        request.validate()?;

        let purpose = PaymentPurpose::from_plan_tag(request.plan.as_deref())?;

        if let Some(expected) = self.listed_price(purpose) {
            if request.amount != expected {
                return Err(ServiceError::ValidationError(format!(
                    "Amount for plan '{}' must be {expected}",
                    request.plan.as_deref().unwrap_or_default()
                )));
            }
        }

        if let Some(order_id) = request.order_id {
            let order = OrderEntity::find_by_id(order_id)
                .filter(order::Column::DeletedAt.is_null())
                .one(&*self.db)
                .await?
                .ok_or_else(|| {
                    ServiceError::ValidationError(format!("Order {order_id} not found"))
                })?;

            if order.buyer_id != user_id {
                return Err(ServiceError::Unauthorized(
                    "Only the buyer can pay for this order".to_string(),
                ));
            }
        }

        let reference = paystack::generate_reference();
        let amount_minor = paystack::to_minor_units(request.amount)?;

        let session = self
            .gateway
            .initialize_transaction(InitializeTransaction {
                amount: amount_minor,
                email: request.email.clone(),
                reference: reference.clone(),
                callback_url: self.gateway_config.callback_url.clone(),
                currency: self.gateway_config.currency.clone(),
                metadata: serde_json::json!({
                    "user_id": user_id,
                    "order_id": request.order_id,
                    "plan": request.plan.clone(),
                    "description": request.description.clone(),
                }),
            })
            .await?;

        let now = Utc::now();
        let payment_id = Uuid::new_v4();

        let payment_model = payment::ActiveModel {
            id: Set(payment_id),
            user_id: Set(user_id),
            order_id: Set(request.order_id),
            amount: Set(request.amount),
            currency: Set(self.gateway_config.currency.clone()),
            reference: Set(session.reference.clone()),
            status: Set(PaymentState::Pending.to_string()),
            plan: Set(request.plan),
            description: Set(request.description),
            gateway_response: Set(None),
            paid_at: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };

        payment_model.insert(&*self.db).await?;

        info!(payment_id = %payment_id, reference = %session.reference, "Payment initialized");
        PAYMENTS_INITIALIZED.inc();

        self.emit(Event::PaymentInitialized(payment_id)).await;

        Ok(InitializePaymentResponse {
            payment_id,
            reference: session.reference,
            authorization_url: session.authorization_url,
            access_code: session.access_code,
        })
    }

    /// Queries the gateway for the authoritative charge status and applies
    /// it. Re-verifying an already successful payment returns the stored
    /// record without side effects.
    #[instrument(skip(self))]
    pub async fn verify(&self, reference: &str) -> Result<PaymentResponse, ServiceError> {
        let payment = self.find_by_reference(reference).await?;

        if parse_payment_state(&payment.status)? == PaymentState::Success {
            info!(reference = %reference, "Payment already reconciled, returning stored record");
            return model_to_response(payment);
        }

        let charge = self.gateway.verify_transaction(reference).await?;

        let updated = if charge.is_success() {
            self.check_amount(&payment, &charge)?;
            self.apply_success(payment, charge.raw).await?
        } else {
            self.apply_failure(payment, charge.raw).await?
        };

        model_to_response(updated)
    }

    /// Handles an inbound gateway webhook. The signature is verified against
    /// the exact raw bytes received; a mismatch rejects the delivery with no
    /// state change.
    #[instrument(skip(self, raw_body, signature))]
    pub async fn handle_webhook(
        &self,
        raw_body: &[u8],
        signature: &str,
    ) -> Result<(), ServiceError> {
        paystack::verify_signature(self.gateway_config.webhook_secret(), raw_body, signature)
            .map_err(|e| {
                WEBHOOKS_REJECTED.inc();
                warn!("Webhook rejected: invalid signature");
                e
            })?;

        let envelope: WebhookEnvelope = serde_json::from_slice(raw_body)
            .map_err(|e| ServiceError::ValidationError(format!("Malformed webhook body: {e}")))?;

        match envelope.event.as_str() {
            "charge.success" => {
                let Some(payment) = self.payment_for_webhook(&envelope.data).await? else {
                    return Ok(());
                };

                if parse_payment_state(&payment.status)? == PaymentState::Success {
                    info!(reference = %payment.reference, "Webhook for already reconciled payment, no-op");
                    return Ok(());
                }

                self.apply_success(payment, envelope.data).await?;
            }
            "charge.failed" => {
                let Some(payment) = self.payment_for_webhook(&envelope.data).await? else {
                    return Ok(());
                };

                if parse_payment_state(&payment.status)? == PaymentState::Pending {
                    self.apply_failure(payment, envelope.data).await?;
                }
            }
            other => {
                // Transfer and settlement events belong to upstream systems;
                // acknowledge them so the gateway stops retrying.
                info!(event = %other, "Ignoring webhook event");
            }
        }

        Ok(())
    }

    /// Retrieves a payment; only the payer or an administrator may see it.
    #[instrument(skip(self), fields(payment_id = %payment_id, actor_id = %actor_id))]
    pub async fn get_payment(
        &self,
        payment_id: Uuid,
        actor_id: Uuid,
    ) -> Result<PaymentResponse, ServiceError> {
        let payment = PaymentEntity::find_by_id(payment_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {payment_id} not found")))?;

        if payment.user_id != actor_id {
            super::ensure_admin(&self.db, actor_id, "view this payment").await?;
        }

        model_to_response(payment)
    }

    /// Lists a user's payments, newest first.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list_payments(
        &self,
        user_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<PaymentListResponse, ServiceError> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);

        let paginator = PaymentEntity::find()
            .filter(payment::Column::UserId.eq(user_id))
            .order_by_desc(payment::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let payments = paginator
            .fetch_page(page - 1)
            .await?
            .into_iter()
            .map(model_to_response)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PaymentListResponse {
            payments,
            total,
            page,
            per_page,
        })
    }

    /// Transitions the payment pending→success and performs the fan-out,
    /// but only if this caller wins the compare-and-set; the loser takes the
    /// no-op path and returns the already terminal record.
    async fn apply_success(
        &self,
        payment: PaymentModel,
        raw_payload: serde_json::Value,
    ) -> Result<PaymentModel, ServiceError> {
        let db = &*self.db;
        let now = Utc::now();

        let result = PaymentEntity::update_many()
            .col_expr(
                payment::Column::Status,
                Expr::value(PaymentState::Success.to_string()),
            )
            .col_expr(payment::Column::PaidAt, Expr::value(Some(now)))
            .col_expr(
                payment::Column::GatewayResponse,
                Expr::value(Some(raw_payload)),
            )
            .col_expr(payment::Column::UpdatedAt, Expr::value(Some(now)))
            .filter(payment::Column::Id.eq(payment.id))
            .filter(payment::Column::Status.eq(PaymentState::Pending.to_string()))
            .exec(db)
            .await?;

        if result.rows_affected == 1 {
            PAYMENTS_RECONCILED.inc();
            info!(payment_id = %payment.id, reference = %payment.reference, "Payment reconciled as successful");

            self.fan_out(&payment).await?;

            self.emit(Event::PaymentSucceeded {
                payment_id: payment.id,
                reference: payment.reference.clone(),
            })
            .await;
        } else {
            info!(payment_id = %payment.id, "Payment already terminal, skipping fan-out");
        }

        self.find_by_reference(&payment.reference).await
    }

    /// Transitions the payment pending→failed. No fan-out.
    async fn apply_failure(
        &self,
        payment: PaymentModel,
        raw_payload: serde_json::Value,
    ) -> Result<PaymentModel, ServiceError> {
        let db = &*self.db;
        let now = Utc::now();

        let result = PaymentEntity::update_many()
            .col_expr(
                payment::Column::Status,
                Expr::value(PaymentState::Failed.to_string()),
            )
            .col_expr(
                payment::Column::GatewayResponse,
                Expr::value(Some(raw_payload)),
            )
            .col_expr(payment::Column::UpdatedAt, Expr::value(Some(now)))
            .filter(payment::Column::Id.eq(payment.id))
            .filter(payment::Column::Status.eq(PaymentState::Pending.to_string()))
            .exec(db)
            .await?;

        if result.rows_affected == 1 {
            PAYMENTS_FAILED.inc();
            info!(payment_id = %payment.id, reference = %payment.reference, "Payment marked failed");

            self.emit(Event::PaymentFailed {
                payment_id: payment.id,
                reference: payment.reference.clone(),
            })
            .await;
        }

        self.find_by_reference(&payment.reference).await
    }

    /// Applies the effects of a successful payment, dispatched by purpose.
    /// Runs exactly once per payment, guarded by the success CAS.
    async fn fan_out(&self, payment: &PaymentModel) -> Result<(), ServiceError> {
        match PaymentPurpose::from_plan_tag(payment.plan.as_deref())? {
            PaymentPurpose::Order => match payment.order_id {
                Some(order_id) => {
                    self.orders
                        .update_payment_status(
                            order_id,
                            OrderPaymentStatus::Paid,
                            Some(payment.reference.clone()),
                        )
                        .await?;
                }
                None => {
                    warn!(payment_id = %payment.id, "Order payment has no linked order, nothing to update");
                }
            },
            purpose @ (PaymentPurpose::Premium | PaymentPurpose::Bundle) => {
                self.grant_credits(payment.user_id, purpose.credits_granted())
                    .await?;
            }
            PaymentPurpose::Hostel => {
                // Booking fulfilment lives in an external system.
                self.emit(Event::HostelBookingRequested {
                    payment_id: payment.id,
                    user_id: payment.user_id,
                    reference: payment.reference.clone(),
                })
                .await;
            }
        }

        Ok(())
    }

    /// Grants premium credits with an atomic in-database increment, never a
    /// read-modify-write.
    async fn grant_credits(&self, user_id: Uuid, credits: i32) -> Result<(), ServiceError> {
        let result = UserEntity::update_many()
            .col_expr(
                user::Column::PremiumCredits,
                Expr::col(user::Column::PremiumCredits).add(credits),
            )
            .col_expr(user::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(user::Column::Id.eq(user_id))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("User {user_id} not found")));
        }

        info!(user_id = %user_id, credits = credits, "Premium credits granted");

        self.emit(Event::EntitlementGranted { user_id, credits }).await;

        Ok(())
    }

    async fn find_by_reference(&self, reference: &str) -> Result<PaymentModel, ServiceError> {
        PaymentEntity::find()
            .filter(payment::Column::Reference.eq(reference))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("No payment found for reference {reference}"))
            })
    }

    /// Resolves the payment a webhook charge refers to. Unknown references
    /// are acknowledged without effect so the gateway stops redelivering.
    async fn payment_for_webhook(
        &self,
        data: &serde_json::Value,
    ) -> Result<Option<PaymentModel>, ServiceError> {
        let reference = data
            .get("reference")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ServiceError::ValidationError("Webhook charge payload has no reference".to_string())
            })?;

        match self.find_by_reference(reference).await {
            Ok(payment) => Ok(Some(payment)),
            Err(ServiceError::NotFound(_)) => {
                warn!(reference = %reference, "Webhook references unknown payment, acknowledging");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn listed_price(&self, purpose: PaymentPurpose) -> Option<Decimal> {
        match purpose {
            PaymentPurpose::Order => None,
            PaymentPurpose::Premium => Some(self.pricing.premium_listing),
            PaymentPurpose::Bundle => Some(self.pricing.bundle_package),
            PaymentPurpose::Hostel => Some(self.pricing.hostel_booking),
        }
    }

    fn check_amount(
        &self,
        payment: &PaymentModel,
        charge: &GatewayCharge,
    ) -> Result<(), ServiceError> {
        let expected = paystack::to_minor_units(payment.amount)?;
        if charge.amount_minor != expected {
            warn!(
                payment_id = %payment.id,
                expected_minor = expected,
                charged_minor = charge.amount_minor,
                "Gateway charge amount differs from initialized amount"
            );
        }
        Ok(())
    }

    async fn emit(&self, event: Event) {
        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(event).await {
                warn!(error = %e, "Failed to send event");
            }
        }
    }
}

fn parse_payment_state(raw: &str) -> Result<PaymentState, ServiceError> {
    PaymentState::from_str(raw).map_err(|_| {
        error!(status = %raw, "Corrupt payment status");
        ServiceError::InternalError(format!("Corrupt payment status: {raw}"))
    })
}

fn model_to_response(model: PaymentModel) -> Result<PaymentResponse, ServiceError> {
    let status = parse_payment_state(&model.status)?;

    Ok(PaymentResponse {
        id: model.id,
        user_id: model.user_id,
        order_id: model.order_id,
        amount: model.amount,
        currency: model.currency,
        reference: model.reference,
        status,
        plan: model.plan,
        description: model.description,
        paid_at: model.paid_at,
        created_at: model.created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn positive_amount_validation() {
        assert!(validate_positive_amount(&dec!(0.01)).is_ok());
        assert!(validate_positive_amount(&dec!(0)).is_err());
        assert!(validate_positive_amount(&dec!(-5)).is_err());
    }

    #[test]
    fn initialize_request_validation() {
        let request = InitializePaymentRequest {
            amount: dec!(200.00),
            email: "buyer@campus.edu".to_string(),
            order_id: None,
            plan: None,
            description: None,
        };
        assert!(request.validate().is_ok());

        let request = InitializePaymentRequest {
            amount: dec!(200.00),
            email: "not-an-email".to_string(),
            order_id: None,
            plan: None,
            description: None,
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn webhook_envelope_parses_event_and_data() {
        let body = br#"{"event":"charge.success","data":{"reference":"CM-1","status":"success"}}"#;
        let envelope: WebhookEnvelope = serde_json::from_slice(body).unwrap();

        assert_eq!(envelope.event, "charge.success");
        assert_eq!(
            envelope.data.get("reference").and_then(|v| v.as_str()),
            Some("CM-1")
        );
    }
}
