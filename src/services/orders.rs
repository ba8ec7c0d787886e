use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use prometheus::IntCounter;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::item::Entity as ItemEntity,
    entities::order::{self, Entity as OrderEntity, Model as OrderModel, Timeline},
    errors::ServiceError,
    events::{Event, EventSender},
    models::{OrderActor, OrderPaymentStatus, OrderStatus, TimelineEntry},
};

lazy_static! {
    static ref ORDERS_CREATED: IntCounter =
        IntCounter::new("orders_created_total", "Total number of orders created")
            .expect("metric can be created");
    static ref ORDER_TRANSITIONS: IntCounter = IntCounter::new(
        "order_transitions_total",
        "Total number of successful order status transitions"
    )
    .expect("metric can be created");
    static ref ORDER_TRANSITION_FAILURES: IntCounter = IntCounter::new(
        "order_transition_failures_total",
        "Total number of rejected order status transitions"
    )
    .expect("metric can be created");
}

/// Request/Response types for the order service
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub item_id: Uuid,
    #[validate(range(min = 1, max = 10, message = "Quantity must be between 1 and 10"))]
    pub quantity: i32,
    #[validate(length(min = 1, max = 500, message = "Shipping address is required"))]
    pub shipping_address: String,
    #[validate(length(max = 500, message = "Notes must be at most 500 characters"))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub item_id: Uuid,
    pub item_title: String,
    pub item_price: Decimal,
    pub quantity: i32,
    pub total_amount: Decimal,
    pub status: OrderStatus,
    pub payment_status: OrderPaymentStatus,
    pub payment_reference: Option<String>,
    pub shipping_address: String,
    pub notes: Option<String>,
    pub timeline: Vec<TimelineEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Debug, Default, Deserialize)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<OrderPaymentStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

fn parse_order_status(raw: &str) -> Result<OrderStatus, ServiceError> {
    OrderStatus::from_str(raw)
        .map_err(|_| ServiceError::InternalError(format!("Corrupt order status: {raw}")))
}

fn parse_payment_status(raw: &str) -> Result<OrderPaymentStatus, ServiceError> {
    OrderPaymentStatus::from_str(raw)
        .map_err(|_| ServiceError::InternalError(format!("Corrupt payment status: {raw}")))
}

fn required_role(target: OrderStatus) -> &'static str {
    match target {
        OrderStatus::Confirmed | OrderStatus::Shipped => "seller",
        OrderStatus::Delivered => "buyer",
        OrderStatus::Cancelled => "buyer or seller",
        OrderStatus::Refunded => "administrator",
        OrderStatus::Pending => "nobody",
    }
}

fn default_note(target: OrderStatus, actor: OrderActor) -> String {
    match (target, actor) {
        (OrderStatus::Confirmed, _) => "Order confirmed by seller".to_string(),
        (OrderStatus::Shipped, _) => "Order shipped".to_string(),
        (OrderStatus::Delivered, _) => "Order delivered".to_string(),
        (OrderStatus::Cancelled, OrderActor::Buyer) => "Order cancelled by buyer".to_string(),
        (OrderStatus::Cancelled, _) => "Order cancelled by seller".to_string(),
        (OrderStatus::Refunded, _) => "Order refunded".to_string(),
        (OrderStatus::Pending, _) => "Order created".to_string(),
    }
}

/// Gates and records every change to an order's status.
///
/// Each transition is a conditional update keyed on the status the caller
/// observed, so two racing requests against the same order serialize at the
/// storage layer: exactly one wins, the other fails against the new status.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    pub fn new(db: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self { db, event_sender }
    }

    /// Creates a new order for a purchasable item, snapshotting the item's
    /// title and price.
    #[instrument(skip(self, request), fields(buyer_id = %buyer_id, item_id = %request.item_id))]
    pub async fn create_order(
        &self,
        buyer_id: Uuid,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        request.validate()?;

        let db = &*self.db;

        let item = ItemEntity::find_by_id(request.item_id)
            .one(db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Item {} not found", request.item_id))
            })?;

        if !item.is_purchasable() {
            return Err(ServiceError::ValidationError(
                "Item is not available for purchase".to_string(),
            ));
        }

        if item.seller_id == buyer_id {
            return Err(ServiceError::ValidationError(
                "You cannot purchase your own item".to_string(),
            ));
        }

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let total_amount = item.price * Decimal::from(request.quantity);

        let order_model = order::ActiveModel {
            id: Set(order_id),
            buyer_id: Set(buyer_id),
            seller_id: Set(item.seller_id),
            item_id: Set(item.id),
            item_title: Set(item.title.clone()),
            item_price: Set(item.price),
            quantity: Set(request.quantity),
            total_amount: Set(total_amount),
            status: Set(OrderStatus::Pending.to_string()),
            payment_status: Set(OrderPaymentStatus::Pending.to_string()),
            payment_reference: Set(None),
            shipping_address: Set(request.shipping_address),
            notes: Set(request.notes),
            timeline: Set(Timeline::starting_with(TimelineEntry::new(
                OrderStatus::Pending,
                "Order created",
            ))),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            deleted_at: Set(None),
            version: Set(1),
        };

        let created = order_model.insert(db).await?;

        info!(order_id = %order_id, buyer_id = %buyer_id, seller_id = %item.seller_id, "Order created");
        ORDERS_CREATED.inc();

        self.emit(Event::OrderCreated(order_id)).await;

        model_to_response(created)
    }

    /// Retrieves an order; only its buyer, its seller, or an administrator
    /// may see it.
    #[instrument(skip(self), fields(order_id = %order_id, actor_id = %actor_id))]
    pub async fn get_order(
        &self,
        order_id: Uuid,
        actor_id: Uuid,
    ) -> Result<OrderResponse, ServiceError> {
        let order = self.find_active(order_id).await?;

        if order.buyer_id != actor_id && order.seller_id != actor_id {
            self.require_admin(actor_id, "view this order").await?;
        }

        model_to_response(order)
    }

    /// Lists the actor's orders (as buyer or seller), newest first.
    #[instrument(skip(self, filter), fields(actor_id = %actor_id))]
    pub async fn list_orders(
        &self,
        actor_id: Uuid,
        filter: OrderFilter,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let db = &*self.db;
        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);

        let mut query = OrderEntity::find()
            .filter(order::Column::DeletedAt.is_null())
            .filter(
                Condition::any()
                    .add(order::Column::BuyerId.eq(actor_id))
                    .add(order::Column::SellerId.eq(actor_id)),
            )
            .order_by_desc(order::Column::CreatedAt);

        if let Some(status) = filter.status {
            query = query.filter(order::Column::Status.eq(status.to_string()));
        }
        if let Some(payment_status) = filter.payment_status {
            query = query.filter(order::Column::PaymentStatus.eq(payment_status.to_string()));
        }

        let paginator = query.paginate(db, per_page);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page - 1).await?;

        let orders = orders
            .into_iter()
            .map(model_to_response)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(OrderListResponse {
            orders,
            total,
            page,
            per_page,
        })
    }

    /// Seller accepts a pending order.
    pub async fn confirm(
        &self,
        order_id: Uuid,
        actor_id: Uuid,
        note: Option<String>,
    ) -> Result<OrderResponse, ServiceError> {
        self.transition(order_id, actor_id, OrderStatus::Confirmed, note)
            .await
    }

    /// Seller ships a confirmed order.
    pub async fn ship(
        &self,
        order_id: Uuid,
        actor_id: Uuid,
        note: Option<String>,
    ) -> Result<OrderResponse, ServiceError> {
        self.transition(order_id, actor_id, OrderStatus::Shipped, note)
            .await
    }

    /// Buyer acknowledges delivery of a shipped order.
    pub async fn deliver(
        &self,
        order_id: Uuid,
        actor_id: Uuid,
        note: Option<String>,
    ) -> Result<OrderResponse, ServiceError> {
        self.transition(order_id, actor_id, OrderStatus::Delivered, note)
            .await
    }

    /// Either party withdraws an order that has not shipped yet.
    pub async fn cancel(
        &self,
        order_id: Uuid,
        actor_id: Uuid,
        note: Option<String>,
    ) -> Result<OrderResponse, ServiceError> {
        self.transition(order_id, actor_id, OrderStatus::Cancelled, note)
            .await
    }

    /// Administrative refund of a delivered order. Sits outside the
    /// buyer/seller transition set: it is the only path into `refunded` and
    /// flips the payment axis alongside the status.
    #[instrument(skip(self, note), fields(order_id = %order_id, actor_id = %actor_id))]
    pub async fn refund(
        &self,
        order_id: Uuid,
        actor_id: Uuid,
        note: Option<String>,
    ) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db;

        self.require_admin(actor_id, "refund this order").await?;

        let order = self.find_active(order_id).await?;
        let current = parse_order_status(&order.status)?;

        if current != OrderStatus::Delivered {
            ORDER_TRANSITION_FAILURES.inc();
            return Err(ServiceError::InvalidTransition(format!(
                "Cannot refund an order in status '{current}'; only delivered orders are refundable"
            )));
        }

        let entry = TimelineEntry::new(
            OrderStatus::Refunded,
            note.unwrap_or_else(|| default_note(OrderStatus::Refunded, OrderActor::Admin)),
        );
        let new_timeline = order.timeline.appended(entry);
        let now = Utc::now();

        let result = OrderEntity::update_many()
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::Refunded.to_string()),
            )
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(OrderPaymentStatus::Refunded.to_string()),
            )
            .col_expr(
                order::Column::Timeline,
                Expr::value(serde_json::to_value(&new_timeline)?),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(now)))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(current.to_string()))
            .exec(db)
            .await?;

        if result.rows_affected == 0 {
            ORDER_TRANSITION_FAILURES.inc();
            let fresh = self.find_active(order_id).await?;
            let fresh_status = parse_order_status(&fresh.status)?;
            return Err(ServiceError::InvalidTransition(format!(
                "Cannot refund an order in status '{fresh_status}'"
            )));
        }

        ORDER_TRANSITIONS.inc();
        info!(order_id = %order_id, "Order refunded");

        self.emit(Event::OrderStatusChanged {
            order_id,
            old_status: current.to_string(),
            new_status: OrderStatus::Refunded.to_string(),
        })
        .await;

        model_to_response(self.find_active(order_id).await?)
    }

    /// Sets the payment axis of an order. Called by payment reconciliation
    /// only; deliberately ungated on `status` and writes no timeline entry.
    #[instrument(skip(self), fields(order_id = %order_id, payment_status = %payment_status))]
    pub(crate) async fn update_payment_status(
        &self,
        order_id: Uuid,
        payment_status: OrderPaymentStatus,
        reference: Option<String>,
    ) -> Result<(), ServiceError> {
        let db = &*self.db;
        let now = Utc::now();

        let result = OrderEntity::update_many()
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(payment_status.to_string()),
            )
            .col_expr(
                order::Column::PaymentReference,
                Expr::value(reference.clone()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(now)))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::DeletedAt.is_null())
            .exec(db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("Order {order_id} not found")));
        }

        info!(order_id = %order_id, payment_status = %payment_status, "Order payment status updated");

        self.emit(Event::OrderPaymentStatusUpdated {
            order_id,
            payment_status: payment_status.to_string(),
            reference,
        })
        .await;

        Ok(())
    }

    /// Soft-deletes an order; the row is retained for audit.
    #[instrument(skip(self), fields(order_id = %order_id, actor_id = %actor_id))]
    pub async fn soft_delete(&self, order_id: Uuid, actor_id: Uuid) -> Result<(), ServiceError> {
        let db = &*self.db;
        let order = self.find_active(order_id).await?;

        if order.buyer_id != actor_id && order.seller_id != actor_id {
            self.require_admin(actor_id, "delete this order").await?;
        }

        let result = OrderEntity::update_many()
            .col_expr(order::Column::DeletedAt, Expr::value(Some(Utc::now())))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::DeletedAt.is_null())
            .exec(db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("Order {order_id} not found")));
        }

        info!(order_id = %order_id, "Order soft-deleted");
        Ok(())
    }

    /// Core transition: validates the target against the state graph and the
    /// actor's role, then atomically writes the new status together with its
    /// timeline entry, guarded on the status the caller observed.
    #[instrument(skip(self, note), fields(order_id = %order_id, actor_id = %actor_id, target = %target))]
    async fn transition(
        &self,
        order_id: Uuid,
        actor_id: Uuid,
        target: OrderStatus,
        note: Option<String>,
    ) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db;

        let order = self.find_active(order_id).await?;
        let current = parse_order_status(&order.status)?;
        let actor = actor_for(&order, actor_id)?;

        if !current.can_transition_to(target) {
            ORDER_TRANSITION_FAILURES.inc();
            return Err(ServiceError::InvalidTransition(format!(
                "Cannot move order from '{current}' to '{target}'"
            )));
        }

        if !actor.may_set(target) {
            ORDER_TRANSITION_FAILURES.inc();
            return Err(ServiceError::Unauthorized(format!(
                "Only the {} can move this order to '{target}'",
                required_role(target)
            )));
        }

        let entry = TimelineEntry::new(
            target,
            note.unwrap_or_else(|| default_note(target, actor)),
        );
        let new_timeline = order.timeline.appended(entry);
        let now = Utc::now();

        let result = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(target.to_string()))
            .col_expr(
                order::Column::Timeline,
                Expr::value(serde_json::to_value(&new_timeline)?),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(now)))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(current.to_string()))
            .exec(db)
            .await?;

        if result.rows_affected == 0 {
            // Lost a race: someone else moved the order first. Report the
            // rejection against the status as it stands now.
            ORDER_TRANSITION_FAILURES.inc();
            let fresh = self.find_active(order_id).await?;
            let fresh_status = parse_order_status(&fresh.status)?;
            warn!(order_id = %order_id, current = %fresh_status, target = %target, "Concurrent transition lost");
            return Err(ServiceError::InvalidTransition(format!(
                "Cannot move order from '{fresh_status}' to '{target}'"
            )));
        }

        ORDER_TRANSITIONS.inc();
        info!(order_id = %order_id, old_status = %current, new_status = %target, "Order status updated");

        self.emit(Event::OrderStatusChanged {
            order_id,
            old_status: current.to_string(),
            new_status: target.to_string(),
        })
        .await;

        model_to_response(self.find_active(order_id).await?)
    }

    async fn find_active(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .filter(order::Column::DeletedAt.is_null())
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))
    }

    async fn require_admin(&self, actor_id: Uuid, action: &str) -> Result<(), ServiceError> {
        super::ensure_admin(&self.db, actor_id, action).await
    }

    async fn emit(&self, event: Event) {
        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(event).await {
                warn!(error = %e, "Failed to send event");
            }
        }
    }
}

fn actor_for(order: &OrderModel, actor_id: Uuid) -> Result<OrderActor, ServiceError> {
    if order.buyer_id == actor_id {
        Ok(OrderActor::Buyer)
    } else if order.seller_id == actor_id {
        Ok(OrderActor::Seller)
    } else {
        Err(ServiceError::Unauthorized(
            "You are not a party to this order".to_string(),
        ))
    }
}

fn model_to_response(model: OrderModel) -> Result<OrderResponse, ServiceError> {
    let status = parse_order_status(&model.status)?;
    let payment_status = parse_payment_status(&model.payment_status)?;

    Ok(OrderResponse {
        id: model.id,
        buyer_id: model.buyer_id,
        seller_id: model.seller_id,
        item_id: model.item_id,
        item_title: model.item_title,
        item_price: model.item_price,
        quantity: model.quantity,
        total_amount: model.total_amount,
        status,
        payment_status,
        payment_reference: model.payment_reference,
        shipping_address: model.shipping_address,
        notes: model.notes,
        timeline: model.timeline.0,
        created_at: model.created_at,
        updated_at: model.updated_at,
        version: model.version,
    })
}
