//! End-to-end tests for the order lifecycle: creation, the buyer/seller
//! transition set, the administrative refund, and the concurrency guarantees
//! around racing transitions.

mod common;

use assert_matches::assert_matches;
use common::TestContext;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, EntityTrait, IntoActiveModel, Set};
use uuid::Uuid;

use campus_market_api::errors::ServiceError;
use campus_market_api::models::{OrderPaymentStatus, OrderStatus};
use campus_market_api::services::orders::{CreateOrderRequest, OrderFilter, OrderResponse};

async fn create_pending_order(ctx: &TestContext) -> (Uuid, Uuid, OrderResponse) {
    let buyer = ctx.seed_user("Ama Buyer", false).await;
    let seller = ctx.seed_user("Kofi Seller", false).await;
    let item = ctx.seed_item(seller, dec!(100.00)).await;

    let order = ctx
        .orders
        .create_order(
            buyer,
            CreateOrderRequest {
                item_id: item.id,
                quantity: 2,
                shipping_address: "Hall 7, Room 12".to_string(),
                notes: None,
            },
        )
        .await
        .expect("create order");

    (buyer, seller, order)
}

#[tokio::test]
async fn order_creation_snapshots_item_and_seeds_timeline() {
    let ctx = TestContext::new().await;
    let (buyer, seller, order) = create_pending_order(&ctx).await;

    assert_eq!(order.buyer_id, buyer);
    assert_eq!(order.seller_id, seller);
    assert_eq!(order.item_title, "Desk lamp");
    assert_eq!(order.item_price, dec!(100.00));
    assert_eq!(order.quantity, 2);
    assert_eq!(order.total_amount, dec!(200.00));
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_status, OrderPaymentStatus::Pending);
    assert_eq!(order.timeline.len(), 1);
    assert_eq!(order.timeline[0].status, OrderStatus::Pending);
    assert_eq!(order.timeline[0].note, "Order created");
}

#[tokio::test]
async fn full_lifecycle_walks_the_state_graph() {
    let ctx = TestContext::new().await;
    let (buyer, seller, order) = create_pending_order(&ctx).await;

    let order = ctx
        .orders
        .confirm(order.id, seller, None)
        .await
        .expect("confirm");
    assert_eq!(order.status, OrderStatus::Confirmed);
    assert_eq!(order.timeline.len(), 2);

    let order = ctx.orders.ship(order.id, seller, None).await.expect("ship");
    assert_eq!(order.status, OrderStatus::Shipped);

    let order = ctx
        .orders
        .deliver(order.id, buyer, None)
        .await
        .expect("deliver");
    assert_eq!(order.status, OrderStatus::Delivered);
    assert_eq!(order.timeline.len(), 4);
    assert_eq!(order.timeline[3].status, OrderStatus::Delivered);

    // The recorded sequence is a valid walk of the state graph from pending.
    assert_eq!(order.timeline[0].status, OrderStatus::Pending);
    for pair in order.timeline.windows(2) {
        assert!(
            pair[0].status.can_transition_to(pair[1].status),
            "invalid walk step {} -> {}",
            pair[0].status,
            pair[1].status
        );
    }
}

#[tokio::test]
async fn confirm_requires_pending_status() {
    let ctx = TestContext::new().await;
    let (_, seller, order) = create_pending_order(&ctx).await;

    ctx.orders
        .confirm(order.id, seller, None)
        .await
        .expect("first confirm");

    let err = ctx.orders.confirm(order.id, seller, None).await.unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition(ref msg) if msg.contains("confirmed"));

    // The rejected call changed nothing.
    let stored = ctx.load_order(order.id).await;
    assert_eq!(stored.status, "confirmed");
    assert_eq!(stored.timeline.len(), 2);
}

#[tokio::test]
async fn confirm_requires_the_seller() {
    let ctx = TestContext::new().await;
    let (buyer, _, order) = create_pending_order(&ctx).await;

    let err = ctx.orders.confirm(order.id, buyer, None).await.unwrap_err();
    assert_matches!(err, ServiceError::Unauthorized(ref msg) if msg.contains("seller"));

    let stored = ctx.load_order(order.id).await;
    assert_eq!(stored.status, "pending");
    assert_eq!(stored.timeline.len(), 1);
}

#[tokio::test]
async fn deliver_requires_the_buyer() {
    let ctx = TestContext::new().await;
    let (_, seller, order) = create_pending_order(&ctx).await;

    ctx.orders.confirm(order.id, seller, None).await.unwrap();
    ctx.orders.ship(order.id, seller, None).await.unwrap();

    let err = ctx.orders.deliver(order.id, seller, None).await.unwrap_err();
    assert_matches!(err, ServiceError::Unauthorized(_));
}

#[tokio::test]
async fn strangers_cannot_drive_transitions() {
    let ctx = TestContext::new().await;
    let (_, _, order) = create_pending_order(&ctx).await;
    let stranger = ctx.seed_user("Yaw Stranger", false).await;

    let err = ctx.orders.confirm(order.id, stranger, None).await.unwrap_err();
    assert_matches!(err, ServiceError::Unauthorized(ref msg) if msg.contains("not a party"));
}

#[tokio::test]
async fn either_party_can_cancel_before_shipping() {
    let ctx = TestContext::new().await;

    // Buyer cancels a pending order.
    let (buyer, _, order) = create_pending_order(&ctx).await;
    let cancelled = ctx
        .orders
        .cancel(order.id, buyer, None)
        .await
        .expect("buyer cancel");
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.timeline[1].note, "Order cancelled by buyer");

    // Seller cancels a confirmed order.
    let (_, seller, order) = create_pending_order(&ctx).await;
    ctx.orders.confirm(order.id, seller, None).await.unwrap();
    let cancelled = ctx
        .orders
        .cancel(order.id, seller, None)
        .await
        .expect("seller cancel");
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.timeline[2].note, "Order cancelled by seller");
}

#[tokio::test]
async fn shipped_orders_cannot_be_cancelled() {
    let ctx = TestContext::new().await;
    let (buyer, seller, order) = create_pending_order(&ctx).await;

    ctx.orders.confirm(order.id, seller, None).await.unwrap();
    ctx.orders.ship(order.id, seller, None).await.unwrap();

    let err = ctx.orders.cancel(order.id, buyer, None).await.unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition(_));
}

#[tokio::test]
async fn buying_your_own_item_is_rejected() {
    let ctx = TestContext::new().await;
    let seller = ctx.seed_user("Kofi Seller", false).await;
    let item = ctx.seed_item(seller, dec!(40.50)).await;

    let err = ctx
        .orders
        .create_order(
            seller,
            CreateOrderRequest {
                item_id: item.id,
                quantity: 1,
                shipping_address: "Hall 7".to_string(),
                notes: None,
            },
        )
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::ValidationError(ref msg) if msg.contains("own item"));
}

#[tokio::test]
async fn unavailable_items_cannot_be_ordered() {
    let ctx = TestContext::new().await;
    let buyer = ctx.seed_user("Ama Buyer", false).await;
    let seller = ctx.seed_user("Kofi Seller", false).await;
    let item = ctx
        .seed_item_with_status(seller, dec!(40.50), "sold", false)
        .await;

    let err = ctx
        .orders
        .create_order(
            buyer,
            CreateOrderRequest {
                item_id: item.id,
                quantity: 1,
                shipping_address: "Hall 7".to_string(),
                notes: None,
            },
        )
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::ValidationError(ref msg) if msg.contains("not available"));
}

#[tokio::test]
async fn quantity_is_bounded() {
    let ctx = TestContext::new().await;
    let buyer = ctx.seed_user("Ama Buyer", false).await;
    let seller = ctx.seed_user("Kofi Seller", false).await;
    let item = ctx.seed_item(seller, dec!(40.50)).await;

    for quantity in [0, 11] {
        let err = ctx
            .orders
            .create_order(
                buyer,
                CreateOrderRequest {
                    item_id: item.id,
                    quantity,
                    shipping_address: "Hall 7".to_string(),
                    notes: None,
                },
            )
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));
    }
}

#[tokio::test]
async fn snapshot_total_survives_live_price_changes() {
    let ctx = TestContext::new().await;
    let (buyer, _, order) = create_pending_order(&ctx).await;

    // Reprice the live item after the order was placed.
    let item = campus_market_api::entities::item::Entity::find_by_id(order.item_id)
        .one(&*ctx.db)
        .await
        .unwrap()
        .unwrap();
    let mut item = item.into_active_model();
    item.price = Set(dec!(150.00));
    item.update(&*ctx.db).await.unwrap();

    let stored = ctx.orders.get_order(order.id, buyer).await.unwrap();
    assert_eq!(stored.item_price, dec!(100.00));
    assert_eq!(stored.total_amount, dec!(200.00));
}

#[tokio::test]
async fn concurrent_confirm_and_cancel_have_one_winner() {
    let ctx = TestContext::new().await;
    let (buyer, seller, order) = create_pending_order(&ctx).await;

    let (confirmed, cancelled) = tokio::join!(
        ctx.orders.confirm(order.id, seller, None),
        ctx.orders.cancel(order.id, buyer, None),
    );

    let winners = [confirmed.is_ok(), cancelled.is_ok()]
        .iter()
        .filter(|ok| **ok)
        .count();
    assert_eq!(winners, 1, "exactly one racing transition must win");

    if let Err(err) = &confirmed {
        assert_matches!(err, ServiceError::InvalidTransition(_));
    }
    if let Err(err) = &cancelled {
        assert_matches!(err, ServiceError::InvalidTransition(_));
    }

    // A single transition committed: status plus exactly one new entry.
    let stored = ctx.load_order(order.id).await;
    assert_eq!(stored.timeline.len(), 2);
    let final_status = if confirmed.is_ok() { "confirmed" } else { "cancelled" };
    assert_eq!(stored.status, final_status);
}

#[tokio::test]
async fn refund_is_admin_only_and_from_delivered_only() {
    let ctx = TestContext::new().await;
    let admin = ctx.seed_user("Admin", true).await;
    let (buyer, seller, order) = create_pending_order(&ctx).await;

    // Not refundable while pending.
    let err = ctx.orders.refund(order.id, admin, None).await.unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition(_));

    ctx.orders.confirm(order.id, seller, None).await.unwrap();
    ctx.orders.ship(order.id, seller, None).await.unwrap();
    ctx.orders.deliver(order.id, buyer, None).await.unwrap();

    // Parties cannot refund.
    let err = ctx.orders.refund(order.id, buyer, None).await.unwrap_err();
    assert_matches!(err, ServiceError::Unauthorized(_));

    let refunded = ctx
        .orders
        .refund(order.id, admin, None)
        .await
        .expect("admin refund");
    assert_eq!(refunded.status, OrderStatus::Refunded);
    assert_eq!(refunded.payment_status, OrderPaymentStatus::Refunded);
    assert_eq!(refunded.timeline.len(), 5);
    assert_eq!(refunded.timeline[4].status, OrderStatus::Refunded);
}

#[tokio::test]
async fn only_parties_or_admins_can_view_an_order() {
    let ctx = TestContext::new().await;
    let (buyer, seller, order) = create_pending_order(&ctx).await;
    let stranger = ctx.seed_user("Yaw Stranger", false).await;
    let admin = ctx.seed_user("Admin", true).await;

    assert!(ctx.orders.get_order(order.id, buyer).await.is_ok());
    assert!(ctx.orders.get_order(order.id, seller).await.is_ok());
    assert!(ctx.orders.get_order(order.id, admin).await.is_ok());

    let err = ctx.orders.get_order(order.id, stranger).await.unwrap_err();
    assert_matches!(err, ServiceError::Unauthorized(_));
}

#[tokio::test]
async fn soft_deleted_orders_disappear_from_reads() {
    let ctx = TestContext::new().await;
    let (buyer, _, order) = create_pending_order(&ctx).await;

    ctx.orders.soft_delete(order.id, buyer).await.unwrap();

    let err = ctx.orders.get_order(order.id, buyer).await.unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    // The row itself is retained for audit.
    let stored = ctx.load_order(order.id).await;
    assert!(stored.deleted_at.is_some());
}

#[tokio::test]
async fn list_orders_filters_by_status() {
    let ctx = TestContext::new().await;
    let (buyer, seller, order) = create_pending_order(&ctx).await;

    let second_item = ctx.seed_item(seller, dec!(40.50)).await;
    let second = ctx
        .orders
        .create_order(
            buyer,
            CreateOrderRequest {
                item_id: second_item.id,
                quantity: 1,
                shipping_address: "Hall 7".to_string(),
                notes: None,
            },
        )
        .await
        .unwrap();

    ctx.orders.confirm(order.id, seller, None).await.unwrap();

    let all = ctx
        .orders
        .list_orders(buyer, OrderFilter::default(), 1, 20)
        .await
        .unwrap();
    assert_eq!(all.total, 2);

    let confirmed = ctx
        .orders
        .list_orders(
            buyer,
            OrderFilter {
                status: Some(OrderStatus::Confirmed),
                payment_status: None,
            },
            1,
            20,
        )
        .await
        .unwrap();
    assert_eq!(confirmed.total, 1);
    assert_eq!(confirmed.orders[0].id, order.id);

    let pending = ctx
        .orders
        .list_orders(
            seller,
            OrderFilter {
                status: Some(OrderStatus::Pending),
                payment_status: None,
            },
            1,
            20,
        )
        .await
        .unwrap();
    assert_eq!(pending.total, 1);
    assert_eq!(pending.orders[0].id, second.id);
}
