#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, EntityTrait, Set};
use sea_orm_migration::MigratorTrait;
use uuid::Uuid;

use campus_market_api::config::{GatewayConfig, PricingConfig};
use campus_market_api::entities::{item, order, payment, user};
use campus_market_api::errors::ServiceError;
use campus_market_api::migrator::Migrator;
use campus_market_api::services::orders::OrderService;
use campus_market_api::services::payments::PaymentService;
use campus_market_api::services::paystack::{
    charge_from_payload, GatewayCharge, GatewaySession, InitializeTransaction, PaymentGateway,
};

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// In-memory stand-in for the payment gateway. Records initialized charges
/// and reports the outcome each test configures (success by default).
pub struct MockGateway {
    state: Mutex<MockState>,
    pub fail_initialize: AtomicBool,
    pub fail_verify: AtomicBool,
    pub initialize_calls: AtomicUsize,
    pub verify_calls: AtomicUsize,
}

#[derive(Default)]
struct MockState {
    amounts: HashMap<String, i64>,
    outcomes: HashMap<String, String>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            fail_initialize: AtomicBool::new(false),
            fail_verify: AtomicBool::new(false),
            initialize_calls: AtomicUsize::new(0),
            verify_calls: AtomicUsize::new(0),
        }
    }

    /// Overrides the charge status the gateway will report for a reference.
    pub fn set_outcome(&self, reference: &str, status: &str) {
        self.state
            .lock()
            .unwrap()
            .outcomes
            .insert(reference.to_string(), status.to_string());
    }

    pub fn initialized_amount(&self, reference: &str) -> Option<i64> {
        self.state.lock().unwrap().amounts.get(reference).copied()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn initialize_transaction(
        &self,
        request: InitializeTransaction,
    ) -> Result<GatewaySession, ServiceError> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_initialize.load(Ordering::SeqCst) {
            return Err(ServiceError::GatewayUnavailable("gateway offline".to_string()));
        }

        let mut state = self.state.lock().unwrap();
        state
            .amounts
            .insert(request.reference.clone(), request.amount);

        Ok(GatewaySession {
            authorization_url: format!("https://checkout.example/{}", request.reference),
            access_code: format!("AC_{}", request.reference),
            reference: request.reference,
        })
    }

    async fn verify_transaction(&self, reference: &str) -> Result<GatewayCharge, ServiceError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_verify.load(Ordering::SeqCst) {
            return Err(ServiceError::VerificationFailed("gateway timeout".to_string()));
        }

        let state = self.state.lock().unwrap();
        let amount = state.amounts.get(reference).copied().unwrap_or(0);
        let status = state
            .outcomes
            .get(reference)
            .cloned()
            .unwrap_or_else(|| "success".to_string());

        let payload = serde_json::json!({
            "reference": reference,
            "status": status,
            "amount": amount,
            "currency": "GHS",
            "channel": "card",
        });

        Ok(charge_from_payload(reference, payload))
    }
}

pub struct TestContext {
    pub db: Arc<DatabaseConnection>,
    pub orders: OrderService,
    pub payments: PaymentService,
    pub gateway: Arc<MockGateway>,
}

impl TestContext {
    pub async fn new() -> Self {
        // A single pooled connection keeps every test query on the same
        // in-memory database.
        let mut options = ConnectOptions::new("sqlite::memory:".to_string());
        options.max_connections(1).sqlx_logging(false);

        let db = Database::connect(options).await.expect("connect sqlite");
        Migrator::up(&db, None).await.expect("run migrations");
        let db = Arc::new(db);

        let gateway = Arc::new(MockGateway::new());
        let gateway_config = GatewayConfig {
            secret_key: "sk_test_secret".to_string(),
            public_key: None,
            base_url: "https://api.paystack.test".to_string(),
            callback_url: "https://app.test/payment/callback".to_string(),
            webhook_secret: Some(WEBHOOK_SECRET.to_string()),
            currency: "GHS".to_string(),
            timeout_secs: 5,
        };

        let orders = OrderService::new(db.clone(), None);
        let payments = PaymentService::new(
            db.clone(),
            gateway.clone(),
            gateway_config,
            PricingConfig::default(),
            orders.clone(),
            None,
        );

        Self {
            db,
            orders,
            payments,
            gateway,
        }
    }

    pub async fn seed_user(&self, name: &str, is_admin: bool) -> Uuid {
        let id = Uuid::new_v4();
        user::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            email: Set(format!(
                "{}.{}@campus.edu",
                name.to_lowercase().replace(' ', "."),
                id.simple()
            )),
            is_admin: Set(is_admin),
            premium_credits: Set(0),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.db)
        .await
        .expect("seed user");
        id
    }

    pub async fn seed_item(&self, seller_id: Uuid, price: Decimal) -> item::Model {
        self.seed_item_with_status(seller_id, price, "available", true)
            .await
    }

    pub async fn seed_item_with_status(
        &self,
        seller_id: Uuid,
        price: Decimal,
        status: &str,
        is_available: bool,
    ) -> item::Model {
        item::ActiveModel {
            id: Set(Uuid::new_v4()),
            seller_id: Set(seller_id),
            title: Set("Desk lamp".to_string()),
            price: Set(price),
            category: Set("electronics".to_string()),
            condition: Set("used".to_string()),
            status: Set(status.to_string()),
            is_available: Set(is_available),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.db)
        .await
        .expect("seed item")
    }

    pub async fn load_order(&self, order_id: Uuid) -> order::Model {
        order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await
            .expect("query order")
            .expect("order exists")
    }

    pub async fn load_payment(&self, reference: &str) -> payment::Model {
        use sea_orm::{ColumnTrait, QueryFilter};

        payment::Entity::find()
            .filter(payment::Column::Reference.eq(reference))
            .one(&*self.db)
            .await
            .expect("query payment")
            .expect("payment exists")
    }

    pub async fn load_user(&self, user_id: Uuid) -> user::Model {
        user::Entity::find_by_id(user_id)
            .one(&*self.db)
            .await
            .expect("query user")
            .expect("user exists")
    }

    pub async fn count_payments(&self) -> u64 {
        use sea_orm::PaginatorTrait;

        payment::Entity::find()
            .count(&*self.db)
            .await
            .expect("count payments")
    }
}

/// Signs a webhook body the way the gateway does.
pub fn sign_webhook(body: &[u8]) -> String {
    campus_market_api::services::paystack::sign_payload(WEBHOOK_SECRET, body)
}
