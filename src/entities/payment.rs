use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The `payments` table.
///
/// `reference` is the gateway reference and doubles as the idempotency key:
/// a payment is reconciled at most once per reference, no matter how many
/// verify calls or webhook deliveries race for it. The raw gateway payload is
/// kept verbatim for audit and never re-parsed beyond the fields the
/// reconciliation path reads.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: Uuid,
    /// Null for non-order products (premium listing, bundle, hostel booking).
    pub order_id: Option<Uuid>,

    pub amount: Decimal,
    pub currency: String,

    #[sea_orm(unique)]
    pub reference: String,

    pub status: String,
    /// Purpose tag: null = order payment, otherwise "premium", "bundle" or
    /// "hostel".
    pub plan: Option<String>,
    pub description: Option<String>,

    #[sea_orm(column_type = "Json", nullable)]
    pub gateway_response: Option<Json>,

    /// Stamped exactly once, when the payment first verifies as successful.
    pub paid_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id",
        on_update = "Cascade",
        on_delete = "Restrict"
    )]
    Order,
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_update = "Cascade",
        on_delete = "Restrict"
    )]
    User,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
