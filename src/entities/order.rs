use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::TimelineEntry;

/// Append-only audit trail of an order, stored as a JSON column. Entries are
/// only ever pushed; existing entries are never rewritten or reordered.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct Timeline(pub Vec<TimelineEntry>);

impl Timeline {
    pub fn starting_with(entry: TimelineEntry) -> Self {
        Self(vec![entry])
    }

    pub fn appended(&self, entry: TimelineEntry) -> Self {
        let mut entries = self.0.clone();
        entries.push(entry);
        Self(entries)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The `orders` table.
///
/// `item_title`, `item_price`, `quantity` and `total_amount` are snapshots
/// taken at creation; they are never re-derived from the live item. `status`
/// and `payment_status` are independent axes, both stored as their lowercase
/// string form.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub item_id: Uuid,

    pub item_title: String,
    pub item_price: Decimal,
    pub quantity: i32,
    pub total_amount: Decimal,

    pub status: String,
    pub payment_status: String,
    pub payment_reference: Option<String>,

    pub shipping_address: String,
    pub notes: Option<String>,

    #[sea_orm(column_type = "Json")]
    pub timeline: Timeline,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Soft delete marker; deleted orders are retained for audit.
    pub deleted_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::item::Entity",
        from = "Column::ItemId",
        to = "super::item::Column::Id",
        on_update = "Cascade",
        on_delete = "Restrict"
    )]
    Item,
    #[sea_orm(has_many = "super::payment::Entity")]
    Payments,
}

impl Related<super::item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Item.def()
    }
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
