use crate::models::{EmailStatus, OrderItemLine};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payment status column values.
pub const PAYMENT_STATUS_PENDING: &str = "pending";
pub const PAYMENT_STATUS_PAID: &str = "paid";

/// Order entity model: the persisted unit of truth for a transaction.
///
/// Addresses and cart lines are stored as JSON text so the insert-or-replace
/// upsert stays a single statement, which is the concurrency-correctness
/// boundary for duplicate submissions of the same order number.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub order_number: String,

    pub created_at: DateTime<Utc>,

    pub payment_status: String,

    pub paid_at: Option<DateTime<Utc>>,

    pub payment_method: String,

    pub customer_first_name: String,

    pub customer_last_name: String,

    pub customer_email: String,

    pub customer_phone: Option<String>,

    /// JSON-serialized [`crate::models::Address`]
    pub billing_address: String,

    /// JSON-serialized [`crate::models::Address`]; set only when it differs
    /// from the billing address
    pub shipping_address: Option<String>,

    pub shipping_method: String,

    pub shipping_cost: Decimal,

    /// JSON-serialized `Vec<OrderItemLine>`
    pub items: String,

    pub subtotal: Decimal,

    pub discount_amount: Decimal,

    pub promo_code: Option<String>,

    pub card_fee: Decimal,

    pub total: Decimal,

    pub stock_updated: bool,

    pub customer_email_status: String,

    pub admin_email_status: String,

    pub notes: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_paid(&self) -> bool {
        self.payment_status == PAYMENT_STATUS_PAID
    }

    pub fn line_items(&self) -> Result<Vec<OrderItemLine>, serde_json::Error> {
        serde_json::from_str(&self.items)
    }

    pub fn customer_email_status(&self) -> EmailStatus {
        EmailStatus::from_column_value(&self.customer_email_status)
    }

    pub fn admin_email_status(&self) -> EmailStatus {
        EmailStatus::from_column_value(&self.admin_email_status)
    }
}
