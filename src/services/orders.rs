//! Durable order store: insert-or-replace order persistence keyed by the
//! unique order number, session lookups for gateway postbacks, and the
//! payment-retry job table. The store owns the database handle; nothing in
//! the crate touches an ambient global connection.

use crate::{
    db::DbPool,
    entities::{
        order::{self, Entity as OrderEntity, PAYMENT_STATUS_PAID, PAYMENT_STATUS_PENDING},
        payment_retry_job::{
            self, Entity as RetryJobEntity, RETRY_STATUS_COMPLETED, RETRY_STATUS_FAILED,
            RETRY_STATUS_PENDING,
        },
    },
    errors::ServiceError,
    models::FulfillmentOutcome,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::OnConflict, ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Attempts after which a retry job is marked failed instead of rescheduled.
const MAX_RETRY_ATTEMPTS: i32 = 8;

/// Minutes between retry attempts, scaled linearly by attempt count.
const RETRY_BASE_DELAY_MINUTES: i64 = 5;

#[derive(Clone)]
pub struct OrderStore {
    db: Arc<DbPool>,
}

impl OrderStore {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Generates a short human-facing order number; it doubles as the
    /// gateway session token.
    pub fn generate_order_number() -> String {
        let id = Uuid::new_v4().simple().to_string();
        format!("SO-{}", id[..8].to_uppercase())
    }

    /// Inserts or replaces an order keyed by its unique order number.
    ///
    /// The write is a single statement with a conflict clause; that is the
    /// concurrency boundary for duplicate submissions of the same order
    /// number. Identity columns (id, order number, created_at) survive a
    /// replace.
    #[instrument(skip(self, order), fields(order_number = %order.order_number))]
    pub async fn upsert_order(
        &self,
        mut order: order::Model,
    ) -> Result<order::Model, ServiceError> {
        // Normalize required fields before the write.
        if order.id.is_nil() {
            order.id = Uuid::new_v4();
        }
        if order.order_number.is_empty() {
            order.order_number = Self::generate_order_number();
        }
        if order.payment_status.is_empty() {
            order.payment_status = PAYMENT_STATUS_PENDING.to_string();
        }

        let active = order::ActiveModel {
            id: Set(order.id),
            order_number: Set(order.order_number.clone()),
            created_at: Set(order.created_at),
            payment_status: Set(order.payment_status.clone()),
            paid_at: Set(order.paid_at),
            payment_method: Set(order.payment_method.clone()),
            customer_first_name: Set(order.customer_first_name.clone()),
            customer_last_name: Set(order.customer_last_name.clone()),
            customer_email: Set(order.customer_email.clone()),
            customer_phone: Set(order.customer_phone.clone()),
            billing_address: Set(order.billing_address.clone()),
            shipping_address: Set(order.shipping_address.clone()),
            shipping_method: Set(order.shipping_method.clone()),
            shipping_cost: Set(order.shipping_cost),
            items: Set(order.items.clone()),
            subtotal: Set(order.subtotal),
            discount_amount: Set(order.discount_amount),
            promo_code: Set(order.promo_code.clone()),
            card_fee: Set(order.card_fee),
            total: Set(order.total),
            stock_updated: Set(order.stock_updated),
            customer_email_status: Set(order.customer_email_status.clone()),
            admin_email_status: Set(order.admin_email_status.clone()),
            notes: Set(order.notes.clone()),
        };

        OrderEntity::insert(active)
            .on_conflict(
                OnConflict::column(order::Column::OrderNumber)
                    .update_columns([
                        order::Column::PaymentStatus,
                        order::Column::PaidAt,
                        order::Column::PaymentMethod,
                        order::Column::CustomerFirstName,
                        order::Column::CustomerLastName,
                        order::Column::CustomerEmail,
                        order::Column::CustomerPhone,
                        order::Column::BillingAddress,
                        order::Column::ShippingAddress,
                        order::Column::ShippingMethod,
                        order::Column::ShippingCost,
                        order::Column::Items,
                        order::Column::Subtotal,
                        order::Column::DiscountAmount,
                        order::Column::PromoCode,
                        order::Column::CardFee,
                        order::Column::Total,
                        order::Column::StockUpdated,
                        order::Column::CustomerEmailStatus,
                        order::Column::AdminEmailStatus,
                        order::Column::Notes,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;

        info!(order_number = %order.order_number, "order persisted");
        Ok(order)
    }

    /// Looks an order up by the gateway session token, which is the order
    /// number; an id is accepted too since both identify the order.
    #[instrument(skip(self))]
    pub async fn get_order_by_session(
        &self,
        session: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        let by_number = OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(session))
            .one(&*self.db)
            .await?;
        if by_number.is_some() {
            return Ok(by_number);
        }

        if let Ok(id) = Uuid::parse_str(session) {
            return Ok(OrderEntity::find_by_id(id).one(&*self.db).await?);
        }

        Ok(None)
    }

    /// All orders, newest first, for administrative review.
    pub async fn list_orders(&self) -> Result<Vec<order::Model>, ServiceError> {
        Ok(OrderEntity::find()
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Persists what fulfillment accomplished, optionally transitioning the
    /// order to paid. The paid transition happens at most once; an already
    /// paid order keeps its original `paid_at`.
    #[instrument(skip(self, outcome))]
    pub async fn record_fulfillment(
        &self,
        order_number: &str,
        outcome: &FulfillmentOutcome,
        mark_paid: bool,
    ) -> Result<order::Model, ServiceError> {
        let order = self
            .get_order_by_session(order_number)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_number)))?;

        let already_paid = order.is_paid();
        let mut active: order::ActiveModel = order.into();
        active.stock_updated = Set(outcome.stock_updated);
        active.customer_email_status = Set(outcome.customer_email.to_column_value());
        active.admin_email_status = Set(outcome.admin_email.to_column_value());
        if mark_paid && !already_paid {
            active.payment_status = Set(PAYMENT_STATUS_PAID.to_string());
            active.paid_at = Set(Some(Utc::now()));
        }

        Ok(active.update(&*self.db).await?)
    }

    // ---- Payment retry jobs ------------------------------------------------

    /// Creates or advances the retry job for a gateway session. The unique
    /// constraint on `session` keeps it to one job per order.
    #[instrument(skip(self))]
    pub async fn upsert_retry_job(
        &self,
        session: &str,
        last_error: &str,
    ) -> Result<payment_retry_job::Model, ServiceError> {
        let now = Utc::now();

        if let Some(existing) = self.get_retry_job_by_session(session).await? {
            let attempts = existing.attempts + 1;
            let status = if attempts >= MAX_RETRY_ATTEMPTS {
                RETRY_STATUS_FAILED
            } else {
                RETRY_STATUS_PENDING
            };

            let mut active: payment_retry_job::ActiveModel = existing.into();
            active.attempts = Set(attempts);
            active.next_run_at =
                Set(now + ChronoDuration::minutes(RETRY_BASE_DELAY_MINUTES * attempts as i64));
            active.updated_at = Set(now);
            active.last_error = Set(Some(last_error.to_string()));
            active.status = Set(status.to_string());

            if status == RETRY_STATUS_FAILED {
                warn!(session = %session, attempts, "retry job exhausted");
            }
            return Ok(active.update(&*self.db).await?);
        }

        let job = payment_retry_job::ActiveModel {
            id: Set(Uuid::new_v4()),
            session: Set(session.to_string()),
            attempts: Set(1),
            next_run_at: Set(now + ChronoDuration::minutes(RETRY_BASE_DELAY_MINUTES)),
            created_at: Set(now),
            updated_at: Set(now),
            last_error: Set(Some(last_error.to_string())),
            status: Set(RETRY_STATUS_PENDING.to_string()),
        };
        Ok(job.insert(&*self.db).await?)
    }

    pub async fn get_retry_job_by_session(
        &self,
        session: &str,
    ) -> Result<Option<payment_retry_job::Model>, ServiceError> {
        Ok(RetryJobEntity::find()
            .filter(payment_retry_job::Column::Session.eq(session))
            .one(&*self.db)
            .await?)
    }

    /// Pending jobs whose `next_run_at` has passed, oldest first; consumed
    /// by the externally-triggered sweep.
    pub async fn list_due_pending_retry_jobs(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<payment_retry_job::Model>, ServiceError> {
        Ok(RetryJobEntity::find()
            .filter(payment_retry_job::Column::Status.eq(RETRY_STATUS_PENDING))
            .filter(payment_retry_job::Column::NextRunAt.lte(now))
            .order_by_asc(payment_retry_job::Column::NextRunAt)
            .all(&*self.db)
            .await?)
    }

    /// Marks a session's retry job completed after a successful retry.
    pub async fn complete_retry_job(&self, session: &str) -> Result<(), ServiceError> {
        if let Some(job) = self.get_retry_job_by_session(session).await? {
            let mut active: payment_retry_job::ActiveModel = job.into();
            active.status = Set(RETRY_STATUS_COMPLETED.to_string());
            active.updated_at = Set(Utc::now());
            active.update(&*self.db).await?;
        }
        Ok(())
    }

    // ---- Legacy flat-file bootstrap ----------------------------------------

    /// One-time ingest of the legacy flat-file order list, only while the
    /// durable store is still empty. Returns the number of imported orders.
    #[instrument(skip(self))]
    pub async fn import_legacy_orders(&self, path: &Path) -> Result<usize, ServiceError> {
        let existing = OrderEntity::find().count(&*self.db).await?;
        if existing > 0 {
            return Ok(0);
        }
        if !path.exists() {
            return Ok(0);
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|e| ServiceError::InternalError(format!("legacy order file: {}", e)))?;
        let legacy: Vec<LegacyOrder> = serde_json::from_str(&raw)?;
        let count = legacy.len();

        for entry in legacy {
            let order = entry.into_order();
            self.upsert_order(order).await?;
        }

        info!(count, "legacy orders imported");
        Ok(count)
    }
}

/// Loose shape of the legacy flat-file order list.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyOrder {
    #[serde(default)]
    id: Option<Uuid>,
    order_number: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    paid_at: Option<DateTime<Utc>>,
    #[serde(default = "legacy_default_method")]
    payment_method: String,
    first_name: String,
    last_name: String,
    email: String,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    billing_address: serde_json::Value,
    #[serde(default)]
    shipping_address: Option<serde_json::Value>,
    #[serde(default)]
    shipping_method: Option<String>,
    #[serde(default)]
    shipping_cost: Decimal,
    #[serde(default)]
    items: serde_json::Value,
    #[serde(default)]
    subtotal: Decimal,
    #[serde(default)]
    discount_amount: Decimal,
    #[serde(default)]
    promo_code: Option<String>,
    #[serde(default)]
    card_fee: Decimal,
    #[serde(default)]
    total: Decimal,
    #[serde(default)]
    notes: Option<String>,
}

fn legacy_default_method() -> String {
    "etransfer".to_string()
}

impl LegacyOrder {
    fn into_order(self) -> order::Model {
        order::Model {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            order_number: self.order_number,
            created_at: self.created_at.unwrap_or_else(Utc::now),
            payment_status: self
                .payment_status
                .unwrap_or_else(|| PAYMENT_STATUS_PENDING.to_string()),
            paid_at: self.paid_at,
            payment_method: self.payment_method,
            customer_first_name: self.first_name,
            customer_last_name: self.last_name,
            customer_email: self.email,
            customer_phone: self.phone,
            billing_address: self.billing_address.to_string(),
            shipping_address: self.shipping_address.map(|v| v.to_string()),
            shipping_method: self.shipping_method.unwrap_or_else(|| "standard".into()),
            shipping_cost: self.shipping_cost,
            items: self.items.to_string(),
            subtotal: self.subtotal,
            discount_amount: self.discount_amount,
            promo_code: self.promo_code,
            card_fee: self.card_fee,
            total: self.total,
            stock_updated: true,
            customer_email_status: "skipped".to_string(),
            admin_email_status: "skipped".to_string(),
            notes: self.notes,
        }
    }
}
