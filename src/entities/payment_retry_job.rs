use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Retry-job status column values.
pub const RETRY_STATUS_PENDING: &str = "pending";
pub const RETRY_STATUS_COMPLETED: &str = "completed";
pub const RETRY_STATUS_FAILED: &str = "failed";

/// Payment-confirmation retry bookkeeping: one row per gateway session whose
/// fulfillment failed transiently after the payment was confirmed approved.
/// The sweep that drains due jobs is externally triggered; only the data
/// shape and store operations live here.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_retry_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub session: String,

    pub attempts: i32,

    pub next_run_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    pub last_error: Option<String>,

    pub status: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
