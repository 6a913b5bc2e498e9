use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::{
    domain::value_objects::enums::invoice_statuses::InvoiceStatus,
    infrastructure::postgres::schema::invoices,
};

#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = invoices)]
pub struct InvoiceEntity {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub invoice_number: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_minor: i64,
    pub paid_minor: i64,
    pub currency: String,
    pub status: String,
    pub due_at: DateTime<Utc>,
    pub auto_payment_enabled: bool,
    pub payment_method_id: Option<Uuid>,
    pub payment_link_url: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InvoiceEntity {
    pub fn status_enum(&self) -> InvoiceStatus {
        InvoiceStatus::from_str(&self.status)
    }

    pub fn outstanding_minor(&self) -> i64 {
        (self.total_minor - self.paid_minor).max(0)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = invoices)]
pub struct InsertInvoiceEntity {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub invoice_number: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_minor: i64,
    pub paid_minor: i64,
    pub currency: String,
    pub status: String,
    pub due_at: DateTime<Utc>,
    pub auto_payment_enabled: bool,
    pub payment_method_id: Option<Uuid>,
}
