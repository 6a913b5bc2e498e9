use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::invoices::{InsertInvoiceEntity, InvoiceEntity};

#[automock]
#[async_trait]
pub trait InvoiceRepository {
    async fn create(&self, insert_entity: InsertInvoiceEntity) -> Result<InvoiceEntity>;

    async fn find_by_id(&self, workspace_id: Uuid, id: Uuid) -> Result<Option<InvoiceEntity>>;

    async fn list_by_workspace(&self, workspace_id: Uuid) -> Result<Vec<InvoiceEntity>>;

    /// Invoice whose period contains `period_start`, used to keep generation
    /// idempotent per workspace and billing month.
    async fn find_by_period(
        &self,
        workspace_id: Uuid,
        period_start: DateTime<Utc>,
    ) -> Result<Option<InvoiceEntity>>;

    /// Oldest still-payable invoice for the subscription, if any.
    async fn find_open_for_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<InvoiceEntity>>;

    /// Next value of the monthly invoice-number sequence.
    async fn next_sequence(&self, year: i32, month: u32) -> Result<i64>;

    /// Credits a payment, capping paid at total and moving the status to
    /// PARTIALLY_PAID or PAID accordingly. Returns the updated row.
    async fn record_payment(
        &self,
        invoice_id: Uuid,
        amount_minor: i64,
        paid_at: DateTime<Utc>,
    ) -> Result<InvoiceEntity>;

    async fn set_payment_link(&self, invoice_id: Uuid, payment_link_url: &str) -> Result<()>;

    /// Flips payable invoices past their due date to OVERDUE; returns how
    /// many rows changed.
    async fn mark_overdue(&self, now: DateTime<Utc>) -> Result<usize>;
}
