use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{Connection, insert_into, prelude::*, update};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain::{
        entities::invoices::{InsertInvoiceEntity, InvoiceEntity},
        repositories::invoices::InvoiceRepository,
        value_objects::enums::invoice_statuses::InvoiceStatus,
    },
    infrastructure::postgres::{postgres_connection::PgPoolSquad, schema::invoices},
};

pub struct InvoicePostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl InvoicePostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

const PAYABLE_STATUSES: [&str; 3] = ["PENDING", "PARTIALLY_PAID", "OVERDUE"];

#[async_trait]
impl InvoiceRepository for InvoicePostgres {
    async fn create(&self, insert_entity: InsertInvoiceEntity) -> Result<InvoiceEntity> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = insert_into(invoices::table)
            .values(&insert_entity)
            .returning(InvoiceEntity::as_returning())
            .get_result::<InvoiceEntity>(&mut conn)?;

        Ok(result)
    }

    async fn find_by_id(&self, workspace_id: Uuid, id: Uuid) -> Result<Option<InvoiceEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = invoices::table
            .filter(invoices::workspace_id.eq(workspace_id))
            .filter(invoices::id.eq(id))
            .select(InvoiceEntity::as_select())
            .first::<InvoiceEntity>(&mut conn)
            .optional()?;

        Ok(result)
    }

    async fn list_by_workspace(&self, workspace_id: Uuid) -> Result<Vec<InvoiceEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let results = invoices::table
            .filter(invoices::workspace_id.eq(workspace_id))
            .order(invoices::period_start.desc())
            .select(InvoiceEntity::as_select())
            .load::<InvoiceEntity>(&mut conn)?;

        Ok(results)
    }

    async fn find_by_period(
        &self,
        workspace_id: Uuid,
        period_start: DateTime<Utc>,
    ) -> Result<Option<InvoiceEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = invoices::table
            .filter(invoices::workspace_id.eq(workspace_id))
            .filter(invoices::period_start.eq(period_start))
            .select(InvoiceEntity::as_select())
            .first::<InvoiceEntity>(&mut conn)
            .optional()?;

        Ok(result)
    }

    async fn find_open_for_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<InvoiceEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = invoices::table
            .filter(invoices::subscription_id.eq(subscription_id))
            .filter(invoices::status.eq_any(PAYABLE_STATUSES))
            .order(invoices::period_start.asc())
            .select(InvoiceEntity::as_select())
            .first::<InvoiceEntity>(&mut conn)
            .optional()?;

        Ok(result)
    }

    async fn next_sequence(&self, year: i32, month: u32) -> Result<i64> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let prefix = format!("INV-{year:04}-{month:02}-%");
        let issued: i64 = invoices::table
            .filter(invoices::invoice_number.like(prefix))
            .count()
            .get_result(&mut conn)?;

        Ok(issued + 1)
    }

    async fn record_payment(
        &self,
        invoice_id: Uuid,
        amount_minor: i64,
        paid_at: DateTime<Utc>,
    ) -> Result<InvoiceEntity> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = conn.transaction::<InvoiceEntity, anyhow::Error, _>(|tx| {
            let invoice = invoices::table
                .filter(invoices::id.eq(invoice_id))
                .select(InvoiceEntity::as_select())
                .for_update()
                .first::<InvoiceEntity>(tx)?;

            let paid_minor = (invoice.paid_minor + amount_minor).min(invoice.total_minor);
            let settled = paid_minor >= invoice.total_minor;
            let status = if settled {
                InvoiceStatus::Paid
            } else {
                InvoiceStatus::PartiallyPaid
            };

            let updated = update(invoices::table)
                .filter(invoices::id.eq(invoice_id))
                .set((
                    invoices::paid_minor.eq(paid_minor),
                    invoices::status.eq(status.to_string()),
                    invoices::paid_at.eq(settled.then_some(paid_at)),
                    invoices::updated_at.eq(diesel::dsl::now),
                ))
                .returning(InvoiceEntity::as_returning())
                .get_result::<InvoiceEntity>(tx)?;

            Ok(updated)
        })?;

        Ok(result)
    }

    async fn set_payment_link(&self, invoice_id: Uuid, payment_link_url: &str) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        update(invoices::table)
            .filter(invoices::id.eq(invoice_id))
            .set((
                invoices::payment_link_url.eq(payment_link_url),
                invoices::updated_at.eq(diesel::dsl::now),
            ))
            .execute(&mut conn)?;

        Ok(())
    }

    async fn mark_overdue(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let affected = update(invoices::table)
            .filter(invoices::status.eq_any(["PENDING", "PARTIALLY_PAID"]))
            .filter(invoices::due_at.lt(now))
            .set((
                invoices::status.eq(InvoiceStatus::Overdue.to_string()),
                invoices::updated_at.eq(diesel::dsl::now),
            ))
            .execute(&mut conn)?;

        Ok(affected)
    }
}
