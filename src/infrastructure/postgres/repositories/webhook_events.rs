use anyhow::Result;
use async_trait::async_trait;
use diesel::dsl::{exists, select};
use diesel::{Connection, PgConnection, insert_into, prelude::*, update};
use std::sync::Arc;

use crate::{
    domain::{
        entities::processed_webhook_events::InsertProcessedWebhookEventEntity,
        repositories::webhook_events::{
            EventApplyOutcome, InvoicePaymentDelta, SubscriptionMutation, WebhookEventRepository,
        },
        value_objects::enums::invoice_statuses::InvoiceStatus,
    },
    infrastructure::postgres::{
        postgres_connection::PgPoolSquad,
        schema::{invoices, processed_webhook_events, subscriptions},
    },
};

pub struct WebhookEventPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl WebhookEventPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

/// Transaction-local error so a version conflict rolls the dedup insert back
/// without surfacing as a database failure.
#[derive(Debug)]
enum TxError {
    VersionConflict,
    Db(diesel::result::Error),
}

impl From<diesel::result::Error> for TxError {
    fn from(err: diesel::result::Error) -> Self {
        TxError::Db(err)
    }
}

fn apply_mutation(tx: &mut PgConnection, mutation: &SubscriptionMutation) -> Result<(), TxError> {
    let changes = &mutation.changes;
    let affected = update(subscriptions::table)
        .filter(subscriptions::id.eq(mutation.subscription_id))
        .filter(subscriptions::version.eq(mutation.expected_version))
        .set((
            subscriptions::status.eq(changes.status.to_string()),
            subscriptions::plan_code.eq(changes.plan_code.clone()),
            subscriptions::billing_cycle.eq(changes.billing_cycle.to_string()),
            subscriptions::current_period_start.eq(changes.current_period_start),
            subscriptions::current_period_end.eq(changes.current_period_end),
            subscriptions::grace_period_ends_at.eq(changes.grace_period_ends_at),
            subscriptions::cancel_at_period_end.eq(changes.cancel_at_period_end),
            subscriptions::auto_renewing.eq(changes.auto_renewing),
            subscriptions::failed_payment_count.eq(changes.failed_payment_count),
            subscriptions::pending_proration_minor.eq(changes.pending_proration_minor),
            subscriptions::version.eq(subscriptions::version + 1),
            subscriptions::updated_at.eq(diesel::dsl::now),
        ))
        .execute(tx)?;
    if affected != 1 {
        return Err(TxError::VersionConflict);
    }

    if let Some(payment) = &mutation.invoice_payment {
        credit_invoice(tx, payment)?;
    }
    Ok(())
}

fn credit_invoice(tx: &mut PgConnection, payment: &InvoicePaymentDelta) -> Result<(), TxError> {
    let (total_minor, paid_minor) = invoices::table
        .filter(invoices::id.eq(payment.invoice_id))
        .select((invoices::total_minor, invoices::paid_minor))
        .for_update()
        .first::<(i64, i64)>(tx)?;

    let new_paid = (paid_minor + payment.amount_minor).min(total_minor);
    let settled = new_paid >= total_minor;
    let status = if settled {
        InvoiceStatus::Paid
    } else {
        InvoiceStatus::PartiallyPaid
    };

    update(invoices::table)
        .filter(invoices::id.eq(payment.invoice_id))
        .set((
            invoices::paid_minor.eq(new_paid),
            invoices::status.eq(status.to_string()),
            invoices::paid_at.eq(settled.then(chrono::Utc::now)),
            invoices::updated_at.eq(diesel::dsl::now),
        ))
        .execute(tx)?;
    Ok(())
}

#[async_trait]
impl WebhookEventRepository for WebhookEventPostgres {
    async fn is_processed(&self, provider: &str, event_id: &str) -> Result<bool> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let processed = select(exists(
            processed_webhook_events::table
                .filter(processed_webhook_events::provider.eq(provider))
                .filter(processed_webhook_events::event_id.eq(event_id)),
        ))
        .get_result::<bool>(&mut conn)?;

        Ok(processed)
    }

    async fn record_and_apply(
        &self,
        record: InsertProcessedWebhookEventEntity,
        mutation: Option<SubscriptionMutation>,
    ) -> Result<EventApplyOutcome> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = conn.transaction::<EventApplyOutcome, TxError, _>(|tx| {
            // The unique (provider, event_id) index makes redelivery a no-op.
            let inserted = insert_into(processed_webhook_events::table)
                .values(&record)
                .on_conflict((
                    processed_webhook_events::provider,
                    processed_webhook_events::event_id,
                ))
                .do_nothing()
                .execute(tx)?;
            if inserted == 0 {
                return Ok(EventApplyOutcome::Duplicate);
            }

            if let Some(mutation) = &mutation {
                apply_mutation(tx, mutation)?;
            }
            Ok(EventApplyOutcome::Applied)
        });

        match result {
            Ok(outcome) => Ok(outcome),
            Err(TxError::VersionConflict) => Ok(EventApplyOutcome::VersionConflict),
            Err(TxError::Db(err)) => Err(err.into()),
        }
    }
}
