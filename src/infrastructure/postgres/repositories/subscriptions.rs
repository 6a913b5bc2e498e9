use anyhow::Result;
use async_trait::async_trait;
use diesel::dsl::{exists, now, select};
use diesel::{insert_into, prelude::*, update};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain::{
        entities::subscriptions::{InsertSubscriptionEntity, SubscriptionEntity},
        lifecycle::SubscriptionChanges,
        repositories::subscriptions::SubscriptionRepository,
        value_objects::enums::{
            payment_providers::PaymentProvider, subscription_statuses::SubscriptionStatus,
        },
    },
    infrastructure::postgres::{postgres_connection::PgPoolSquad, schema::subscriptions},
};

pub struct SubscriptionPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl SubscriptionPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

const TERMINAL_STATUSES: [&str; 2] = ["CANCELLED", "EXPIRED"];

#[async_trait]
impl SubscriptionRepository for SubscriptionPostgres {
    async fn create(&self, insert_entity: InsertSubscriptionEntity) -> Result<Uuid> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = insert_into(subscriptions::table)
            .values(&insert_entity)
            .returning(subscriptions::id)
            .get_result::<Uuid>(&mut conn)?;

        Ok(result)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<SubscriptionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = subscriptions::table
            .filter(subscriptions::id.eq(id))
            .select(SubscriptionEntity::as_select())
            .first::<SubscriptionEntity>(&mut conn)
            .optional()?;

        Ok(result)
    }

    async fn find_current_by_workspace(
        &self,
        workspace_id: Uuid,
    ) -> Result<Option<SubscriptionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = subscriptions::table
            .filter(subscriptions::workspace_id.eq(workspace_id))
            .filter(subscriptions::status.ne_all(TERMINAL_STATUSES))
            .order(subscriptions::created_at.desc())
            .select(SubscriptionEntity::as_select())
            .first::<SubscriptionEntity>(&mut conn)
            .optional()?;

        Ok(result)
    }

    async fn find_by_external_id(
        &self,
        provider: PaymentProvider,
        external_subscription_id: &str,
    ) -> Result<Option<SubscriptionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = subscriptions::table
            .filter(subscriptions::provider.eq(provider.to_string()))
            .filter(subscriptions::external_subscription_id.eq(external_subscription_id))
            .select(SubscriptionEntity::as_select())
            .first::<SubscriptionEntity>(&mut conn)
            .optional()?;

        Ok(result)
    }

    async fn update_guarded(
        &self,
        id: Uuid,
        expected_version: i32,
        changes: SubscriptionChanges,
    ) -> Result<bool> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let affected = update(subscriptions::table)
            .filter(subscriptions::id.eq(id))
            .filter(subscriptions::version.eq(expected_version))
            .set((
                subscriptions::status.eq(changes.status.to_string()),
                subscriptions::plan_code.eq(changes.plan_code),
                subscriptions::billing_cycle.eq(changes.billing_cycle.to_string()),
                subscriptions::current_period_start.eq(changes.current_period_start),
                subscriptions::current_period_end.eq(changes.current_period_end),
                subscriptions::grace_period_ends_at.eq(changes.grace_period_ends_at),
                subscriptions::cancel_at_period_end.eq(changes.cancel_at_period_end),
                subscriptions::auto_renewing.eq(changes.auto_renewing),
                subscriptions::failed_payment_count.eq(changes.failed_payment_count),
                subscriptions::pending_proration_minor.eq(changes.pending_proration_minor),
                subscriptions::version.eq(subscriptions::version + 1),
                subscriptions::updated_at.eq(now),
            ))
            .execute(&mut conn)?;

        Ok(affected == 1)
    }

    async fn has_used_trial(&self, workspace_id: Uuid) -> Result<bool> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let used = select(exists(
            subscriptions::table
                .filter(subscriptions::workspace_id.eq(workspace_id))
                .filter(
                    subscriptions::trial_ends_at
                        .is_not_null()
                        .or(subscriptions::status.eq(SubscriptionStatus::Trialing.to_string())),
                ),
        ))
        .get_result::<bool>(&mut conn)?;

        Ok(used)
    }

    async fn set_external_refs(
        &self,
        id: Uuid,
        external_subscription_id: Option<String>,
        external_customer_id: Option<String>,
        checkout_url: Option<String>,
    ) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        update(subscriptions::table)
            .filter(subscriptions::id.eq(id))
            .set((
                subscriptions::external_subscription_id.eq(external_subscription_id),
                subscriptions::external_customer_id.eq(external_customer_id),
                subscriptions::checkout_url.eq(checkout_url),
                subscriptions::updated_at.eq(now),
            ))
            .execute(&mut conn)?;

        Ok(())
    }
}
