use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::{
    domain::value_objects::enums::{
        billing_cycles::BillingCycle, payment_providers::PaymentProvider,
        subscription_statuses::SubscriptionStatus,
    },
    infrastructure::postgres::schema::subscriptions,
};

#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = subscriptions)]
pub struct SubscriptionEntity {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub plan_code: String,
    pub billing_cycle: String,
    pub status: String,
    pub provider: String,
    pub external_subscription_id: Option<String>,
    pub external_customer_id: Option<String>,
    pub currency: String,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub grace_period_ends_at: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub auto_renewing: bool,
    pub failed_payment_count: i32,
    pub pending_proration_minor: i64,
    pub checkout_url: Option<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionEntity {
    pub fn status_enum(&self) -> SubscriptionStatus {
        SubscriptionStatus::from_str(&self.status)
    }

    pub fn billing_cycle_enum(&self) -> BillingCycle {
        BillingCycle::try_from_str(&self.billing_cycle).unwrap_or_default()
    }

    pub fn provider_enum(&self) -> Option<PaymentProvider> {
        PaymentProvider::try_from_str(&self.provider)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = subscriptions)]
pub struct InsertSubscriptionEntity {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub plan_code: String,
    pub billing_cycle: String,
    pub status: String,
    pub provider: String,
    pub external_subscription_id: Option<String>,
    pub external_customer_id: Option<String>,
    pub currency: String,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub auto_renewing: bool,
}
