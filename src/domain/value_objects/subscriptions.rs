use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    entities::subscriptions::SubscriptionEntity,
    value_objects::enums::{
        billing_cycles::BillingCycle, subscription_statuses::SubscriptionStatus,
    },
};

#[derive(Debug, Serialize)]
pub struct SubscriptionDto {
    pub id: Uuid,
    pub plan_code: String,
    pub billing_cycle: BillingCycle,
    pub status: SubscriptionStatus,
    pub provider: String,
    pub currency: String,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub grace_period_ends_at: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub auto_renewing: bool,
    pub checkout_url: Option<String>,
}

impl From<SubscriptionEntity> for SubscriptionDto {
    fn from(value: SubscriptionEntity) -> Self {
        Self {
            id: value.id,
            plan_code: value.plan_code.clone(),
            billing_cycle: value.billing_cycle_enum(),
            status: value.status_enum(),
            provider: value.provider.clone(),
            currency: value.currency.clone(),
            current_period_start: value.current_period_start,
            current_period_end: value.current_period_end,
            trial_ends_at: value.trial_ends_at,
            grace_period_ends_at: value.grace_period_ends_at,
            cancel_at_period_end: value.cancel_at_period_end,
            auto_renewing: value.auto_renewing,
            checkout_url: value.checkout_url,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelSubscriptionRequest {
    #[serde(default)]
    pub immediate: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangePlanRequest {
    pub plan_code: String,
    pub billing_cycle: BillingCycle,
    #[serde(default)]
    pub immediate: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartTrialRequest {
    pub plan_code: String,
}
