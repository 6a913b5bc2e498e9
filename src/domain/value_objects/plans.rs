use serde::Serialize;

use crate::domain::entities::plans::PlanEntity;
use crate::domain::value_objects::enums::billing_cycles::BillingCycle;

#[derive(Debug, Serialize)]
pub struct PlanDto {
    pub plan_code: String,
    pub display_name: String,
    pub monthly_price_minor: i64,
    pub annual_price_minor: i64,
    pub currency: String,
    pub trial_days: i32,
}

impl From<PlanEntity> for PlanDto {
    fn from(value: PlanEntity) -> Self {
        let annual_price_minor = value.cycle_price_minor(BillingCycle::Annual);
        Self {
            plan_code: value.plan_code,
            display_name: value.display_name,
            monthly_price_minor: value.monthly_price_minor,
            annual_price_minor,
            currency: value.currency,
            trial_days: value.trial_days,
        }
    }
}
