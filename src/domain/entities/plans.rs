use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::{
    domain::value_objects::enums::{
        billing_cycles::BillingCycle, payment_providers::PaymentProvider,
    },
    infrastructure::postgres::schema::plans,
};

#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = plans)]
pub struct PlanEntity {
    pub id: Uuid,
    pub plan_code: String,
    pub display_name: String,
    pub monthly_price_minor: i64,
    pub currency: String,
    pub annual_discount_percent: i32,
    pub trial_days: i32,
    pub google_product_id: Option<String>,
    pub apple_product_id: Option<String>,
    pub stripe_monthly_price_id: Option<String>,
    pub stripe_annual_price_id: Option<String>,
    pub razorpay_monthly_plan_id: Option<String>,
    pub razorpay_annual_plan_id: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl PlanEntity {
    /// Price for one full billing period in minor units. Annual billing gets
    /// the plan's discount applied to twelve months.
    pub fn cycle_price_minor(&self, cycle: BillingCycle) -> i64 {
        match cycle {
            BillingCycle::Monthly => self.monthly_price_minor,
            BillingCycle::Annual => {
                let gross = self.monthly_price_minor * 12;
                gross - gross * i64::from(self.annual_discount_percent) / 100
            }
        }
    }

    /// The price/plan identifier registered at the given provider for the
    /// given cycle, when one exists.
    pub fn provider_price_ref(
        &self,
        provider: PaymentProvider,
        cycle: BillingCycle,
    ) -> Option<&str> {
        let price_ref = match (provider, cycle) {
            (PaymentProvider::Stripe, BillingCycle::Monthly) => &self.stripe_monthly_price_id,
            (PaymentProvider::Stripe, BillingCycle::Annual) => &self.stripe_annual_price_id,
            (PaymentProvider::Razorpay, BillingCycle::Monthly) => &self.razorpay_monthly_plan_id,
            (PaymentProvider::Razorpay, BillingCycle::Annual) => &self.razorpay_annual_plan_id,
            (PaymentProvider::GooglePlay, _) => &self.google_product_id,
            (PaymentProvider::AppStore, _) => &self.apple_product_id,
        };
        price_ref.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(monthly_price_minor: i64, annual_discount_percent: i32) -> PlanEntity {
        PlanEntity {
            id: Uuid::new_v4(),
            plan_code: "PRO".to_string(),
            display_name: "Pro".to_string(),
            monthly_price_minor,
            currency: "USD".to_string(),
            annual_discount_percent,
            trial_days: 14,
            google_product_id: None,
            apple_product_id: None,
            stripe_monthly_price_id: None,
            stripe_annual_price_id: None,
            razorpay_monthly_plan_id: None,
            razorpay_annual_plan_id: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn monthly_cycle_price_is_the_monthly_price() {
        assert_eq!(plan(2900, 20).cycle_price_minor(BillingCycle::Monthly), 2900);
    }

    #[test]
    fn annual_cycle_price_applies_discount() {
        // 2900 * 12 = 34800, minus 20% = 27840
        assert_eq!(plan(2900, 20).cycle_price_minor(BillingCycle::Annual), 27840);
    }
}
