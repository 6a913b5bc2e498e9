pub mod app_store;
pub mod google_play;
pub mod razorpay;
pub mod signature;
pub mod stripe;

use anyhow::Result;

use crate::domain::value_objects::{
    enums::payment_providers::PaymentProvider, webhook_events::NormalizedEvent,
};

/// Routes a raw webhook body to the provider's normalizer.
pub fn normalize(provider: PaymentProvider, payload: &[u8]) -> Result<NormalizedEvent> {
    match provider {
        PaymentProvider::GooglePlay => google_play::normalize(payload),
        PaymentProvider::AppStore => app_store::normalize(payload),
        PaymentProvider::Stripe => stripe::normalize(payload),
        PaymentProvider::Razorpay => razorpay::normalize(payload),
    }
}
