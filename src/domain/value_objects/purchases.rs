use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::value_objects::enums::{
    billing_cycles::BillingCycle, payment_providers::PaymentProvider,
    subscription_statuses::SubscriptionStatus,
};

#[derive(Debug, Clone, Deserialize)]
pub struct InitiatePurchaseRequest {
    pub provider: PaymentProvider,
    pub plan_code: String,
    pub billing_cycle: BillingCycle,
    pub currency: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InitiatePurchaseResponse {
    pub subscription_id: Uuid,
    pub status: SubscriptionStatus,
    pub checkout_url: Option<String>,
}

/// Client-initiated purchase proof: the Play purchase token or the App Store
/// receipt, together with the store product that was bought.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyPurchaseRequest {
    pub provider: PaymentProvider,
    pub product_id: String,
    pub purchase_token: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyPurchaseResponse {
    pub subscription_id: Uuid,
    pub status: SubscriptionStatus,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Outcome of a store-side receipt check. `valid: false` is an expected
/// business outcome (bad token, expired purchase), not a transport error.
#[derive(Debug, Clone)]
pub struct VerificationResult {
    pub valid: bool,
    pub external_subscription_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub auto_renewing: bool,
    pub error_message: Option<String>,
}

/// A provider-side subscription created for hosted checkout.
#[derive(Debug, Clone)]
pub struct CheckoutCreated {
    pub external_subscription_id: String,
    pub external_customer_id: Option<String>,
    pub checkout_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProviderSubscriptionStatus {
    pub active: bool,
    pub auto_renewing: bool,
    pub current_period_end: Option<DateTime<Utc>>,
}

/// Result of charging a stored payment method. A declined charge is a
/// `succeeded: false` result, not an `Err`.
#[derive(Debug, Clone)]
pub struct ChargeResult {
    pub succeeded: bool,
    pub external_payment_id: Option<String>,
    pub failure_message: Option<String>,
}
