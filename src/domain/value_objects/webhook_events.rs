use chrono::{DateTime, Utc};

use crate::domain::value_objects::enums::{
    billing_cycles::BillingCycle, payment_providers::PaymentProvider,
};

/// Canonical billing events every provider's webhook payload is translated
/// into. Anything that does not map stays provider-specific noise and is
/// acknowledged without touching the subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonicalEvent {
    SubscriptionActivated,
    RenewalSucceeded,
    PaymentFailed,
    SubscriptionCancelled { immediate: bool },
    SubscriptionPaused,
    SubscriptionResumed,
    PlanChanged {
        plan_code: String,
        billing_cycle: BillingCycle,
    },
}

impl CanonicalEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalEvent::SubscriptionActivated => "SUBSCRIPTION_ACTIVATED",
            CanonicalEvent::RenewalSucceeded => "RENEWAL_SUCCEEDED",
            CanonicalEvent::PaymentFailed => "PAYMENT_FAILED",
            CanonicalEvent::SubscriptionCancelled { .. } => "SUBSCRIPTION_CANCELLED",
            CanonicalEvent::SubscriptionPaused => "SUBSCRIPTION_PAUSED",
            CanonicalEvent::SubscriptionResumed => "SUBSCRIPTION_RESUMED",
            CanonicalEvent::PlanChanged { .. } => "PLAN_CHANGED",
        }
    }
}

/// A provider webhook reduced to the fields the pipeline needs: a stable
/// dedup key, the provider-native type for the audit log, the provider's
/// subscription handle, and the canonical translation (None = informational,
/// acknowledge and move on).
#[derive(Debug, Clone)]
pub struct NormalizedEvent {
    pub provider: PaymentProvider,
    pub event_id: String,
    pub event_type: String,
    pub external_subscription_id: Option<String>,
    pub canonical: Option<CanonicalEvent>,
    /// Provider-side price/plan id carried by events that may encode a plan
    /// change the normalizer cannot resolve on its own (Stripe subscription
    /// updates); the processor maps it through the plan catalog.
    pub provider_price_ref: Option<String>,
    pub amount_minor: Option<i64>,
    pub currency: Option<String>,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
}

impl NormalizedEvent {
    pub fn informational(
        provider: PaymentProvider,
        event_id: impl Into<String>,
        event_type: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            event_id: event_id.into(),
            event_type: event_type.into(),
            external_subscription_id: None,
            canonical: None,
            provider_price_ref: None,
            amount_minor: None,
            currency: None,
            period_start: None,
            period_end: None,
        }
    }
}

/// How the HTTP layer must answer the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookAck {
    /// Processed (or deliberately ignored / deduplicated): answer 200.
    Ok,
    /// Signature verification failed on a server-initiated rail: answer 401.
    Rejected,
}
