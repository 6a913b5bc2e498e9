use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::domain::value_objects::{
    enums::payment_providers::PaymentProvider,
    webhook_events::{CanonicalEvent, NormalizedEvent},
};

#[derive(Debug, Deserialize)]
struct RazorpayEvent {
    /// Not all Razorpay webhook bodies carry an id field; older event shapes
    /// only have `event` + `created_at`.
    id: Option<String>,
    event: String,
    created_at: Option<i64>,
    payload: Option<RazorpayPayload>,
}

#[derive(Debug, Deserialize)]
struct RazorpayPayload {
    subscription: Option<RazorpayWrapper<RazorpaySubscription>>,
    payment: Option<RazorpayWrapper<RazorpayPayment>>,
}

#[derive(Debug, Deserialize)]
struct RazorpayWrapper<T> {
    entity: T,
}

#[derive(Debug, Deserialize)]
struct RazorpaySubscription {
    id: String,
    current_start: Option<i64>,
    current_end: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RazorpayPayment {
    /// Amount in paise.
    amount: Option<i64>,
    currency: Option<String>,
}

pub fn normalize(payload: &[u8]) -> Result<NormalizedEvent> {
    let event: RazorpayEvent =
        serde_json::from_slice(payload).context("invalid Razorpay event")?;

    let subscription = event
        .payload
        .as_ref()
        .and_then(|p| p.subscription.as_ref())
        .map(|w| &w.entity);
    let payment = event
        .payload
        .as_ref()
        .and_then(|p| p.payment.as_ref())
        .map(|w| &w.entity);

    let external_subscription_id = subscription.map(|s| s.id.clone());
    let event_id = event.id.clone().unwrap_or_else(|| {
        format!(
            "{}:{}:{}",
            event.event,
            external_subscription_id.as_deref().unwrap_or("-"),
            event.created_at.unwrap_or_default()
        )
    });

    let canonical = match event.event.as_str() {
        "subscription.activated" | "subscription.authenticated" => {
            Some(CanonicalEvent::SubscriptionActivated)
        }
        "subscription.charged" => Some(CanonicalEvent::RenewalSucceeded),
        "subscription.halted" | "subscription.pending" => Some(CanonicalEvent::PaymentFailed),
        "subscription.cancelled" | "subscription.completed" => {
            Some(CanonicalEvent::SubscriptionCancelled { immediate: true })
        }
        "subscription.paused" => Some(CanonicalEvent::SubscriptionPaused),
        "subscription.resumed" => Some(CanonicalEvent::SubscriptionResumed),
        _ => None,
    };

    Ok(NormalizedEvent {
        provider: PaymentProvider::Razorpay,
        event_id,
        event_type: event.event,
        external_subscription_id,
        canonical,
        provider_price_ref: None,
        amount_minor: payment.and_then(|p| p.amount),
        currency: payment.and_then(|p| p.currency.clone()),
        period_start: subscription
            .and_then(|s| s.current_start)
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
        period_end: subscription
            .and_then(|s| s.current_end)
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn charged_event_maps_to_renewal_with_payment_amount() {
        let payload = json!({
            "event": "subscription.charged",
            "created_at": 1_700_000_000,
            "payload": {
                "subscription": {"entity": {
                    "id": "sub_rzp_1",
                    "current_start": 1_700_000_000,
                    "current_end": 1_702_592_000
                }},
                "payment": {"entity": {"amount": 99900, "currency": "INR"}}
            }
        })
        .to_string();

        let event = normalize(payload.as_bytes()).unwrap();
        assert_eq!(event.canonical, Some(CanonicalEvent::RenewalSucceeded));
        assert_eq!(event.external_subscription_id.as_deref(), Some("sub_rzp_1"));
        assert_eq!(event.amount_minor, Some(99900));
        assert_eq!(event.currency.as_deref(), Some("INR"));
        assert_eq!(event.event_id, "subscription.charged:sub_rzp_1:1700000000");
    }

    #[test]
    fn halted_event_maps_to_payment_failed() {
        let payload = json!({
            "id": "evt_rzp_2",
            "event": "subscription.halted",
            "payload": {"subscription": {"entity": {"id": "sub_rzp_1"}}}
        })
        .to_string();

        let event = normalize(payload.as_bytes()).unwrap();
        assert_eq!(event.event_id, "evt_rzp_2");
        assert_eq!(event.canonical, Some(CanonicalEvent::PaymentFailed));
    }

    #[test]
    fn unknown_events_are_informational() {
        let payload = json!({"event": "refund.processed"}).to_string();
        let event = normalize(payload.as_bytes()).unwrap();
        assert_eq!(event.canonical, None);
        assert_eq!(event.external_subscription_id, None);
    }
}
