use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::domain::value_objects::{
    enums::payment_providers::PaymentProvider,
    webhook_events::{CanonicalEvent, NormalizedEvent},
};

#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    type_: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Value,
}

fn timestamp(value: &serde_json::Value, field: &str) -> Option<DateTime<Utc>> {
    value
        .get(field)
        .and_then(|v| v.as_i64())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
}

fn string_field(value: &serde_json::Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

pub fn normalize(payload: &[u8]) -> Result<NormalizedEvent> {
    let event: StripeEvent = serde_json::from_slice(payload).context("invalid Stripe event")?;
    let object = &event.data.object;

    let mut external_subscription_id = string_field(object, "subscription");
    let mut provider_price_ref = None;
    let mut amount_minor = None;
    let mut currency = None;
    let mut period_start = None;
    let mut period_end = None;

    let canonical = match event.type_.as_str() {
        "checkout.session.completed" => Some(CanonicalEvent::SubscriptionActivated),
        "invoice.paid" | "invoice.payment_succeeded" => {
            amount_minor = object.get("amount_paid").and_then(|v| v.as_i64());
            currency = string_field(object, "currency").map(|c| c.to_uppercase());
            period_start = timestamp(object, "period_start");
            period_end = timestamp(object, "period_end");
            Some(CanonicalEvent::RenewalSucceeded)
        }
        "invoice.payment_failed" => Some(CanonicalEvent::PaymentFailed),
        "customer.subscription.deleted" => {
            external_subscription_id = external_subscription_id.or_else(|| string_field(object, "id"));
            Some(CanonicalEvent::SubscriptionCancelled { immediate: true })
        }
        "customer.subscription.paused" => {
            external_subscription_id = external_subscription_id.or_else(|| string_field(object, "id"));
            Some(CanonicalEvent::SubscriptionPaused)
        }
        "customer.subscription.resumed" => {
            external_subscription_id = external_subscription_id.or_else(|| string_field(object, "id"));
            Some(CanonicalEvent::SubscriptionResumed)
        }
        "customer.subscription.updated" => {
            external_subscription_id = external_subscription_id.or_else(|| string_field(object, "id"));
            // A price switch surfaces as a plain update; carry the price id
            // so the processor can map it back to a plan change.
            provider_price_ref = object
                .pointer("/items/data/0/price/id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            if object
                .get("cancel_at_period_end")
                .and_then(|v| v.as_bool())
                .unwrap_or(false)
            {
                Some(CanonicalEvent::SubscriptionCancelled { immediate: false })
            } else {
                None
            }
        }
        _ => None,
    };

    Ok(NormalizedEvent {
        provider: PaymentProvider::Stripe,
        event_id: event.id,
        event_type: event.type_,
        external_subscription_id,
        canonical,
        provider_price_ref,
        amount_minor,
        currency,
        period_start,
        period_end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn invoice_paid_maps_to_renewal_with_amount_and_period() {
        let payload = json!({
            "id": "evt_100",
            "type": "invoice.paid",
            "data": {"object": {
                "subscription": "sub_42",
                "amount_paid": 2900,
                "currency": "usd",
                "period_start": 1_700_000_000,
                "period_end": 1_702_592_000
            }}
        })
        .to_string();

        let event = normalize(payload.as_bytes()).unwrap();
        assert_eq!(event.event_id, "evt_100");
        assert_eq!(event.canonical, Some(CanonicalEvent::RenewalSucceeded));
        assert_eq!(event.external_subscription_id.as_deref(), Some("sub_42"));
        assert_eq!(event.amount_minor, Some(2900));
        assert_eq!(event.currency.as_deref(), Some("USD"));
        assert!(event.period_start.is_some() && event.period_end.is_some());
    }

    #[test]
    fn subscription_deleted_maps_to_immediate_cancellation() {
        let payload = json!({
            "id": "evt_101",
            "type": "customer.subscription.deleted",
            "data": {"object": {"id": "sub_42", "status": "canceled"}}
        })
        .to_string();

        let event = normalize(payload.as_bytes()).unwrap();
        assert_eq!(
            event.canonical,
            Some(CanonicalEvent::SubscriptionCancelled { immediate: true })
        );
        assert_eq!(event.external_subscription_id.as_deref(), Some("sub_42"));
    }

    #[test]
    fn updated_with_cancel_at_period_end_is_deferred_cancellation() {
        let payload = json!({
            "id": "evt_102",
            "type": "customer.subscription.updated",
            "data": {"object": {"id": "sub_42", "cancel_at_period_end": true}}
        })
        .to_string();

        let event = normalize(payload.as_bytes()).unwrap();
        assert_eq!(
            event.canonical,
            Some(CanonicalEvent::SubscriptionCancelled { immediate: false })
        );
    }

    #[test]
    fn updated_without_cancellation_carries_the_price_id() {
        let payload = json!({
            "id": "evt_104",
            "type": "customer.subscription.updated",
            "data": {"object": {
                "id": "sub_42",
                "cancel_at_period_end": false,
                "items": {"data": [{"price": {"id": "price_annual_1"}}]}
            }}
        })
        .to_string();

        let event = normalize(payload.as_bytes()).unwrap();
        assert_eq!(event.canonical, None);
        assert_eq!(event.provider_price_ref.as_deref(), Some("price_annual_1"));
        assert_eq!(event.external_subscription_id.as_deref(), Some("sub_42"));
    }

    #[test]
    fn unrelated_event_types_are_informational() {
        let payload = json!({
            "id": "evt_103",
            "type": "charge.refunded",
            "data": {"object": {}}
        })
        .to_string();

        let event = normalize(payload.as_bytes()).unwrap();
        assert_eq!(event.canonical, None);
    }
}
