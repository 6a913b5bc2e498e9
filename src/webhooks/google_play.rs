use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;

use crate::domain::value_objects::{
    enums::payment_providers::PaymentProvider,
    webhook_events::{CanonicalEvent, NormalizedEvent},
};

// Real-time developer notification types from the Play Billing docs.
const RECOVERED: i32 = 1;
const RENEWED: i32 = 2;
const CANCELED: i32 = 3;
const PURCHASED: i32 = 4;
const ON_HOLD: i32 = 5;
const IN_GRACE_PERIOD: i32 = 6;
const RESTARTED: i32 = 7;
const PAUSED: i32 = 10;
const REVOKED: i32 = 12;
const EXPIRED: i32 = 13;

#[derive(Debug, Deserialize)]
struct PubSubEnvelope {
    message: PubSubMessage,
}

#[derive(Debug, Deserialize)]
struct PubSubMessage {
    /// Base64-encoded DeveloperNotification JSON.
    data: String,
    #[serde(rename = "messageId")]
    message_id: String,
}

#[derive(Debug, Deserialize)]
struct DeveloperNotification {
    #[serde(rename = "subscriptionNotification")]
    subscription_notification: Option<SubscriptionNotification>,
    #[serde(rename = "testNotification")]
    test_notification: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionNotification {
    #[serde(rename = "notificationType")]
    notification_type: i32,
    #[serde(rename = "purchaseToken")]
    purchase_token: String,
}

/// Unwraps the Pub/Sub push envelope and translates the RTDN inside it.
/// The purchase token is the stable Google subscription handle.
pub fn normalize(payload: &[u8]) -> Result<NormalizedEvent> {
    let envelope: PubSubEnvelope =
        serde_json::from_slice(payload).context("invalid Pub/Sub envelope")?;
    let decoded = STANDARD
        .decode(envelope.message.data.as_bytes())
        .map_err(|err| anyhow!("Pub/Sub data is not base64: {err}"))?;
    let notification: DeveloperNotification =
        serde_json::from_slice(&decoded).context("invalid developer notification")?;

    if notification.test_notification.is_some() {
        return Ok(NormalizedEvent::informational(
            PaymentProvider::GooglePlay,
            envelope.message.message_id,
            "testNotification",
        ));
    }

    let subscription = match notification.subscription_notification {
        Some(subscription) => subscription,
        None => {
            return Ok(NormalizedEvent::informational(
                PaymentProvider::GooglePlay,
                envelope.message.message_id,
                "unknownNotification",
            ));
        }
    };

    let canonical = match subscription.notification_type {
        RECOVERED | RENEWED => Some(CanonicalEvent::RenewalSucceeded),
        CANCELED => Some(CanonicalEvent::SubscriptionCancelled { immediate: false }),
        PURCHASED => Some(CanonicalEvent::SubscriptionActivated),
        ON_HOLD | IN_GRACE_PERIOD => Some(CanonicalEvent::PaymentFailed),
        RESTARTED => Some(CanonicalEvent::SubscriptionResumed),
        PAUSED => Some(CanonicalEvent::SubscriptionPaused),
        REVOKED | EXPIRED => Some(CanonicalEvent::SubscriptionCancelled { immediate: true }),
        _ => None,
    };

    Ok(NormalizedEvent {
        provider: PaymentProvider::GooglePlay,
        event_id: envelope.message.message_id,
        event_type: format!(
            "subscriptionNotification:{}",
            subscription.notification_type
        ),
        external_subscription_id: Some(subscription.purchase_token),
        canonical,
        provider_price_ref: None,
        amount_minor: None,
        currency: None,
        period_start: None,
        period_end: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde_json::json;

    fn envelope(notification: serde_json::Value) -> Vec<u8> {
        let data = STANDARD.encode(notification.to_string());
        json!({"message": {"data": data, "messageId": "pubsub-msg-1"}})
            .to_string()
            .into_bytes()
    }

    #[test]
    fn renewal_notification_maps_to_renewal_succeeded() {
        let payload = envelope(json!({
            "version": "1.0",
            "packageName": "com.subledger.app",
            "subscriptionNotification": {
                "version": "1.0",
                "notificationType": 2,
                "purchaseToken": "tok-123",
                "subscriptionId": "com.subledger.pro.monthly"
            }
        }));

        let event = normalize(&payload).unwrap();
        assert_eq!(event.provider, PaymentProvider::GooglePlay);
        assert_eq!(event.event_id, "pubsub-msg-1");
        assert_eq!(event.canonical, Some(CanonicalEvent::RenewalSucceeded));
        assert_eq!(event.external_subscription_id.as_deref(), Some("tok-123"));
    }

    #[test]
    fn account_hold_maps_to_payment_failed() {
        let payload = envelope(json!({
            "subscriptionNotification": {
                "notificationType": 5,
                "purchaseToken": "tok-123",
                "subscriptionId": "com.subledger.pro.monthly"
            }
        }));
        let event = normalize(&payload).unwrap();
        assert_eq!(event.canonical, Some(CanonicalEvent::PaymentFailed));
    }

    #[test]
    fn revocation_maps_to_immediate_cancellation() {
        let payload = envelope(json!({
            "subscriptionNotification": {
                "notificationType": 12,
                "purchaseToken": "tok-123",
                "subscriptionId": "com.subledger.pro.monthly"
            }
        }));
        let event = normalize(&payload).unwrap();
        assert_eq!(
            event.canonical,
            Some(CanonicalEvent::SubscriptionCancelled { immediate: true })
        );
    }

    #[test]
    fn test_notification_is_informational() {
        let payload = envelope(json!({"testNotification": {"version": "1.0"}}));
        let event = normalize(&payload).unwrap();
        assert_eq!(event.canonical, None);
        assert_eq!(event.event_type, "testNotification");
    }

    #[test]
    fn rejects_non_base64_data() {
        let payload = json!({"message": {"data": "!!!", "messageId": "m"}})
            .to_string()
            .into_bytes();
        assert!(normalize(&payload).is_err());
    }
}
