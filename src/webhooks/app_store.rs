use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::{
    domain::{
        product_ids,
        value_objects::{
            enums::payment_providers::PaymentProvider,
            webhook_events::{CanonicalEvent, NormalizedEvent},
        },
    },
    webhooks::signature::decode_jws_payload,
};

#[derive(Debug, Deserialize)]
struct NotificationBody {
    #[serde(rename = "signedPayload")]
    signed_payload: String,
}

#[derive(Debug, Deserialize)]
struct NotificationClaims {
    #[serde(rename = "notificationType")]
    notification_type: String,
    subtype: Option<String>,
    #[serde(rename = "notificationUUID")]
    notification_uuid: String,
    data: Option<NotificationData>,
}

#[derive(Debug, Deserialize)]
struct NotificationData {
    #[serde(rename = "signedTransactionInfo")]
    signed_transaction_info: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransactionClaims {
    #[serde(rename = "originalTransactionId")]
    original_transaction_id: Option<String>,
    #[serde(rename = "productId")]
    product_id: Option<String>,
    /// Milliseconds since epoch.
    #[serde(rename = "expiresDate")]
    expires_date: Option<i64>,
}

/// App Store Server Notifications V2: a JWS outer envelope with a JWS-signed
/// transaction inside. The original transaction id is Apple's stable
/// subscription handle.
pub fn normalize(payload: &[u8]) -> Result<NormalizedEvent> {
    let body: NotificationBody =
        serde_json::from_slice(payload).context("invalid App Store notification body")?;
    let claims_value = decode_jws_payload(&body.signed_payload)?;
    let claims: NotificationClaims =
        serde_json::from_value(claims_value).context("invalid notification claims")?;

    let transaction = claims
        .data
        .as_ref()
        .and_then(|data| data.signed_transaction_info.as_deref())
        .and_then(|jws| decode_jws_payload(jws).ok())
        .and_then(|value| serde_json::from_value::<TransactionClaims>(value).ok());

    let external_subscription_id = transaction
        .as_ref()
        .and_then(|tx| tx.original_transaction_id.clone());
    let period_end = transaction
        .as_ref()
        .and_then(|tx| tx.expires_date)
        .and_then(DateTime::<Utc>::from_timestamp_millis);

    let subtype = claims.subtype.as_deref();
    let canonical = match claims.notification_type.as_str() {
        "SUBSCRIBED" => Some(CanonicalEvent::SubscriptionActivated),
        "DID_RENEW" => Some(CanonicalEvent::RenewalSucceeded),
        "DID_FAIL_TO_RENEW" => Some(CanonicalEvent::PaymentFailed),
        "EXPIRED" | "GRACE_PERIOD_EXPIRED" | "REVOKE" => {
            Some(CanonicalEvent::SubscriptionCancelled { immediate: true })
        }
        "DID_CHANGE_RENEWAL_STATUS" if subtype == Some("AUTO_RENEW_DISABLED") => {
            Some(CanonicalEvent::SubscriptionCancelled { immediate: false })
        }
        "DID_CHANGE_RENEWAL_PREF" => transaction
            .as_ref()
            .and_then(|tx| tx.product_id.as_deref())
            .and_then(|product_id| product_ids::parse_product_id(product_id).ok())
            .map(|parsed| CanonicalEvent::PlanChanged {
                plan_code: parsed.plan_code,
                billing_cycle: parsed.billing_cycle,
            }),
        _ => None,
    };

    let event_type = match subtype {
        Some(subtype) => format!("{}:{}", claims.notification_type, subtype),
        None => claims.notification_type.clone(),
    };

    Ok(NormalizedEvent {
        provider: PaymentProvider::AppStore,
        event_id: claims.notification_uuid,
        event_type,
        external_subscription_id,
        canonical,
        provider_price_ref: None,
        amount_minor: None,
        currency: None,
        period_start: None,
        period_end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DID_RENEW_BODY: &str = r#"{"signedPayload": "eyJhbGciOiJFUzI1NiJ9.eyJub3RpZmljYXRpb25UeXBlIjoiRElEX1JFTkVXIiwibm90aWZpY2F0aW9uVVVJRCI6ImFwcGxlLXV1aWQtMSIsImRhdGEiOnsic2lnbmVkVHJhbnNhY3Rpb25JbmZvIjoiZXlKaGJHY2lPaUpGVXpJMU5pSjkuZXlKdmNtbG5hVzVoYkZSeVlXNXpZV04wYVc5dVNXUWlPaUp2Y21sbkxURXdNQ0lzSW5CeWIyUjFZM1JKWkNJNkltTnZiUzV6ZFdKc1pXUm5aWEl1Y0hKdkxtMXZiblJvYkhraUxDSmxlSEJwY21WelJHRjBaU0k2TVRjMk56SXlOVFl3TURBd01IMC5jMmxuIn19.c2ln"}"#;
    const AUTO_RENEW_DISABLED_BODY: &str = r#"{"signedPayload": "eyJhbGciOiJFUzI1NiJ9.eyJub3RpZmljYXRpb25UeXBlIjoiRElEX0NIQU5HRV9SRU5FV0FMX1NUQVRVUyIsInN1YnR5cGUiOiJBVVRPX1JFTkVXX0RJU0FCTEVEIiwibm90aWZpY2F0aW9uVVVJRCI6ImFwcGxlLXV1aWQtMiIsImRhdGEiOnsic2lnbmVkVHJhbnNhY3Rpb25JbmZvIjoiZXlKaGJHY2lPaUpGVXpJMU5pSjkuZXlKdmNtbG5hVzVoYkZSeVlXNXpZV04wYVc5dVNXUWlPaUp2Y21sbkxURXdNQ0lzSW5CeWIyUjFZM1JKWkNJNkltTnZiUzV6ZFdKc1pXUm5aWEl1Y0hKdkxtMXZiblJvYkhraUxDSmxlSEJwY21WelJHRjBaU0k2TVRjMk56SXlOVFl3TURBd01IMC5jMmxuIn19.c2ln"}"#;

    #[test]
    fn did_renew_maps_to_renewal_with_period_end() {
        let event = normalize(DID_RENEW_BODY.as_bytes()).unwrap();
        assert_eq!(event.provider, PaymentProvider::AppStore);
        assert_eq!(event.event_id, "apple-uuid-1");
        assert_eq!(event.canonical, Some(CanonicalEvent::RenewalSucceeded));
        assert_eq!(event.external_subscription_id.as_deref(), Some("orig-100"));
        assert_eq!(
            event.period_end,
            DateTime::<Utc>::from_timestamp_millis(1_767_225_600_000)
        );
    }

    #[test]
    fn auto_renew_disabled_maps_to_deferred_cancellation() {
        let event = normalize(AUTO_RENEW_DISABLED_BODY.as_bytes()).unwrap();
        assert_eq!(event.event_id, "apple-uuid-2");
        assert_eq!(
            event.canonical,
            Some(CanonicalEvent::SubscriptionCancelled { immediate: false })
        );
        assert_eq!(
            event.event_type,
            "DID_CHANGE_RENEWAL_STATUS:AUTO_RENEW_DISABLED"
        );
    }

    #[test]
    fn rejects_body_without_signed_payload() {
        assert!(normalize(br#"{"foo": 1}"#).is_err());
    }
}
