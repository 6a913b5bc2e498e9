use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, warn};
use uuid::Uuid;

use crate::{
    domain::{
        entities::{
            invoices::InvoiceEntity, payment_methods::PaymentMethodEntity, plans::PlanEntity,
        },
        value_objects::{
            enums::{billing_cycles::BillingCycle, payment_providers::PaymentProvider},
            purchases::{
                ChargeResult, CheckoutCreated, ProviderSubscriptionStatus, VerificationResult,
                VerifyPurchaseRequest,
            },
        },
    },
    providers::{ProviderGateway, ProviderOp},
};

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const ANDROIDPUBLISHER_SCOPE: &str = "https://www.googleapis.com/auth/androidpublisher";

// Play paymentState values: 1 = payment received, 2 = free trial.
const PAYMENT_RECEIVED: i32 = 1;
const FREE_TRIAL: i32 = 2;

/// Google Play rail: purchases happen in the app, so this gateway only
/// verifies purchase tokens against the androidpublisher API, authenticating
/// with a service-account JWT exchanged for an OAuth access token.
pub struct GooglePlayGateway {
    http: reqwest::Client,
    package_name: String,
    service_account_email: String,
    service_account_key_pem: String,
    cached_token: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct ServiceAccountClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct SubscriptionPurchase {
    #[serde(rename = "paymentState")]
    payment_state: Option<i32>,
    #[serde(rename = "expiryTimeMillis")]
    expiry_time_millis: Option<String>,
    #[serde(rename = "autoRenewing")]
    auto_renewing: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionPurchaseV2 {
    #[serde(rename = "subscriptionState")]
    subscription_state: Option<String>,
    #[serde(rename = "lineItems")]
    line_items: Option<Vec<SubscriptionLineItem>>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionLineItem {
    #[serde(rename = "expiryTime")]
    expiry_time: Option<String>,
    #[serde(rename = "autoRenewingPlan")]
    auto_renewing_plan: Option<AutoRenewingPlan>,
}

#[derive(Debug, Deserialize)]
struct AutoRenewingPlan {
    #[serde(rename = "autoRenewEnabled")]
    auto_renew_enabled: Option<bool>,
}

/// Flattens a subscriptionsv2 resource into the provider-neutral status.
/// A grace-period subscription still has entitlement, so it counts as active.
fn status_from_purchase_v2(purchase: &SubscriptionPurchaseV2) -> ProviderSubscriptionStatus {
    let active = matches!(
        purchase.subscription_state.as_deref(),
        Some("SUBSCRIPTION_STATE_ACTIVE") | Some("SUBSCRIPTION_STATE_IN_GRACE_PERIOD")
    );
    let items = purchase.line_items.as_deref().unwrap_or_default();
    let current_period_end = items
        .iter()
        .filter_map(|item| item.expiry_time.as_deref())
        .filter_map(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
        .max();
    let auto_renewing = items.iter().any(|item| {
        item.auto_renewing_plan
            .as_ref()
            .and_then(|plan| plan.auto_renew_enabled)
            .unwrap_or(false)
    });
    ProviderSubscriptionStatus {
        active,
        auto_renewing,
        current_period_end,
    }
}

impl GooglePlayGateway {
    pub fn new(
        package_name: String,
        service_account_email: String,
        service_account_key_pem: String,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            package_name,
            service_account_email,
            service_account_key_pem,
            cached_token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached_token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Utc::now() < token.expires_at {
                return Ok(token.access_token.clone());
            }
        }

        let now = Utc::now();
        let claims = ServiceAccountClaims {
            iss: self.service_account_email.clone(),
            scope: ANDROIDPUBLISHER_SCOPE.to_string(),
            aud: TOKEN_URL.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::hours(1)).timestamp(),
        };
        let key = EncodingKey::from_rsa_pem(self.service_account_key_pem.as_bytes())?;
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)?;

        let resp = self
            .http
            .post(TOKEN_URL)
            .form(&[
                (
                    "grant_type",
                    "urn:ietf:params:oauth:grant-type:jwt-bearer",
                ),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            error!(%status, response_body = %body, "google oauth token exchange failed");
            anyhow::bail!("Google OAuth token exchange failed (status {status})");
        }
        let parsed: TokenResponse = resp.json().await?;

        // Refresh a minute early so in-flight requests never carry a token
        // that expires mid-call.
        *cached = Some(CachedToken {
            access_token: parsed.access_token.clone(),
            expires_at: now + Duration::seconds(parsed.expires_in - 60),
        });
        Ok(parsed.access_token)
    }
}

#[async_trait]
impl ProviderGateway for GooglePlayGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::GooglePlay
    }

    async fn verify_purchase(
        &self,
        request: &VerifyPurchaseRequest,
    ) -> Result<ProviderOp<VerificationResult>> {
        let token = self.access_token().await?;
        let url = format!(
            "https://androidpublisher.googleapis.com/androidpublisher/v3/applications/{}/purchases/subscriptions/{}/tokens/{}",
            self.package_name, request.product_id, request.purchase_token
        );
        let resp = self.http.get(url).bearer_auth(token).send().await?;

        // The API answers 400/404 for tokens it does not know; that is an
        // invalid purchase, not an outage.
        if resp.status() == reqwest::StatusCode::NOT_FOUND
            || resp.status() == reqwest::StatusCode::BAD_REQUEST
        {
            let status = resp.status();
            warn!(%status, product_id = %request.product_id, "google play rejected purchase token");
            return Ok(ProviderOp::Supported(VerificationResult {
                valid: false,
                external_subscription_id: None,
                expires_at: None,
                auto_renewing: false,
                error_message: Some("purchase token not recognized by Google Play".to_string()),
            }));
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            error!(%status, response_body = %body, "androidpublisher request failed");
            anyhow::bail!("Google Play purchase lookup failed (status {status})");
        }

        let purchase: SubscriptionPurchase = resp.json().await?;
        let expires_at = purchase
            .expiry_time_millis
            .as_deref()
            .and_then(|millis| millis.parse::<i64>().ok())
            .and_then(DateTime::<Utc>::from_timestamp_millis);
        let paid = matches!(
            purchase.payment_state,
            Some(PAYMENT_RECEIVED) | Some(FREE_TRIAL)
        );
        let unexpired = expires_at.map(|at| at > Utc::now()).unwrap_or(false);

        Ok(ProviderOp::Supported(VerificationResult {
            valid: paid && unexpired,
            // The purchase token is Google's stable subscription handle and
            // matches what renewal notifications carry.
            external_subscription_id: Some(request.purchase_token.clone()),
            expires_at,
            auto_renewing: purchase.auto_renewing.unwrap_or(false),
            error_message: (!paid).then(|| "payment not received".to_string()),
        }))
    }

    async fn create_subscription(
        &self,
        _workspace_id: Uuid,
        _plan: &PlanEntity,
        _billing_cycle: BillingCycle,
    ) -> Result<ProviderOp<CheckoutCreated>> {
        Ok(ProviderOp::Unsupported)
    }

    async fn cancel_subscription(
        &self,
        _external_subscription_id: &str,
        _immediate: bool,
    ) -> Result<ProviderOp<()>> {
        Ok(ProviderOp::Unsupported)
    }

    async fn pause_subscription(&self, _external_subscription_id: &str) -> Result<ProviderOp<()>> {
        Ok(ProviderOp::Unsupported)
    }

    async fn resume_subscription(&self, _external_subscription_id: &str) -> Result<ProviderOp<()>> {
        Ok(ProviderOp::Unsupported)
    }

    async fn change_plan(
        &self,
        _external_subscription_id: &str,
        _plan: &PlanEntity,
        _billing_cycle: BillingCycle,
        _immediate: bool,
    ) -> Result<ProviderOp<()>> {
        Ok(ProviderOp::Unsupported)
    }

    async fn get_subscription_status(
        &self,
        external_subscription_id: &str,
    ) -> Result<ProviderOp<ProviderSubscriptionStatus>> {
        let token = self.access_token().await?;
        // subscriptionsv2 looks up by purchase token alone, which is exactly
        // the external id this rail stores.
        let url = format!(
            "https://androidpublisher.googleapis.com/androidpublisher/v3/applications/{}/purchases/subscriptionsv2/tokens/{}",
            self.package_name, external_subscription_id
        );
        let resp = self.http.get(url).bearer_auth(token).send().await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND
            || resp.status() == reqwest::StatusCode::BAD_REQUEST
        {
            let status = resp.status();
            warn!(%status, "google play does not recognize the purchase token");
            return Ok(ProviderOp::Supported(ProviderSubscriptionStatus {
                active: false,
                auto_renewing: false,
                current_period_end: None,
            }));
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            error!(%status, response_body = %body, "subscriptionsv2 request failed");
            anyhow::bail!("Google Play subscription lookup failed (status {status})");
        }

        let purchase: SubscriptionPurchaseV2 = resp.json().await?;
        Ok(ProviderOp::Supported(status_from_purchase_v2(&purchase)))
    }

    async fn create_payment_link(&self, _invoice: &InvoiceEntity) -> Result<ProviderOp<String>> {
        Ok(ProviderOp::Unsupported)
    }

    async fn charge_payment_method(
        &self,
        _payment_method: &PaymentMethodEntity,
        _amount_minor: i64,
        _currency: &str,
    ) -> Result<ProviderOp<ChargeResult>> {
        Ok(ProviderOp::Unsupported)
    }

    fn verify_webhook_signature(&self, _payload: &[u8], _signature: &str) -> bool {
        // Pub/Sub push deliveries are authenticated by the subscription
        // endpoint itself; there is no body signature to check.
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_purchase_maps_to_an_active_status_with_period_end() {
        let purchase: SubscriptionPurchaseV2 = serde_json::from_value(serde_json::json!({
            "subscriptionState": "SUBSCRIPTION_STATE_ACTIVE",
            "lineItems": [{
                "expiryTime": "2026-09-30T00:00:00Z",
                "autoRenewingPlan": {"autoRenewEnabled": true}
            }]
        }))
        .unwrap();

        let status = status_from_purchase_v2(&purchase);
        assert!(status.active);
        assert!(status.auto_renewing);
        assert_eq!(
            status.current_period_end.unwrap().to_rfc3339(),
            "2026-09-30T00:00:00+00:00"
        );
    }

    #[test]
    fn grace_period_still_counts_as_active() {
        let purchase: SubscriptionPurchaseV2 = serde_json::from_value(serde_json::json!({
            "subscriptionState": "SUBSCRIPTION_STATE_IN_GRACE_PERIOD",
            "lineItems": [{"autoRenewingPlan": {"autoRenewEnabled": false}}]
        }))
        .unwrap();

        let status = status_from_purchase_v2(&purchase);
        assert!(status.active);
        assert!(!status.auto_renewing);
        assert!(status.current_period_end.is_none());
    }

    #[test]
    fn expired_purchase_maps_to_inactive() {
        let purchase: SubscriptionPurchaseV2 = serde_json::from_value(serde_json::json!({
            "subscriptionState": "SUBSCRIPTION_STATE_EXPIRED",
            "lineItems": [{"expiryTime": "2026-01-01T00:00:00Z"}]
        }))
        .unwrap();

        let status = status_from_purchase_v2(&purchase);
        assert!(!status.active);
        assert!(!status.auto_renewing);
    }
}
