use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};
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
    webhooks::signature::decode_jws_payload,
};

const PRODUCTION_URL: &str = "https://buy.itunes.apple.com/verifyReceipt";
const SANDBOX_URL: &str = "https://sandbox.itunes.apple.com/verifyReceipt";
const SERVER_API_URL: &str = "https://api.storekit.itunes.apple.com/inApps/v1/subscriptions";
const SERVER_API_SANDBOX_URL: &str =
    "https://api.storekit-sandbox.itunes.apple.com/inApps/v1/subscriptions";
const SERVER_API_AUDIENCE: &str = "appstoreconnect-v1";

// verifyReceipt status: 0 = valid, 21007 = sandbox receipt sent to production.
const STATUS_OK: i64 = 0;
const STATUS_SANDBOX_RECEIPT: i64 = 21007;

// Server API subscription status: 1 = active, 4 = billing grace period. The
// other values (expired, billing retry, revoked) carry no entitlement.
const SERVER_STATUS_ACTIVE: i32 = 1;
const SERVER_STATUS_GRACE_PERIOD: i32 = 4;

/// App Store rail: verifies receipts via the legacy verifyReceipt endpoint
/// (retrying against the sandbox when production reports a sandbox receipt)
/// and answers status queries through the App Store Server API, which looks a
/// subscription up by the original transaction id this rail stores as the
/// external id.
pub struct AppStoreGateway {
    http: reqwest::Client,
    shared_secret: String,
    issuer_id: String,
    key_id: String,
    private_key_pem: String,
    bundle_id: String,
}

#[derive(Debug, Deserialize)]
struct VerifyReceiptResponse {
    status: i64,
    latest_receipt_info: Option<Vec<ReceiptInfo>>,
    pending_renewal_info: Option<Vec<PendingRenewalInfo>>,
}

#[derive(Debug, Deserialize)]
struct ReceiptInfo {
    original_transaction_id: Option<String>,
    expires_date_ms: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PendingRenewalInfo {
    auto_renew_status: Option<String>,
}

#[derive(Debug, Serialize)]
struct ServerApiClaims {
    iss: String,
    iat: i64,
    exp: i64,
    aud: String,
    bid: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    data: Option<Vec<SubscriptionGroup>>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionGroup {
    #[serde(rename = "lastTransactions")]
    last_transactions: Option<Vec<LastTransaction>>,
}

#[derive(Debug, Deserialize)]
struct LastTransaction {
    status: Option<i32>,
    #[serde(rename = "signedTransactionInfo")]
    signed_transaction_info: Option<String>,
    #[serde(rename = "signedRenewalInfo")]
    signed_renewal_info: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransactionPayload {
    /// Milliseconds since epoch.
    #[serde(rename = "expiresDate")]
    expires_date: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RenewalPayload {
    #[serde(rename = "autoRenewStatus")]
    auto_renew_status: Option<i32>,
}

/// Flattens the newest transaction of a status response into the
/// provider-neutral status. Grace-period subscriptions keep entitlement.
fn status_from_transaction(transaction: &LastTransaction) -> ProviderSubscriptionStatus {
    let active = matches!(
        transaction.status,
        Some(SERVER_STATUS_ACTIVE) | Some(SERVER_STATUS_GRACE_PERIOD)
    );
    let current_period_end = transaction
        .signed_transaction_info
        .as_deref()
        .and_then(|jws| decode_jws_payload(jws).ok())
        .and_then(|value| serde_json::from_value::<TransactionPayload>(value).ok())
        .and_then(|payload| payload.expires_date)
        .and_then(DateTime::<Utc>::from_timestamp_millis);
    let auto_renewing = transaction
        .signed_renewal_info
        .as_deref()
        .and_then(|jws| decode_jws_payload(jws).ok())
        .and_then(|value| serde_json::from_value::<RenewalPayload>(value).ok())
        .and_then(|payload| payload.auto_renew_status)
        == Some(1);
    ProviderSubscriptionStatus {
        active,
        auto_renewing,
        current_period_end,
    }
}

impl AppStoreGateway {
    pub fn new(
        shared_secret: String,
        issuer_id: String,
        key_id: String,
        private_key_pem: String,
        bundle_id: String,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            shared_secret,
            issuer_id,
            key_id,
            private_key_pem,
            bundle_id,
        }
    }

    fn server_api_token(&self) -> Result<String> {
        let now = Utc::now();
        let claims = ServerApiClaims {
            iss: self.issuer_id.clone(),
            iat: now.timestamp(),
            exp: (now + Duration::minutes(20)).timestamp(),
            aud: SERVER_API_AUDIENCE.to_string(),
            bid: self.bundle_id.clone(),
        };
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.key_id.clone());
        let key = EncodingKey::from_ec_pem(self.private_key_pem.as_bytes())?;
        Ok(jsonwebtoken::encode(&header, &claims, &key)?)
    }

    async fn fetch_statuses(
        &self,
        base_url: &str,
        original_transaction_id: &str,
    ) -> Result<Option<StatusResponse>> {
        let token = self.server_api_token()?;
        let url = format!("{base_url}/{original_transaction_id}");
        let resp = self.http.get(url).bearer_auth(token).send().await?;
        // 404 means the transaction id lives in the other environment (or
        // nowhere at all), not that the API is down.
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            error!(%status, response_body = %body, "App Store status request failed");
            anyhow::bail!("App Store subscription lookup failed (status {status})");
        }
        Ok(Some(resp.json().await?))
    }

    async fn verify_against(&self, url: &str, receipt_data: &str) -> Result<VerifyReceiptResponse> {
        let body = json!({
            "receipt-data": receipt_data,
            "password": self.shared_secret,
            "exclude-old-transactions": true,
        });
        let resp = self.http.post(url).json(&body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            error!(%status, url, "verifyReceipt request failed");
            anyhow::bail!("App Store verifyReceipt failed (status {status})");
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl ProviderGateway for AppStoreGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::AppStore
    }

    async fn verify_purchase(
        &self,
        request: &VerifyPurchaseRequest,
    ) -> Result<ProviderOp<VerificationResult>> {
        let mut response = self
            .verify_against(PRODUCTION_URL, &request.purchase_token)
            .await?;
        if response.status == STATUS_SANDBOX_RECEIPT {
            info!("sandbox receipt sent to production, retrying against sandbox");
            response = self
                .verify_against(SANDBOX_URL, &request.purchase_token)
                .await?;
        }

        if response.status != STATUS_OK {
            return Ok(ProviderOp::Supported(VerificationResult {
                valid: false,
                external_subscription_id: None,
                expires_at: None,
                auto_renewing: false,
                error_message: Some(format!("verifyReceipt status {}", response.status)),
            }));
        }

        let latest = response
            .latest_receipt_info
            .as_ref()
            .and_then(|receipts| receipts.first())
            .ok_or_else(|| anyhow!("verifyReceipt returned no transactions"))?;
        let expires_at = latest
            .expires_date_ms
            .as_deref()
            .and_then(|millis| millis.parse::<i64>().ok())
            .and_then(DateTime::<Utc>::from_timestamp_millis);
        let auto_renewing = response
            .pending_renewal_info
            .as_ref()
            .and_then(|infos| infos.first())
            .and_then(|info| info.auto_renew_status.as_deref())
            == Some("1");
        let unexpired = expires_at.map(|at| at > Utc::now()).unwrap_or(false);

        Ok(ProviderOp::Supported(VerificationResult {
            valid: unexpired,
            external_subscription_id: latest.original_transaction_id.clone(),
            expires_at,
            auto_renewing,
            error_message: (!unexpired).then(|| "subscription already expired".to_string()),
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
        let mut response = self
            .fetch_statuses(SERVER_API_URL, external_subscription_id)
            .await?;
        if response.is_none() {
            info!("transaction unknown to production, retrying against sandbox");
            response = self
                .fetch_statuses(SERVER_API_SANDBOX_URL, external_subscription_id)
                .await?;
        }
        let Some(response) = response else {
            warn!("app store does not recognize the original transaction id");
            return Ok(ProviderOp::Supported(ProviderSubscriptionStatus {
                active: false,
                auto_renewing: false,
                current_period_end: None,
            }));
        };

        let transaction = response
            .data
            .as_ref()
            .and_then(|groups| groups.first())
            .and_then(|group| group.last_transactions.as_ref())
            .and_then(|transactions| transactions.first())
            .ok_or_else(|| anyhow!("status response carried no transactions"))?;
        Ok(ProviderOp::Supported(status_from_transaction(transaction)))
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
        // Server notifications arrive as Apple-signed JWS tokens; the payload
        // itself is the authentication.
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    fn jws(claims: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"ES256"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
        format!("{header}.{payload}.sig")
    }

    #[test]
    fn active_transaction_maps_to_an_active_status() {
        let transaction = LastTransaction {
            status: Some(SERVER_STATUS_ACTIVE),
            signed_transaction_info: Some(jws(json!({"expiresDate": 1_767_225_600_000i64}))),
            signed_renewal_info: Some(jws(json!({"autoRenewStatus": 1}))),
        };

        let status = status_from_transaction(&transaction);
        assert!(status.active);
        assert!(status.auto_renewing);
        assert_eq!(
            status.current_period_end,
            DateTime::<Utc>::from_timestamp_millis(1_767_225_600_000)
        );
    }

    #[test]
    fn grace_period_still_counts_as_active() {
        let transaction = LastTransaction {
            status: Some(SERVER_STATUS_GRACE_PERIOD),
            signed_transaction_info: None,
            signed_renewal_info: Some(jws(json!({"autoRenewStatus": 0}))),
        };

        let status = status_from_transaction(&transaction);
        assert!(status.active);
        assert!(!status.auto_renewing);
        assert!(status.current_period_end.is_none());
    }

    #[test]
    fn expired_transaction_maps_to_inactive() {
        let transaction = LastTransaction {
            status: Some(2),
            signed_transaction_info: Some(jws(json!({"expiresDate": 1_700_000_000_000i64}))),
            signed_renewal_info: None,
        };

        let status = status_from_transaction(&transaction);
        assert!(!status.active);
        assert!(!status.auto_renewing);
    }
}
