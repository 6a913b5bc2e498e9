use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::error;
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
    webhooks::signature,
};

const API_BASE: &str = "https://api.razorpay.com/v1";

/// Razorpay rail. Subscriptions come back with a `short_url` hosted checkout
/// page; webhook bodies are authenticated with a raw-body HMAC.
pub struct RazorpayGateway {
    http: reqwest::Client,
    key_id: String,
    key_secret: String,
    webhook_secret: String,
}

#[derive(Debug, Deserialize)]
struct RazorpaySubscriptionResp {
    id: String,
    status: Option<String>,
    short_url: Option<String>,
    customer_id: Option<String>,
    current_end: Option<i64>,
}

impl RazorpayGateway {
    pub fn new(key_id: String, key_secret: String, webhook_secret: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            key_id,
            key_secret,
            webhook_secret,
        }
    }

    async fn ensure_success(resp: reqwest::Response, context: &str) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        error!(%status, response_body = %body, context = %context, "razorpay api request failed");
        anyhow::bail!("Razorpay API request failed: {context} (status {status})")
    }

    async fn post_json(
        &self,
        path: &str,
        body: serde_json::Value,
        context: &str,
    ) -> Result<reqwest::Response> {
        let resp = self
            .http
            .post(format!("{API_BASE}{path}"))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await?;
        Self::ensure_success(resp, context).await
    }
}

#[async_trait]
impl ProviderGateway for RazorpayGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Razorpay
    }

    async fn verify_purchase(
        &self,
        _request: &VerifyPurchaseRequest,
    ) -> Result<ProviderOp<VerificationResult>> {
        Ok(ProviderOp::Unsupported)
    }

    async fn create_subscription(
        &self,
        workspace_id: Uuid,
        plan: &PlanEntity,
        billing_cycle: BillingCycle,
    ) -> Result<ProviderOp<CheckoutCreated>> {
        let plan_id = plan
            .provider_price_ref(PaymentProvider::Razorpay, billing_cycle)
            .ok_or_else(|| {
                anyhow!(
                    "plan {} has no Razorpay plan for {billing_cycle}",
                    plan.plan_code
                )
            })?;

        // total_count is mandatory; ten years of cycles effectively means
        // "until cancelled".
        let total_count = match billing_cycle {
            BillingCycle::Monthly => 120,
            BillingCycle::Annual => 10,
        };
        let body = json!({
            "plan_id": plan_id,
            "total_count": total_count,
            "customer_notify": 1,
            "notes": {"workspace_id": workspace_id.to_string()},
        });
        let resp = self
            .post_json("/subscriptions", body, "create subscription")
            .await?;
        let parsed: RazorpaySubscriptionResp = resp.json().await?;

        Ok(ProviderOp::Supported(CheckoutCreated {
            external_subscription_id: parsed.id,
            external_customer_id: parsed.customer_id,
            checkout_url: parsed.short_url,
        }))
    }

    async fn cancel_subscription(
        &self,
        external_subscription_id: &str,
        immediate: bool,
    ) -> Result<ProviderOp<()>> {
        let body = json!({"cancel_at_cycle_end": if immediate { 0 } else { 1 }});
        self.post_json(
            &format!("/subscriptions/{external_subscription_id}/cancel"),
            body,
            "cancel subscription",
        )
        .await?;
        Ok(ProviderOp::Supported(()))
    }

    async fn pause_subscription(&self, external_subscription_id: &str) -> Result<ProviderOp<()>> {
        self.post_json(
            &format!("/subscriptions/{external_subscription_id}/pause"),
            json!({"pause_at": "now"}),
            "pause subscription",
        )
        .await?;
        Ok(ProviderOp::Supported(()))
    }

    async fn resume_subscription(&self, external_subscription_id: &str) -> Result<ProviderOp<()>> {
        self.post_json(
            &format!("/subscriptions/{external_subscription_id}/resume"),
            json!({"resume_at": "now"}),
            "resume subscription",
        )
        .await?;
        Ok(ProviderOp::Supported(()))
    }

    async fn change_plan(
        &self,
        external_subscription_id: &str,
        plan: &PlanEntity,
        billing_cycle: BillingCycle,
        immediate: bool,
    ) -> Result<ProviderOp<()>> {
        let plan_id = plan
            .provider_price_ref(PaymentProvider::Razorpay, billing_cycle)
            .ok_or_else(|| {
                anyhow!(
                    "plan {} has no Razorpay plan for {billing_cycle}",
                    plan.plan_code
                )
            })?;
        let body = json!({
            "plan_id": plan_id,
            "schedule_change_at": if immediate { "now" } else { "cycle_end" },
        });
        let resp = self
            .http
            .patch(format!(
                "{API_BASE}/subscriptions/{external_subscription_id}"
            ))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await?;
        Self::ensure_success(resp, "change subscription plan").await?;
        Ok(ProviderOp::Supported(()))
    }

    async fn get_subscription_status(
        &self,
        external_subscription_id: &str,
    ) -> Result<ProviderOp<ProviderSubscriptionStatus>> {
        let resp = self
            .http
            .get(format!(
                "{API_BASE}/subscriptions/{external_subscription_id}"
            ))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "retrieve subscription").await?;
        let parsed: RazorpaySubscriptionResp = resp.json().await?;
        let status = parsed.status.unwrap_or_default();

        Ok(ProviderOp::Supported(ProviderSubscriptionStatus {
            active: matches!(status.as_str(), "active" | "authenticated"),
            auto_renewing: !matches!(status.as_str(), "cancelled" | "completed" | "expired"),
            current_period_end: parsed
                .current_end
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
        }))
    }

    async fn create_payment_link(&self, invoice: &InvoiceEntity) -> Result<ProviderOp<String>> {
        let body = json!({
            "amount": invoice.outstanding_minor(),
            "currency": invoice.currency,
            "description": format!("Invoice {}", invoice.invoice_number),
            "reference_id": invoice.invoice_number,
        });
        let resp = self
            .post_json("/payment_links", body, "create payment link")
            .await?;

        #[derive(Deserialize)]
        struct PaymentLinkResp {
            short_url: String,
        }
        let parsed: PaymentLinkResp = resp.json().await?;
        Ok(ProviderOp::Supported(parsed.short_url))
    }

    async fn charge_payment_method(
        &self,
        _payment_method: &PaymentMethodEntity,
        _amount_minor: i64,
        _currency: &str,
    ) -> Result<ProviderOp<ChargeResult>> {
        // Off-session token charges need the mandate flow we do not store;
        // invoice payment falls back to a payment link instead.
        Ok(ProviderOp::Unsupported)
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature_header: &str) -> bool {
        signature::verify_hmac_sha256_hex(payload, signature_header, &self.webhook_secret)
    }
}
