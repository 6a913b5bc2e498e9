use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
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

const API_BASE: &str = "https://api.stripe.com/v1";

/// Stripe rail built on reqwest. Subscriptions are created
/// `default_incomplete` so the customer pays through the hosted invoice URL
/// and we learn the subscription id up front.
pub struct StripeGateway {
    http: reqwest::Client,
    secret_key: String,
    webhook_secret: String,
    success_url: String,
    cancel_url: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorDetails,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetails {
    code: Option<String>,
    message: Option<String>,
    decline_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeSubscriptionResp {
    id: String,
    status: Option<String>,
    cancel_at_period_end: Option<bool>,
    current_period_end: Option<i64>,
    latest_invoice: Option<StripeLatestInvoice>,
    #[serde(default)]
    items: StripeSubscriptionItems,
}

#[derive(Debug, Deserialize)]
struct StripeLatestInvoice {
    hosted_invoice_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StripeSubscriptionItems {
    data: Vec<StripeSubscriptionItem>,
}

#[derive(Debug, Deserialize)]
struct StripeSubscriptionItem {
    id: String,
}

impl StripeGateway {
    pub fn new(
        secret_key: String,
        webhook_secret: String,
        success_url: String,
        cancel_url: String,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            secret_key,
            webhook_secret,
            success_url,
            cancel_url,
        }
    }

    async fn ensure_success(resp: reqwest::Response, context: &str) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let body = match resp.text().await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => "<empty response body>".to_string(),
            Err(err) => format!("<failed to read response body: {err}>"),
        };
        let (code, message, decline_code) =
            match serde_json::from_str::<StripeErrorEnvelope>(&body) {
                Ok(envelope) => (
                    envelope.error.code,
                    envelope.error.message,
                    envelope.error.decline_code,
                ),
                Err(_) => (None, None, None),
            };

        error!(
            %status,
            stripe_error_code = ?code,
            stripe_error_message = ?message,
            stripe_decline_code = ?decline_code,
            context = %context,
            "stripe api request failed"
        );
        anyhow::bail!("Stripe API request failed: {context} (status {status})")
    }

    async fn post_form(
        &self,
        path: &str,
        body: &[(String, String)],
        context: &str,
    ) -> Result<reqwest::Response> {
        let resp = self
            .http
            .post(format!("{API_BASE}{path}"))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .form(body)
            .send()
            .await?;
        Self::ensure_success(resp, context).await
    }

    async fn create_customer(&self, workspace_id: Uuid) -> Result<String> {
        let body = vec![(
            "metadata[workspace_id]".to_string(),
            workspace_id.to_string(),
        )];
        let resp = self.post_form("/customers", &body, "create customer").await?;

        #[derive(Deserialize)]
        struct CustomerResp {
            id: String,
        }
        let parsed: CustomerResp = resp.json().await?;
        Ok(parsed.id)
    }

    async fn retrieve_subscription(&self, subscription_id: &str) -> Result<StripeSubscriptionResp> {
        let resp = self
            .http
            .get(format!("{API_BASE}/subscriptions/{subscription_id}"))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "retrieve subscription").await?;
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl ProviderGateway for StripeGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Stripe
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
        let price_id = plan
            .provider_price_ref(PaymentProvider::Stripe, billing_cycle)
            .ok_or_else(|| {
                anyhow!(
                    "plan {} has no Stripe price for {billing_cycle}",
                    plan.plan_code
                )
            })?;

        let customer_id = self.create_customer(workspace_id).await?;
        let body = vec![
            ("customer".to_string(), customer_id.clone()),
            ("items[0][price]".to_string(), price_id.to_string()),
            (
                "payment_behavior".to_string(),
                "default_incomplete".to_string(),
            ),
            ("expand[]".to_string(), "latest_invoice".to_string()),
            (
                "metadata[workspace_id]".to_string(),
                workspace_id.to_string(),
            ),
        ];
        let resp = self
            .post_form("/subscriptions", &body, "create subscription")
            .await?;
        let parsed: StripeSubscriptionResp = resp.json().await?;

        Ok(ProviderOp::Supported(CheckoutCreated {
            external_subscription_id: parsed.id,
            external_customer_id: Some(customer_id),
            checkout_url: parsed
                .latest_invoice
                .and_then(|invoice| invoice.hosted_invoice_url),
        }))
    }

    async fn cancel_subscription(
        &self,
        external_subscription_id: &str,
        immediate: bool,
    ) -> Result<ProviderOp<()>> {
        if immediate {
            let resp = self
                .http
                .delete(format!(
                    "{API_BASE}/subscriptions/{external_subscription_id}"
                ))
                .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
                .send()
                .await?;
            Self::ensure_success(resp, "cancel subscription now").await?;
        } else {
            let body = vec![("cancel_at_period_end".to_string(), "true".to_string())];
            self.post_form(
                &format!("/subscriptions/{external_subscription_id}"),
                &body,
                "cancel subscription at period end",
            )
            .await?;
        }
        Ok(ProviderOp::Supported(()))
    }

    async fn pause_subscription(&self, external_subscription_id: &str) -> Result<ProviderOp<()>> {
        let body = vec![(
            "pause_collection[behavior]".to_string(),
            "void".to_string(),
        )];
        self.post_form(
            &format!("/subscriptions/{external_subscription_id}"),
            &body,
            "pause subscription",
        )
        .await?;
        Ok(ProviderOp::Supported(()))
    }

    async fn resume_subscription(&self, external_subscription_id: &str) -> Result<ProviderOp<()>> {
        let body = vec![("pause_collection".to_string(), "".to_string())];
        self.post_form(
            &format!("/subscriptions/{external_subscription_id}"),
            &body,
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
        let price_id = plan
            .provider_price_ref(PaymentProvider::Stripe, billing_cycle)
            .ok_or_else(|| {
                anyhow!(
                    "plan {} has no Stripe price for {billing_cycle}",
                    plan.plan_code
                )
            })?;

        let current = self.retrieve_subscription(external_subscription_id).await?;
        let item_id = current
            .items
            .data
            .first()
            .map(|item| item.id.clone())
            .ok_or_else(|| anyhow!("Stripe subscription has no items"))?;

        // Invoicing for the difference is ours; never let Stripe prorate too.
        let body = vec![
            ("items[0][id]".to_string(), item_id),
            ("items[0][price]".to_string(), price_id.to_string()),
            ("proration_behavior".to_string(), "none".to_string()),
            (
                "billing_cycle_anchor".to_string(),
                if immediate { "now" } else { "unchanged" }.to_string(),
            ),
        ];
        self.post_form(
            &format!("/subscriptions/{external_subscription_id}"),
            &body,
            "change subscription plan",
        )
        .await?;
        Ok(ProviderOp::Supported(()))
    }

    async fn get_subscription_status(
        &self,
        external_subscription_id: &str,
    ) -> Result<ProviderOp<ProviderSubscriptionStatus>> {
        let parsed = self.retrieve_subscription(external_subscription_id).await?;
        let status = parsed.status.unwrap_or_default();
        Ok(ProviderOp::Supported(ProviderSubscriptionStatus {
            active: matches!(status.as_str(), "active" | "trialing"),
            auto_renewing: !parsed.cancel_at_period_end.unwrap_or(false),
            current_period_end: parsed
                .current_period_end
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
        }))
    }

    async fn create_payment_link(&self, invoice: &InvoiceEntity) -> Result<ProviderOp<String>> {
        let body = vec![
            ("mode".to_string(), "payment".to_string()),
            (
                "line_items[0][price_data][currency]".to_string(),
                invoice.currency.to_lowercase(),
            ),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                format!("Invoice {}", invoice.invoice_number),
            ),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                invoice.outstanding_minor().to_string(),
            ),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("success_url".to_string(), self.success_url.clone()),
            ("cancel_url".to_string(), self.cancel_url.clone()),
            (
                "metadata[invoice_id]".to_string(),
                invoice.id.to_string(),
            ),
        ];
        let resp = self
            .post_form("/checkout/sessions", &body, "create payment link")
            .await?;

        #[derive(Deserialize)]
        struct SessionResp {
            url: Option<String>,
        }
        let parsed: SessionResp = resp.json().await?;
        let url = parsed
            .url
            .ok_or_else(|| anyhow!("Stripe checkout session URL is missing"))?;
        Ok(ProviderOp::Supported(url))
    }

    async fn charge_payment_method(
        &self,
        payment_method: &PaymentMethodEntity,
        amount_minor: i64,
        currency: &str,
    ) -> Result<ProviderOp<ChargeResult>> {
        let body = vec![
            ("amount".to_string(), amount_minor.to_string()),
            ("currency".to_string(), currency.to_lowercase()),
            (
                "payment_method".to_string(),
                payment_method.provider_ref.clone(),
            ),
            ("off_session".to_string(), "true".to_string()),
            ("confirm".to_string(), "true".to_string()),
        ];
        let resp = self
            .http
            .post(format!("{API_BASE}/payment_intents"))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .form(&body)
            .send()
            .await?;

        // A decline comes back 402 with an error envelope; that is a business
        // outcome, not a transport failure.
        if resp.status() == reqwest::StatusCode::PAYMENT_REQUIRED {
            let envelope: StripeErrorEnvelope = resp.json().await?;
            return Ok(ProviderOp::Supported(ChargeResult {
                succeeded: false,
                external_payment_id: None,
                failure_message: envelope
                    .error
                    .decline_code
                    .or(envelope.error.message),
            }));
        }

        let resp = Self::ensure_success(resp, "charge payment method").await?;

        #[derive(Deserialize)]
        struct PaymentIntentResp {
            id: String,
            status: String,
        }
        let parsed: PaymentIntentResp = resp.json().await?;
        Ok(ProviderOp::Supported(ChargeResult {
            succeeded: parsed.status == "succeeded",
            external_payment_id: Some(parsed.id),
            failure_message: None,
        }))
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature_header: &str) -> bool {
        signature::verify_stripe_signature(payload, signature_header, &self.webhook_secret)
    }
}
