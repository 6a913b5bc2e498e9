pub mod app_store;
pub mod google_play;
pub mod razorpay;
pub mod stripe;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{
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
};

/// Outcome of asking a rail for an operation it may not offer. Client rails
/// (Google Play, App Store) cannot create or manage subscriptions server-side
/// and hosted-checkout rails cannot verify store receipts; those calls come
/// back `Unsupported` instead of an error so callers can branch on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderOp<T> {
    Supported(T),
    Unsupported,
}

impl<T> ProviderOp<T> {
    pub fn supported(self) -> Option<T> {
        match self {
            ProviderOp::Supported(value) => Some(value),
            ProviderOp::Unsupported => None,
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, ProviderOp::Unsupported)
    }
}

/// One payment rail. Expected business failures (invalid receipt, declined
/// card) travel inside the result types; `Err` is reserved for transport and
/// provider-API failures, which are retryable.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    /// Client rails: validate a purchase token / receipt against the store.
    async fn verify_purchase(
        &self,
        request: &VerifyPurchaseRequest,
    ) -> Result<ProviderOp<VerificationResult>>;

    /// Hosted-checkout rails: create a provider-side subscription and return
    /// the URL the customer completes payment at.
    async fn create_subscription(
        &self,
        workspace_id: Uuid,
        plan: &PlanEntity,
        billing_cycle: BillingCycle,
    ) -> Result<ProviderOp<CheckoutCreated>>;

    async fn cancel_subscription(
        &self,
        external_subscription_id: &str,
        immediate: bool,
    ) -> Result<ProviderOp<()>>;

    async fn pause_subscription(&self, external_subscription_id: &str) -> Result<ProviderOp<()>>;

    async fn resume_subscription(&self, external_subscription_id: &str) -> Result<ProviderOp<()>>;

    async fn change_plan(
        &self,
        external_subscription_id: &str,
        plan: &PlanEntity,
        billing_cycle: BillingCycle,
        immediate: bool,
    ) -> Result<ProviderOp<()>>;

    async fn get_subscription_status(
        &self,
        external_subscription_id: &str,
    ) -> Result<ProviderOp<ProviderSubscriptionStatus>>;

    /// Hosted link a customer can pay an open invoice through.
    async fn create_payment_link(&self, invoice: &InvoiceEntity) -> Result<ProviderOp<String>>;

    /// Off-session charge against a stored payment method.
    async fn charge_payment_method(
        &self,
        payment_method: &PaymentMethodEntity,
        amount_minor: i64,
        currency: &str,
    ) -> Result<ProviderOp<ChargeResult>>;

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool;
}

/// Lookup table the use cases route through; one gateway per enabled rail.
#[derive(Default)]
pub struct ProviderRegistry {
    gateways: HashMap<PaymentProvider, Arc<dyn ProviderGateway>>,
}

/// Builds the registry from configuration: rails whose sections are absent
/// simply never register.
pub fn registry_from_config(config: &crate::config::config_model::DotEnvyConfig) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    if let Some(stripe) = &config.stripe {
        registry = registry.register(Arc::new(stripe::StripeGateway::new(
            stripe.secret_key.clone(),
            stripe.webhook_secret.clone(),
            stripe.success_url.clone(),
            stripe.cancel_url.clone(),
        )));
    }
    if let Some(razorpay) = &config.razorpay {
        registry = registry.register(Arc::new(razorpay::RazorpayGateway::new(
            razorpay.key_id.clone(),
            razorpay.key_secret.clone(),
            razorpay.webhook_secret.clone(),
        )));
    }
    if let Some(google_play) = &config.google_play {
        registry = registry.register(Arc::new(google_play::GooglePlayGateway::new(
            google_play.package_name.clone(),
            google_play.service_account_email.clone(),
            google_play.service_account_key_pem.clone(),
        )));
    }
    if let Some(app_store) = &config.app_store {
        registry = registry.register(Arc::new(app_store::AppStoreGateway::new(
            app_store.shared_secret.clone(),
            app_store.issuer_id.clone(),
            app_store.key_id.clone(),
            app_store.private_key_pem.clone(),
            app_store.bundle_id.clone(),
        )));
    }
    registry
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, gateway: Arc<dyn ProviderGateway>) -> Self {
        self.gateways.insert(gateway.provider(), gateway);
        self
    }

    pub fn get(&self, provider: PaymentProvider) -> Option<Arc<dyn ProviderGateway>> {
        self.gateways.get(&provider).cloned()
    }
}
