use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    domain::{
        entities::subscriptions::{InsertSubscriptionEntity, SubscriptionEntity},
        lifecycle::{self, BillingPolicy},
        product_ids::{self, ProductIdError},
        repositories::{plans::PlanRepository, subscriptions::SubscriptionRepository},
        value_objects::{
            enums::{
                payment_providers::PaymentProvider, subscription_statuses::SubscriptionStatus,
            },
            purchases::{
                InitiatePurchaseRequest, InitiatePurchaseResponse, VerifyPurchaseRequest,
                VerifyPurchaseResponse,
            },
            webhook_events::{CanonicalEvent, NormalizedEvent},
        },
    },
    providers::{ProviderOp, ProviderRegistry},
};

const VERSION_RETRY_LIMIT: u32 = 3;

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("plan not found")]
    PlanNotFound,
    #[error("invalid product id: {0}")]
    InvalidProductId(String),
    #[error("provider {0} does not support this operation")]
    UnsupportedProviderOperation(PaymentProvider),
    #[error("provider {0} is not configured")]
    ProviderNotConfigured(PaymentProvider),
    #[error("purchase rejected: {0}")]
    PurchaseRejected(String),
    #[error("workspace already has an active subscription")]
    AlreadySubscribed,
    #[error("payment provider is unavailable")]
    ProviderUnavailable,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl OrchestrationError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            OrchestrationError::PlanNotFound => StatusCode::NOT_FOUND,
            OrchestrationError::InvalidProductId(_)
            | OrchestrationError::UnsupportedProviderOperation(_) => StatusCode::BAD_REQUEST,
            OrchestrationError::ProviderNotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            OrchestrationError::PurchaseRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            OrchestrationError::AlreadySubscribed => StatusCode::CONFLICT,
            OrchestrationError::ProviderUnavailable => StatusCode::BAD_GATEWAY,
            OrchestrationError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type UseCaseResult<T> = std::result::Result<T, OrchestrationError>;

/// Routes purchase intents to the right rail: hosted checkout for
/// server-initiated providers, receipt verification for client-initiated
/// ones.
pub struct OrchestrationUseCase<P, S>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
{
    plan_repo: Arc<P>,
    subscription_repo: Arc<S>,
    registry: Arc<ProviderRegistry>,
    policy: BillingPolicy,
}

impl<P, S> OrchestrationUseCase<P, S>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
{
    pub fn new(
        plan_repo: Arc<P>,
        subscription_repo: Arc<S>,
        registry: Arc<ProviderRegistry>,
        policy: BillingPolicy,
    ) -> Self {
        Self {
            plan_repo,
            subscription_repo,
            registry,
            policy,
        }
    }

    pub async fn initiate_purchase(
        &self,
        workspace_id: Uuid,
        request: InitiatePurchaseRequest,
    ) -> UseCaseResult<InitiatePurchaseResponse> {
        let provider = request.provider;
        info!(%workspace_id, %provider, plan_code = %request.plan_code, "initiating purchase");

        if provider.is_client_initiated() {
            // Store purchases start inside the app; the backend only verifies.
            return Err(OrchestrationError::UnsupportedProviderOperation(provider));
        }
        let gateway = self
            .registry
            .get(provider)
            .ok_or(OrchestrationError::ProviderNotConfigured(provider))?;

        let plan = self
            .plan_repo
            .find_by_code(&request.plan_code)
            .await
            .map_err(OrchestrationError::Internal)?
            .filter(|plan| plan.is_active)
            .ok_or(OrchestrationError::PlanNotFound)?;

        if let Some(current) = self
            .subscription_repo
            .find_current_by_workspace(workspace_id)
            .await
            .map_err(OrchestrationError::Internal)?
        {
            // An unfinished checkout for the same plan can simply be resumed.
            if current.status_enum() == SubscriptionStatus::Pending
                && current.plan_code == plan.plan_code
                && current.provider_enum() == Some(provider)
            {
                info!(subscription_id = %current.id, "reusing pending checkout");
                return Ok(InitiatePurchaseResponse {
                    subscription_id: current.id,
                    status: SubscriptionStatus::Pending,
                    checkout_url: current.checkout_url,
                });
            }
            return Err(OrchestrationError::AlreadySubscribed);
        }

        let checkout = match gateway
            .create_subscription(workspace_id, &plan, request.billing_cycle)
            .await
        {
            Ok(ProviderOp::Supported(checkout)) => checkout,
            Ok(ProviderOp::Unsupported) => {
                return Err(OrchestrationError::UnsupportedProviderOperation(provider));
            }
            Err(err) => {
                error!(%provider, provider_error = ?err, "provider subscription creation failed");
                return Err(OrchestrationError::ProviderUnavailable);
            }
        };

        let currency = request.currency.unwrap_or_else(|| plan.currency.clone());
        let subscription_id = self
            .subscription_repo
            .create(InsertSubscriptionEntity {
                id: Uuid::new_v4(),
                workspace_id,
                plan_code: plan.plan_code.clone(),
                billing_cycle: request.billing_cycle.to_string(),
                status: SubscriptionStatus::Pending.to_string(),
                provider: provider.to_string(),
                external_subscription_id: Some(checkout.external_subscription_id.clone()),
                external_customer_id: checkout.external_customer_id.clone(),
                currency,
                current_period_start: None,
                current_period_end: None,
                trial_ends_at: None,
                cancel_at_period_end: false,
                auto_renewing: true,
            })
            .await
            .map_err(OrchestrationError::Internal)?;
        self.subscription_repo
            .set_external_refs(
                subscription_id,
                Some(checkout.external_subscription_id),
                checkout.external_customer_id,
                checkout.checkout_url.clone(),
            )
            .await
            .map_err(OrchestrationError::Internal)?;

        info!(%subscription_id, %provider, "checkout created");
        Ok(InitiatePurchaseResponse {
            subscription_id,
            status: SubscriptionStatus::Pending,
            checkout_url: checkout.checkout_url,
        })
    }

    pub async fn verify_purchase(
        &self,
        workspace_id: Uuid,
        request: VerifyPurchaseRequest,
    ) -> UseCaseResult<VerifyPurchaseResponse> {
        let provider = request.provider;
        info!(%workspace_id, %provider, product_id = %request.product_id, "verifying purchase");

        if !provider.is_client_initiated() {
            return Err(OrchestrationError::UnsupportedProviderOperation(provider));
        }
        let gateway = self
            .registry
            .get(provider)
            .ok_or(OrchestrationError::ProviderNotConfigured(provider))?;

        let parsed = product_ids::parse_product_id(&request.product_id).map_err(|err| match err {
            ProductIdError::Malformed(id) => OrchestrationError::InvalidProductId(id),
            ProductIdError::UnknownCycle(token) => OrchestrationError::InvalidProductId(token),
        })?;
        let plan = self
            .plan_repo
            .find_by_code(&parsed.plan_code)
            .await
            .map_err(OrchestrationError::Internal)?
            .filter(|plan| plan.is_active)
            .ok_or(OrchestrationError::PlanNotFound)?;

        let verification = match gateway.verify_purchase(&request).await {
            Ok(ProviderOp::Supported(verification)) => verification,
            Ok(ProviderOp::Unsupported) => {
                return Err(OrchestrationError::UnsupportedProviderOperation(provider));
            }
            Err(err) => {
                error!(%provider, provider_error = ?err, "purchase verification call failed");
                return Err(OrchestrationError::ProviderUnavailable);
            }
        };
        if !verification.valid {
            let reason = verification
                .error_message
                .unwrap_or_else(|| "store reported the purchase as invalid".to_string());
            warn!(%workspace_id, %provider, %reason, "purchase rejected");
            return Err(OrchestrationError::PurchaseRejected(reason));
        }
        let external_id = verification
            .external_subscription_id
            .clone()
            .ok_or_else(|| anyhow!("store returned a valid purchase without an id"))?;

        // Re-sent tokens re-activate the same row instead of minting a new
        // subscription.
        if let Some(existing) = self
            .subscription_repo
            .find_by_external_id(provider, &external_id)
            .await
            .map_err(OrchestrationError::Internal)?
        {
            if existing.workspace_id != workspace_id {
                warn!(%workspace_id, other_workspace = %existing.workspace_id,
                    "purchase token already linked to another workspace");
                return Err(OrchestrationError::PurchaseRejected(
                    "purchase is linked to another workspace".to_string(),
                ));
            }
            let updated = self.activate(&existing, verification.expires_at).await?;
            return Ok(VerifyPurchaseResponse {
                subscription_id: updated.id,
                status: SubscriptionStatus::Active,
                expires_at: verification.expires_at,
            });
        }

        if self
            .subscription_repo
            .find_current_by_workspace(workspace_id)
            .await
            .map_err(OrchestrationError::Internal)?
            .is_some()
        {
            return Err(OrchestrationError::AlreadySubscribed);
        }

        let subscription_id = self
            .subscription_repo
            .create(InsertSubscriptionEntity {
                id: Uuid::new_v4(),
                workspace_id,
                plan_code: plan.plan_code.clone(),
                billing_cycle: parsed.billing_cycle.to_string(),
                status: SubscriptionStatus::Active.to_string(),
                provider: provider.to_string(),
                external_subscription_id: Some(external_id),
                external_customer_id: None,
                currency: plan.currency.clone(),
                current_period_start: Some(Utc::now()),
                current_period_end: verification.expires_at,
                trial_ends_at: None,
                cancel_at_period_end: false,
                auto_renewing: verification.auto_renewing,
            })
            .await
            .map_err(OrchestrationError::Internal)?;

        info!(%subscription_id, %provider, "purchase verified, subscription active");
        Ok(VerifyPurchaseResponse {
            subscription_id,
            status: SubscriptionStatus::Active,
            expires_at: verification.expires_at,
        })
    }

    /// Activation with the optimistic-version retry loop shared by webhook
    /// appliers: reload and recompute on every conflict.
    async fn activate(
        &self,
        subscription: &SubscriptionEntity,
        expires_at: Option<chrono::DateTime<Utc>>,
    ) -> UseCaseResult<SubscriptionEntity> {
        let mut snapshot = subscription.clone();
        let event = NormalizedEvent {
            provider: snapshot.provider_enum().unwrap_or(PaymentProvider::Stripe),
            event_id: String::new(),
            event_type: "verify_purchase".to_string(),
            external_subscription_id: snapshot.external_subscription_id.clone(),
            canonical: Some(CanonicalEvent::SubscriptionActivated),
            provider_price_ref: None,
            amount_minor: None,
            currency: None,
            period_start: None,
            period_end: expires_at,
        };

        for _ in 0..VERSION_RETRY_LIMIT {
            let changes = lifecycle::apply(&snapshot, &event, &self.policy, Utc::now())
                .map_err(|err| OrchestrationError::Internal(anyhow!(err)))?;
            let updated = self
                .subscription_repo
                .update_guarded(snapshot.id, snapshot.version, changes)
                .await
                .map_err(OrchestrationError::Internal)?;
            if updated {
                return self
                    .subscription_repo
                    .find_by_id(snapshot.id)
                    .await
                    .map_err(OrchestrationError::Internal)?
                    .ok_or_else(|| {
                        OrchestrationError::Internal(anyhow!("subscription vanished mid-update"))
                    });
            }
            warn!(subscription_id = %snapshot.id, "version conflict during activation, retrying");
            snapshot = self
                .subscription_repo
                .find_by_id(snapshot.id)
                .await
                .map_err(OrchestrationError::Internal)?
                .ok_or_else(|| {
                    OrchestrationError::Internal(anyhow!("subscription vanished mid-update"))
                })?;
        }
        Err(OrchestrationError::Internal(anyhow!(
            "gave up after {VERSION_RETRY_LIMIT} version conflicts"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::plans::PlanEntity;
    use crate::domain::repositories::plans::MockPlanRepository;
    use crate::domain::repositories::subscriptions::MockSubscriptionRepository;
    use crate::domain::value_objects::enums::billing_cycles::BillingCycle;
    use crate::domain::value_objects::purchases::{CheckoutCreated, VerificationResult};
    use crate::providers::MockProviderGateway;
    use chrono::Duration;
    use mockall::predicate::eq;

    fn plan() -> PlanEntity {
        PlanEntity {
            id: Uuid::new_v4(),
            plan_code: "PRO".to_string(),
            display_name: "Pro".to_string(),
            monthly_price_minor: 2900,
            currency: "USD".to_string(),
            annual_discount_percent: 20,
            trial_days: 14,
            google_product_id: Some("com.subledger.pro.monthly".to_string()),
            apple_product_id: Some("com.subledger.pro.monthly".to_string()),
            stripe_monthly_price_id: Some("price_m".to_string()),
            stripe_annual_price_id: Some("price_y".to_string()),
            razorpay_monthly_plan_id: Some("plan_m".to_string()),
            razorpay_annual_plan_id: Some("plan_y".to_string()),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn registry_with(provider: PaymentProvider, mut gateway: MockProviderGateway) -> Arc<ProviderRegistry> {
        gateway.expect_provider().return_const(provider);
        Arc::new(ProviderRegistry::new().register(Arc::new(gateway)))
    }

    #[tokio::test]
    async fn initiate_purchase_creates_pending_subscription_with_checkout_url() {
        let workspace_id = Uuid::new_v4();
        let mut plan_repo = MockPlanRepository::new();
        plan_repo
            .expect_find_by_code()
            .with(eq("PRO"))
            .returning(|_| Ok(Some(plan())));

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_current_by_workspace()
            .returning(|_| Ok(None));
        subscription_repo
            .expect_create()
            .withf(|entity| {
                entity.status == "PENDING"
                    && entity.provider == "STRIPE"
                    && entity.external_subscription_id.as_deref() == Some("sub_1")
            })
            .returning(|entity| Ok(entity.id));
        subscription_repo
            .expect_set_external_refs()
            .returning(|_, _, _, _| Ok(()));

        let mut gateway = MockProviderGateway::new();
        gateway.expect_create_subscription().returning(|_, _, _| {
            Ok(ProviderOp::Supported(CheckoutCreated {
                external_subscription_id: "sub_1".to_string(),
                external_customer_id: Some("cus_1".to_string()),
                checkout_url: Some("https://pay.example/cs_1".to_string()),
            }))
        });

        let usecase = OrchestrationUseCase::new(
            Arc::new(plan_repo),
            Arc::new(subscription_repo),
            registry_with(PaymentProvider::Stripe, gateway),
            BillingPolicy::default(),
        );

        let response = usecase
            .initiate_purchase(
                workspace_id,
                InitiatePurchaseRequest {
                    provider: PaymentProvider::Stripe,
                    plan_code: "PRO".to_string(),
                    billing_cycle: BillingCycle::Monthly,
                    currency: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(response.status, SubscriptionStatus::Pending);
        assert_eq!(
            response.checkout_url.as_deref(),
            Some("https://pay.example/cs_1")
        );
    }

    #[tokio::test]
    async fn initiate_purchase_rejects_client_initiated_rails() {
        let usecase = OrchestrationUseCase::new(
            Arc::new(MockPlanRepository::new()),
            Arc::new(MockSubscriptionRepository::new()),
            Arc::new(ProviderRegistry::new()),
            BillingPolicy::default(),
        );

        let err = usecase
            .initiate_purchase(
                Uuid::new_v4(),
                InitiatePurchaseRequest {
                    provider: PaymentProvider::GooglePlay,
                    plan_code: "PRO".to_string(),
                    billing_cycle: BillingCycle::Monthly,
                    currency: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::UnsupportedProviderOperation(PaymentProvider::GooglePlay)
        ));
    }

    #[tokio::test]
    async fn initiate_purchase_rejects_second_active_subscription() {
        let workspace_id = Uuid::new_v4();
        let mut plan_repo = MockPlanRepository::new();
        plan_repo
            .expect_find_by_code()
            .returning(|_| Ok(Some(plan())));
        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_current_by_workspace()
            .returning(move |_| {
                let now = Utc::now();
                Ok(Some(SubscriptionEntity {
                    id: Uuid::new_v4(),
                    workspace_id,
                    plan_code: "PRO".to_string(),
                    billing_cycle: "MONTHLY".to_string(),
                    status: "ACTIVE".to_string(),
                    provider: "STRIPE".to_string(),
                    external_subscription_id: Some("sub_1".to_string()),
                    external_customer_id: None,
                    currency: "USD".to_string(),
                    current_period_start: Some(now),
                    current_period_end: Some(now + Duration::days(30)),
                    trial_ends_at: None,
                    grace_period_ends_at: None,
                    cancel_at_period_end: false,
                    auto_renewing: true,
                    failed_payment_count: 0,
                    pending_proration_minor: 0,
                    checkout_url: None,
                    version: 1,
                    created_at: now,
                    updated_at: now,
                }))
            });

        let usecase = OrchestrationUseCase::new(
            Arc::new(plan_repo),
            Arc::new(subscription_repo),
            registry_with(PaymentProvider::Stripe, MockProviderGateway::new()),
            BillingPolicy::default(),
        );

        let err = usecase
            .initiate_purchase(
                workspace_id,
                InitiatePurchaseRequest {
                    provider: PaymentProvider::Stripe,
                    plan_code: "PRO".to_string(),
                    billing_cycle: BillingCycle::Monthly,
                    currency: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::AlreadySubscribed));
    }

    #[tokio::test]
    async fn verify_purchase_activates_new_subscription() {
        let workspace_id = Uuid::new_v4();
        let expires = Utc::now() + Duration::days(30);

        let mut plan_repo = MockPlanRepository::new();
        plan_repo
            .expect_find_by_code()
            .with(eq("PRO"))
            .returning(|_| Ok(Some(plan())));

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_by_external_id()
            .returning(|_, _| Ok(None));
        subscription_repo
            .expect_find_current_by_workspace()
            .returning(|_| Ok(None));
        subscription_repo
            .expect_create()
            .withf(|entity| entity.status == "ACTIVE" && entity.provider == "GOOGLE_PLAY")
            .returning(|entity| Ok(entity.id));

        let mut gateway = MockProviderGateway::new();
        gateway.expect_verify_purchase().returning(move |_| {
            Ok(ProviderOp::Supported(VerificationResult {
                valid: true,
                external_subscription_id: Some("tok-123".to_string()),
                expires_at: Some(expires),
                auto_renewing: true,
                error_message: None,
            }))
        });

        let usecase = OrchestrationUseCase::new(
            Arc::new(plan_repo),
            Arc::new(subscription_repo),
            registry_with(PaymentProvider::GooglePlay, gateway),
            BillingPolicy::default(),
        );

        let response = usecase
            .verify_purchase(
                workspace_id,
                VerifyPurchaseRequest {
                    provider: PaymentProvider::GooglePlay,
                    product_id: "com.subledger.pro.monthly".to_string(),
                    purchase_token: "tok-123".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(response.status, SubscriptionStatus::Active);
        assert_eq!(response.expires_at, Some(expires));
    }

    #[tokio::test]
    async fn verify_purchase_rejects_invalid_receipt() {
        let mut plan_repo = MockPlanRepository::new();
        plan_repo
            .expect_find_by_code()
            .returning(|_| Ok(Some(plan())));
        let subscription_repo = MockSubscriptionRepository::new();

        let mut gateway = MockProviderGateway::new();
        gateway.expect_verify_purchase().returning(|_| {
            Ok(ProviderOp::Supported(VerificationResult {
                valid: false,
                external_subscription_id: None,
                expires_at: None,
                auto_renewing: false,
                error_message: Some("purchase token not recognized".to_string()),
            }))
        });

        let usecase = OrchestrationUseCase::new(
            Arc::new(plan_repo),
            Arc::new(subscription_repo),
            registry_with(PaymentProvider::GooglePlay, gateway),
            BillingPolicy::default(),
        );

        let err = usecase
            .verify_purchase(
                Uuid::new_v4(),
                VerifyPurchaseRequest {
                    provider: PaymentProvider::GooglePlay,
                    product_id: "com.subledger.pro.monthly".to_string(),
                    purchase_token: "bad-token".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::PurchaseRejected(_)));
    }

    #[tokio::test]
    async fn verify_purchase_rejects_malformed_product_id() {
        let usecase = OrchestrationUseCase::new(
            Arc::new(MockPlanRepository::new()),
            Arc::new(MockSubscriptionRepository::new()),
            registry_with(PaymentProvider::AppStore, MockProviderGateway::new()),
            BillingPolicy::default(),
        );

        let err = usecase
            .verify_purchase(
                Uuid::new_v4(),
                VerifyPurchaseRequest {
                    provider: PaymentProvider::AppStore,
                    product_id: "pro".to_string(),
                    purchase_token: "receipt".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::InvalidProductId(_)));
    }
}
