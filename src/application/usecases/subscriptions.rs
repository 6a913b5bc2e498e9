use std::sync::Arc;

use anyhow::anyhow;
use chrono::{Duration, Utc};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    domain::{
        entities::subscriptions::{InsertSubscriptionEntity, SubscriptionEntity},
        lifecycle::{self, BillingPolicy, TransitionError},
        repositories::{plans::PlanRepository, subscriptions::SubscriptionRepository},
        value_objects::{
            enums::{
                payment_providers::PaymentProvider, subscription_statuses::SubscriptionStatus,
            },
            subscriptions::{
                CancelSubscriptionRequest, ChangePlanRequest, StartTrialRequest, SubscriptionDto,
            },
            webhook_events::{CanonicalEvent, NormalizedEvent},
        },
    },
    providers::{ProviderOp, ProviderRegistry},
};

const VERSION_RETRY_LIMIT: u32 = 3;

/// Provider value stored for subscriptions that never touch a payment rail
/// (free trials started server-side).
const NO_PROVIDER: &str = "NONE";

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("no current subscription for this workspace")]
    NotFound,
    #[error("plan not found")]
    PlanNotFound,
    #[error("this subscription is managed in the {0} store app")]
    ManagedByStore(PaymentProvider),
    #[error("cannot {action} a subscription in status {status}")]
    InvalidState {
        action: &'static str,
        status: SubscriptionStatus,
    },
    #[error("workspace has already used its trial")]
    TrialAlreadyUsed,
    #[error("workspace already has an active subscription")]
    AlreadySubscribed,
    #[error("payment provider is unavailable")]
    ProviderUnavailable,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl SubscriptionError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            SubscriptionError::NotFound | SubscriptionError::PlanNotFound => StatusCode::NOT_FOUND,
            SubscriptionError::ManagedByStore(_) => StatusCode::BAD_REQUEST,
            SubscriptionError::InvalidState { .. }
            | SubscriptionError::TrialAlreadyUsed
            | SubscriptionError::AlreadySubscribed => StatusCode::CONFLICT,
            SubscriptionError::ProviderUnavailable => StatusCode::BAD_GATEWAY,
            SubscriptionError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type UseCaseResult<T> = std::result::Result<T, SubscriptionError>;

/// Workspace-facing subscription management: lifecycle actions ride through
/// the provider first, then land on the local row under the version guard.
pub struct SubscriptionUseCase<S, P>
where
    S: SubscriptionRepository + Send + Sync + 'static,
    P: PlanRepository + Send + Sync + 'static,
{
    subscription_repo: Arc<S>,
    plan_repo: Arc<P>,
    registry: Arc<ProviderRegistry>,
    policy: BillingPolicy,
}

impl<S, P> SubscriptionUseCase<S, P>
where
    S: SubscriptionRepository + Send + Sync + 'static,
    P: PlanRepository + Send + Sync + 'static,
{
    pub fn new(
        subscription_repo: Arc<S>,
        plan_repo: Arc<P>,
        registry: Arc<ProviderRegistry>,
        policy: BillingPolicy,
    ) -> Self {
        Self {
            subscription_repo,
            plan_repo,
            registry,
            policy,
        }
    }

    pub async fn list_plans(&self) -> UseCaseResult<Vec<crate::domain::value_objects::plans::PlanDto>> {
        let plans = self
            .plan_repo
            .list_active()
            .await
            .map_err(SubscriptionError::Internal)?;
        Ok(plans.into_iter().map(Into::into).collect())
    }

    pub async fn get_current(&self, workspace_id: Uuid) -> UseCaseResult<SubscriptionDto> {
        let subscription = self.current(workspace_id).await?;
        Ok(SubscriptionDto::from(subscription))
    }

    /// Pulls the provider's view of the subscription and reconciles the local
    /// row with it. Covers missed webhooks: a renewal the provider already
    /// processed rolls the period forward, a subscription the provider no
    /// longer considers active is cancelled locally.
    pub async fn sync(&self, workspace_id: Uuid) -> UseCaseResult<SubscriptionDto> {
        let subscription = self.current(workspace_id).await?;
        let (Some(provider), Some(external_id)) = (
            subscription.provider_enum(),
            subscription.external_subscription_id.clone(),
        ) else {
            // Trial rows have no provider to ask.
            return Ok(SubscriptionDto::from(subscription));
        };

        let gateway = self.require_gateway(provider)?;
        let provider_state = match gateway.get_subscription_status(&external_id).await {
            Ok(ProviderOp::Supported(state)) => state,
            Ok(ProviderOp::Unsupported) => return Ok(SubscriptionDto::from(subscription)),
            Err(err) => {
                error!(%provider, provider_error = ?err, "provider status query failed");
                return Err(SubscriptionError::ProviderUnavailable);
            }
        };
        info!(subscription_id = %subscription.id, %provider,
            provider_active = provider_state.active, "synced provider subscription state");

        if !provider_state.active {
            return self
                .apply_local(
                    subscription,
                    CanonicalEvent::SubscriptionCancelled { immediate: true },
                    "sync",
                )
                .await;
        }

        let renewed = match (provider_state.current_period_end, subscription.current_period_end) {
            (Some(theirs), Some(ours)) => theirs > ours,
            (Some(_), None) => true,
            _ => false,
        };
        if renewed {
            let event = NormalizedEvent {
                provider,
                event_id: String::new(),
                event_type: "sync".to_string(),
                external_subscription_id: Some(external_id),
                canonical: Some(CanonicalEvent::RenewalSucceeded),
                provider_price_ref: None,
                amount_minor: None,
                currency: None,
                period_start: subscription.current_period_end,
                period_end: provider_state.current_period_end,
            };
            return self.apply_event_with(subscription, event, "sync", |_| {}).await;
        }

        if subscription.auto_renewing && !provider_state.auto_renewing {
            // The provider stopped auto-renewal (a store-side cancel we never
            // got a notification for); mirror it as a deferred cancel.
            return self
                .apply_local(
                    subscription,
                    CanonicalEvent::SubscriptionCancelled { immediate: false },
                    "sync",
                )
                .await;
        }

        Ok(SubscriptionDto::from(subscription))
    }

    pub async fn cancel(
        &self,
        workspace_id: Uuid,
        request: CancelSubscriptionRequest,
    ) -> UseCaseResult<SubscriptionDto> {
        let subscription = self.current(workspace_id).await?;
        info!(%workspace_id, subscription_id = %subscription.id, immediate = request.immediate,
            "cancelling subscription");

        if let Some(provider) = subscription.provider_enum() {
            let gateway = self.require_gateway(provider)?;
            let Some(external_id) = subscription.external_subscription_id.as_deref() else {
                return Err(SubscriptionError::Internal(anyhow!(
                    "subscription has a provider but no external id"
                )));
            };
            match gateway
                .cancel_subscription(external_id, request.immediate)
                .await
            {
                Ok(ProviderOp::Supported(())) => {}
                Ok(ProviderOp::Unsupported) => {
                    return Err(SubscriptionError::ManagedByStore(provider));
                }
                Err(err) => {
                    error!(%provider, provider_error = ?err, "provider cancel failed");
                    return Err(SubscriptionError::ProviderUnavailable);
                }
            }
        }

        self.apply_local(
            subscription,
            CanonicalEvent::SubscriptionCancelled {
                immediate: request.immediate,
            },
            "cancel",
        )
        .await
    }

    pub async fn pause(&self, workspace_id: Uuid) -> UseCaseResult<SubscriptionDto> {
        let subscription = self.current(workspace_id).await?;
        info!(%workspace_id, subscription_id = %subscription.id, "pausing subscription");
        self.provider_call(&subscription, "pause", |gateway, external_id| {
            Box::pin(async move { gateway.pause_subscription(&external_id).await })
        })
        .await?;
        self.apply_local(subscription, CanonicalEvent::SubscriptionPaused, "pause")
            .await
    }

    pub async fn resume(&self, workspace_id: Uuid) -> UseCaseResult<SubscriptionDto> {
        let subscription = self.current(workspace_id).await?;
        info!(%workspace_id, subscription_id = %subscription.id, "resuming subscription");
        self.provider_call(&subscription, "resume", |gateway, external_id| {
            Box::pin(async move { gateway.resume_subscription(&external_id).await })
        })
        .await?;
        self.apply_local(subscription, CanonicalEvent::SubscriptionResumed, "resume")
            .await
    }

    pub async fn change_plan(
        &self,
        workspace_id: Uuid,
        request: ChangePlanRequest,
    ) -> UseCaseResult<SubscriptionDto> {
        let subscription = self.current(workspace_id).await?;
        info!(%workspace_id, subscription_id = %subscription.id,
            plan_code = %request.plan_code, immediate = request.immediate, "changing plan");

        let new_plan = self
            .plan_repo
            .find_by_code(&request.plan_code)
            .await
            .map_err(SubscriptionError::Internal)?
            .filter(|plan| plan.is_active)
            .ok_or(SubscriptionError::PlanNotFound)?;
        let old_plan = self
            .plan_repo
            .find_by_code(&subscription.plan_code)
            .await
            .map_err(SubscriptionError::Internal)?
            .ok_or(SubscriptionError::PlanNotFound)?;

        if let Some(provider) = subscription.provider_enum() {
            let gateway = self.require_gateway(provider)?;
            let Some(external_id) = subscription.external_subscription_id.as_deref() else {
                return Err(SubscriptionError::Internal(anyhow!(
                    "subscription has a provider but no external id"
                )));
            };
            match gateway
                .change_plan(external_id, &new_plan, request.billing_cycle, request.immediate)
                .await
            {
                Ok(ProviderOp::Supported(())) => {}
                Ok(ProviderOp::Unsupported) => {
                    return Err(SubscriptionError::ManagedByStore(provider));
                }
                Err(err) => {
                    error!(%provider, provider_error = ?err, "provider plan change failed");
                    return Err(SubscriptionError::ProviderUnavailable);
                }
            }
        }

        if !request.immediate {
            // Deferred switches take effect at renewal; the provider webhook
            // carries the plan change back to us then.
            return Ok(SubscriptionDto::from(subscription));
        }

        let proration = self.proration_for(&subscription, &old_plan, &new_plan, &request);
        self.apply_local_with(
            subscription,
            CanonicalEvent::PlanChanged {
                plan_code: request.plan_code.clone(),
                billing_cycle: request.billing_cycle,
            },
            "change plan",
            |changes| changes.pending_proration_minor += proration,
        )
        .await
    }

    pub async fn start_trial(
        &self,
        workspace_id: Uuid,
        request: StartTrialRequest,
    ) -> UseCaseResult<SubscriptionDto> {
        info!(%workspace_id, plan_code = %request.plan_code, "starting trial");
        if self
            .subscription_repo
            .has_used_trial(workspace_id)
            .await
            .map_err(SubscriptionError::Internal)?
        {
            return Err(SubscriptionError::TrialAlreadyUsed);
        }
        if self
            .subscription_repo
            .find_current_by_workspace(workspace_id)
            .await
            .map_err(SubscriptionError::Internal)?
            .is_some()
        {
            return Err(SubscriptionError::AlreadySubscribed);
        }
        let plan = self
            .plan_repo
            .find_by_code(&request.plan_code)
            .await
            .map_err(SubscriptionError::Internal)?
            .filter(|plan| plan.is_active && plan.trial_days > 0)
            .ok_or(SubscriptionError::PlanNotFound)?;

        let now = Utc::now();
        let trial_ends_at = now + Duration::days(i64::from(plan.trial_days));
        let subscription_id = self
            .subscription_repo
            .create(InsertSubscriptionEntity {
                id: Uuid::new_v4(),
                workspace_id,
                plan_code: plan.plan_code.clone(),
                billing_cycle: "MONTHLY".to_string(),
                status: SubscriptionStatus::Trialing.to_string(),
                provider: NO_PROVIDER.to_string(),
                external_subscription_id: None,
                external_customer_id: None,
                currency: plan.currency.clone(),
                current_period_start: Some(now),
                current_period_end: Some(trial_ends_at),
                trial_ends_at: Some(trial_ends_at),
                cancel_at_period_end: false,
                auto_renewing: false,
            })
            .await
            .map_err(SubscriptionError::Internal)?;

        let created = self
            .subscription_repo
            .find_by_id(subscription_id)
            .await
            .map_err(SubscriptionError::Internal)?
            .ok_or_else(|| SubscriptionError::Internal(anyhow!("trial row vanished after insert")))?;
        info!(%subscription_id, "trial started");
        Ok(SubscriptionDto::from(created))
    }

    async fn current(&self, workspace_id: Uuid) -> UseCaseResult<SubscriptionEntity> {
        self.subscription_repo
            .find_current_by_workspace(workspace_id)
            .await
            .map_err(SubscriptionError::Internal)?
            .ok_or(SubscriptionError::NotFound)
    }

    fn require_gateway(
        &self,
        provider: PaymentProvider,
    ) -> UseCaseResult<Arc<dyn crate::providers::ProviderGateway>> {
        self.registry
            .get(provider)
            .ok_or_else(|| SubscriptionError::Internal(anyhow!("provider {provider} not configured")))
    }

    async fn provider_call<F>(
        &self,
        subscription: &SubscriptionEntity,
        action: &'static str,
        call: F,
    ) -> UseCaseResult<()>
    where
        F: FnOnce(
            Arc<dyn crate::providers::ProviderGateway>,
            String,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = anyhow::Result<ProviderOp<()>>> + Send>,
        >,
    {
        let Some(provider) = subscription.provider_enum() else {
            return Ok(());
        };
        let gateway = self.require_gateway(provider)?;
        let Some(external_id) = subscription.external_subscription_id.clone() else {
            return Err(SubscriptionError::Internal(anyhow!(
                "subscription has a provider but no external id"
            )));
        };
        match call(gateway, external_id).await {
            Ok(ProviderOp::Supported(())) => Ok(()),
            Ok(ProviderOp::Unsupported) => Err(SubscriptionError::ManagedByStore(provider)),
            Err(err) => {
                error!(%provider, %action, provider_error = ?err, "provider call failed");
                Err(SubscriptionError::ProviderUnavailable)
            }
        }
    }

    /// Proration owed for an immediate switch: the price difference weighted
    /// by how much of the current period is left, accumulated onto the next
    /// invoice rather than charged on the spot.
    fn proration_for(
        &self,
        subscription: &SubscriptionEntity,
        old_plan: &crate::domain::entities::plans::PlanEntity,
        new_plan: &crate::domain::entities::plans::PlanEntity,
        request: &ChangePlanRequest,
    ) -> i64 {
        let old_cycle = subscription.billing_cycle_enum();
        let remaining_days = subscription
            .current_period_end
            .map(|end| (end - Utc::now()).num_days())
            .unwrap_or(0);
        lifecycle::proration_adjustment_minor(
            remaining_days,
            old_cycle.total_days(),
            new_plan.cycle_price_minor(request.billing_cycle),
            old_plan.cycle_price_minor(old_cycle),
        )
    }

    async fn apply_local(
        &self,
        subscription: SubscriptionEntity,
        canonical: CanonicalEvent,
        action: &'static str,
    ) -> UseCaseResult<SubscriptionDto> {
        self.apply_local_with(subscription, canonical, action, |_| {})
            .await
    }

    /// The shared optimistic loop: recompute the transition from a fresh
    /// snapshot on every version conflict so webhook writers cannot be
    /// overwritten.
    async fn apply_local_with<A>(
        &self,
        subscription: SubscriptionEntity,
        canonical: CanonicalEvent,
        action: &'static str,
        adjust: A,
    ) -> UseCaseResult<SubscriptionDto>
    where
        A: Fn(&mut lifecycle::SubscriptionChanges),
    {
        let event = NormalizedEvent {
            provider: subscription
                .provider_enum()
                .unwrap_or(PaymentProvider::Stripe),
            event_id: String::new(),
            event_type: action.to_string(),
            external_subscription_id: subscription.external_subscription_id.clone(),
            canonical: Some(canonical),
            provider_price_ref: None,
            amount_minor: None,
            currency: None,
            period_start: None,
            period_end: None,
        };
        self.apply_event_with(subscription, event, action, adjust)
            .await
    }

    async fn apply_event_with<A>(
        &self,
        subscription: SubscriptionEntity,
        event: NormalizedEvent,
        action: &'static str,
        adjust: A,
    ) -> UseCaseResult<SubscriptionDto>
    where
        A: Fn(&mut lifecycle::SubscriptionChanges),
    {
        let mut snapshot = subscription;
        for _ in 0..VERSION_RETRY_LIMIT {
            let mut changes = lifecycle::apply(&snapshot, &event, &self.policy, Utc::now())
                .map_err(|err| match err {
                    TransitionError::Terminal(status) => SubscriptionError::InvalidState {
                        action,
                        status,
                    },
                    TransitionError::Invalid { action, status } => {
                        SubscriptionError::InvalidState { action, status }
                    }
                })?;
            adjust(&mut changes);

            let updated = self
                .subscription_repo
                .update_guarded(snapshot.id, snapshot.version, changes)
                .await
                .map_err(SubscriptionError::Internal)?;
            if updated {
                let fresh = self
                    .subscription_repo
                    .find_by_id(snapshot.id)
                    .await
                    .map_err(SubscriptionError::Internal)?
                    .ok_or_else(|| {
                        SubscriptionError::Internal(anyhow!("subscription vanished mid-update"))
                    })?;
                return Ok(SubscriptionDto::from(fresh));
            }
            warn!(subscription_id = %snapshot.id, %action, "version conflict, retrying");
            snapshot = self
                .subscription_repo
                .find_by_id(snapshot.id)
                .await
                .map_err(SubscriptionError::Internal)?
                .ok_or_else(|| {
                    SubscriptionError::Internal(anyhow!("subscription vanished mid-update"))
                })?;
        }
        Err(SubscriptionError::Internal(anyhow!(
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
    use crate::providers::MockProviderGateway;

    fn subscription(status: SubscriptionStatus, provider: &str) -> SubscriptionEntity {
        let now = Utc::now();
        SubscriptionEntity {
            id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            plan_code: "BASIC".to_string(),
            billing_cycle: "MONTHLY".to_string(),
            status: status.as_str().to_string(),
            provider: provider.to_string(),
            external_subscription_id: (provider != "NONE").then(|| "sub_123".to_string()),
            external_customer_id: None,
            currency: "USD".to_string(),
            current_period_start: Some(now - Duration::days(15)),
            current_period_end: Some(now + Duration::days(15)),
            trial_ends_at: None,
            grace_period_ends_at: None,
            cancel_at_period_end: false,
            auto_renewing: true,
            failed_payment_count: 0,
            pending_proration_minor: 0,
            checkout_url: None,
            version: 2,
            created_at: now,
            updated_at: now,
        }
    }

    fn plan(code: &str, monthly_price_minor: i64) -> PlanEntity {
        PlanEntity {
            id: Uuid::new_v4(),
            plan_code: code.to_string(),
            display_name: code.to_string(),
            monthly_price_minor,
            currency: "USD".to_string(),
            annual_discount_percent: 20,
            trial_days: 14,
            google_product_id: None,
            apple_product_id: None,
            stripe_monthly_price_id: Some("price_m".to_string()),
            stripe_annual_price_id: Some("price_y".to_string()),
            razorpay_monthly_plan_id: None,
            razorpay_annual_plan_id: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn registry(provider: PaymentProvider, mut gateway: MockProviderGateway) -> Arc<ProviderRegistry> {
        gateway.expect_provider().return_const(provider);
        Arc::new(ProviderRegistry::new().register(Arc::new(gateway)))
    }

    #[tokio::test]
    async fn cancel_on_a_store_rail_returns_managed_by_store() {
        let sub = subscription(SubscriptionStatus::Active, "GOOGLE_PLAY");
        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_current_by_workspace()
            .returning(move |_| Ok(Some(sub.clone())));

        let mut gateway = MockProviderGateway::new();
        gateway
            .expect_cancel_subscription()
            .returning(|_, _| Ok(ProviderOp::Unsupported));

        let usecase = SubscriptionUseCase::new(
            Arc::new(subscription_repo),
            Arc::new(MockPlanRepository::new()),
            registry(PaymentProvider::GooglePlay, gateway),
            BillingPolicy::default(),
        );

        let err = usecase
            .cancel(Uuid::new_v4(), CancelSubscriptionRequest { immediate: false })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SubscriptionError::ManagedByStore(PaymentProvider::GooglePlay)
        ));
    }

    #[tokio::test]
    async fn deferred_cancel_flags_the_row_after_the_provider_accepts() {
        let sub = subscription(SubscriptionStatus::Active, "STRIPE");
        let sub_id = sub.id;
        let cancelled = {
            let mut s = sub.clone();
            s.cancel_at_period_end = true;
            s.auto_renewing = false;
            s.version = 3;
            s
        };

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_current_by_workspace()
            .returning(move |_| Ok(Some(sub.clone())));
        subscription_repo
            .expect_update_guarded()
            .withf(move |id, expected_version, changes| {
                *id == sub_id
                    && *expected_version == 2
                    && changes.cancel_at_period_end
                    && !changes.auto_renewing
                    && changes.status == SubscriptionStatus::Active
            })
            .returning(|_, _, _| Ok(true));
        subscription_repo
            .expect_find_by_id()
            .returning(move |_| Ok(Some(cancelled.clone())));

        let mut gateway = MockProviderGateway::new();
        gateway
            .expect_cancel_subscription()
            .withf(|external_id, immediate| external_id == "sub_123" && !immediate)
            .returning(|_, _| Ok(ProviderOp::Supported(())));

        let usecase = SubscriptionUseCase::new(
            Arc::new(subscription_repo),
            Arc::new(MockPlanRepository::new()),
            registry(PaymentProvider::Stripe, gateway),
            BillingPolicy::default(),
        );

        let dto = usecase
            .cancel(Uuid::new_v4(), CancelSubscriptionRequest { immediate: false })
            .await
            .unwrap();
        assert!(dto.cancel_at_period_end);
        assert_eq!(dto.status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn resume_requires_a_paused_subscription() {
        let sub = subscription(SubscriptionStatus::Active, "STRIPE");
        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_current_by_workspace()
            .returning(move |_| Ok(Some(sub.clone())));

        let mut gateway = MockProviderGateway::new();
        gateway
            .expect_resume_subscription()
            .returning(|_| Ok(ProviderOp::Supported(())));

        let usecase = SubscriptionUseCase::new(
            Arc::new(subscription_repo),
            Arc::new(MockPlanRepository::new()),
            registry(PaymentProvider::Stripe, gateway),
            BillingPolicy::default(),
        );

        let err = usecase.resume(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(
            err,
            SubscriptionError::InvalidState {
                action: "resume",
                status: SubscriptionStatus::Active
            }
        ));
    }

    #[tokio::test]
    async fn immediate_plan_change_accrues_proration() {
        let sub = subscription(SubscriptionStatus::Active, "STRIPE");
        let sub_id = sub.id;
        let switched = {
            let mut s = sub.clone();
            s.plan_code = "PRO".to_string();
            s.version = 3;
            s
        };

        let mut plan_repo = MockPlanRepository::new();
        plan_repo.expect_find_by_code().returning(|code| {
            Ok(Some(match code {
                "PRO" => plan("PRO", 3000),
                _ => plan("BASIC", 1000),
            }))
        });

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_current_by_workspace()
            .returning(move |_| Ok(Some(sub.clone())));
        subscription_repo
            .expect_update_guarded()
            .withf(move |id, _, changes| {
                // 15 of 30 days left, 3000 - 1000 difference: owes 1000 (give
                // or take a day of clock drift in the test).
                *id == sub_id
                    && changes.plan_code == "PRO"
                    && (900..=1000).contains(&changes.pending_proration_minor)
            })
            .returning(|_, _, _| Ok(true));
        subscription_repo
            .expect_find_by_id()
            .returning(move |_| Ok(Some(switched.clone())));

        let mut gateway = MockProviderGateway::new();
        gateway
            .expect_change_plan()
            .withf(|external_id, plan, cycle, immediate| {
                external_id == "sub_123"
                    && plan.plan_code == "PRO"
                    && *cycle == BillingCycle::Monthly
                    && *immediate
            })
            .returning(|_, _, _, _| Ok(ProviderOp::Supported(())));

        let usecase = SubscriptionUseCase::new(
            Arc::new(subscription_repo),
            Arc::new(plan_repo),
            registry(PaymentProvider::Stripe, gateway),
            BillingPolicy::default(),
        );

        let dto = usecase
            .change_plan(
                Uuid::new_v4(),
                ChangePlanRequest {
                    plan_code: "PRO".to_string(),
                    billing_cycle: BillingCycle::Monthly,
                    immediate: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(dto.plan_code, "PRO");
    }

    #[tokio::test]
    async fn deferred_plan_change_leaves_the_row_alone() {
        let sub = subscription(SubscriptionStatus::Active, "STRIPE");
        let mut plan_repo = MockPlanRepository::new();
        plan_repo.expect_find_by_code().returning(|code| {
            Ok(Some(match code {
                "PRO" => plan("PRO", 3000),
                _ => plan("BASIC", 1000),
            }))
        });
        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_current_by_workspace()
            .returning(move |_| Ok(Some(sub.clone())));

        let mut gateway = MockProviderGateway::new();
        gateway
            .expect_change_plan()
            .returning(|_, _, _, _| Ok(ProviderOp::Supported(())));

        let usecase = SubscriptionUseCase::new(
            Arc::new(subscription_repo),
            Arc::new(plan_repo),
            registry(PaymentProvider::Stripe, gateway),
            BillingPolicy::default(),
        );

        let dto = usecase
            .change_plan(
                Uuid::new_v4(),
                ChangePlanRequest {
                    plan_code: "PRO".to_string(),
                    billing_cycle: BillingCycle::Monthly,
                    immediate: false,
                },
            )
            .await
            .unwrap();
        // Still the old plan locally; the renewal webhook flips it.
        assert_eq!(dto.plan_code, "BASIC");
    }

    #[tokio::test]
    async fn sync_rolls_the_period_forward_after_a_missed_renewal() {
        use crate::domain::value_objects::purchases::ProviderSubscriptionStatus;

        let sub = subscription(SubscriptionStatus::PastDue, "STRIPE");
        let sub_id = sub.id;
        let local_period_end = sub.current_period_end.unwrap();
        let provider_period_end = local_period_end + Duration::days(30);
        let renewed = {
            let mut s = sub.clone();
            s.status = "ACTIVE".to_string();
            s.current_period_end = Some(provider_period_end);
            s.version = 3;
            s
        };

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_current_by_workspace()
            .returning(move |_| Ok(Some(sub.clone())));
        subscription_repo
            .expect_update_guarded()
            .withf(move |id, expected_version, changes| {
                *id == sub_id
                    && *expected_version == 2
                    && changes.status == SubscriptionStatus::Active
                    && changes.current_period_end == Some(provider_period_end)
                    && changes.failed_payment_count == 0
            })
            .returning(|_, _, _| Ok(true));
        subscription_repo
            .expect_find_by_id()
            .returning(move |_| Ok(Some(renewed.clone())));

        let mut gateway = MockProviderGateway::new();
        gateway
            .expect_get_subscription_status()
            .withf(|external_id| external_id == "sub_123")
            .returning(move |_| {
                Ok(ProviderOp::Supported(ProviderSubscriptionStatus {
                    active: true,
                    auto_renewing: true,
                    current_period_end: Some(provider_period_end),
                }))
            });

        let usecase = SubscriptionUseCase::new(
            Arc::new(subscription_repo),
            Arc::new(MockPlanRepository::new()),
            registry(PaymentProvider::Stripe, gateway),
            BillingPolicy::default(),
        );

        let dto = usecase.sync(Uuid::new_v4()).await.unwrap();
        assert_eq!(dto.status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn sync_cancels_locally_when_the_provider_reports_inactive() {
        use crate::domain::value_objects::purchases::ProviderSubscriptionStatus;

        let sub = subscription(SubscriptionStatus::Active, "STRIPE");
        let cancelled = {
            let mut s = sub.clone();
            s.status = "CANCELLED".to_string();
            s.version = 3;
            s
        };

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_current_by_workspace()
            .returning(move |_| Ok(Some(sub.clone())));
        subscription_repo
            .expect_update_guarded()
            .withf(|_, _, changes| changes.status == SubscriptionStatus::Cancelled)
            .returning(|_, _, _| Ok(true));
        subscription_repo
            .expect_find_by_id()
            .returning(move |_| Ok(Some(cancelled.clone())));

        let mut gateway = MockProviderGateway::new();
        gateway.expect_get_subscription_status().returning(|_| {
            Ok(ProviderOp::Supported(ProviderSubscriptionStatus {
                active: false,
                auto_renewing: false,
                current_period_end: None,
            }))
        });

        let usecase = SubscriptionUseCase::new(
            Arc::new(subscription_repo),
            Arc::new(MockPlanRepository::new()),
            registry(PaymentProvider::Stripe, gateway),
            BillingPolicy::default(),
        );

        let dto = usecase.sync(Uuid::new_v4()).await.unwrap();
        assert_eq!(dto.status, SubscriptionStatus::Cancelled);
    }

    #[tokio::test]
    async fn trial_is_granted_once() {
        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_has_used_trial()
            .returning(|_| Ok(true));

        let usecase = SubscriptionUseCase::new(
            Arc::new(subscription_repo),
            Arc::new(MockPlanRepository::new()),
            Arc::new(ProviderRegistry::new()),
            BillingPolicy::default(),
        );

        let err = usecase
            .start_trial(
                Uuid::new_v4(),
                StartTrialRequest {
                    plan_code: "PRO".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SubscriptionError::TrialAlreadyUsed));
    }

    #[tokio::test]
    async fn trial_creates_a_trialing_row_without_a_provider() {
        let workspace_id = Uuid::new_v4();
        let mut plan_repo = MockPlanRepository::new();
        plan_repo
            .expect_find_by_code()
            .returning(|_| Ok(Some(plan("PRO", 2900))));

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_has_used_trial()
            .returning(|_| Ok(false));
        subscription_repo
            .expect_find_current_by_workspace()
            .returning(|_| Ok(None));
        subscription_repo
            .expect_create()
            .withf(|entity| {
                entity.status == "TRIALING"
                    && entity.provider == "NONE"
                    && entity.trial_ends_at.is_some()
                    && !entity.auto_renewing
            })
            .returning(|entity| Ok(entity.id));
        subscription_repo.expect_find_by_id().returning(move |id| {
            let mut s = subscription(SubscriptionStatus::Trialing, "NONE");
            s.id = id;
            s.workspace_id = workspace_id;
            Ok(Some(s))
        });

        let usecase = SubscriptionUseCase::new(
            Arc::new(subscription_repo),
            Arc::new(plan_repo),
            Arc::new(ProviderRegistry::new()),
            BillingPolicy::default(),
        );

        let dto = usecase
            .start_trial(
                workspace_id,
                StartTrialRequest {
                    plan_code: "PRO".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(dto.status, SubscriptionStatus::Trialing);
    }
}
