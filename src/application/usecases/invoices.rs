use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Duration, TimeZone, Utc};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    domain::{
        entities::{invoices::InsertInvoiceEntity, subscriptions::SubscriptionEntity},
        lifecycle::{BillingPolicy, SubscriptionChanges},
        repositories::{
            invoices::InvoiceRepository, payment_methods::PaymentMethodRepository,
            plans::PlanRepository, subscriptions::SubscriptionRepository,
        },
        value_objects::{
            enums::{
                billing_cycles::BillingCycle, invoice_statuses::InvoiceStatus,
                payment_providers::PaymentProvider, subscription_statuses::SubscriptionStatus,
            },
            invoices::{GenerateInvoiceRequest, InvoiceDto, InvoicePaymentDto, InvoicePaymentOutcome},
        },
    },
    providers::{ProviderOp, ProviderRegistry},
};

const VERSION_RETRY_LIMIT: u32 = 3;

#[derive(Debug, Error)]
pub enum InvoiceError {
    #[error("invoice not found")]
    NotFound,
    #[error("no current subscription for this workspace")]
    NoCurrentSubscription,
    #[error("invalid billing period {year}-{month}")]
    InvalidPeriod { year: i32, month: u32 },
    #[error("invoice is not payable in status {0}")]
    NotPayable(InvoiceStatus),
    #[error("no payment rail available for this invoice")]
    NoPaymentRail,
    #[error("payment provider is unavailable")]
    ProviderUnavailable,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl InvoiceError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            InvoiceError::NotFound | InvoiceError::NoCurrentSubscription => StatusCode::NOT_FOUND,
            InvoiceError::InvalidPeriod { .. } => StatusCode::BAD_REQUEST,
            InvoiceError::NotPayable(_) => StatusCode::CONFLICT,
            InvoiceError::NoPaymentRail => StatusCode::UNPROCESSABLE_ENTITY,
            InvoiceError::ProviderUnavailable => StatusCode::BAD_GATEWAY,
            InvoiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type UseCaseResult<T> = std::result::Result<T, InvoiceError>;

/// Postpaid invoice engine: monthly generation with proration carry-over,
/// auto-charge against the stored method with a hosted-link fallback, and the
/// overdue sweep.
pub struct InvoiceUseCase<I, S, P, M>
where
    I: InvoiceRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    P: PlanRepository + Send + Sync + 'static,
    M: PaymentMethodRepository + Send + Sync + 'static,
{
    invoice_repo: Arc<I>,
    subscription_repo: Arc<S>,
    plan_repo: Arc<P>,
    payment_method_repo: Arc<M>,
    registry: Arc<ProviderRegistry>,
    policy: BillingPolicy,
}

impl<I, S, P, M> InvoiceUseCase<I, S, P, M>
where
    I: InvoiceRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    P: PlanRepository + Send + Sync + 'static,
    M: PaymentMethodRepository + Send + Sync + 'static,
{
    pub fn new(
        invoice_repo: Arc<I>,
        subscription_repo: Arc<S>,
        plan_repo: Arc<P>,
        payment_method_repo: Arc<M>,
        registry: Arc<ProviderRegistry>,
        policy: BillingPolicy,
    ) -> Self {
        Self {
            invoice_repo,
            subscription_repo,
            plan_repo,
            payment_method_repo,
            registry,
            policy,
        }
    }

    pub async fn list(&self, workspace_id: Uuid) -> UseCaseResult<Vec<InvoiceDto>> {
        let invoices = self
            .invoice_repo
            .list_by_workspace(workspace_id)
            .await
            .map_err(InvoiceError::Internal)?;
        Ok(invoices.into_iter().map(InvoiceDto::from).collect())
    }

    pub async fn get(&self, workspace_id: Uuid, invoice_id: Uuid) -> UseCaseResult<InvoiceDto> {
        let invoice = self
            .invoice_repo
            .find_by_id(workspace_id, invoice_id)
            .await
            .map_err(InvoiceError::Internal)?
            .ok_or(InvoiceError::NotFound)?;
        Ok(InvoiceDto::from(invoice))
    }

    /// Generates the workspace's invoice for one billing period: the calendar
    /// month for monthly subscriptions, the subscription's own period for
    /// annual ones. Idempotent: a second call for the same period returns the
    /// existing invoice.
    pub async fn generate(
        &self,
        workspace_id: Uuid,
        request: GenerateInvoiceRequest,
    ) -> UseCaseResult<InvoiceDto> {
        let (month_start, month_end) = billing_period(request.year, request.month)
            .ok_or(InvoiceError::InvalidPeriod {
                year: request.year,
                month: request.month,
            })?;

        let subscription = self
            .subscription_repo
            .find_current_by_workspace(workspace_id)
            .await
            .map_err(InvoiceError::Internal)?
            .ok_or(InvoiceError::NoCurrentSubscription)?;
        let cycle = subscription.billing_cycle_enum();
        let (period_start, period_end) = match cycle {
            BillingCycle::Monthly => (month_start, month_end),
            // An annual row is billed once per subscription period, not per
            // calendar month.
            BillingCycle::Annual => subscription
                .current_period_start
                .zip(subscription.current_period_end)
                .ok_or_else(|| anyhow!("annual subscription has no current period"))?,
        };

        if let Some(existing) = self
            .invoice_repo
            .find_by_period(workspace_id, period_start)
            .await
            .map_err(InvoiceError::Internal)?
        {
            info!(%workspace_id, invoice_id = %existing.id, "invoice already generated for period");
            return Ok(InvoiceDto::from(existing));
        }

        let plan = self
            .plan_repo
            .find_by_code(&subscription.plan_code)
            .await
            .map_err(InvoiceError::Internal)?
            .ok_or_else(|| anyhow!("plan {} missing for subscription", subscription.plan_code))?;

        // Plan changes accrue their proration on the subscription; this
        // invoice carries it, and the row is cleared only once the invoice
        // exists so a failed insert cannot lose the adjustment.
        let proration = subscription.pending_proration_minor;
        let total_minor = (plan.cycle_price_minor(cycle) + proration).max(0);

        let sequence = self
            .invoice_repo
            .next_sequence(request.year, request.month)
            .await
            .map_err(InvoiceError::Internal)?;
        let invoice_number = format!(
            "INV-{:04}-{:02}-{:06}",
            request.year, request.month, sequence
        );

        let default_method = self
            .payment_method_repo
            .find_default(workspace_id)
            .await
            .map_err(InvoiceError::Internal)?;
        let invoice = self
            .invoice_repo
            .create(InsertInvoiceEntity {
                id: Uuid::new_v4(),
                workspace_id,
                subscription_id: Some(subscription.id),
                invoice_number,
                period_start,
                period_end,
                total_minor,
                paid_minor: 0,
                currency: subscription.currency.clone(),
                status: InvoiceStatus::Pending.to_string(),
                due_at: period_end + Duration::days(self.policy.grace_period_days),
                auto_payment_enabled: default_method.is_some(),
                payment_method_id: default_method.map(|method| method.id),
            })
            .await
            .map_err(InvoiceError::Internal)?;

        self.consume_proration(&subscription, proration).await?;

        info!(%workspace_id, invoice_id = %invoice.id, invoice_number = %invoice.invoice_number,
            total_minor, "invoice generated");
        Ok(InvoiceDto::from(invoice))
    }

    /// Tries to settle an open invoice: charge the stored default method
    /// first, and fall back to issuing a hosted payment link when the charge
    /// fails or no method is stored. Both paths are successful outcomes.
    pub async fn attempt_payment(
        &self,
        workspace_id: Uuid,
        invoice_id: Uuid,
    ) -> UseCaseResult<InvoicePaymentDto> {
        let invoice = self
            .invoice_repo
            .find_by_id(workspace_id, invoice_id)
            .await
            .map_err(InvoiceError::Internal)?
            .ok_or(InvoiceError::NotFound)?;
        let status = invoice.status_enum();
        if !status.is_payable() {
            return Err(InvoiceError::NotPayable(status));
        }
        let outstanding = invoice.outstanding_minor();
        if outstanding == 0 {
            return Err(InvoiceError::NotPayable(status));
        }
        info!(%workspace_id, %invoice_id, outstanding, "attempting invoice payment");

        if let Some(method) = self
            .payment_method_repo
            .find_default(workspace_id)
            .await
            .map_err(InvoiceError::Internal)?
        {
            if let Some(gateway) = PaymentProvider::try_from_str(&method.provider)
                .and_then(|provider| self.registry.get(provider))
            {
                match gateway
                    .charge_payment_method(&method, outstanding, &invoice.currency)
                    .await
                {
                    Ok(ProviderOp::Supported(result)) if result.succeeded => {
                        let updated = self
                            .invoice_repo
                            .record_payment(invoice.id, outstanding, Utc::now())
                            .await
                            .map_err(InvoiceError::Internal)?;
                        info!(%invoice_id, external_payment_id = ?result.external_payment_id,
                            "invoice charged");
                        if updated.status_enum() == InvoiceStatus::Paid {
                            self.restore_if_past_due(invoice.subscription_id).await?;
                        }
                        return Ok(InvoicePaymentDto::from_outcome(
                            invoice.id,
                            InvoicePaymentOutcome::Charged,
                        ));
                    }
                    Ok(ProviderOp::Supported(result)) => {
                        warn!(%invoice_id, failure = ?result.failure_message,
                            "charge declined, falling back to payment link");
                    }
                    Ok(ProviderOp::Unsupported) => {
                        info!(%invoice_id, provider = %method.provider,
                            "rail cannot charge stored methods, falling back to payment link");
                    }
                    Err(err) => {
                        error!(%invoice_id, provider_error = ?err,
                            "charge attempt failed, falling back to payment link");
                    }
                }
            }
        }

        let url = self.issue_payment_link(&invoice).await?;
        Ok(InvoicePaymentDto::from_outcome(
            invoice.id,
            InvoicePaymentOutcome::LinkIssued(url),
        ))
    }

    /// Flips payable invoices past their due date to OVERDUE. Runs from the
    /// periodic sweep task.
    pub async fn mark_overdue(&self) -> UseCaseResult<usize> {
        let flipped = self
            .invoice_repo
            .mark_overdue(Utc::now())
            .await
            .map_err(InvoiceError::Internal)?;
        if flipped > 0 {
            info!(flipped, "invoices marked overdue");
        }
        Ok(flipped)
    }

    async fn issue_payment_link(
        &self,
        invoice: &crate::domain::entities::invoices::InvoiceEntity,
    ) -> UseCaseResult<String> {
        let gateway = match self.link_gateway(invoice).await? {
            Some(gateway) => gateway,
            None => return Err(InvoiceError::NoPaymentRail),
        };
        match gateway.create_payment_link(invoice).await {
            Ok(ProviderOp::Supported(url)) => {
                self.invoice_repo
                    .set_payment_link(invoice.id, &url)
                    .await
                    .map_err(InvoiceError::Internal)?;
                info!(invoice_id = %invoice.id, "payment link issued");
                Ok(url)
            }
            Ok(ProviderOp::Unsupported) => Err(InvoiceError::NoPaymentRail),
            Err(err) => {
                error!(invoice_id = %invoice.id, provider_error = ?err,
                    "payment link creation failed");
                Err(InvoiceError::ProviderUnavailable)
            }
        }
    }

    /// The rail that hosts the payment link: the subscription's own when it
    /// is a server rail, otherwise whichever hosted-checkout rail is
    /// configured.
    async fn link_gateway(
        &self,
        invoice: &crate::domain::entities::invoices::InvoiceEntity,
    ) -> UseCaseResult<Option<Arc<dyn crate::providers::ProviderGateway>>> {
        if let Some(subscription_id) = invoice.subscription_id {
            if let Some(subscription) = self
                .subscription_repo
                .find_by_id(subscription_id)
                .await
                .map_err(InvoiceError::Internal)?
            {
                if let Some(provider) = subscription.provider_enum() {
                    if !provider.is_client_initiated() {
                        if let Some(gateway) = self.registry.get(provider) {
                            return Ok(Some(gateway));
                        }
                    }
                }
            }
        }
        Ok(self
            .registry
            .get(PaymentProvider::Stripe)
            .or_else(|| self.registry.get(PaymentProvider::Razorpay)))
    }

    /// A fully paid invoice recovers a PAST_DUE subscription: back to ACTIVE
    /// with the failure counters cleared, under the version guard.
    async fn restore_if_past_due(&self, subscription_id: Option<Uuid>) -> UseCaseResult<()> {
        let Some(subscription_id) = subscription_id else {
            return Ok(());
        };
        for _ in 0..VERSION_RETRY_LIMIT {
            let Some(subscription) = self
                .subscription_repo
                .find_by_id(subscription_id)
                .await
                .map_err(InvoiceError::Internal)?
            else {
                return Ok(());
            };
            if subscription.status_enum() != SubscriptionStatus::PastDue {
                return Ok(());
            }
            let mut changes = SubscriptionChanges::carry(&subscription);
            changes.status = SubscriptionStatus::Active;
            changes.failed_payment_count = 0;
            changes.grace_period_ends_at = None;
            let updated = self
                .subscription_repo
                .update_guarded(subscription.id, subscription.version, changes)
                .await
                .map_err(InvoiceError::Internal)?;
            if updated {
                info!(%subscription_id, "subscription restored after invoice payment");
                return Ok(());
            }
            warn!(%subscription_id, "version conflict restoring subscription, retrying");
        }
        Err(InvoiceError::Internal(anyhow!(
            "gave up after {VERSION_RETRY_LIMIT} version conflicts"
        )))
    }

    /// Subtracts the billed proration from the subscription row so no later
    /// invoice double-bills it. Runs after the invoice insert; a concurrent
    /// plan change that accrued more in the meantime keeps its remainder.
    async fn consume_proration(
        &self,
        subscription: &SubscriptionEntity,
        amount: i64,
    ) -> UseCaseResult<()> {
        if amount == 0 {
            return Ok(());
        }
        let mut snapshot = subscription.clone();
        for _ in 0..VERSION_RETRY_LIMIT {
            let mut changes = SubscriptionChanges::carry(&snapshot);
            changes.pending_proration_minor = snapshot.pending_proration_minor - amount;
            let updated = self
                .subscription_repo
                .update_guarded(snapshot.id, snapshot.version, changes)
                .await
                .map_err(InvoiceError::Internal)?;
            if updated {
                return Ok(());
            }
            warn!(subscription_id = %snapshot.id, "version conflict consuming proration, retrying");
            snapshot = self
                .subscription_repo
                .find_by_id(snapshot.id)
                .await
                .map_err(InvoiceError::Internal)?
                .ok_or_else(|| anyhow!("subscription vanished mid-update"))?;
        }
        Err(InvoiceError::Internal(anyhow!(
            "gave up after {VERSION_RETRY_LIMIT} version conflicts"
        )))
    }
}

/// Calendar-month billing period, UTC midnight to UTC midnight.
fn billing_period(year: i32, month: u32) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()?;
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    let end = Utc.with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0).single()?;
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::invoices::InvoiceEntity;
    use crate::domain::entities::payment_methods::PaymentMethodEntity;
    use crate::domain::entities::plans::PlanEntity;
    use crate::domain::repositories::invoices::MockInvoiceRepository;
    use crate::domain::repositories::payment_methods::MockPaymentMethodRepository;
    use crate::domain::repositories::plans::MockPlanRepository;
    use crate::domain::repositories::subscriptions::MockSubscriptionRepository;
    use crate::domain::value_objects::purchases::ChargeResult;
    use crate::providers::MockProviderGateway;

    fn subscription(pending_proration_minor: i64) -> SubscriptionEntity {
        let now = Utc::now();
        SubscriptionEntity {
            id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            plan_code: "PRO".to_string(),
            billing_cycle: "MONTHLY".to_string(),
            status: "ACTIVE".to_string(),
            provider: "STRIPE".to_string(),
            external_subscription_id: Some("sub_123".to_string()),
            external_customer_id: Some("cus_123".to_string()),
            currency: "USD".to_string(),
            current_period_start: Some(now - Duration::days(10)),
            current_period_end: Some(now + Duration::days(20)),
            trial_ends_at: None,
            grace_period_ends_at: None,
            cancel_at_period_end: false,
            auto_renewing: true,
            failed_payment_count: 0,
            pending_proration_minor,
            checkout_url: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    fn plan() -> PlanEntity {
        PlanEntity {
            id: Uuid::new_v4(),
            plan_code: "PRO".to_string(),
            display_name: "Pro".to_string(),
            monthly_price_minor: 2900,
            currency: "USD".to_string(),
            annual_discount_percent: 20,
            trial_days: 14,
            google_product_id: None,
            apple_product_id: None,
            stripe_monthly_price_id: Some("price_m".to_string()),
            stripe_annual_price_id: None,
            razorpay_monthly_plan_id: None,
            razorpay_annual_plan_id: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn invoice(workspace_id: Uuid, subscription_id: Uuid, status: &str) -> InvoiceEntity {
        let now = Utc::now();
        InvoiceEntity {
            id: Uuid::new_v4(),
            workspace_id,
            subscription_id: Some(subscription_id),
            invoice_number: "INV-2026-08-000001".to_string(),
            period_start: now - Duration::days(30),
            period_end: now,
            total_minor: 2900,
            paid_minor: 0,
            currency: "USD".to_string(),
            status: status.to_string(),
            due_at: now + Duration::days(7),
            auto_payment_enabled: true,
            payment_method_id: Some(Uuid::new_v4()),
            payment_link_url: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn method(workspace_id: Uuid) -> PaymentMethodEntity {
        PaymentMethodEntity {
            id: Uuid::new_v4(),
            workspace_id,
            provider: "STRIPE".to_string(),
            provider_ref: "pm_123".to_string(),
            method_type: "card".to_string(),
            is_default: true,
            created_at: Utc::now(),
        }
    }

    fn registry(mut gateway: MockProviderGateway) -> Arc<ProviderRegistry> {
        gateway
            .expect_provider()
            .return_const(PaymentProvider::Stripe);
        Arc::new(ProviderRegistry::new().register(Arc::new(gateway)))
    }

    #[test]
    fn billing_period_covers_the_calendar_month() {
        let (start, end) = billing_period(2026, 8).unwrap();
        assert_eq!(start.to_rfc3339(), "2026-08-01T00:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2026-09-01T00:00:00+00:00");

        let (start, end) = billing_period(2026, 12).unwrap();
        assert_eq!(start.to_rfc3339(), "2026-12-01T00:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2027-01-01T00:00:00+00:00");

        assert!(billing_period(2026, 13).is_none());
    }

    #[tokio::test]
    async fn generate_consumes_pending_proration_into_the_total() {
        let sub = subscription(1000);
        let workspace_id = sub.workspace_id;
        let sub_id = sub.id;

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_current_by_workspace()
            .returning(move |_| Ok(Some(sub.clone())));
        subscription_repo
            .expect_update_guarded()
            .withf(move |id, _, changes| *id == sub_id && changes.pending_proration_minor == 0)
            .returning(|_, _, _| Ok(true));

        let mut plan_repo = MockPlanRepository::new();
        plan_repo.expect_find_by_code().returning(|_| Ok(Some(plan())));

        let mut payment_method_repo = MockPaymentMethodRepository::new();
        payment_method_repo
            .expect_find_default()
            .returning(|workspace_id| Ok(Some(method(workspace_id))));

        let mut invoice_repo = MockInvoiceRepository::new();
        invoice_repo.expect_find_by_period().returning(|_, _| Ok(None));
        invoice_repo.expect_next_sequence().returning(|_, _| Ok(7));
        invoice_repo
            .expect_create()
            .withf(|insert| {
                insert.total_minor == 3900
                    && insert.invoice_number == "INV-2026-08-000007"
                    && insert.auto_payment_enabled
            })
            .returning(|insert| {
                let now = Utc::now();
                Ok(InvoiceEntity {
                    id: insert.id,
                    workspace_id: insert.workspace_id,
                    subscription_id: insert.subscription_id,
                    invoice_number: insert.invoice_number,
                    period_start: insert.period_start,
                    period_end: insert.period_end,
                    total_minor: insert.total_minor,
                    paid_minor: 0,
                    currency: insert.currency,
                    status: insert.status,
                    due_at: insert.due_at,
                    auto_payment_enabled: insert.auto_payment_enabled,
                    payment_method_id: insert.payment_method_id,
                    payment_link_url: None,
                    paid_at: None,
                    created_at: now,
                    updated_at: now,
                })
            });

        let usecase = InvoiceUseCase::new(
            Arc::new(invoice_repo),
            Arc::new(subscription_repo),
            Arc::new(plan_repo),
            Arc::new(payment_method_repo),
            Arc::new(ProviderRegistry::new()),
            BillingPolicy::default(),
        );

        let dto = usecase
            .generate(workspace_id, GenerateInvoiceRequest { year: 2026, month: 8 })
            .await
            .unwrap();
        assert_eq!(dto.total_minor, 3900);
        assert_eq!(dto.invoice_number, "INV-2026-08-000007");
    }

    #[tokio::test]
    async fn generate_is_idempotent_per_period() {
        let sub = subscription(0);
        let workspace_id = sub.workspace_id;
        let existing = invoice(workspace_id, sub.id, "PENDING");
        let existing_id = existing.id;

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_current_by_workspace()
            .returning(move |_| Ok(Some(sub.clone())));

        let mut invoice_repo = MockInvoiceRepository::new();
        invoice_repo
            .expect_find_by_period()
            .returning(move |_, _| Ok(Some(existing.clone())));
        invoice_repo.expect_create().times(0);

        let usecase = InvoiceUseCase::new(
            Arc::new(invoice_repo),
            Arc::new(subscription_repo),
            Arc::new(MockPlanRepository::new()),
            Arc::new(MockPaymentMethodRepository::new()),
            Arc::new(ProviderRegistry::new()),
            BillingPolicy::default(),
        );

        let dto = usecase
            .generate(workspace_id, GenerateInvoiceRequest { year: 2026, month: 8 })
            .await
            .unwrap();
        assert_eq!(dto.id, existing_id);
    }

    #[tokio::test]
    async fn annual_subscriptions_bill_the_discounted_annual_price_per_period() {
        let mut sub = subscription(0);
        sub.billing_cycle = "ANNUAL".to_string();
        let period_start = Utc.with_ymd_and_hms(2026, 8, 15, 0, 0, 0).unwrap();
        let period_end = Utc.with_ymd_and_hms(2027, 8, 15, 0, 0, 0).unwrap();
        sub.current_period_start = Some(period_start);
        sub.current_period_end = Some(period_end);
        let workspace_id = sub.workspace_id;

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_current_by_workspace()
            .returning(move |_| Ok(Some(sub.clone())));

        let mut plan_repo = MockPlanRepository::new();
        plan_repo.expect_find_by_code().returning(|_| Ok(Some(plan())));

        let mut payment_method_repo = MockPaymentMethodRepository::new();
        payment_method_repo.expect_find_default().returning(|_| Ok(None));

        let mut invoice_repo = MockInvoiceRepository::new();
        invoice_repo
            .expect_find_by_period()
            .withf(move |_, start| *start == period_start)
            .returning(|_, _| Ok(None));
        invoice_repo.expect_next_sequence().returning(|_, _| Ok(1));
        invoice_repo
            .expect_create()
            // 2900 * 12 with the 20% annual discount, not the monthly price,
            // and the subscription's own year as the billing period.
            .withf(move |insert| {
                insert.total_minor == 27840
                    && insert.period_start == period_start
                    && insert.period_end == period_end
            })
            .returning(|insert| {
                let now = Utc::now();
                Ok(InvoiceEntity {
                    id: insert.id,
                    workspace_id: insert.workspace_id,
                    subscription_id: insert.subscription_id,
                    invoice_number: insert.invoice_number,
                    period_start: insert.period_start,
                    period_end: insert.period_end,
                    total_minor: insert.total_minor,
                    paid_minor: 0,
                    currency: insert.currency,
                    status: insert.status,
                    due_at: insert.due_at,
                    auto_payment_enabled: insert.auto_payment_enabled,
                    payment_method_id: insert.payment_method_id,
                    payment_link_url: None,
                    paid_at: None,
                    created_at: now,
                    updated_at: now,
                })
            });

        let usecase = InvoiceUseCase::new(
            Arc::new(invoice_repo),
            Arc::new(subscription_repo),
            Arc::new(plan_repo),
            Arc::new(payment_method_repo),
            Arc::new(ProviderRegistry::new()),
            BillingPolicy::default(),
        );

        let dto = usecase
            .generate(workspace_id, GenerateInvoiceRequest { year: 2026, month: 8 })
            .await
            .unwrap();
        assert_eq!(dto.total_minor, 27840);
    }

    #[tokio::test]
    async fn failed_invoice_insert_leaves_the_pending_proration_untouched() {
        let sub = subscription(1000);
        let workspace_id = sub.workspace_id;

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_current_by_workspace()
            .returning(move |_| Ok(Some(sub.clone())));
        subscription_repo.expect_update_guarded().times(0);

        let mut plan_repo = MockPlanRepository::new();
        plan_repo.expect_find_by_code().returning(|_| Ok(Some(plan())));

        let mut payment_method_repo = MockPaymentMethodRepository::new();
        payment_method_repo.expect_find_default().returning(|_| Ok(None));

        let mut invoice_repo = MockInvoiceRepository::new();
        invoice_repo.expect_find_by_period().returning(|_, _| Ok(None));
        invoice_repo.expect_next_sequence().returning(|_, _| Ok(1));
        invoice_repo
            .expect_create()
            .returning(|_| Err(anyhow!("insert failed")));

        let usecase = InvoiceUseCase::new(
            Arc::new(invoice_repo),
            Arc::new(subscription_repo),
            Arc::new(plan_repo),
            Arc::new(payment_method_repo),
            Arc::new(ProviderRegistry::new()),
            BillingPolicy::default(),
        );

        let err = usecase
            .generate(workspace_id, GenerateInvoiceRequest { year: 2026, month: 8 })
            .await
            .unwrap_err();
        assert!(matches!(err, InvoiceError::Internal(_)));
    }

    #[tokio::test]
    async fn successful_charge_settles_the_invoice_and_restores_the_subscription() {
        let mut sub = subscription(0);
        sub.status = "PAST_DUE".to_string();
        sub.failed_payment_count = 1;
        let workspace_id = sub.workspace_id;
        let sub_id = sub.id;
        let inv = invoice(workspace_id, sub_id, "PENDING");
        let inv_id = inv.id;

        let mut invoice_repo = MockInvoiceRepository::new();
        {
            let inv = inv.clone();
            invoice_repo
                .expect_find_by_id()
                .returning(move |_, _| Ok(Some(inv.clone())));
        }
        invoice_repo
            .expect_record_payment()
            .withf(move |id, amount, _| *id == inv_id && *amount == 2900)
            .returning(move |_, _, paid_at| {
                let mut paid = inv.clone();
                paid.paid_minor = paid.total_minor;
                paid.status = "PAID".to_string();
                paid.paid_at = Some(paid_at);
                Ok(paid)
            });

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_by_id()
            .returning(move |_| Ok(Some(sub.clone())));
        subscription_repo
            .expect_update_guarded()
            .withf(move |id, _, changes| {
                *id == sub_id
                    && changes.status == SubscriptionStatus::Active
                    && changes.failed_payment_count == 0
            })
            .returning(|_, _, _| Ok(true));

        let mut payment_method_repo = MockPaymentMethodRepository::new();
        payment_method_repo
            .expect_find_default()
            .returning(|workspace_id| Ok(Some(method(workspace_id))));

        let mut gateway = MockProviderGateway::new();
        gateway
            .expect_charge_payment_method()
            .returning(|_, _, _| {
                Ok(ProviderOp::Supported(ChargeResult {
                    succeeded: true,
                    external_payment_id: Some("pi_1".to_string()),
                    failure_message: None,
                }))
            });

        let usecase = InvoiceUseCase::new(
            Arc::new(invoice_repo),
            Arc::new(subscription_repo),
            Arc::new(MockPlanRepository::new()),
            Arc::new(payment_method_repo),
            registry(gateway),
            BillingPolicy::default(),
        );

        let dto = usecase.attempt_payment(workspace_id, inv_id).await.unwrap();
        assert_eq!(dto.outcome, "CHARGED");
        assert!(dto.payment_link_url.is_none());
    }

    #[tokio::test]
    async fn declined_charge_falls_back_to_a_payment_link() {
        let sub = subscription(0);
        let workspace_id = sub.workspace_id;
        let inv = invoice(workspace_id, sub.id, "OVERDUE");
        let inv_id = inv.id;

        let mut invoice_repo = MockInvoiceRepository::new();
        invoice_repo
            .expect_find_by_id()
            .returning(move |_, _| Ok(Some(inv.clone())));
        invoice_repo
            .expect_set_payment_link()
            .withf(move |id, url| *id == inv_id && url == "https://pay.example/link")
            .returning(|_, _| Ok(()));

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_by_id()
            .returning(move |_| Ok(Some(sub.clone())));

        let mut payment_method_repo = MockPaymentMethodRepository::new();
        payment_method_repo
            .expect_find_default()
            .returning(|workspace_id| Ok(Some(method(workspace_id))));

        let mut gateway = MockProviderGateway::new();
        gateway
            .expect_charge_payment_method()
            .returning(|_, _, _| {
                Ok(ProviderOp::Supported(ChargeResult {
                    succeeded: false,
                    external_payment_id: None,
                    failure_message: Some("card_declined".to_string()),
                }))
            });
        gateway
            .expect_create_payment_link()
            .returning(|_| Ok(ProviderOp::Supported("https://pay.example/link".to_string())));

        let usecase = InvoiceUseCase::new(
            Arc::new(invoice_repo),
            Arc::new(subscription_repo),
            Arc::new(MockPlanRepository::new()),
            Arc::new(payment_method_repo),
            registry(gateway),
            BillingPolicy::default(),
        );

        let dto = usecase.attempt_payment(workspace_id, inv_id).await.unwrap();
        assert_eq!(dto.outcome, "LINK_ISSUED");
        assert_eq!(dto.payment_link_url.as_deref(), Some("https://pay.example/link"));
    }

    #[tokio::test]
    async fn paid_invoices_cannot_be_paid_again() {
        let workspace_id = Uuid::new_v4();
        let mut inv = invoice(workspace_id, Uuid::new_v4(), "PAID");
        inv.paid_minor = inv.total_minor;

        let mut invoice_repo = MockInvoiceRepository::new();
        invoice_repo
            .expect_find_by_id()
            .returning(move |_, _| Ok(Some(inv.clone())));

        let usecase = InvoiceUseCase::new(
            Arc::new(invoice_repo),
            Arc::new(MockSubscriptionRepository::new()),
            Arc::new(MockPlanRepository::new()),
            Arc::new(MockPaymentMethodRepository::new()),
            Arc::new(ProviderRegistry::new()),
            BillingPolicy::default(),
        );

        let err = usecase
            .attempt_payment(workspace_id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, InvoiceError::NotPayable(InvoiceStatus::Paid)));
    }
}
