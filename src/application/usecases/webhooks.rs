use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    domain::{
        entities::{
            processed_webhook_events::InsertProcessedWebhookEventEntity,
            subscriptions::SubscriptionEntity,
        },
        lifecycle::{self, BillingPolicy},
        repositories::{
            invoices::InvoiceRepository,
            plans::PlanRepository,
            subscriptions::SubscriptionRepository,
            webhook_events::{
                EventApplyOutcome, InvoicePaymentDelta, SubscriptionMutation,
                WebhookEventRepository,
            },
        },
        value_objects::{
            enums::{billing_cycles::BillingCycle, payment_providers::PaymentProvider},
            webhook_events::{CanonicalEvent, NormalizedEvent, WebhookAck},
        },
    },
    providers::ProviderRegistry,
    webhooks,
};

const VERSION_RETRY_LIMIT: u32 = 3;

const OUTCOME_APPLIED: &str = "APPLIED";
const OUTCOME_IGNORED: &str = "IGNORED";
const OUTCOME_UNMATCHED: &str = "UNMATCHED";
const OUTCOME_REJECTED_TRANSITION: &str = "REJECTED_TRANSITION";

/// Webhook pipeline: verify the channel, normalize the payload, deduplicate,
/// then apply the canonical event to the matching subscription under the
/// version guard. Every failure past signature verification still answers 200
/// so providers do not retry what a retry cannot fix.
pub struct WebhookUseCase<S, W, I, P>
where
    S: SubscriptionRepository + Send + Sync + 'static,
    W: WebhookEventRepository + Send + Sync + 'static,
    I: InvoiceRepository + Send + Sync + 'static,
    P: PlanRepository + Send + Sync + 'static,
{
    subscription_repo: Arc<S>,
    webhook_event_repo: Arc<W>,
    invoice_repo: Arc<I>,
    plan_repo: Arc<P>,
    registry: Arc<ProviderRegistry>,
    policy: BillingPolicy,
}

impl<S, W, I, P> WebhookUseCase<S, W, I, P>
where
    S: SubscriptionRepository + Send + Sync + 'static,
    W: WebhookEventRepository + Send + Sync + 'static,
    I: InvoiceRepository + Send + Sync + 'static,
    P: PlanRepository + Send + Sync + 'static,
{
    pub fn new(
        subscription_repo: Arc<S>,
        webhook_event_repo: Arc<W>,
        invoice_repo: Arc<I>,
        plan_repo: Arc<P>,
        registry: Arc<ProviderRegistry>,
        policy: BillingPolicy,
    ) -> Self {
        Self {
            subscription_repo,
            webhook_event_repo,
            invoice_repo,
            plan_repo,
            registry,
            policy,
        }
    }

    pub async fn handle(
        &self,
        provider: PaymentProvider,
        payload: &[u8],
        signature_header: Option<&str>,
    ) -> WebhookAck {
        if provider.requires_webhook_signature() {
            let Some(gateway) = self.registry.get(provider) else {
                warn!(%provider, "webhook received for unconfigured provider");
                return WebhookAck::Rejected;
            };
            let signature = signature_header.unwrap_or_default();
            if !gateway.verify_webhook_signature(payload, signature) {
                warn!(%provider, "webhook signature verification failed");
                return WebhookAck::Rejected;
            }
        }

        let event = match webhooks::normalize(provider, payload) {
            Ok(event) => event,
            Err(err) => {
                // A payload we cannot parse will not parse on redelivery
                // either; acknowledge and keep the log line.
                error!(%provider, parse_error = ?err, "failed to normalize webhook payload");
                return WebhookAck::Ok;
            }
        };

        if let Err(err) = self.process(&event).await {
            error!(%provider, event_id = %event.event_id, apply_error = ?err,
                "webhook processing failed");
        }
        WebhookAck::Ok
    }

    async fn process(&self, event: &NormalizedEvent) -> Result<()> {
        let provider = event.provider.to_string();
        if self
            .webhook_event_repo
            .is_processed(&provider, &event.event_id)
            .await?
        {
            info!(%provider, event_id = %event.event_id, "duplicate webhook, already applied");
            return Ok(());
        }

        if event.canonical.is_none() && event.provider_price_ref.is_none() {
            self.record_only(event, OUTCOME_IGNORED).await?;
            return Ok(());
        }
        let Some(external_id) = event.external_subscription_id.as_deref() else {
            warn!(%provider, event_id = %event.event_id, "billing event without a subscription id");
            self.record_only(event, OUTCOME_UNMATCHED).await?;
            return Ok(());
        };

        let Some(subscription) = self
            .subscription_repo
            .find_by_external_id(event.provider, external_id)
            .await?
        else {
            warn!(%provider, external_subscription_id = %external_id,
                "webhook references an unknown subscription");
            self.record_only(event, OUTCOME_UNMATCHED).await?;
            return Ok(());
        };

        // Events without a direct translation may still encode a plan change
        // through the provider's price id.
        let mut event = event.clone();
        if event.canonical.is_none() {
            match self.plan_change_for(&event, &subscription).await? {
                Some(plan_change) => event.canonical = Some(plan_change),
                None => {
                    self.record_only(&event, OUTCOME_IGNORED).await?;
                    return Ok(());
                }
            }
        }
        let event = &event;

        let mut snapshot = subscription;
        for attempt in 0..VERSION_RETRY_LIMIT {
            let changes = match lifecycle::apply(&snapshot, event, &self.policy, Utc::now()) {
                Ok(changes) => changes,
                Err(transition_error) => {
                    warn!(%provider, event_id = %event.event_id, %transition_error,
                        "event rejected by the state machine");
                    self.record_only(event, OUTCOME_REJECTED_TRANSITION).await?;
                    return Ok(());
                }
            };

            let invoice_payment = self.invoice_payment_for(event, snapshot.id).await?;
            let outcome = self
                .webhook_event_repo
                .record_and_apply(
                    self.record(event, OUTCOME_APPLIED),
                    Some(SubscriptionMutation {
                        subscription_id: snapshot.id,
                        expected_version: snapshot.version,
                        changes,
                        invoice_payment,
                    }),
                )
                .await?;
            match outcome {
                EventApplyOutcome::Applied => {
                    info!(%provider, event_id = %event.event_id,
                        subscription_id = %snapshot.id,
                        canonical = event.canonical.as_ref().map(|c| c.as_str()).unwrap_or("-"),
                        "webhook applied");
                    return Ok(());
                }
                EventApplyOutcome::Duplicate => {
                    info!(%provider, event_id = %event.event_id, "lost dedup race, already applied");
                    return Ok(());
                }
                EventApplyOutcome::VersionConflict => {
                    warn!(%provider, subscription_id = %snapshot.id, attempt,
                        "version conflict applying webhook, reloading");
                    snapshot = self
                        .subscription_repo
                        .find_by_id(snapshot.id)
                        .await?
                        .ok_or_else(|| anyhow::anyhow!("subscription vanished mid-apply"))?;
                }
            }
        }
        anyhow::bail!("gave up after {VERSION_RETRY_LIMIT} version conflicts")
    }

    /// Maps a provider price id back through the plan catalog. Returns a plan
    /// change only when the resolved plan or cycle differs from what the
    /// subscription already has; an unknown or unchanged price is ignored.
    async fn plan_change_for(
        &self,
        event: &NormalizedEvent,
        subscription: &SubscriptionEntity,
    ) -> Result<Option<CanonicalEvent>> {
        let Some(price_ref) = event.provider_price_ref.as_deref() else {
            return Ok(None);
        };
        let plans = self.plan_repo.list_active().await?;
        for plan in &plans {
            for cycle in [BillingCycle::Monthly, BillingCycle::Annual] {
                if plan.provider_price_ref(event.provider, cycle) != Some(price_ref) {
                    continue;
                }
                if plan.plan_code == subscription.plan_code
                    && cycle == subscription.billing_cycle_enum()
                {
                    return Ok(None);
                }
                info!(provider = %event.provider, price_ref,
                    plan_code = %plan.plan_code, ?cycle, "price id resolved to a plan change");
                return Ok(Some(CanonicalEvent::PlanChanged {
                    plan_code: plan.plan_code.clone(),
                    billing_cycle: cycle,
                }));
            }
        }
        warn!(provider = %event.provider, price_ref, "price id matches no active plan");
        Ok(None)
    }

    /// Renewal events carrying an amount also settle the oldest open invoice
    /// for the subscription, inside the same transaction as the state change.
    async fn invoice_payment_for(
        &self,
        event: &NormalizedEvent,
        subscription_id: Uuid,
    ) -> Result<Option<InvoicePaymentDelta>> {
        if event.canonical != Some(CanonicalEvent::RenewalSucceeded) {
            return Ok(None);
        }
        let Some(amount_minor) = event.amount_minor.filter(|amount| *amount > 0) else {
            return Ok(None);
        };
        let open = self
            .invoice_repo
            .find_open_for_subscription(subscription_id)
            .await?;
        Ok(open.map(|invoice| InvoicePaymentDelta {
            invoice_id: invoice.id,
            amount_minor,
        }))
    }

    fn record(&self, event: &NormalizedEvent, outcome: &str) -> InsertProcessedWebhookEventEntity {
        InsertProcessedWebhookEventEntity {
            id: Uuid::new_v4(),
            provider: event.provider.to_string(),
            event_id: event.event_id.clone(),
            event_type: event.event_type.clone(),
            external_subscription_id: event.external_subscription_id.clone(),
            outcome: outcome.to_string(),
        }
    }

    async fn record_only(&self, event: &NormalizedEvent, outcome: &str) -> Result<()> {
        self.webhook_event_repo
            .record_and_apply(self.record(event, outcome), None)
            .await?;
        Ok(())
    }
}
