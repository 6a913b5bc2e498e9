use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

use crate::domain::{
    entities::processed_webhook_events::InsertProcessedWebhookEventEntity,
    lifecycle::SubscriptionChanges,
};

/// Subscription write attached to a webhook event, executed in the same
/// database transaction as the dedup-log insert.
#[derive(Debug, Clone)]
pub struct SubscriptionMutation {
    pub subscription_id: Uuid,
    pub expected_version: i32,
    pub changes: SubscriptionChanges,
    /// Payment to credit against an open invoice, when the event carried one.
    pub invoice_payment: Option<InvoicePaymentDelta>,
}

#[derive(Debug, Clone)]
pub struct InvoicePaymentDelta {
    pub invoice_id: Uuid,
    pub amount_minor: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventApplyOutcome {
    Applied,
    /// The (provider, event_id) pair was already recorded; nothing written.
    Duplicate,
    /// The subscription row moved under us; the caller reloads and retries.
    VersionConflict,
}

#[automock]
#[async_trait]
pub trait WebhookEventRepository {
    async fn is_processed(&self, provider: &str, event_id: &str) -> Result<bool>;

    /// Inserts the dedup record and applies the subscription mutation
    /// atomically. A duplicate event id rolls back the mutation; a version
    /// conflict rolls back the dedup record.
    async fn record_and_apply(
        &self,
        record: InsertProcessedWebhookEventEntity,
        mutation: Option<SubscriptionMutation>,
    ) -> Result<EventApplyOutcome>;
}
