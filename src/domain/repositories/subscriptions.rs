use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

use crate::domain::{
    entities::subscriptions::{InsertSubscriptionEntity, SubscriptionEntity},
    lifecycle::SubscriptionChanges,
    value_objects::enums::payment_providers::PaymentProvider,
};

#[automock]
#[async_trait]
pub trait SubscriptionRepository {
    async fn create(&self, insert_entity: InsertSubscriptionEntity) -> Result<Uuid>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<SubscriptionEntity>>;

    /// The workspace's single non-terminal subscription, if any.
    async fn find_current_by_workspace(
        &self,
        workspace_id: Uuid,
    ) -> Result<Option<SubscriptionEntity>>;

    async fn find_by_external_id(
        &self,
        provider: PaymentProvider,
        external_subscription_id: &str,
    ) -> Result<Option<SubscriptionEntity>>;

    /// Compare-and-swap write: applies `changes` and bumps `version` only when
    /// the row still carries `expected_version`. Returns false on conflict.
    async fn update_guarded(
        &self,
        id: Uuid,
        expected_version: i32,
        changes: SubscriptionChanges,
    ) -> Result<bool>;

    /// Whether the workspace ever held a trialing subscription, terminal or
    /// not. Trials are granted once.
    async fn has_used_trial(&self, workspace_id: Uuid) -> Result<bool>;

    async fn set_external_refs(
        &self,
        id: Uuid,
        external_subscription_id: Option<String>,
        external_customer_id: Option<String>,
        checkout_url: Option<String>,
    ) -> Result<()>;
}
