use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::payment_methods::{InsertPaymentMethodEntity, PaymentMethodEntity};

#[automock]
#[async_trait]
pub trait PaymentMethodRepository {
    async fn find_default(&self, workspace_id: Uuid) -> Result<Option<PaymentMethodEntity>>;

    /// Saves a method and, when flagged default, clears the previous default
    /// so the workspace keeps exactly one.
    async fn save(&self, insert_entity: InsertPaymentMethodEntity) -> Result<Uuid>;
}
