use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::device_registrations::{
    DeviceRegistrationEntity, InsertDeviceRegistrationEntity,
};

#[automock]
#[async_trait]
pub trait DeviceRepository {
    async fn find(
        &self,
        workspace_id: Uuid,
        device_id: &str,
    ) -> Result<Option<DeviceRegistrationEntity>>;

    /// Insert-or-reactivate keyed on (workspace_id, device_id); re-registering
    /// an existing device refreshes its push token and expiry.
    async fn upsert(
        &self,
        insert_entity: InsertDeviceRegistrationEntity,
    ) -> Result<DeviceRegistrationEntity>;

    async fn touch_sync(
        &self,
        workspace_id: Uuid,
        device_id: &str,
        synced_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn extend_token(
        &self,
        workspace_id: Uuid,
        device_id: &str,
        token_expires_at: DateTime<Utc>,
    ) -> Result<()>;
}
