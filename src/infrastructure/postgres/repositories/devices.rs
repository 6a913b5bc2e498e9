use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{insert_into, prelude::*, update};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain::{
        entities::device_registrations::{
            DeviceRegistrationEntity, InsertDeviceRegistrationEntity,
        },
        repositories::devices::DeviceRepository,
    },
    infrastructure::postgres::{postgres_connection::PgPoolSquad, schema::device_registrations},
};

pub struct DevicePostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl DevicePostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl DeviceRepository for DevicePostgres {
    async fn find(
        &self,
        workspace_id: Uuid,
        device_id: &str,
    ) -> Result<Option<DeviceRegistrationEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = device_registrations::table
            .filter(device_registrations::workspace_id.eq(workspace_id))
            .filter(device_registrations::device_id.eq(device_id))
            .select(DeviceRegistrationEntity::as_select())
            .first::<DeviceRegistrationEntity>(&mut conn)
            .optional()?;

        Ok(result)
    }

    async fn upsert(
        &self,
        insert_entity: InsertDeviceRegistrationEntity,
    ) -> Result<DeviceRegistrationEntity> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = insert_into(device_registrations::table)
            .values(&insert_entity)
            .on_conflict((
                device_registrations::workspace_id,
                device_registrations::device_id,
            ))
            .do_update()
            .set((
                device_registrations::user_id.eq(insert_entity.user_id),
                device_registrations::platform.eq(insert_entity.platform.clone()),
                device_registrations::push_token.eq(insert_entity.push_token.clone()),
                device_registrations::token_expires_at.eq(insert_entity.token_expires_at),
                device_registrations::is_active.eq(true),
                device_registrations::updated_at.eq(diesel::dsl::now),
            ))
            .returning(DeviceRegistrationEntity::as_returning())
            .get_result::<DeviceRegistrationEntity>(&mut conn)?;

        Ok(result)
    }

    async fn touch_sync(
        &self,
        workspace_id: Uuid,
        device_id: &str,
        synced_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        update(device_registrations::table)
            .filter(device_registrations::workspace_id.eq(workspace_id))
            .filter(device_registrations::device_id.eq(device_id))
            .set((
                device_registrations::last_sync_at.eq(synced_at),
                device_registrations::last_activity_at.eq(synced_at),
                device_registrations::updated_at.eq(diesel::dsl::now),
            ))
            .execute(&mut conn)?;

        Ok(())
    }

    async fn extend_token(
        &self,
        workspace_id: Uuid,
        device_id: &str,
        token_expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        update(device_registrations::table)
            .filter(device_registrations::workspace_id.eq(workspace_id))
            .filter(device_registrations::device_id.eq(device_id))
            .set((
                device_registrations::token_expires_at.eq(token_expires_at),
                device_registrations::updated_at.eq(diesel::dsl::now),
            ))
            .execute(&mut conn)?;

        Ok(())
    }
}
