use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::infrastructure::postgres::schema::device_registrations;

#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = device_registrations)]
pub struct DeviceRegistrationEntity {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub user_id: Uuid,
    pub device_id: String,
    pub platform: String,
    pub push_token: Option<String>,
    pub token_expires_at: DateTime<Utc>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = device_registrations)]
pub struct InsertDeviceRegistrationEntity {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub user_id: Uuid,
    pub device_id: String,
    pub platform: String,
    pub push_token: Option<String>,
    pub token_expires_at: DateTime<Utc>,
    pub is_active: bool,
}
