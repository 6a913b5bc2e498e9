use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::{
    enums::access_modes::AccessMode, subscriptions::SubscriptionDto,
};

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterDeviceRequest {
    pub device_id: String,
    pub platform: String,
    pub push_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeviceTokenResponse {
    pub device_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshDeviceTokenRequest {
    pub device_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncDeviceRequest {
    pub device_id: String,
}

#[derive(Debug, Serialize)]
pub struct AccessModeResponse {
    pub access_mode: AccessMode,
}

/// Snapshot a device caches for offline use. `valid_until` is the staleness
/// boundary: past it the client must degrade to BLOCKED until it syncs again.
#[derive(Debug, Serialize)]
pub struct DeviceSyncResponse {
    pub access_mode: AccessMode,
    pub valid_until: DateTime<Utc>,
    pub server_time: DateTime<Utc>,
    pub subscription: Option<SubscriptionDto>,
}
