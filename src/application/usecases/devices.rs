use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::domain::{
    lifecycle,
    repositories::{devices::DeviceRepository, subscriptions::SubscriptionRepository},
    value_objects::{
        devices::{
            AccessModeResponse, DeviceSyncResponse, DeviceTokenResponse, RefreshDeviceTokenRequest,
            RegisterDeviceRequest,
        },
        enums::access_modes::AccessMode,
        subscriptions::SubscriptionDto,
    },
};
use crate::domain::entities::device_registrations::InsertDeviceRegistrationEntity;

/// Signing material and lifetimes for device tokens, from config.
#[derive(Debug, Clone)]
pub struct DeviceTokenSettings {
    pub jwt_secret: String,
    pub token_ttl_days: i64,
    /// How long a sync response stays trustworthy offline.
    pub offline_grace_minutes: i64,
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device is not registered")]
    NotRegistered,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl DeviceError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            DeviceError::NotRegistered => StatusCode::NOT_FOUND,
            DeviceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type UseCaseResult<T> = std::result::Result<T, DeviceError>;

#[derive(Debug, Serialize, Deserialize)]
struct DeviceTokenClaims {
    sub: String,
    workspace_id: Uuid,
    exp: i64,
}

/// Device registration, token issuance and the sync endpoint clients poll to
/// refresh their cached access mode.
pub struct DeviceUseCase<D, S>
where
    D: DeviceRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
{
    device_repo: Arc<D>,
    subscription_repo: Arc<S>,
    settings: DeviceTokenSettings,
}

impl<D, S> DeviceUseCase<D, S>
where
    D: DeviceRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
{
    pub fn new(device_repo: Arc<D>, subscription_repo: Arc<S>, settings: DeviceTokenSettings) -> Self {
        Self {
            device_repo,
            subscription_repo,
            settings,
        }
    }

    pub async fn register(
        &self,
        workspace_id: Uuid,
        user_id: Uuid,
        request: RegisterDeviceRequest,
    ) -> UseCaseResult<DeviceTokenResponse> {
        let expires_at = Utc::now() + Duration::days(self.settings.token_ttl_days);
        let registered = self
            .device_repo
            .upsert(InsertDeviceRegistrationEntity {
                id: Uuid::new_v4(),
                workspace_id,
                user_id,
                device_id: request.device_id.clone(),
                platform: request.platform,
                push_token: request.push_token,
                token_expires_at: expires_at,
                is_active: true,
            })
            .await
            .map_err(DeviceError::Internal)?;
        info!(%workspace_id, device_id = %registered.device_id, "device registered");

        let device_token = self.issue_token(workspace_id, &registered.device_id, expires_at)?;
        Ok(DeviceTokenResponse {
            device_token,
            expires_at,
        })
    }

    pub async fn refresh_token(
        &self,
        workspace_id: Uuid,
        request: RefreshDeviceTokenRequest,
    ) -> UseCaseResult<DeviceTokenResponse> {
        let device = self
            .device_repo
            .find(workspace_id, &request.device_id)
            .await
            .map_err(DeviceError::Internal)?
            .filter(|device| device.is_active)
            .ok_or(DeviceError::NotRegistered)?;

        let expires_at = Utc::now() + Duration::days(self.settings.token_ttl_days);
        self.device_repo
            .extend_token(workspace_id, &device.device_id, expires_at)
            .await
            .map_err(DeviceError::Internal)?;

        let device_token = self.issue_token(workspace_id, &device.device_id, expires_at)?;
        Ok(DeviceTokenResponse {
            device_token,
            expires_at,
        })
    }

    pub async fn access_mode(
        &self,
        workspace_id: Uuid,
        device_id: &str,
    ) -> UseCaseResult<AccessModeResponse> {
        self.device_repo
            .find(workspace_id, device_id)
            .await
            .map_err(DeviceError::Internal)?
            .filter(|device| device.is_active)
            .ok_or(DeviceError::NotRegistered)?;

        let (access_mode, _) = self.evaluate_access(workspace_id).await?;
        Ok(AccessModeResponse { access_mode })
    }

    /// Full sync: records the contact, returns the access mode plus the
    /// subscription snapshot and how long the device may trust it offline.
    pub async fn sync(
        &self,
        workspace_id: Uuid,
        device_id: &str,
    ) -> UseCaseResult<DeviceSyncResponse> {
        let device = self
            .device_repo
            .find(workspace_id, device_id)
            .await
            .map_err(DeviceError::Internal)?
            .filter(|device| device.is_active)
            .ok_or(DeviceError::NotRegistered)?;

        let now = Utc::now();
        self.device_repo
            .touch_sync(workspace_id, &device.device_id, now)
            .await
            .map_err(DeviceError::Internal)?;

        let (access_mode, subscription) = self.evaluate_access(workspace_id).await?;
        Ok(DeviceSyncResponse {
            access_mode,
            valid_until: now + Duration::minutes(self.settings.offline_grace_minutes),
            server_time: now,
            subscription,
        })
    }

    async fn evaluate_access(
        &self,
        workspace_id: Uuid,
    ) -> UseCaseResult<(AccessMode, Option<SubscriptionDto>)> {
        let subscription = self
            .subscription_repo
            .find_current_by_workspace(workspace_id)
            .await
            .map_err(DeviceError::Internal)?;
        let access_mode = subscription
            .as_ref()
            .map(|sub| {
                lifecycle::access_mode_for(sub.status_enum(), sub.grace_period_ends_at, Utc::now())
            })
            .unwrap_or(AccessMode::Blocked);
        Ok((access_mode, subscription.map(SubscriptionDto::from)))
    }

    fn issue_token(
        &self,
        workspace_id: Uuid,
        device_id: &str,
        expires_at: DateTime<Utc>,
    ) -> UseCaseResult<String> {
        let claims = DeviceTokenClaims {
            sub: device_id.to_string(),
            workspace_id,
            exp: expires_at.timestamp(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.settings.jwt_secret.as_bytes()),
        )
        .map_err(|err| DeviceError::Internal(anyhow!("device token signing failed: {err}")))
    }
}
