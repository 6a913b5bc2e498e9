use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
};

use crate::{
    application::usecases::devices::{DeviceTokenSettings, DeviceUseCase},
    auth::WorkspaceContext,
    domain::{
        repositories::{devices::DeviceRepository, subscriptions::SubscriptionRepository},
        value_objects::devices::{
            RefreshDeviceTokenRequest, RegisterDeviceRequest, SyncDeviceRequest,
        },
    },
    infrastructure::{
        axum_http::error_responses::error_response,
        postgres::{
            postgres_connection::PgPoolSquad,
            repositories::{devices::DevicePostgres, subscriptions::SubscriptionPostgres},
        },
    },
};

pub fn routes(db_pool: Arc<PgPoolSquad>, settings: DeviceTokenSettings) -> Router {
    let device_repository = DevicePostgres::new(Arc::clone(&db_pool));
    let subscription_repository = SubscriptionPostgres::new(Arc::clone(&db_pool));
    let device_usecase = DeviceUseCase::new(
        Arc::new(device_repository),
        Arc::new(subscription_repository),
        settings,
    );

    Router::new()
        .route("/register", post(register))
        .route("/refresh-token", post(refresh_token))
        .route("/:device_id/access-mode", get(access_mode))
        .route("/sync", post(sync))
        .with_state(Arc::new(device_usecase))
}

pub async fn register<D, S>(
    State(device_usecase): State<Arc<DeviceUseCase<D, S>>>,
    ctx: WorkspaceContext,
    Json(request): Json<RegisterDeviceRequest>,
) -> impl IntoResponse
where
    D: DeviceRepository + Send + Sync,
    S: SubscriptionRepository + Send + Sync,
{
    match device_usecase
        .register(ctx.workspace_id, ctx.user_id, request)
        .await
    {
        Ok(token) => Json(token).into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}

pub async fn refresh_token<D, S>(
    State(device_usecase): State<Arc<DeviceUseCase<D, S>>>,
    ctx: WorkspaceContext,
    Json(request): Json<RefreshDeviceTokenRequest>,
) -> impl IntoResponse
where
    D: DeviceRepository + Send + Sync,
    S: SubscriptionRepository + Send + Sync,
{
    match device_usecase.refresh_token(ctx.workspace_id, request).await {
        Ok(token) => Json(token).into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}

pub async fn access_mode<D, S>(
    State(device_usecase): State<Arc<DeviceUseCase<D, S>>>,
    ctx: WorkspaceContext,
    Path(device_id): Path<String>,
) -> impl IntoResponse
where
    D: DeviceRepository + Send + Sync,
    S: SubscriptionRepository + Send + Sync,
{
    match device_usecase.access_mode(ctx.workspace_id, &device_id).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}

pub async fn sync<D, S>(
    State(device_usecase): State<Arc<DeviceUseCase<D, S>>>,
    ctx: WorkspaceContext,
    Json(request): Json<SyncDeviceRequest>,
) -> impl IntoResponse
where
    D: DeviceRepository + Send + Sync,
    S: SubscriptionRepository + Send + Sync,
{
    match device_usecase.sync(ctx.workspace_id, &request.device_id).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}
