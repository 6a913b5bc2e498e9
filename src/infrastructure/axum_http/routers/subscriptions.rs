use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    response::IntoResponse,
    routing::{get, post},
};

use crate::{
    application::usecases::subscriptions::SubscriptionUseCase,
    auth::WorkspaceContext,
    domain::{
        lifecycle::BillingPolicy,
        repositories::{plans::PlanRepository, subscriptions::SubscriptionRepository},
        value_objects::subscriptions::{
            CancelSubscriptionRequest, ChangePlanRequest, StartTrialRequest,
        },
    },
    infrastructure::{
        axum_http::error_responses::error_response,
        postgres::{
            postgres_connection::PgPoolSquad,
            repositories::{plans::PlanPostgres, subscriptions::SubscriptionPostgres},
        },
    },
    providers::ProviderRegistry,
};

pub fn routes(
    db_pool: Arc<PgPoolSquad>,
    registry: Arc<ProviderRegistry>,
    policy: BillingPolicy,
) -> Router {
    let subscription_repository = SubscriptionPostgres::new(Arc::clone(&db_pool));
    let plan_repository = PlanPostgres::new(Arc::clone(&db_pool));
    let subscription_usecase = SubscriptionUseCase::new(
        Arc::new(subscription_repository),
        Arc::new(plan_repository),
        registry,
        policy,
    );

    Router::new()
        .route("/plans", get(list_plans))
        .route("/current", get(get_current))
        .route("/cancel", post(cancel))
        .route("/pause", post(pause))
        .route("/resume", post(resume))
        .route("/change-plan", post(change_plan))
        .route("/trial", post(start_trial))
        .route("/sync", post(sync))
        .with_state(Arc::new(subscription_usecase))
}

pub async fn list_plans<S, P>(
    State(subscription_usecase): State<Arc<SubscriptionUseCase<S, P>>>,
    _ctx: WorkspaceContext,
) -> impl IntoResponse
where
    S: SubscriptionRepository + Send + Sync,
    P: PlanRepository + Send + Sync,
{
    match subscription_usecase.list_plans().await {
        Ok(plans) => Json(plans).into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}

pub async fn get_current<S, P>(
    State(subscription_usecase): State<Arc<SubscriptionUseCase<S, P>>>,
    ctx: WorkspaceContext,
) -> impl IntoResponse
where
    S: SubscriptionRepository + Send + Sync,
    P: PlanRepository + Send + Sync,
{
    match subscription_usecase.get_current(ctx.workspace_id).await {
        Ok(subscription) => Json(subscription).into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}

pub async fn cancel<S, P>(
    State(subscription_usecase): State<Arc<SubscriptionUseCase<S, P>>>,
    ctx: WorkspaceContext,
    Json(request): Json<CancelSubscriptionRequest>,
) -> impl IntoResponse
where
    S: SubscriptionRepository + Send + Sync,
    P: PlanRepository + Send + Sync,
{
    match subscription_usecase.cancel(ctx.workspace_id, request).await {
        Ok(subscription) => Json(subscription).into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}

pub async fn pause<S, P>(
    State(subscription_usecase): State<Arc<SubscriptionUseCase<S, P>>>,
    ctx: WorkspaceContext,
) -> impl IntoResponse
where
    S: SubscriptionRepository + Send + Sync,
    P: PlanRepository + Send + Sync,
{
    match subscription_usecase.pause(ctx.workspace_id).await {
        Ok(subscription) => Json(subscription).into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}

pub async fn resume<S, P>(
    State(subscription_usecase): State<Arc<SubscriptionUseCase<S, P>>>,
    ctx: WorkspaceContext,
) -> impl IntoResponse
where
    S: SubscriptionRepository + Send + Sync,
    P: PlanRepository + Send + Sync,
{
    match subscription_usecase.resume(ctx.workspace_id).await {
        Ok(subscription) => Json(subscription).into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}

pub async fn change_plan<S, P>(
    State(subscription_usecase): State<Arc<SubscriptionUseCase<S, P>>>,
    ctx: WorkspaceContext,
    Json(request): Json<ChangePlanRequest>,
) -> impl IntoResponse
where
    S: SubscriptionRepository + Send + Sync,
    P: PlanRepository + Send + Sync,
{
    match subscription_usecase
        .change_plan(ctx.workspace_id, request)
        .await
    {
        Ok(subscription) => Json(subscription).into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}

pub async fn sync<S, P>(
    State(subscription_usecase): State<Arc<SubscriptionUseCase<S, P>>>,
    ctx: WorkspaceContext,
) -> impl IntoResponse
where
    S: SubscriptionRepository + Send + Sync,
    P: PlanRepository + Send + Sync,
{
    match subscription_usecase.sync(ctx.workspace_id).await {
        Ok(subscription) => Json(subscription).into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}

pub async fn start_trial<S, P>(
    State(subscription_usecase): State<Arc<SubscriptionUseCase<S, P>>>,
    ctx: WorkspaceContext,
    Json(request): Json<StartTrialRequest>,
) -> impl IntoResponse
where
    S: SubscriptionRepository + Send + Sync,
    P: PlanRepository + Send + Sync,
{
    match subscription_usecase
        .start_trial(ctx.workspace_id, request)
        .await
    {
        Ok(subscription) => Json(subscription).into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}
