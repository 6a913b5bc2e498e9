use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    response::IntoResponse,
    routing::post,
};

use crate::{
    application::usecases::orchestration::OrchestrationUseCase,
    auth::WorkspaceContext,
    domain::{
        lifecycle::BillingPolicy,
        repositories::{plans::PlanRepository, subscriptions::SubscriptionRepository},
        value_objects::purchases::{InitiatePurchaseRequest, VerifyPurchaseRequest},
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
    let plan_repository = PlanPostgres::new(Arc::clone(&db_pool));
    let subscription_repository = SubscriptionPostgres::new(Arc::clone(&db_pool));
    let orchestration_usecase = OrchestrationUseCase::new(
        Arc::new(plan_repository),
        Arc::new(subscription_repository),
        registry,
        policy,
    );

    Router::new()
        .route("/initiate", post(initiate_purchase))
        .route("/verify", post(verify_purchase))
        .with_state(Arc::new(orchestration_usecase))
}

pub async fn initiate_purchase<P, S>(
    State(orchestration_usecase): State<Arc<OrchestrationUseCase<P, S>>>,
    ctx: WorkspaceContext,
    Json(request): Json<InitiatePurchaseRequest>,
) -> impl IntoResponse
where
    P: PlanRepository + Send + Sync,
    S: SubscriptionRepository + Send + Sync,
{
    match orchestration_usecase
        .initiate_purchase(ctx.workspace_id, request)
        .await
    {
        Ok(response) => Json(response).into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}

pub async fn verify_purchase<P, S>(
    State(orchestration_usecase): State<Arc<OrchestrationUseCase<P, S>>>,
    ctx: WorkspaceContext,
    Json(request): Json<VerifyPurchaseRequest>,
) -> impl IntoResponse
where
    P: PlanRepository + Send + Sync,
    S: SubscriptionRepository + Send + Sync,
{
    match orchestration_usecase
        .verify_purchase(ctx.workspace_id, request)
        .await
    {
        Ok(response) => Json(response).into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}
