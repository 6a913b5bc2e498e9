use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    application::usecases::invoices::InvoiceUseCase,
    auth::WorkspaceContext,
    domain::{
        lifecycle::BillingPolicy,
        repositories::{
            invoices::InvoiceRepository, payment_methods::PaymentMethodRepository,
            plans::PlanRepository, subscriptions::SubscriptionRepository,
        },
        value_objects::invoices::GenerateInvoiceRequest,
    },
    infrastructure::{
        axum_http::error_responses::error_response,
        postgres::{
            postgres_connection::PgPoolSquad,
            repositories::{
                invoices::InvoicePostgres, payment_methods::PaymentMethodPostgres,
                plans::PlanPostgres, subscriptions::SubscriptionPostgres,
            },
        },
    },
    providers::ProviderRegistry,
};

pub fn routes(
    db_pool: Arc<PgPoolSquad>,
    registry: Arc<ProviderRegistry>,
    policy: BillingPolicy,
) -> Router {
    let invoice_usecase = build_usecase(db_pool, registry, policy);

    Router::new()
        .route("/invoices", get(list))
        .route("/invoices/generate", post(generate))
        .route("/invoices/:invoice_id", get(get_one))
        .route("/invoices/:invoice_id/pay", post(pay))
        .route("/invoices/:invoice_id/retry-payment", post(retry_payment))
        .with_state(Arc::new(invoice_usecase))
}

pub fn build_usecase(
    db_pool: Arc<PgPoolSquad>,
    registry: Arc<ProviderRegistry>,
    policy: BillingPolicy,
) -> InvoiceUseCase<InvoicePostgres, SubscriptionPostgres, PlanPostgres, PaymentMethodPostgres> {
    InvoiceUseCase::new(
        Arc::new(InvoicePostgres::new(Arc::clone(&db_pool))),
        Arc::new(SubscriptionPostgres::new(Arc::clone(&db_pool))),
        Arc::new(PlanPostgres::new(Arc::clone(&db_pool))),
        Arc::new(PaymentMethodPostgres::new(Arc::clone(&db_pool))),
        registry,
        policy,
    )
}

pub async fn list<I, S, P, M>(
    State(invoice_usecase): State<Arc<InvoiceUseCase<I, S, P, M>>>,
    ctx: WorkspaceContext,
) -> impl IntoResponse
where
    I: InvoiceRepository + Send + Sync,
    S: SubscriptionRepository + Send + Sync,
    P: PlanRepository + Send + Sync,
    M: PaymentMethodRepository + Send + Sync,
{
    match invoice_usecase.list(ctx.workspace_id).await {
        Ok(invoices) => Json(invoices).into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}

pub async fn get_one<I, S, P, M>(
    State(invoice_usecase): State<Arc<InvoiceUseCase<I, S, P, M>>>,
    ctx: WorkspaceContext,
    Path(invoice_id): Path<Uuid>,
) -> impl IntoResponse
where
    I: InvoiceRepository + Send + Sync,
    S: SubscriptionRepository + Send + Sync,
    P: PlanRepository + Send + Sync,
    M: PaymentMethodRepository + Send + Sync,
{
    match invoice_usecase.get(ctx.workspace_id, invoice_id).await {
        Ok(invoice) => Json(invoice).into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}

pub async fn generate<I, S, P, M>(
    State(invoice_usecase): State<Arc<InvoiceUseCase<I, S, P, M>>>,
    ctx: WorkspaceContext,
    Json(request): Json<GenerateInvoiceRequest>,
) -> impl IntoResponse
where
    I: InvoiceRepository + Send + Sync,
    S: SubscriptionRepository + Send + Sync,
    P: PlanRepository + Send + Sync,
    M: PaymentMethodRepository + Send + Sync,
{
    match invoice_usecase.generate(ctx.workspace_id, request).await {
        Ok(invoice) => Json(invoice).into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}

pub async fn pay<I, S, P, M>(
    State(invoice_usecase): State<Arc<InvoiceUseCase<I, S, P, M>>>,
    ctx: WorkspaceContext,
    Path(invoice_id): Path<Uuid>,
) -> impl IntoResponse
where
    I: InvoiceRepository + Send + Sync,
    S: SubscriptionRepository + Send + Sync,
    P: PlanRepository + Send + Sync,
    M: PaymentMethodRepository + Send + Sync,
{
    match invoice_usecase
        .attempt_payment(ctx.workspace_id, invoice_id)
        .await
    {
        Ok(payment) => Json(payment).into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}

/// Same flow as `pay`; exposed separately so dunning emails can deep-link a
/// retry without implying a first attempt never happened.
pub async fn retry_payment<I, S, P, M>(
    State(invoice_usecase): State<Arc<InvoiceUseCase<I, S, P, M>>>,
    ctx: WorkspaceContext,
    Path(invoice_id): Path<Uuid>,
) -> impl IntoResponse
where
    I: InvoiceRepository + Send + Sync,
    S: SubscriptionRepository + Send + Sync,
    P: PlanRepository + Send + Sync,
    M: PaymentMethodRepository + Send + Sync,
{
    match invoice_usecase
        .attempt_payment(ctx.workspace_id, invoice_id)
        .await
    {
        Ok(payment) => Json(payment).into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}
