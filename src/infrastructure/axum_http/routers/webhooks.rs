use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
};

use crate::{
    application::usecases::webhooks::WebhookUseCase,
    domain::{
        lifecycle::BillingPolicy,
        repositories::{
            invoices::InvoiceRepository, plans::PlanRepository,
            subscriptions::SubscriptionRepository, webhook_events::WebhookEventRepository,
        },
        value_objects::{
            enums::payment_providers::PaymentProvider, webhook_events::WebhookAck,
        },
    },
    infrastructure::postgres::{
        postgres_connection::PgPoolSquad,
        repositories::{
            invoices::InvoicePostgres, plans::PlanPostgres, subscriptions::SubscriptionPostgres,
            webhook_events::WebhookEventPostgres,
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
    let webhook_event_repository = WebhookEventPostgres::new(Arc::clone(&db_pool));
    let invoice_repository = InvoicePostgres::new(Arc::clone(&db_pool));
    let plan_repository = PlanPostgres::new(Arc::clone(&db_pool));
    let webhook_usecase = WebhookUseCase::new(
        Arc::new(subscription_repository),
        Arc::new(webhook_event_repository),
        Arc::new(invoice_repository),
        Arc::new(plan_repository),
        registry,
        policy,
    );

    Router::new()
        .route("/:provider", post(receive))
        .with_state(Arc::new(webhook_usecase))
}

fn provider_from_slug(slug: &str) -> Option<PaymentProvider> {
    match slug {
        "stripe" => Some(PaymentProvider::Stripe),
        "razorpay" => Some(PaymentProvider::Razorpay),
        "google-play" => Some(PaymentProvider::GooglePlay),
        "app-store" => Some(PaymentProvider::AppStore),
        _ => None,
    }
}

fn signature_header<'h>(provider: PaymentProvider, headers: &'h HeaderMap) -> Option<&'h str> {
    let name = match provider {
        PaymentProvider::Stripe => "Stripe-Signature",
        PaymentProvider::Razorpay => "X-Razorpay-Signature",
        PaymentProvider::GooglePlay | PaymentProvider::AppStore => return None,
    };
    headers.get(name).and_then(|value| value.to_str().ok())
}

pub async fn receive<S, W, I, P>(
    State(webhook_usecase): State<Arc<WebhookUseCase<S, W, I, P>>>,
    Path(provider_slug): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse
where
    S: SubscriptionRepository + Send + Sync,
    W: WebhookEventRepository + Send + Sync,
    I: InvoiceRepository + Send + Sync,
    P: PlanRepository + Send + Sync,
{
    let Some(provider) = provider_from_slug(&provider_slug) else {
        return (StatusCode::NOT_FOUND, "NOT_FOUND").into_response();
    };

    let signature = signature_header(provider, &headers);
    match webhook_usecase.handle(provider, &body, signature).await {
        WebhookAck::Ok => StatusCode::OK.into_response(),
        WebhookAck::Rejected => StatusCode::UNAUTHORIZED.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_map_to_providers() {
        assert_eq!(provider_from_slug("stripe"), Some(PaymentProvider::Stripe));
        assert_eq!(
            provider_from_slug("google-play"),
            Some(PaymentProvider::GooglePlay)
        );
        assert_eq!(
            provider_from_slug("app-store"),
            Some(PaymentProvider::AppStore)
        );
        assert_eq!(provider_from_slug("paypal"), None);
    }
}
