use crate::{
    application::usecases::devices::DeviceTokenSettings,
    config::config_model::DotEnvyConfig,
    domain::lifecycle::BillingPolicy,
    infrastructure::axum_http::{default_routers, routers},
    infrastructure::postgres::postgres_connection::PgPoolSquad,
    providers::ProviderRegistry,
};
use anyhow::Result;
use axum::{
    Router,
    http::{
        Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::get,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

pub async fn start(
    config: Arc<DotEnvyConfig>,
    db_pool: Arc<PgPoolSquad>,
    registry: Arc<ProviderRegistry>,
) -> Result<()> {
    let policy = BillingPolicy {
        grace_period_days: config.billing.grace_period_days,
        max_failed_payments: config.billing.max_failed_payments,
    };
    let device_settings = DeviceTokenSettings {
        jwt_secret: config.device.jwt_secret.clone(),
        token_ttl_days: config.device.token_ttl_days,
        offline_grace_minutes: config.device.offline_grace_minutes,
    };

    let app = Router::new()
        .fallback(default_routers::not_found)
        .nest(
            "/api/v1/payment",
            routers::payments::routes(
                Arc::clone(&db_pool),
                Arc::clone(&registry),
                policy.clone(),
            ),
        )
        .nest(
            "/api/v1/webhooks",
            routers::webhooks::routes(
                Arc::clone(&db_pool),
                Arc::clone(&registry),
                policy.clone(),
            ),
        )
        .nest(
            "/api/v1/billing",
            routers::invoices::routes(
                Arc::clone(&db_pool),
                Arc::clone(&registry),
                policy.clone(),
            ),
        )
        .nest(
            "/api/v1/subscriptions",
            routers::subscriptions::routes(Arc::clone(&db_pool), Arc::clone(&registry), policy),
        )
        .nest(
            "/api/v1/devices",
            routers::devices::routes(Arc::clone(&db_pool), device_settings),
        )
        .route("/api/v1/health-check", get(default_routers::health_check))
        .layer(TimeoutLayer::new(Duration::from_secs(config.server.timeout)))
        .layer(RequestBodyLimitLayer::new(
            config.server.body_limit * 1024 * 1024,
        ))
        .layer(
            CorsLayer::new()
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PATCH,
                    Method::PUT,
                    Method::DELETE,
                ])
                .allow_headers([AUTHORIZATION, CONTENT_TYPE])
                .allow_origin(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = TcpListener::bind(addr).await?;

    info!("Server is running on port {}", config.server.port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
    };

    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}
