use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use subledger::application::usecases::invoices::InvoiceUseCase;
use subledger::config::config_loader;
use subledger::domain::lifecycle::BillingPolicy;
use subledger::infrastructure::axum_http::http_serve;
use subledger::infrastructure::postgres::postgres_connection::{self, PgPoolSquad};
use subledger::infrastructure::postgres::repositories::{
    invoices::InvoicePostgres, payment_methods::PaymentMethodPostgres, plans::PlanPostgres,
    subscriptions::SubscriptionPostgres,
};
use subledger::observability;
use subledger::providers::{self, ProviderRegistry};
use tracing::{error, info, warn};

const OVERDUE_SWEEP_INTERVAL_SECS: u64 = 3600;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!("Server exited with error: {}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    observability::init_observability()?;

    let dotenvy_env = config_loader::load()?;
    info!("ENV has been loaded");

    let postgres_pool = postgres_connection::establish_connection(&dotenvy_env.database.url)?;
    info!("Postgres connection has been established");

    let registry = Arc::new(providers::registry_from_config(&dotenvy_env));
    let db_pool = Arc::new(postgres_pool);

    spawn_overdue_sweep(
        Arc::clone(&db_pool),
        Arc::clone(&registry),
        BillingPolicy {
            grace_period_days: dotenvy_env.billing.grace_period_days,
            max_failed_payments: dotenvy_env.billing.max_failed_payments,
        },
    );

    http_serve::start(Arc::new(dotenvy_env), db_pool, registry).await?;

    Ok(())
}

/// Hourly background pass that flips payable invoices past their due date to
/// OVERDUE.
fn spawn_overdue_sweep(
    db_pool: Arc<PgPoolSquad>,
    registry: Arc<ProviderRegistry>,
    policy: BillingPolicy,
) {
    let invoice_usecase = InvoiceUseCase::new(
        Arc::new(InvoicePostgres::new(Arc::clone(&db_pool))),
        Arc::new(SubscriptionPostgres::new(Arc::clone(&db_pool))),
        Arc::new(PlanPostgres::new(Arc::clone(&db_pool))),
        Arc::new(PaymentMethodPostgres::new(Arc::clone(&db_pool))),
        registry,
        policy,
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(OVERDUE_SWEEP_INTERVAL_SECS));
        loop {
            ticker.tick().await;
            if let Err(err) = invoice_usecase.mark_overdue().await {
                warn!(sweep_error = ?err, "overdue sweep failed");
            }
        }
    });
}
