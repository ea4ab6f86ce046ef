//! Renova billing worker
//!
//! Wires the Postgres-backed billing engine to the cron scheduler and runs
//! until interrupted.

mod config;
mod scheduler;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use renova_billing::store::postgres::PgStore;
use renova_billing::{InvoiceGenerator, LifecycleService, TaxEngine};
use renova_shared::{Clock, SystemClock};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    let pool =
        renova_shared::create_pool(&config.database_url, config.database_max_connections).await?;
    renova_shared::run_migrations(&pool).await?;

    let store = Arc::new(PgStore::new(pool));
    let tax = Arc::new(TaxEngine::new(config.load_tax_table()?));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let generator = InvoiceGenerator::new(
        store.clone(),
        store.clone(),
        store.clone(),
        tax,
        clock.clone(),
    );
    let lifecycle = Arc::new(LifecycleService::new(
        store.clone(),
        store.clone(),
        store,
        generator,
        clock,
    ));

    let mut scheduler = scheduler::start(lifecycle, &config).await?;
    info!("Renova worker started");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    scheduler.shutdown().await?;
    Ok(())
}
