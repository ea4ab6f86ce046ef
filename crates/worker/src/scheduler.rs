//! Batch job scheduler
//!
//! Registers the four lifecycle jobs on a cron scheduler. The schedule
//! times stagger the jobs within a daily run (renewals before delinquency
//! before suspension before expiry) so each job observes the state written
//! by the previous one; that ordering is load-bearing, not cosmetic.
//!
//! The scheduler is a thin adapter: all logic lives in
//! [`LifecycleService`], whose entry points operators and tests invoke
//! directly.

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use renova_billing::LifecycleService;

use crate::config::Config;

pub async fn start(
    lifecycle: Arc<LifecycleService>,
    config: &Config,
) -> anyhow::Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    add_job(
        &scheduler,
        &config.renewal_schedule,
        "renewals",
        lifecycle.clone(),
        |svc| Box::pin(async move { svc.process_renewals().await }),
    )
    .await?;
    add_job(
        &scheduler,
        &config.delinquency_schedule,
        "delinquencies",
        lifecycle.clone(),
        |svc| Box::pin(async move { svc.process_delinquencies().await }),
    )
    .await?;
    add_job(
        &scheduler,
        &config.suspension_schedule,
        "suspensions",
        lifecycle.clone(),
        |svc| Box::pin(async move { svc.process_suspensions().await }),
    )
    .await?;
    add_job(
        &scheduler,
        &config.expiration_schedule,
        "expirations",
        lifecycle,
        |svc| Box::pin(async move { svc.process_expirations().await }),
    )
    .await?;

    scheduler.start().await?;
    Ok(scheduler)
}

type JobFuture = std::pin::Pin<
    Box<
        dyn std::future::Future<
                Output = renova_billing::BillingResult<renova_shared::BatchOutcome>,
            > + Send,
    >,
>;

async fn add_job(
    scheduler: &JobScheduler,
    schedule: &str,
    name: &'static str,
    lifecycle: Arc<LifecycleService>,
    run: fn(Arc<LifecycleService>) -> JobFuture,
) -> anyhow::Result<()> {
    let job = Job::new_async(schedule, move |_id, _scheduler| {
        let lifecycle = lifecycle.clone();
        Box::pin(async move {
            match run(lifecycle).await {
                Ok(outcome) => info!(
                    job = name,
                    processed = outcome.processed,
                    errors = outcome.errors,
                    "Batch job finished"
                ),
                Err(e) => error!(job = name, error = %e, "Batch job failed"),
            }
        })
    })?;
    scheduler.add(job).await?;
    info!(job = name, schedule = schedule, "Registered batch job");
    Ok(())
}
