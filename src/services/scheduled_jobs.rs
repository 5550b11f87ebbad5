use chrono::{DateTime, Utc};
use log::{error, info, warn};
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::error::{AppError, AppResult};
use crate::models::api::CronRunResponse;
use crate::services::auto_recharge_service::AutoRechargeService;
use crate::services::billing_cycle_service::BillingCycleService;

/// One scheduler tick: bill due subscriptions, then sweep auto-recharge.
/// Per-item failures are reported, not raised.
pub async fn run_billing_pass(
    billing: &BillingCycleService,
    auto_recharge: &AutoRechargeService,
    now: DateTime<Utc>,
) -> AppResult<CronRunResponse> {
    let cycle = billing.run_cycle(now).await?;
    let sweep = auto_recharge.sweep(now).await?;

    let complete = match cycle.ensure_complete() {
        Ok(()) => sweep.failures.is_empty(),
        Err(e) => {
            warn!("{}", e);
            false
        }
    };
    if !sweep.failures.is_empty() {
        warn!("Auto-recharge sweep finished with {} failures", sweep.failures.len());
    }

    Ok(CronRunResponse {
        billing: cycle,
        auto_recharge: sweep,
        complete,
    })
}

/// Run the billing pass in-process on a cron expression (seconds field first).
pub async fn start_billing_job(
    schedule: &str,
    billing: BillingCycleService,
    auto_recharge: AutoRechargeService,
) -> AppResult<JobScheduler> {
    let scheduler = JobScheduler::new()
        .await
        .map_err(|e| AppError::Configuration(format!("Failed to create scheduler: {}", e)))?;

    let job = Job::new_async(schedule, move |_uuid, _lock| {
        let billing = billing.clone();
        let auto_recharge = auto_recharge.clone();
        Box::pin(async move {
            info!("Running scheduled billing pass");
            match run_billing_pass(&billing, &auto_recharge, Utc::now()).await {
                Ok(report) if report.complete => info!("Scheduled billing pass complete"),
                Ok(_) => warn!("Scheduled billing pass finished with failures"),
                Err(e) => error!("Scheduled billing pass failed: {}", e),
            }
        })
    })
    .map_err(|e| AppError::Configuration(format!("Invalid billing cron schedule '{}': {}", schedule, e)))?;

    scheduler
        .add(job)
        .await
        .map_err(|e| AppError::Configuration(format!("Failed to schedule billing job: {}", e)))?;
    scheduler
        .start()
        .await
        .map_err(|e| AppError::Configuration(format!("Failed to start scheduler: {}", e)))?;

    info!("Scheduled billing pass on '{}'", schedule);
    Ok(scheduler)
}
