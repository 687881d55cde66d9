//! Scheduled housekeeping. The cache itself never expires anything; this
//! job clears it shortly after midnight New York time so a new trading day
//! starts from a clean slate even when the process is not restarted
//! overnight.

use std::sync::Arc;

use anyhow::Result;
use chrono_tz::US::Eastern;
use tokio_cron_scheduler::{JobBuilder, JobScheduler};

use lib_routing::LastValueCache;

/// Starts the scheduler with the daily cache-clear job. The returned
/// scheduler must be kept alive for the job to keep firing.
pub async fn start(cache: Arc<LastValueCache>, cron: &str) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let job_cache = Arc::clone(&cache);
    let job = JobBuilder::new()
        .with_timezone(Eastern)
        .with_cron_job_type()
        .with_schedule(cron)?
        .with_run_async(Box::new(move |_uuid, _lock| {
            let cache = Arc::clone(&job_cache);
            Box::pin(async move {
                log::info!("Housekeeping: clearing the last-value cache");
                cache.clear();
            })
        }))
        .build()?;

    scheduler.add(job).await?;
    scheduler.start().await?;
    log::info!("Cache housekeeping scheduled ({}, New York time)", cron);
    Ok(scheduler)
}
