//! Scheduled background tasks using tokio-cron-scheduler.
//!
//! ```text
//! Scheduler (EXPIRY_SWEEP_CRON, every 15s by default)
//!     │
//!     ├─► coordinator.sweep()
//!     │       └─► For each PENDING booking older than the timeout → EXPIRED
//!     │
//!     └─► tracking.cleanup()
//!             └─► Drop abandoned channels and provider feeds
//! ```

use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::kernel::ServerDeps;

/// Start all scheduled tasks
pub async fn start_scheduler(deps: ServerDeps, expiry_cron: &str) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let sweep_deps = deps.clone();
    let sweep_job = Job::new_async(expiry_cron, move |_uuid, _lock| {
        let deps = sweep_deps.clone();
        Box::pin(async move {
            run_expiry_sweep(&deps).await;
        })
    })?;

    scheduler.add(sweep_job).await?;
    scheduler.start().await?;

    tracing::info!(cron = %expiry_cron, "Scheduled tasks started (pending booking expiry sweep)");
    Ok(scheduler)
}

/// Expire stale bookings, then tidy the tracking hub.
pub async fn run_expiry_sweep(deps: &ServerDeps) {
    if let Err(e) = deps.coordinator.sweep().await {
        tracing::error!(error = %e, "Expiry sweep failed");
    }
    deps.tracking.cleanup().await;
}
