use crate::server::Heartbeat;
use crate::session::SessionManager;
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info};

/// Every 30 seconds
const HEARTBEAT_CRON: &str = "*/30 * * * * *";
/// Top of every minute
const SESSION_SWEEP_CRON: &str = "0 * * * * *";

/// Start the background jobs: heartbeat for `/health`, and the sweep of
/// abandoned glossary authoring sessions.
pub async fn start_scheduler(heartbeat: Arc<Heartbeat>, sessions: Arc<SessionManager>) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    heartbeat.beat(Utc::now().timestamp());

    let heartbeat_job = Job::new_async(HEARTBEAT_CRON, move |_uuid, _l| {
        let heartbeat = Arc::clone(&heartbeat);
        Box::pin(async move {
            heartbeat.beat(Utc::now().timestamp());
            debug!("Heartbeat");
        })
    })?;
    scheduler.add(heartbeat_job).await?;

    let sweep_job = Job::new_async(SESSION_SWEEP_CRON, move |_uuid, _l| {
        let sessions = Arc::clone(&sessions);
        Box::pin(async move {
            let removed = sessions.sweep(Utc::now());
            debug!("Session sweep removed {} sessions", removed);
        })
    })?;
    scheduler.add(sweep_job).await?;

    scheduler.start().await?;
    info!("✓ Scheduler started");

    Ok(scheduler)
}
