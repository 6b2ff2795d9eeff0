//! Scheduled Jobs
//!
//! Background maintenance of the PostgreSQL broker table.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Duration;
use tokio::time::interval;

// =========================================================================
// Lease Reclaim Job
// =========================================================================

/// Hand expired leases back to their lane.
///
/// A consumer that crashed between receive and ack leaves its message
/// `in_flight`; once the lease runs out the message becomes deliverable again.
/// This is the redelivery path that can make the analytics projection count
/// an event twice.
pub async fn reclaim_expired_leases(pool: &PgPool) -> Result<u64, JobError> {
    let result = sqlx::query(
        r#"
        UPDATE broker_messages
        SET status = 'ready', locked_until = NULL
        WHERE status = 'in_flight'
          AND locked_until < NOW()
        "#,
    )
    .execute(pool)
    .await?;

    let rows_affected = result.rows_affected();

    if rows_affected > 0 {
        tracing::warn!(rows_affected, "Reclaimed expired broker leases");
    }

    Ok(rows_affected)
}

// =========================================================================
// Settled Message Purge Job
// =========================================================================

/// Delete acked and dead-lettered messages settled more than `retention` ago.
///
/// Copies sitting on a dead-letter channel are `ready`, so they are kept
/// until someone consumes them.
pub async fn purge_settled_messages(pool: &PgPool, retention: Duration) -> Result<u64, JobError> {
    let result = sqlx::query(
        r#"
        DELETE FROM broker_messages
        WHERE status IN ('acked', 'dead_lettered')
          AND settled_at < NOW() - make_interval(secs => $1)
        "#,
    )
    .bind(retention.as_secs_f64())
    .execute(pool)
    .await?;

    let rows_deleted = result.rows_affected();

    if rows_deleted > 0 {
        tracing::info!(rows_deleted, "Purged settled broker messages");
    }

    Ok(rows_deleted)
}

// =========================================================================
// Job Scheduler
// =========================================================================

/// Job scheduler configuration
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Interval for lease reclaim (default: 5 seconds)
    pub lease_reclaim_interval: Duration,
    /// Interval for purging settled messages (default: 1 hour)
    pub purge_interval: Duration,
    /// Age after which settled messages are purged (default: 24 hours)
    pub retention: Duration,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            lease_reclaim_interval: Duration::from_secs(5),
            purge_interval: Duration::from_secs(3600),
            retention: Duration::from_secs(24 * 3600),
        }
    }
}

/// Job Scheduler - runs periodic maintenance tasks
pub struct JobScheduler {
    pool: PgPool,
    config: JobSchedulerConfig,
}

impl JobScheduler {
    /// Create with custom configuration
    pub fn with_config(pool: PgPool, config: JobSchedulerConfig) -> Self {
        Self { pool, config }
    }

    /// Start the job scheduler in the background
    /// Returns a handle that can be used to abort the scheduler
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the scheduler loop
    async fn run(&self) {
        tracing::info!(config = ?self.config, "Job scheduler started");

        let mut reclaim_interval = interval(self.config.lease_reclaim_interval);
        let mut purge_interval = interval(self.config.purge_interval);

        loop {
            tokio::select! {
                _ = reclaim_interval.tick() => {
                    if let Err(e) = reclaim_expired_leases(&self.pool).await {
                        tracing::error!(error = %e, "Lease reclaim failed");
                    }
                }
                _ = purge_interval.tick() => {
                    if let Err(e) = purge_settled_messages(&self.pool, self.config.retention).await {
                        tracing::error!(error = %e, "Message purge failed");
                    }
                }
            }
        }
    }

    /// Run all maintenance jobs once (at startup, before consumers attach)
    pub async fn run_all_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match reclaim_expired_leases(&self.pool).await {
            Ok(count) => report.leases_reclaimed = count,
            Err(e) => report.errors.push(format!("Lease reclaim: {}", e)),
        }

        match purge_settled_messages(&self.pool, self.config.retention).await {
            Ok(count) => report.messages_purged = count,
            Err(e) => report.errors.push(format!("Message purge: {}", e)),
        }

        report.completed_at = Utc::now();
        report
    }
}

/// Report from running maintenance jobs
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub leases_reclaimed: u64,
    pub messages_purged: u64,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

// =========================================================================
// Tests
// =========================================================================
