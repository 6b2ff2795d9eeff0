//! Analytics Service
//!
//! Consumes the transaction channel into the in-memory projection and serves
//! snapshots over HTTP. The projection starts empty on every boot.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use capped_ledger::broker::{Consumer, PgBroker};
use capped_ledger::jobs::{JobScheduler, JobSchedulerConfig};
use capped_ledger::projection::{wait_for_workers, AnalyticsConsumer, AnalyticsProjection};
use capped_ledger::server::{init_tracing, shutdown_signal};
use capped_ledger::{api, db, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(config.log_format);

    let addr: SocketAddr = format!("{}:{}", config.host, config.analytics_port).parse()?;

    tracing::info!(environment = %config.environment, "Starting analytics service");

    let pool = db::connect(&config).await?;
    db::verify_connection(&pool).await?;
    if !db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete. Please run migrations.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }

    let scheduler = JobScheduler::with_config(
        pool.clone(),
        JobSchedulerConfig {
            lease_reclaim_interval: config.broker_lease / 2,
            retention: config.broker_retention,
            ..JobSchedulerConfig::default()
        },
    );

    // Leases left behind by a previous run go back to their lanes first
    let report = scheduler.run_all_once().await;
    tracing::info!(
        leases_reclaimed = report.leases_reclaimed,
        messages_purged = report.messages_purged,
        errors = ?report.errors,
        "Startup maintenance finished"
    );
    let scheduler = scheduler.start();

    let broker = Arc::new(PgBroker::with_config(pool.clone(), config.broker_config()));
    let consumer = Consumer::new(broker, config.broker_channel.clone(), config.redelivery_policy());

    let projection = Arc::new(AnalyticsProjection::new());
    let handler = AnalyticsConsumer::new(projection.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut workers = handler.spawn_workers(consumer, config.analytics_workers, shutdown_rx);

    tracing::info!(
        channel = %config.broker_channel,
        workers = config.analytics_workers,
        policy = ?config.redelivery_policy(),
        "Consuming events"
    );

    let app = api::analytics_app(projection).layer(TraceLayer::new_for_http());

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

    // Exit when every consumer is gone
    let outcome = tokio::select! {
        served = server.into_future() => served.map_err(anyhow::Error::from),
        failed = wait_for_workers(&mut workers) => {
            tracing::error!(failed, "All analytics consumers stopped");
            Err(anyhow::anyhow!("all analytics consumers stopped ({} failed)", failed))
        }
    };

    // Stop taking messages; each worker settles the one it holds
    tracing::info!("Stopping consumers...");
    shutdown_tx.send(true).ok();
    wait_for_workers(&mut workers).await;

    scheduler.abort();
    pool.close().await;
    tracing::info!("Analytics service stopped. Goodbye!");

    outcome
}
