//! capped_ledger - Ledger Service
//!
//! Records user transactions under a cumulative cap and publishes every
//! mutation to the broker for the analytics service.

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::trace::TraceLayer;

use capped_ledger::broker::PgBroker;
use capped_ledger::emitter::EventEmitter;
use capped_ledger::handlers::LedgerHandler;
use capped_ledger::server::{init_tracing, shutdown_signal};
use capped_ledger::store::PgLedgerStore;
use capped_ledger::{api, db, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!(environment = %config.environment, "Starting ledger service");
    tracing::info!("Connecting to database...");

    let pool = db::connect(&config).await?;
    db::verify_connection(&pool).await?;

    // Verify database schema
    if !db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete. Please run migrations.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }

    tracing::info!("Database connected successfully");

    let store = Arc::new(PgLedgerStore::new(pool.clone()));
    let broker = Arc::new(PgBroker::with_config(pool.clone(), config.broker_config()));
    let emitter = EventEmitter::new(broker, config.broker_channel.clone());
    let ledger = Arc::new(LedgerHandler::new(store, emitter));

    let app = api::ledger_app(ledger, config.request_timeout).layer(TraceLayer::new_for_http());

    tracing::info!(channel = %config.broker_channel, "Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup
    tracing::info!("Server shutting down...");
    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}
