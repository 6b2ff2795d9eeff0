//! Common test utilities
//!
//! Wires the ledger, broker and projection together in memory; no database
//! is needed.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use tower::util::ServiceExt;
use uuid::Uuid;

use capped_ledger::api;
use capped_ledger::broker::{Broker, Consumer, InMemoryBroker, RedeliveryPolicy};
use capped_ledger::emitter::EventEmitter;
use capped_ledger::handlers::LedgerHandler;
use capped_ledger::projection::{AnalyticsConsumer, AnalyticsProjection};
use capped_ledger::store::InMemoryLedgerStore;

pub const CHANNEL: &str = "transactions";

/// Serializes schema creation across concurrently running tests
const SCHEMA_LOCK_KEY: i64 = 0x00CA_FFED;

/// Setup test database - connect to `DATABASE_URL` and apply the schema.
///
/// Tables are not truncated; tests isolate themselves with fresh user ids
/// and channel names.
pub async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    sqlx::query("SELECT pg_advisory_lock($1)")
        .bind(SCHEMA_LOCK_KEY)
        .execute(&mut *conn)
        .await
        .expect("Failed to take schema lock");
    (&mut *conn)
        .execute(include_str!("../../migrations/0001_init.sql"))
        .await
        .expect("Failed to apply schema");
    sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(SCHEMA_LOCK_KEY)
        .execute(&mut *conn)
        .await
        .expect("Failed to release schema lock");
    drop(conn);

    pool
}

/// A user id no other test run has touched
pub fn unique_user_id() -> i64 {
    (Uuid::new_v4().as_u128() % 1_000_000_000_000) as i64 + 1
}

/// A channel name no other test run has touched
pub fn unique_channel(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

pub struct TestSystem {
    pub store: Arc<InMemoryLedgerStore>,
    pub broker: Arc<InMemoryBroker>,
    pub ledger: Arc<LedgerHandler>,
    pub projection: Arc<AnalyticsProjection>,
    pub analytics: AnalyticsConsumer,
    pub consumer: Consumer,
}

impl TestSystem {
    pub fn new() -> Self {
        Self::with_policy(RedeliveryPolicy::default())
    }

    pub fn with_policy(policy: RedeliveryPolicy) -> Self {
        let store = Arc::new(InMemoryLedgerStore::new());
        let broker = Arc::new(InMemoryBroker::new(8));
        let emitter = EventEmitter::new(broker.clone(), CHANNEL);
        let ledger = Arc::new(LedgerHandler::new(store.clone(), emitter));

        let projection = Arc::new(AnalyticsProjection::new());
        let analytics = AnalyticsConsumer::new(projection.clone());
        let consumer = Consumer::new(broker.clone(), CHANNEL, policy);

        Self {
            store,
            broker,
            ledger,
            projection,
            analytics,
            consumer,
        }
    }

    pub fn ledger_app(&self) -> Router {
        api::ledger_app(self.ledger.clone(), Duration::from_secs(5))
    }

    pub fn analytics_app(&self) -> Router {
        api::analytics_app(self.projection.clone())
    }

    /// Consume everything currently queued on the channel
    pub async fn drain(&self) {
        while self.broker.pending(CHANNEL) > 0 {
            let delivery = self.broker.receive(CHANNEL).await.unwrap();
            self.consumer.process(&self.analytics, &delivery).await.unwrap();
        }
    }

    /// Wait until every emission task has reached the broker
    pub async fn wait_for_pending(&self, expected: usize) {
        for _ in 0..200 {
            if self.broker.pending(CHANNEL) >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "expected {} pending messages, found {}",
            expected,
            self.broker.pending(CHANNEL)
        );
    }
}

/// Build a request carrying the gateway identity header
pub fn request(method: &str, uri: &str, user: Option<i64>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("X-User-Id", user.to_string());
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Send a request and decode the JSON body (Null when empty or not JSON)
pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}
