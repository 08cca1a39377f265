//! Common test utilities

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use std::str::FromStr;

use instant_transfers::api::{self, AppState};
use instant_transfers::store::MemoryStore;

const MIGRATION: &str = include_str!("../../migrations/0001_create_accounts_and_transfers.sql");

/// Serializes schema setup across test binaries running at the same time
const MIGRATION_LOCK_KEY: i64 = 0x1ed6_e7a1;

/// Full application router over a fresh in-memory store
pub fn memory_app() -> (Router, MemoryStore) {
    let store = MemoryStore::new(Duration::from_secs(2));
    let app = api::build_router(AppState::new(Arc::new(store.clone())));
    (app, store)
}

/// Build a JSON request
pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Build a request without a body
pub fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Read a response body as bytes
pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

/// Read a response body as JSON
pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Decimal fields serialize as strings; accept numbers too
pub fn as_decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).unwrap(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).unwrap(),
        other => panic!("not a decimal: {:?}", other),
    }
}

/// Connect to DATABASE_URL and apply the schema.
///
/// Returns `None` when DATABASE_URL is not set so Postgres tests can be
/// skipped on machines without a database.
pub async fn setup_test_db() -> Option<PgPool> {
    dotenvy::dotenv().ok();
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(url) if !url.is_empty() => url,
        _ => {
            eprintln!("DATABASE_URL not set; skipping Postgres test");
            return None;
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    // Advisory locks are per session, so lock and migrate on one connection
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    sqlx::query("SELECT pg_advisory_lock($1)")
        .bind(MIGRATION_LOCK_KEY)
        .execute(&mut *conn)
        .await
        .expect("Failed to take migration lock");
    (&mut *conn)
        .execute(MIGRATION)
        .await
        .expect("Failed to apply migration");
    sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(MIGRATION_LOCK_KEY)
        .execute(&mut *conn)
        .await
        .expect("Failed to release migration lock");
    drop(conn);

    Some(pool)
}
