//! Database module
//!
//! Pool construction and schema verification. The schema itself lives in
//! raw SQL files under `migrations/`.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::store::{BALANCE_CONSTRAINT, IDEMPOTENCY_CONSTRAINT};

/// Tables the transfer engine depends on
const REQUIRED_TABLES: [&str; 2] = ["accounts", "transfers"];

/// Constraints the transfer engine relies on for correctness
const REQUIRED_CONSTRAINTS: [(&str, &str); 2] = [
    ("accounts", BALANCE_CONSTRAINT),
    ("transfers", IDEMPOTENCY_CONSTRAINT),
];

/// Connect a pool
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

/// Verify database connectivity
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;

    Ok(())
}

/// Check that required tables and constraints exist
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    for table in REQUIRED_TABLES {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = current_schema() AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!("Required table '{}' does not exist", table);
            return Ok(false);
        }
    }

    // Without these the engine would lose idempotency or non-negativity
    for (table, constraint) in REQUIRED_CONSTRAINTS {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.table_constraints
                WHERE table_schema = current_schema()
                  AND table_name = $1
                  AND constraint_name = $2
            )
            "#,
        )
        .bind(table)
        .bind(constraint)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!(
                "Required constraint '{}' on '{}' does not exist. Please run migrations.",
                constraint,
                table
            );
            return Ok(false);
        }
    }

    tracing::info!("Schema verified: accounts, transfers");
    Ok(true)
}
