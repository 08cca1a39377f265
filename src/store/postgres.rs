//! Postgres Store
//!
//! Production backend. Row locks are `SELECT ... FOR UPDATE` inside a
//! transaction whose `lock_timeout` comes from configuration; idempotency
//! and non-negativity are enforced by the schema constraints in
//! `migrations/`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};

use crate::domain::{Account, AccountId, Balance, NewAccount, NewTransfer, TransferId, TransferRecord};

use super::{AccountStore, Store, StoreResult, TransferLedger, UnitOfWork};

type AccountRow = (i64, i64, Decimal, DateTime<Utc>);
type TransferRow = (i64, i64, i64, Decimal, DateTime<Utc>);

fn account_from_row((id, owner_id, balance, created_at): AccountRow) -> Account {
    Account {
        id,
        owner_id,
        balance,
        created_at,
    }
}

fn transfer_from_row((id, from_account_id, to_account_id, amount, requested_at): TransferRow) -> TransferRecord {
    TransferRecord {
        id,
        from_account_id,
        to_account_id,
        amount,
        requested_at,
    }
}

/// Store backed by a Postgres connection pool
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgStore {
    /// Create a new PgStore
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }
}

#[async_trait]
impl AccountStore for PgStore {
    async fn create_account(&self, account: NewAccount) -> StoreResult<Account> {
        let row: AccountRow = sqlx::query_as(
            r#"
            INSERT INTO accounts (owner_id, balance)
            VALUES ($1, $2)
            RETURNING id, owner_id, balance, created_at
            "#,
        )
        .bind(account.owner_id)
        .bind(account.initial_balance.value())
        .fetch_one(&self.pool)
        .await?;

        Ok(account_from_row(row))
    }

    async fn get_account(&self, id: AccountId) -> StoreResult<Option<Account>> {
        let row: Option<AccountRow> = sqlx::query_as(
            "SELECT id, owner_id, balance, created_at FROM accounts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(account_from_row))
    }

    async fn list_accounts(&self) -> StoreResult<Vec<Account>> {
        let rows: Vec<AccountRow> = sqlx::query_as(
            "SELECT id, owner_id, balance, created_at FROM accounts ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(account_from_row).collect())
    }

    async fn set_account_balance(&self, id: AccountId, balance: Balance) -> StoreResult<Option<Account>> {
        let row: Option<AccountRow> = sqlx::query_as(
            r#"
            UPDATE accounts
            SET balance = $2
            WHERE id = $1
            RETURNING id, owner_id, balance, created_at
            "#,
        )
        .bind(id)
        .bind(balance.value())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(account_from_row))
    }

    async fn delete_account(&self, id: AccountId) -> StoreResult<bool> {
        let rows = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(rows > 0)
    }
}

#[async_trait]
impl TransferLedger for PgStore {
    async fn get_transfer(&self, id: TransferId) -> StoreResult<Option<TransferRecord>> {
        let row: Option<TransferRow> = sqlx::query_as(
            r#"
            SELECT id, from_account_id, to_account_id, amount, requested_at
            FROM transfers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(transfer_from_row))
    }

    async fn list_transfers(&self) -> StoreResult<Vec<TransferRecord>> {
        let rows: Vec<TransferRow> = sqlx::query_as(
            r#"
            SELECT id, from_account_id, to_account_id, amount, requested_at
            FROM transfers
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(transfer_from_row).collect())
    }

    async fn delete_transfer(&self, id: TransferId) -> StoreResult<bool> {
        let rows = sqlx::query("DELETE FROM transfers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(rows > 0)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        let mut tx = self.pool.begin().await?;

        // Scoped to this transaction only
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PgUnitOfWork { tx }))
    }
}

/// Unit of work over a single Postgres transaction.
///
/// Dropping it without commit lets sqlx roll the transaction back.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn lock_for_update(&mut self, ids: &[AccountId]) -> StoreResult<Vec<Account>> {
        let mut accounts = Vec::with_capacity(ids.len());

        // One statement per row so the lock order is exactly the caller's order
        for id in ids {
            let row: Option<AccountRow> = sqlx::query_as(
                r#"
                SELECT id, owner_id, balance, created_at
                FROM accounts
                WHERE id = $1
                FOR UPDATE
                "#,
            )
            .bind(*id)
            .fetch_optional(&mut *self.tx)
            .await?;

            if let Some(row) = row {
                accounts.push(account_from_row(row));
            }
        }

        Ok(accounts)
    }

    async fn conditional_apply_delta(
        &mut self,
        id: AccountId,
        delta: Decimal,
        expected_min_balance: Decimal,
    ) -> StoreResult<bool> {
        let rows = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = balance + $2
            WHERE id = $1 AND balance >= $3
            "#,
        )
        .bind(id)
        .bind(delta)
        .bind(expected_min_balance)
        .execute(&mut *self.tx)
        .await?
        .rows_affected();

        Ok(rows == 1)
    }

    async fn insert_transfer(&mut self, transfer: &NewTransfer) -> StoreResult<TransferRecord> {
        let row: TransferRow = sqlx::query_as(
            r#"
            INSERT INTO transfers (from_account_id, to_account_id, amount, requested_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, from_account_id, to_account_id, amount, requested_at
            "#,
        )
        .bind(transfer.from_account_id)
        .bind(transfer.to_account_id)
        .bind(transfer.amount.value())
        .bind(transfer.requested_at)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(transfer_from_row(row))
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let this = *self;
        this.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        let this = *self;
        this.tx.rollback().await?;
        Ok(())
    }
}
