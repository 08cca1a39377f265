//! In-memory Store
//!
//! A process-local backend with the same guarantees the engine relies on
//! from Postgres: exclusive per-row locks held until the unit of work ends,
//! bounded by a lock timeout; a uniqueness constraint on the idempotency
//! triple checked at insert time; a non-negative balance check; and foreign
//! keys from ledger rows to accounts. Writes are staged in the unit of work
//! and become visible only on commit.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};

use crate::domain::{
    Account, AccountId, Balance, IdempotencyKey, NewAccount, NewTransfer, TransferId, TransferRecord,
};

use super::{
    AccountStore, Store, StoreError, StoreResult, TransferLedger, UnitOfWork, BALANCE_CONSTRAINT,
    IDEMPOTENCY_CONSTRAINT, TRANSFER_ACCOUNT_FK,
};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct AccountRow {
    account: Account,
    lock: Arc<RowLock<()>>,
}

#[derive(Debug, Default)]
struct Tables {
    accounts: BTreeMap<AccountId, AccountRow>,
    transfers: BTreeMap<TransferId, TransferRecord>,
    /// Committed idempotency keys
    idempotency_keys: HashMap<IdempotencyKey, TransferId>,
    /// Keys inserted by units of work that have not finished yet
    pending_keys: HashSet<IdempotencyKey>,
    account_seq: i64,
    transfer_seq: i64,
}

impl Tables {
    fn is_referenced(&self, id: AccountId) -> bool {
        self.transfers
            .values()
            .any(|t| t.from_account_id == id || t.to_account_id == id)
    }
}

/// Store kept entirely in process memory
#[derive(Debug, Clone)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    lock_timeout: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT)
    }
}

impl MemoryStore {
    /// Create an empty store whose row locks wait at most `lock_timeout`
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            lock_timeout,
        }
    }

    // Never held across an await
    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for the row lock of `id`. `Ok(None)` when the account is absent.
    async fn acquire_row_lock(&self, id: AccountId) -> StoreResult<Option<OwnedMutexGuard<()>>> {
        let lock = match self.tables().accounts.get(&id) {
            Some(row) => Arc::clone(&row.lock),
            None => return Ok(None),
        };

        let guard = tokio::time::timeout(self.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| StoreError::LockTimeout)?;

        // The row may have been deleted while we waited
        if self.tables().accounts.contains_key(&id) {
            Ok(Some(guard))
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn create_account(&self, account: NewAccount) -> StoreResult<Account> {
        let mut tables = self.tables();
        tables.account_seq += 1;

        let account = Account {
            id: tables.account_seq,
            owner_id: account.owner_id,
            balance: account.initial_balance.value(),
            created_at: Utc::now(),
        };
        tables.accounts.insert(
            account.id,
            AccountRow {
                account: account.clone(),
                lock: Arc::new(RowLock::new(())),
            },
        );

        Ok(account)
    }

    async fn get_account(&self, id: AccountId) -> StoreResult<Option<Account>> {
        Ok(self.tables().accounts.get(&id).map(|row| row.account.clone()))
    }

    async fn list_accounts(&self) -> StoreResult<Vec<Account>> {
        Ok(self
            .tables()
            .accounts
            .values()
            .map(|row| row.account.clone())
            .collect())
    }

    async fn set_account_balance(&self, id: AccountId, balance: Balance) -> StoreResult<Option<Account>> {
        let Some(_guard) = self.acquire_row_lock(id).await? else {
            return Ok(None);
        };

        let mut tables = self.tables();
        Ok(tables.accounts.get_mut(&id).map(|row| {
            row.account.balance = balance.value();
            row.account.clone()
        }))
    }

    async fn delete_account(&self, id: AccountId) -> StoreResult<bool> {
        let Some(_guard) = self.acquire_row_lock(id).await? else {
            return Ok(false);
        };

        let mut tables = self.tables();
        if tables.is_referenced(id) {
            return Err(StoreError::ForeignKeyViolation {
                constraint: TRANSFER_ACCOUNT_FK.to_string(),
            });
        }

        Ok(tables.accounts.remove(&id).is_some())
    }
}

#[async_trait]
impl TransferLedger for MemoryStore {
    async fn get_transfer(&self, id: TransferId) -> StoreResult<Option<TransferRecord>> {
        Ok(self.tables().transfers.get(&id).cloned())
    }

    async fn list_transfers(&self) -> StoreResult<Vec<TransferRecord>> {
        Ok(self.tables().transfers.values().cloned().collect())
    }

    async fn delete_transfer(&self, id: TransferId) -> StoreResult<bool> {
        let mut tables = self.tables();
        match tables.transfers.remove(&id) {
            Some(record) => {
                tables.idempotency_keys.remove(&record.idempotency_key());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        Ok(Box::new(MemoryUnitOfWork {
            store: self.clone(),
            held: BTreeMap::new(),
            deltas: BTreeMap::new(),
            inserted: Vec::new(),
            finished: false,
        }))
    }
}

/// Unit of work over a [`MemoryStore`].
pub struct MemoryUnitOfWork {
    store: MemoryStore,
    held: BTreeMap<AccountId, OwnedMutexGuard<()>>,
    /// Staged balance changes, applied on commit
    deltas: BTreeMap<AccountId, Decimal>,
    /// Staged ledger rows, published on commit
    inserted: Vec<TransferRecord>,
    finished: bool,
}

impl MemoryUnitOfWork {
    async fn ensure_locked(&mut self, id: AccountId) -> StoreResult<bool> {
        if self.held.contains_key(&id) {
            return Ok(true);
        }
        match self.store.acquire_row_lock(id).await? {
            Some(guard) => {
                self.held.insert(id, guard);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Committed row with this unit's staged delta applied
    fn current(&self, id: AccountId) -> Option<Account> {
        let mut account = self.store.tables().accounts.get(&id)?.account.clone();
        if let Some(delta) = self.deltas.get(&id) {
            account.balance += *delta;
        }
        Some(account)
    }

    fn release_pending_keys(&mut self) {
        if self.inserted.is_empty() {
            return;
        }
        let mut tables = self.store.tables();
        for record in self.inserted.drain(..) {
            tables.pending_keys.remove(&record.idempotency_key());
        }
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn lock_for_update(&mut self, ids: &[AccountId]) -> StoreResult<Vec<Account>> {
        let mut accounts = Vec::with_capacity(ids.len());

        for &id in ids {
            if !self.ensure_locked(id).await? {
                continue;
            }
            if let Some(account) = self.current(id) {
                accounts.push(account);
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
        if !self.ensure_locked(id).await? {
            return Ok(false);
        }
        let Some(account) = self.current(id) else {
            return Ok(false);
        };

        if account.balance < expected_min_balance {
            return Ok(false);
        }
        if account.balance + delta < Decimal::ZERO {
            return Err(StoreError::CheckViolation {
                constraint: BALANCE_CONSTRAINT.to_string(),
            });
        }

        *self.deltas.entry(id).or_insert(Decimal::ZERO) += delta;
        Ok(true)
    }

    async fn insert_transfer(&mut self, transfer: &NewTransfer) -> StoreResult<TransferRecord> {
        let key = transfer.idempotency_key();
        let mut tables = self.store.tables();

        if !tables.accounts.contains_key(&transfer.from_account_id)
            || !tables.accounts.contains_key(&transfer.to_account_id)
        {
            return Err(StoreError::ForeignKeyViolation {
                constraint: TRANSFER_ACCOUNT_FK.to_string(),
            });
        }
        if tables.idempotency_keys.contains_key(&key) || tables.pending_keys.contains(&key) {
            return Err(StoreError::UniqueViolation {
                constraint: IDEMPOTENCY_CONSTRAINT.to_string(),
            });
        }

        tables.pending_keys.insert(key);
        tables.transfer_seq += 1;
        let record = TransferRecord {
            id: tables.transfer_seq,
            from_account_id: transfer.from_account_id,
            to_account_id: transfer.to_account_id,
            amount: transfer.amount.value(),
            requested_at: transfer.requested_at,
        };
        drop(tables);

        self.inserted.push(record.clone());
        Ok(record)
    }

    async fn commit(mut self: Box<Self>) -> StoreResult<()> {
        {
            let mut tables = self.store.tables();

            // Re-check constraints against committed state before publishing
            for (id, delta) in &self.deltas {
                let row = tables.accounts.get(id).ok_or_else(|| StoreError::ForeignKeyViolation {
                    constraint: TRANSFER_ACCOUNT_FK.to_string(),
                })?;
                if row.account.balance + delta < Decimal::ZERO {
                    return Err(StoreError::CheckViolation {
                        constraint: BALANCE_CONSTRAINT.to_string(),
                    });
                }
            }

            for (id, delta) in &self.deltas {
                if let Some(row) = tables.accounts.get_mut(id) {
                    row.account.balance += *delta;
                }
            }
            for record in self.inserted.drain(..) {
                let key = record.idempotency_key();
                tables.pending_keys.remove(&key);
                tables.idempotency_keys.insert(key, record.id);
                tables.transfers.insert(record.id, record);
            }
        }

        self.finished = true;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> StoreResult<()> {
        self.release_pending_keys();
        self.deltas.clear();
        self.finished = true;
        Ok(())
    }
}

impl Drop for MemoryUnitOfWork {
    fn drop(&mut self) {
        if !self.finished {
            self.release_pending_keys();
        }
    }
}
