//! Store module
//!
//! Storage contracts used by the transfer engine and the CRUD surface.
//! The engine depends on these traits, never on a concrete backend, so any
//! backend that supplies ordered exclusive row locks spanning a unit of work
//! and write-time uniqueness/non-negativity constraints can be substituted.

mod error;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::{Account, AccountId, Balance, NewAccount, NewTransfer, TransferId, TransferRecord};

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Name of the storage constraint enforcing the idempotency triple
pub const IDEMPOTENCY_CONSTRAINT: &str = "uq_transfers_idempotency";

/// Name of the storage constraint enforcing `balance >= 0`
pub const BALANCE_CONSTRAINT: &str = "ck_accounts_balance_non_negative";

/// Name prefix of the foreign keys from ledger rows to accounts
pub const TRANSFER_ACCOUNT_FK: &str = "fk_transfers_account";

// =============================================================================
// Repository Traits
// =============================================================================

/// Single-row account operations outside any transfer.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert a new account and return it with its assigned id.
    async fn create_account(&self, account: NewAccount) -> StoreResult<Account>;

    /// Get account by id, without locking.
    async fn get_account(&self, id: AccountId) -> StoreResult<Option<Account>>;

    /// List all accounts ordered by id.
    async fn list_accounts(&self) -> StoreResult<Vec<Account>>;

    /// Administrative balance overwrite. Bypasses the transfer engine and
    /// therefore does not preserve conservation.
    async fn set_account_balance(&self, id: AccountId, balance: Balance) -> StoreResult<Option<Account>>;

    /// Delete an account. Fails with `ForeignKeyViolation` while ledger rows
    /// reference it.
    async fn delete_account(&self, id: AccountId) -> StoreResult<bool>;
}

/// Read and administrative access to recorded transfers.
#[async_trait]
pub trait TransferLedger: Send + Sync {
    /// Get transfer by id.
    async fn get_transfer(&self, id: TransferId) -> StoreResult<Option<TransferRecord>>;

    /// List transfers ordered by id.
    async fn list_transfers(&self) -> StoreResult<Vec<TransferRecord>>;

    /// Remove a ledger row. Balances are not reversed.
    async fn delete_transfer(&self, id: TransferId) -> StoreResult<bool>;
}

/// A backend that can open atomic units of work.
#[async_trait]
pub trait Store: AccountStore + TransferLedger + 'static {
    /// Begin a unit of work.
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>>;
}

/// A group of storage operations that commit or roll back together.
///
/// Dropping an uncommitted unit of work rolls it back and releases its locks.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Acquire exclusive row locks on `ids`, one at a time in the order
    /// given, and return the rows that exist. Locks are held until commit
    /// or rollback. Callers that lock more than one account must pass ids
    /// in ascending order (see [`crate::engine::lock_order`]).
    async fn lock_for_update(&mut self, ids: &[AccountId]) -> StoreResult<Vec<Account>>;

    /// Add `delta` to the balance of `id` if its current balance is at least
    /// `expected_min_balance`. Returns `false` when no row was updated.
    async fn conditional_apply_delta(
        &mut self,
        id: AccountId,
        delta: Decimal,
        expected_min_balance: Decimal,
    ) -> StoreResult<bool>;

    /// Insert a ledger row. Fails with `UniqueViolation` when the
    /// idempotency triple is already present.
    async fn insert_transfer(&mut self, transfer: &NewTransfer) -> StoreResult<TransferRecord>;

    /// Make every change in this unit durable and visible.
    async fn commit(self: Box<Self>) -> StoreResult<()>;

    /// Discard every change in this unit.
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
