//! Transfer engine tests
//!
//! Run against the in-memory store, which provides the same row lock and
//! constraint guarantees as Postgres.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::{lock_order, TransferEngine};
use crate::domain::{
    Account, AccountId, Balance, NewAccount, NewTransfer, OperationContext, TransferCommand,
    TransferError, TransferId, TransferRecord,
};
use crate::store::{
    AccountStore, MemoryStore, Store, StoreError, StoreResult, TransferLedger, UnitOfWork,
    BALANCE_CONSTRAINT,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2015, 12, 20, 10, 20, 30).unwrap()
}

/// Store with one account per balance, ids assigned from 1
async fn setup(balances: &[Decimal]) -> (MemoryStore, TransferEngine) {
    setup_with_timeout(balances, Duration::from_secs(5)).await
}

async fn setup_with_timeout(balances: &[Decimal], lock_timeout: Duration) -> (MemoryStore, TransferEngine) {
    let store = MemoryStore::new(lock_timeout);
    for (owner, balance) in balances.iter().enumerate() {
        store
            .create_account(NewAccount::new(owner as i64 + 100, Balance::new(*balance).unwrap()))
            .await
            .unwrap();
    }
    let engine = TransferEngine::new(Arc::new(store.clone()));
    (store, engine)
}

async fn balance(store: &MemoryStore, id: i64) -> Decimal {
    store.get_account(id).await.unwrap().unwrap().balance
}

// =========================================================================
// Lock order
// =========================================================================

#[test]
fn test_lock_order_is_ascending() {
    assert_eq!(lock_order(1, 2), [1, 2]);
    assert_eq!(lock_order(2, 1), [1, 2]);
    assert_eq!(lock_order(-3, 7), [-3, 7]);
}

// =========================================================================
// Ledger scenarios
// =========================================================================

#[tokio::test]
async fn test_transfer_then_duplicate() {
    let (store, engine) = setup(&[dec!(1000), dec!(2000)]).await;
    let ctx = OperationContext::new();

    let record = engine
        .transfer(TransferCommand::new(1, 2, dec!(500), t0()), &ctx)
        .await
        .unwrap();
    assert_eq!(record.id, 1);
    assert_eq!(record.from_account_id, 1);
    assert_eq!(record.to_account_id, 2);
    assert_eq!(record.amount, dec!(500));
    assert_eq!(record.requested_at, t0());
    assert_eq!(balance(&store, 1).await, dec!(500));
    assert_eq!(balance(&store, 2).await, dec!(2500));

    let err = engine
        .transfer(TransferCommand::new(1, 2, dec!(500), t0()), &ctx)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        TransferError::DuplicateTransfer {
            from_account_id: 1,
            to_account_id: 2,
            requested_at: t0(),
        }
    );
    assert_eq!(balance(&store, 1).await, dec!(500));
    assert_eq!(balance(&store, 2).await, dec!(2500));
    assert_eq!(store.list_transfers().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_duplicate_key_ignores_amount() {
    let (store, engine) = setup(&[dec!(1000), dec!(2000)]).await;
    let ctx = OperationContext::new();

    engine
        .transfer(TransferCommand::new(1, 2, dec!(100), t0()), &ctx)
        .await
        .unwrap();
    let err = engine
        .transfer(TransferCommand::new(1, 2, dec!(1), t0()), &ctx)
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::DuplicateTransfer { .. }));
    assert_eq!(balance(&store, 1).await, dec!(900));

    // Same pair reversed, or a later instant, is a different request
    engine
        .transfer(TransferCommand::new(2, 1, dec!(1), t0()), &ctx)
        .await
        .unwrap();
    engine
        .transfer(
            TransferCommand::new(1, 2, dec!(1), t0() + ChronoDuration::microseconds(1)),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(store.list_transfers().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_sub_microsecond_timestamps_share_a_key() {
    let (store, engine) = setup(&[dec!(1000), dec!(2000)]).await;
    let ctx = OperationContext::new();

    engine
        .transfer(TransferCommand::new(1, 2, dec!(10), t0()), &ctx)
        .await
        .unwrap();
    let err = engine
        .transfer(
            TransferCommand::new(1, 2, dec!(10), t0() + ChronoDuration::nanoseconds(1)),
            &ctx,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::DuplicateTransfer { .. }), "{:?}", err);
    assert_eq!(balance(&store, 1).await, dec!(990));
    assert_eq!(store.list_transfers().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_insufficient_funds_leaves_no_trace() {
    let (store, engine) = setup(&[dec!(1000), dec!(2000)]).await;

    let err = engine
        .transfer(TransferCommand::new(1, 2, dec!(2000), t0()), &OperationContext::new())
        .await
        .unwrap_err();

    assert_eq!(err, TransferError::InsufficientFunds { account_id: 1 });
    assert_eq!(balance(&store, 1).await, dec!(1000));
    assert_eq!(balance(&store, 2).await, dec!(2000));
    assert!(store.list_transfers().await.unwrap().is_empty());

    // The failed attempt did not consume the idempotency key
    engine
        .transfer(TransferCommand::new(1, 2, dec!(1000), t0()), &OperationContext::new())
        .await
        .unwrap();
    assert_eq!(balance(&store, 1).await, dec!(0));
    assert_eq!(balance(&store, 2).await, dec!(3000));
}

#[tokio::test]
async fn test_invalid_requests() {
    let (store, engine) = setup(&[dec!(1000), dec!(2000)]).await;
    let ctx = OperationContext::new();

    for amount in [dec!(0), dec!(-1), dec!(0.001)] {
        let err = engine
            .transfer(TransferCommand::new(1, 2, amount, t0()), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidTransfer(_)), "{}: {:?}", amount, err);
    }

    let err = engine
        .transfer(TransferCommand::default(), &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::InvalidTransfer(_)));
    assert!(store.list_transfers().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_self_transfer_rejected_before_locking() {
    let (store, engine) = setup_with_timeout(&[dec!(1000)], Duration::from_millis(20)).await;

    // Hold the only row lock; any attempt to lock would time out
    let mut holder = store.begin().await.unwrap();
    holder.lock_for_update(&[1]).await.unwrap();

    let err = engine
        .transfer(TransferCommand::new(1, 1, dec!(10), t0()), &OperationContext::new())
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::InvalidTransfer(ref msg) if msg.contains("self-transfer")));

    holder.rollback().await.unwrap();
    assert_eq!(balance(&store, 1).await, dec!(1000));
}

#[tokio::test]
async fn test_account_not_found() {
    let (store, engine) = setup(&[dec!(1000), dec!(2000)]).await;
    let ctx = OperationContext::new();

    let err = engine
        .transfer(TransferCommand::new(99, 2, dec!(1), t0()), &ctx)
        .await
        .unwrap_err();
    assert_eq!(err, TransferError::AccountNotFound(99));

    let err = engine
        .transfer(TransferCommand::new(1, 99, dec!(1), t0()), &ctx)
        .await
        .unwrap_err();
    assert_eq!(err, TransferError::AccountNotFound(99));

    assert_eq!(balance(&store, 1).await, dec!(1000));
    assert!(store.list_transfers().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_lock_timeout_is_transfer_failed() {
    let (store, engine) = setup_with_timeout(&[dec!(1000), dec!(2000)], Duration::from_millis(50)).await;

    let mut holder = store.begin().await.unwrap();
    holder.lock_for_update(&[2]).await.unwrap();

    let err = engine
        .transfer(TransferCommand::new(1, 2, dec!(10), t0()), &OperationContext::new())
        .await
        .unwrap_err();
    assert_eq!(err, TransferError::TransferFailed);
    assert!(err.is_retryable());

    holder.rollback().await.unwrap();
    assert_eq!(balance(&store, 1).await, dec!(1000));
    assert_eq!(balance(&store, 2).await, dec!(2000));
    assert!(store.list_transfers().await.unwrap().is_empty());

    // Retrying the identical request once the lock is free succeeds
    engine
        .transfer(TransferCommand::new(1, 2, dec!(10), t0()), &OperationContext::new())
        .await
        .unwrap();
}

// =========================================================================
// Concurrency
// =========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposite_transfers_do_not_deadlock() {
    let (store, engine) = setup_with_timeout(&[dec!(1000), dec!(2000)], Duration::from_secs(2)).await;

    let a_to_b = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .transfer(TransferCommand::new(1, 2, dec!(500), t0()), &OperationContext::new())
                .await
        })
    };
    let b_to_a = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .transfer(TransferCommand::new(2, 1, dec!(300), t0()), &OperationContext::new())
                .await
        })
    };

    a_to_b.await.unwrap().unwrap();
    b_to_a.await.unwrap().unwrap();

    assert_eq!(balance(&store, 1).await, dec!(800));
    assert_eq!(balance(&store, 2).await, dec!(2200));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_transfers_conserve_and_never_go_negative() {
    let initial = [dec!(100), dec!(250), dec!(0), dec!(75.50)];
    let (store, engine) = setup_with_timeout(&initial, Duration::from_secs(10)).await;
    let total: Decimal = initial.iter().sum();

    let mut handles = Vec::new();
    for i in 0..200i64 {
        let engine = engine.clone();
        let from = i % 4 + 1;
        let to = (i * 7 + 1) % 4 + 1;
        let amount = Decimal::new(1 + (i * 37) % 9000, 2);
        let requested_at = t0() + ChronoDuration::milliseconds(i);

        handles.push(tokio::spawn(async move {
            engine
                .transfer(TransferCommand::new(from, to, amount, requested_at), &OperationContext::new())
                .await
        }));
    }

    let mut committed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => committed += 1,
            Err(TransferError::InsufficientFunds { .. }) | Err(TransferError::InvalidTransfer(_)) => {}
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    let accounts = store.list_accounts().await.unwrap();
    assert!(accounts.iter().all(|a| a.balance >= Decimal::ZERO));
    assert_eq!(accounts.iter().map(|a| a.balance).sum::<Decimal>(), total);
    assert_eq!(store.list_transfers().await.unwrap().len(), committed);
    assert!(committed > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_replays_apply_once() {
    let (store, engine) = setup(&[dec!(1000), dec!(2000)]).await;

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .transfer(TransferCommand::new(1, 2, dec!(10), t0()), &OperationContext::new())
                    .await
            })
        })
        .collect();

    let mut ok = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(err) => assert!(matches!(err, TransferError::DuplicateTransfer { .. }), "{:?}", err),
        }
    }

    assert_eq!(ok, 1);
    assert_eq!(balance(&store, 1).await, dec!(990));
    assert_eq!(balance(&store, 2).await, dec!(2010));
}

// =========================================================================
// Guarded update failures
// =========================================================================

/// How the scripted unit of work answers the balance updates
#[derive(Debug, Clone, Copy)]
enum Script {
    DebitMatchesNoRow,
    DebitViolatesCheck,
    CreditMatchesNoRow,
}

#[derive(Default)]
struct Calls {
    inserted: AtomicBool,
    committed: AtomicBool,
    rolled_back: AtomicBool,
}

/// Store whose rows always pass the funds check but whose updates fail as
/// scripted, standing in for a backend with weaker row locks.
struct ScriptedStore {
    script: Script,
    calls: Arc<Calls>,
}

struct ScriptedUnit {
    script: Script,
    calls: Arc<Calls>,
}

#[async_trait]
impl AccountStore for ScriptedStore {
    async fn create_account(&self, _account: NewAccount) -> StoreResult<Account> {
        unreachable!("engine never creates accounts")
    }

    async fn get_account(&self, _id: AccountId) -> StoreResult<Option<Account>> {
        Ok(None)
    }

    async fn list_accounts(&self) -> StoreResult<Vec<Account>> {
        Ok(Vec::new())
    }

    async fn set_account_balance(&self, _id: AccountId, _balance: Balance) -> StoreResult<Option<Account>> {
        Ok(None)
    }

    async fn delete_account(&self, _id: AccountId) -> StoreResult<bool> {
        Ok(false)
    }
}

#[async_trait]
impl TransferLedger for ScriptedStore {
    async fn get_transfer(&self, _id: TransferId) -> StoreResult<Option<TransferRecord>> {
        Ok(None)
    }

    async fn list_transfers(&self) -> StoreResult<Vec<TransferRecord>> {
        Ok(Vec::new())
    }

    async fn delete_transfer(&self, _id: TransferId) -> StoreResult<bool> {
        Ok(false)
    }
}

#[async_trait]
impl Store for ScriptedStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        Ok(Box::new(ScriptedUnit {
            script: self.script,
            calls: Arc::clone(&self.calls),
        }))
    }
}

#[async_trait]
impl UnitOfWork for ScriptedUnit {
    async fn lock_for_update(&mut self, ids: &[AccountId]) -> StoreResult<Vec<Account>> {
        Ok(ids
            .iter()
            .map(|&id| Account {
                id,
                owner_id: id,
                balance: dec!(1000.00),
                created_at: t0(),
            })
            .collect())
    }

    async fn conditional_apply_delta(
        &mut self,
        _id: AccountId,
        delta: Decimal,
        _expected_min_balance: Decimal,
    ) -> StoreResult<bool> {
        let debit = delta < Decimal::ZERO;
        match (self.script, debit) {
            (Script::DebitMatchesNoRow, true) => Ok(false),
            (Script::DebitViolatesCheck, true) => Err(StoreError::CheckViolation {
                constraint: BALANCE_CONSTRAINT.to_string(),
            }),
            (Script::CreditMatchesNoRow, false) => Ok(false),
            _ => Ok(true),
        }
    }

    async fn insert_transfer(&mut self, transfer: &NewTransfer) -> StoreResult<TransferRecord> {
        self.calls.inserted.store(true, Ordering::SeqCst);
        Ok(TransferRecord {
            id: 1,
            from_account_id: transfer.from_account_id,
            to_account_id: transfer.to_account_id,
            amount: transfer.amount.value(),
            requested_at: transfer.requested_at,
        })
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.calls.committed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.calls.rolled_back.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_failed_guarded_update_is_insufficient_funds_and_rolls_back() {
    for script in [
        Script::DebitMatchesNoRow,
        Script::DebitViolatesCheck,
        Script::CreditMatchesNoRow,
    ] {
        let calls = Arc::new(Calls::default());
        let engine = TransferEngine::new(Arc::new(ScriptedStore {
            script,
            calls: Arc::clone(&calls),
        }));

        let err = engine
            .transfer(TransferCommand::new(1, 2, dec!(100), t0()), &OperationContext::new())
            .await
            .unwrap_err();

        assert_eq!(err, TransferError::InsufficientFunds { account_id: 1 }, "{:?}", script);
        assert!(calls.rolled_back.load(Ordering::SeqCst), "{:?}", script);
        assert!(!calls.committed.load(Ordering::SeqCst), "{:?}", script);
        assert!(!calls.inserted.load(Ordering::SeqCst), "{:?}", script);
    }
}
