//! Transfer Engine
//!
//! Moves money between two accounts inside one unit of work:
//! validate, lock both rows in ascending id order, check funds, apply the
//! guarded debit and the credit, record the ledger row, commit. Any failure
//! rolls the unit back before the error is returned.
//!
//! The engine holds no in-process locks. Mutual exclusion and idempotency
//! are delegated entirely to the [`Store`].

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{
    AccountId, NewTransfer, OperationContext, TransferCommand, TransferError, TransferRecord,
};
use crate::store::{Store, StoreError, UnitOfWork};

#[cfg(test)]
mod tests;

/// Canonical lock order for a pair of accounts: ascending by id.
///
/// Every operation that locks two accounts must use this order, otherwise
/// A->B and B->A running together can deadlock.
pub fn lock_order(a: AccountId, b: AccountId) -> [AccountId; 2] {
    if a <= b {
        [a, b]
    } else {
        [b, a]
    }
}

/// Executes transfers against a shared [`Store`]
#[derive(Clone)]
pub struct TransferEngine {
    store: Arc<dyn Store>,
}

impl TransferEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Execute a transfer request.
    ///
    /// Returns the ledger record on success. On error nothing has been
    /// written: balances and the ledger are exactly as before the call.
    #[instrument(
        name = "transfer",
        skip(self, command, context),
        fields(
            correlation_id = ?context.correlation_id,
            client_ip = ?context.client_ip,
            from = ?command.from_account_id,
            to = ?command.to_account_id,
        )
    )]
    pub async fn transfer(
        &self,
        command: TransferCommand,
        context: &OperationContext,
    ) -> Result<TransferRecord, TransferError> {
        // Shape checks happen before any storage access
        let transfer = command.validate().map_err(|e| {
            debug!(error = %e, "Rejected transfer request");
            e
        })?;

        let mut uow = self
            .store
            .begin()
            .await
            .map_err(|e| classify_store_error(e, &transfer, "begin"))?;

        let outcome = execute(&mut *uow, &transfer).await;
        match outcome {
            Ok(record) => {
                uow.commit()
                    .await
                    .map_err(|e| classify_store_error(e, &transfer, "commit"))?;

                info!(
                    transfer_id = record.id,
                    amount = %record.amount,
                    requested_at = %record.requested_at,
                    "Transfer committed"
                );
                Ok(record)
            }
            Err(err) => {
                if let Err(rollback_err) = uow.rollback().await {
                    // The backend discards the transaction anyway once it is dropped
                    warn!(error = %rollback_err, "Rollback failed");
                }
                Err(err)
            }
        }
    }
}

/// Steps that run inside the unit of work. The caller commits or rolls back.
async fn execute(
    uow: &mut dyn UnitOfWork,
    transfer: &NewTransfer,
) -> Result<TransferRecord, TransferError> {
    let from = transfer.from_account_id;
    let to = transfer.to_account_id;
    let amount = transfer.amount.value();

    // 1. Ordered row locks
    let locked = uow
        .lock_for_update(&lock_order(from, to))
        .await
        .map_err(|e| classify_store_error(e, transfer, "lock"))?;

    let source = locked
        .iter()
        .find(|a| a.id == from)
        .ok_or(TransferError::AccountNotFound(from))?;
    if !locked.iter().any(|a| a.id == to) {
        return Err(TransferError::AccountNotFound(to));
    }

    // 2. Funds check under lock
    let available = source.balance().map_err(|e| {
        error!(account_id = from, error = %e, "Stored balance is invalid");
        TransferError::TransferFailed
    })?;
    if !available.is_sufficient_for(&transfer.amount) {
        debug!(account_id = from, balance = %available, %amount, "Insufficient funds");
        return Err(TransferError::InsufficientFunds { account_id: from });
    }

    // 3. Guarded debit, then credit
    let debited = uow
        .conditional_apply_delta(from, -amount, amount)
        .await
        .map_err(|e| classify_store_error(e, transfer, "debit"))?;
    if !debited {
        warn!(account_id = from, "Guarded debit matched no row; balance changed under lock");
        return Err(TransferError::InsufficientFunds { account_id: from });
    }

    let credited = uow
        .conditional_apply_delta(to, amount, Decimal::ZERO)
        .await
        .map_err(|e| classify_store_error(e, transfer, "credit"))?;
    if !credited {
        warn!(account_id = to, "Credit matched no row");
        return Err(TransferError::InsufficientFunds { account_id: from });
    }

    // 4. Ledger row; the uniqueness constraint is the only idempotency check
    uow.insert_transfer(transfer)
        .await
        .map_err(|e| classify_store_error(e, transfer, "insert"))
}

/// Map a storage failure to the caller-visible outcome, logging the detail
/// that the caller does not get to see.
fn classify_store_error(err: StoreError, transfer: &NewTransfer, stage: &'static str) -> TransferError {
    let key = transfer.idempotency_key();

    match err {
        StoreError::UniqueViolation { .. } => {
            info!(%key, stage, "Duplicate transfer rejected");
            TransferError::DuplicateTransfer {
                from_account_id: key.from_account_id,
                to_account_id: key.to_account_id,
                requested_at: key.requested_at,
            }
        }
        StoreError::CheckViolation { constraint } => {
            warn!(%key, stage, %constraint, "Balance constraint rejected write");
            TransferError::InsufficientFunds {
                account_id: transfer.from_account_id,
            }
        }
        StoreError::LockTimeout => {
            warn!(%key, stage, "Timed out waiting for account locks");
            TransferError::TransferFailed
        }
        other => {
            error!(%key, stage, error = %other, "Transfer aborted by storage failure");
            TransferError::TransferFailed
        }
    }
}
