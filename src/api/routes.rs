//! API Routes
//!
//! HTTP endpoint definitions.

use std::sync::Arc;

use axum::{
    extract::{Extension, FromRequest, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{
    Account, AccountId, Balance, NewAccount, OperationContext, OwnerId, TransferCommand, TransferId,
    TransferRecord,
};
use crate::engine::TransferEngine;
use crate::error::{AppError, AppResult};
use crate::store::{Store, StoreError};

// =========================================================================
// State
// =========================================================================

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub engine: TransferEngine,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>) -> Self {
        let engine = TransferEngine::new(Arc::clone(&store));
        Self { store, engine }
    }
}

/// JSON extractor whose rejections are reported as `400 invalid_request`
/// instead of axum's default 415/422 responses.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateAccountRequest {
    pub owner_id: OwnerId,
    #[serde(default)]
    pub initial_balance: Option<Decimal>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateAccountRequest {
    pub balance: Decimal,
}

/// Transfer request body. Fields are validated by the engine.
pub type CreateTransactionRequest = TransferCommand;

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<AppState> {
    Router::new()
        // Accounts
        .route("/accounts", get(list_accounts).post(create_account))
        .route(
            "/accounts/:account_id",
            get(get_account).put(update_account).delete(delete_account),
        )
        // Transactions
        .route("/transactions", get(list_transactions).post(create_transaction))
        .route(
            "/transactions/:transaction_id",
            get(get_transaction).delete(delete_transaction),
        )
}

// =========================================================================
// Accounts
// =========================================================================

/// List all accounts
async fn list_accounts(State(state): State<AppState>) -> AppResult<Json<Vec<Account>>> {
    Ok(Json(state.store.list_accounts().await?))
}

/// Get account by ID
async fn get_account(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
) -> AppResult<Json<Account>> {
    let account = state
        .store
        .get_account(account_id)
        .await?
        .ok_or(AppError::AccountNotFound(account_id))?;

    Ok(Json(account))
}

/// Create an account
async fn create_account(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<CreateAccountRequest>,
) -> AppResult<impl IntoResponse> {
    let initial_balance = match request.initial_balance {
        Some(value) => Balance::new(value)
            .map_err(|e| AppError::InvalidRequest(format!("initial_balance: {}", e)))?,
        None => Balance::zero(),
    };

    let account = state
        .store
        .create_account(NewAccount::new(request.owner_id, initial_balance))
        .await?;

    tracing::info!(account_id = account.id, owner_id = account.owner_id, "Account created");

    let location = format!("/api/accounts/{}", account.id);
    Ok((StatusCode::CREATED, [(header::LOCATION, location)], Json(account)))
}

/// Administrative balance overwrite.
///
/// Bypasses the transfer engine, so the ledger no longer explains the
/// resulting balance.
async fn update_account(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
    ApiJson(request): ApiJson<UpdateAccountRequest>,
) -> AppResult<Json<Account>> {
    let balance = Balance::new(request.balance)
        .map_err(|e| AppError::InvalidRequest(format!("balance: {}", e)))?;

    let account = state
        .store
        .set_account_balance(account_id, balance)
        .await?
        .ok_or(AppError::AccountNotFound(account_id))?;

    tracing::warn!(
        account_id,
        balance = %account.balance,
        "Account balance overwritten outside the transfer engine"
    );

    Ok(Json(account))
}

/// Delete an account that no transaction references
async fn delete_account(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
) -> AppResult<String> {
    let deleted = state
        .store
        .delete_account(account_id)
        .await
        .map_err(|e| match e {
            StoreError::ForeignKeyViolation { .. } => AppError::AccountInUse(account_id),
            other => AppError::Store(other),
        })?;

    if !deleted {
        return Err(AppError::AccountNotFound(account_id));
    }

    Ok(format!("deleted account id {} successfully", account_id))
}

// =========================================================================
// Transactions
// =========================================================================

/// List recorded transactions
async fn list_transactions(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<TransferRecord>>> {
    Ok(Json(state.store.list_transfers().await?))
}

/// Get a recorded transaction by ID
async fn get_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<TransferId>,
) -> AppResult<Json<TransferRecord>> {
    let record = state
        .store
        .get_transfer(transaction_id)
        .await?
        .ok_or(AppError::TransactionNotFound(transaction_id))?;

    Ok(Json(record))
}

/// Execute a transfer
async fn create_transaction(
    State(state): State<AppState>,
    context: Option<Extension<OperationContext>>,
    ApiJson(request): ApiJson<CreateTransactionRequest>,
) -> AppResult<impl IntoResponse> {
    let context = context.map(|Extension(ctx)| ctx).unwrap_or_default();

    let record = state.engine.transfer(request, &context).await?;

    let location = format!("/api/transactions/{}", record.id);
    Ok((StatusCode::CREATED, [(header::LOCATION, location)], Json(record)))
}

/// Remove a ledger row. Balances are not reversed.
async fn delete_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<TransferId>,
) -> AppResult<StatusCode> {
    if !state.store.delete_transfer(transaction_id).await? {
        return Err(AppError::TransactionNotFound(transaction_id));
    }

    tracing::warn!(transaction_id, "Ledger row deleted; balances left unchanged");
    Ok(StatusCode::NO_CONTENT)
}
