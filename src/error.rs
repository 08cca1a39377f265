//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::{AccountId, TransferError, TransferId};
use crate::store::StoreError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransferId),

    #[error("Account {0} is referenced by recorded transactions")]
    AccountInUse(AccountId),

    // Transfer outcomes
    #[error(transparent)]
    Transfer(#[from] TransferError),

    // Server errors (5xx)
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl AppError {
    fn status_code_and_details(&self) -> (StatusCode, &'static str, Option<String>) {
        match self {
            // 400 Bad Request
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
            }

            // 404 Not Found
            AppError::AccountNotFound(id) => {
                (StatusCode::NOT_FOUND, "account_not_found", Some(id.to_string()))
            }
            AppError::TransactionNotFound(id) => {
                (StatusCode::NOT_FOUND, "transaction_not_found", Some(id.to_string()))
            }

            // 409 Conflict
            AppError::AccountInUse(id) => {
                (StatusCode::CONFLICT, "account_in_use", Some(id.to_string()))
            }

            // Transfer errors carry their own code
            AppError::Transfer(err) => {
                let status = match err {
                    TransferError::InvalidTransfer(_) | TransferError::InsufficientFunds { .. } => {
                        StatusCode::BAD_REQUEST
                    }
                    TransferError::DuplicateTransfer { .. } => StatusCode::CONFLICT,
                    TransferError::AccountNotFound(_) => StatusCode::NOT_FOUND,
                    TransferError::TransferFailed => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let details = match err {
                    TransferError::InvalidTransfer(msg) => Some(msg.clone()),
                    TransferError::InsufficientFunds { account_id }
                    | TransferError::AccountNotFound(account_id) => Some(account_id.to_string()),
                    TransferError::DuplicateTransfer { .. } => Some(err.to_string()),
                    // System errors are reported generically
                    TransferError::TransferFailed => None,
                };
                (status, err.code(), details)
            }

            // 500 Internal Server Error
            AppError::Store(e) => {
                tracing::error!("Storage error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "storage_error", None)
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::InvalidRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = self.status_code_and_details();

        // Never echo storage internals to the caller
        let error = if status.is_server_error() {
            match &self {
                AppError::Transfer(err) => err.to_string(),
                _ => "Internal server error".to_string(),
            }
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            error,
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn status_of(err: AppError) -> (StatusCode, &'static str) {
        let (status, code, _) = err.status_code_and_details();
        (status, code)
    }

    #[test]
    fn test_transfer_error_status_mapping() {
        let cases = [
            (TransferError::invalid("self-transfer"), StatusCode::BAD_REQUEST, "invalid_transfer"),
            (
                TransferError::InsufficientFunds { account_id: 1 },
                StatusCode::BAD_REQUEST,
                "insufficient_funds",
            ),
            (
                TransferError::DuplicateTransfer {
                    from_account_id: 1,
                    to_account_id: 2,
                    requested_at: Utc.timestamp_opt(0, 0).unwrap(),
                },
                StatusCode::CONFLICT,
                "duplicate_transfer",
            ),
            (TransferError::AccountNotFound(9), StatusCode::NOT_FOUND, "account_not_found"),
            (
                TransferError::TransferFailed,
                StatusCode::INTERNAL_SERVER_ERROR,
                "transfer_failed",
            ),
        ];

        for (err, status, code) in cases {
            assert_eq!(status_of(AppError::from(err)), (status, code));
        }
    }

    #[test]
    fn test_transfer_failed_has_no_details() {
        let (_, _, details) = AppError::from(TransferError::TransferFailed).status_code_and_details();
        assert!(details.is_none());
    }

    #[test]
    fn test_crud_error_status_mapping() {
        assert_eq!(
            status_of(AppError::TransactionNotFound(3)),
            (StatusCode::NOT_FOUND, "transaction_not_found")
        );
        assert_eq!(
            status_of(AppError::AccountInUse(3)),
            (StatusCode::CONFLICT, "account_in_use")
        );
        assert_eq!(
            status_of(AppError::Store(StoreError::LockTimeout)),
            (StatusCode::INTERNAL_SERVER_ERROR, "storage_error")
        );
    }
}
