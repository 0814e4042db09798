//! Maps engine errors onto the HTTP error envelope.

use crate::core::error::EngineError;
use actix_web::http::StatusCode;
use tally_common::error::{AccountError, TransferError};

/// Status code and stable error code for a failure. Messages for internal
/// failures are withheld from the wire.
pub fn error_parts(err: &EngineError) -> (StatusCode, &'static str, String) {
    match err {
        EngineError::AccountNotFound(id) => (
            StatusCode::NOT_FOUND,
            "ACCOUNT_NOT_FOUND",
            format!("account not found: {id}"),
        ),
        EngineError::TransferNotFound(id) => (
            StatusCode::NOT_FOUND,
            "TRANSFER_NOT_FOUND",
            format!("transfer not found: {id}"),
        ),
        EngineError::Validation(message) => {
            (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message.clone())
        }
        EngineError::IdempotencyKeyRequired => (
            StatusCode::BAD_REQUEST,
            "IDEMPOTENCY_KEY_REQUIRED",
            err.to_string(),
        ),
        EngineError::IdempotencyKeyReuse => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "IDEMPOTENCY_KEY_REUSE",
            err.to_string(),
        ),
        EngineError::Account(account_err) => {
            let status = match account_err {
                AccountError::Frozen | AccountError::Closed => StatusCode::CONFLICT,
                AccountError::CurrencyMismatch { .. }
                | AccountError::InsufficientFunds { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                AccountError::NonZeroBalanceOnClose { .. } | AccountError::InvalidState { .. } => {
                    StatusCode::CONFLICT
                }
                // an overflow here means an upstream bug, not a user error
                AccountError::BalanceOverflow => StatusCode::INTERNAL_SERVER_ERROR,
                AccountError::BlankOwnerName
                | AccountError::OwnerNameTooLong(_)
                | AccountError::Money(_) => StatusCode::BAD_REQUEST,
            };
            (status, account_err.code(), account_err.to_string())
        }
        EngineError::Transfer(transfer_err) => {
            let status = match transfer_err {
                TransferError::SameAccount => StatusCode::UNPROCESSABLE_ENTITY,
                TransferError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
                TransferError::InvalidState { .. } => StatusCode::CONFLICT,
            };
            (status, transfer_err.code(), transfer_err.to_string())
        }
        EngineError::EventCodec(_)
        | EngineError::NonPositiveLedgerAmount(_)
        | EngineError::StaleVersion(_)
        | EngineError::CorruptRow(_)
        | EngineError::Deadlock
        | EngineError::Storage(_)
        | EngineError::Dispatch(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "internal error".to_string(),
        ),
    }
}
