use tally_common::error::{AccountError, TransferError};
use tally_common::event::EventCodecError;
use thiserror::Error;
use uuid::Uuid;

/// Error type for all engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("transfer not found: {0}")]
    TransferNotFound(Uuid),

    #[error(transparent)]
    Account(#[from] AccountError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    EventCodec(#[from] EventCodecError),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("idempotency key required")]
    IdempotencyKeyRequired,

    #[error("idempotency key reused with a different request")]
    IdempotencyKeyReuse,

    #[error("ledger entry amount must be positive: {0}")]
    NonPositiveLedgerAmount(i64),

    #[error("stale version on save for {0}")]
    StaleVersion(Uuid),

    #[error("corrupt stored row: {0}")]
    CorruptRow(String),

    /// Deadlock signal raised by a non-SQL backend (the SQL backend
    /// surfaces deadlocks through [`EngineError::Storage`]).
    #[error("storage deadlock detected")]
    Deadlock,

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("event dispatch failed: {0}")]
    Dispatch(String),
}

// Postgres SQLSTATEs the transaction manager treats as retryable
const SQLSTATE_DEADLOCK_DETECTED: &str = "40P01";
const SQLSTATE_SERIALIZATION_FAILURE: &str = "40001";

impl EngineError {
    /// Whether this failure is a deadlock-class signal the transaction
    /// manager may retry.
    pub fn is_deadlock(&self) -> bool {
        match self {
            EngineError::Deadlock => true,
            EngineError::Storage(sqlx::Error::Database(db)) => db
                .code()
                .map(|code| {
                    code == SQLSTATE_DEADLOCK_DETECTED || code == SQLSTATE_SERIALIZATION_FAILURE
                })
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Business-rule violations that turn an in-flight transfer into a
    /// durable failed transfer instead of rolling everything back.
    /// Returns the failure code and human-readable reason to record.
    pub fn as_transfer_failure(&self) -> Option<(&'static str, String)> {
        match self {
            EngineError::Account(err) => match err {
                AccountError::Frozen
                | AccountError::Closed
                | AccountError::CurrencyMismatch { .. }
                | AccountError::InsufficientFunds { .. } => Some((err.code(), err.to_string())),
                _ => None,
            },
            _ => None,
        }
    }
}
