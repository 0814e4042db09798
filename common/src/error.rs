use crate::account::AccountStatus;
use crate::money::CurrencyCode;
use crate::transfer::TransferStatus;
use thiserror::Error;

/// Errors raised by [`crate::money::Money`] arithmetic and construction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("invalid currency code: {0}")]
    InvalidCurrency(String),

    #[error("amount cannot be negative: {0}")]
    NegativeAmount(i64),

    #[error("currency mismatch: {left} vs {right}")]
    CurrencyMismatch {
        left: CurrencyCode,
        right: CurrencyCode,
    },

    #[error("balance overflow")]
    Overflow,

    #[error("insufficient funds: need {need}, have {have}")]
    Insufficient { need: i64, have: i64 },
}

/// Errors raised by the Account aggregate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccountError {
    #[error("owner name cannot be blank")]
    BlankOwnerName,

    #[error("owner name exceeds {0} characters")]
    OwnerNameTooLong(usize),

    #[error("account is frozen")]
    Frozen,

    #[error("account is closed")]
    Closed,

    #[error("currency mismatch: account holds {account}, amount is {amount}")]
    CurrencyMismatch {
        account: CurrencyCode,
        amount: CurrencyCode,
    },

    #[error("insufficient funds: need {need}, have {have}")]
    InsufficientFunds { need: i64, have: i64 },

    #[error("balance overflow")]
    BalanceOverflow,

    #[error("cannot close account with non-zero balance: {balance}")]
    NonZeroBalanceOnClose { balance: i64 },

    #[error("invalid account state: cannot {action} a {status} account")]
    InvalidState {
        status: AccountStatus,
        action: &'static str,
    },

    #[error(transparent)]
    Money(MoneyError),
}

impl AccountError {
    /// Stable machine-readable code, used for HTTP error envelopes and for
    /// the failure_code recorded on failed transfers.
    pub fn code(&self) -> &'static str {
        match self {
            AccountError::BlankOwnerName | AccountError::OwnerNameTooLong(_) => "VALIDATION_ERROR",
            AccountError::Frozen => "ACCOUNT_FROZEN",
            AccountError::Closed => "ACCOUNT_CLOSED",
            AccountError::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            AccountError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            AccountError::BalanceOverflow => "BALANCE_OVERFLOW",
            AccountError::NonZeroBalanceOnClose { .. } => "NON_ZERO_BALANCE_ON_CLOSE",
            AccountError::InvalidState { .. } => "INVALID_ACCOUNT_STATE",
            AccountError::Money(_) => "VALIDATION_ERROR",
        }
    }
}

impl From<MoneyError> for AccountError {
    fn from(e: MoneyError) -> Self {
        match e {
            MoneyError::Insufficient { need, have } => {
                AccountError::InsufficientFunds { need, have }
            }
            MoneyError::Overflow => AccountError::BalanceOverflow,
            MoneyError::CurrencyMismatch { left, right } => AccountError::CurrencyMismatch {
                account: left,
                amount: right,
            },
            other => AccountError::Money(other),
        }
    }
}

/// Errors raised by the Transfer aggregate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("source and destination accounts must differ")]
    SameAccount,

    #[error("transfer amount must be positive: {0}")]
    InvalidAmount(i64),

    #[error("invalid transfer state: cannot {action} a {status} transfer")]
    InvalidState {
        status: TransferStatus,
        action: &'static str,
    },
}

impl TransferError {
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::SameAccount => "SAME_ACCOUNT_TRANSFER",
            TransferError::InvalidAmount(_) => "INVALID_TRANSFER_AMOUNT",
            TransferError::InvalidState { .. } => "INVALID_TRANSFER_STATE",
        }
    }
}
