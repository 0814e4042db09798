use crate::money::CurrencyCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Side of a double-entry row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Debit,
    Credit,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Debit => "debit",
            EntryType::Credit => "credit",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debit" => Ok(EntryType::Debit),
            "credit" => Ok(EntryType::Credit),
            other => Err(format!("unknown entry type: {other}")),
        }
    }
}

/// What kind of movement produced a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    Transfer,
    Reversal,
    Bootstrap,
}

impl TransferKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferKind::Transfer => "transfer",
            TransferKind::Reversal => "reversal",
            TransferKind::Bootstrap => "bootstrap",
        }
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transfer" => Ok(TransferKind::Transfer),
            "reversal" => Ok(TransferKind::Reversal),
            "bootstrap" => Ok(TransferKind::Bootstrap),
            other => Err(format!("unknown transfer kind: {other}")),
        }
    }
}

/// One immutable row of the append-only ledger.
///
/// `balance_after_minor_units` snapshots the account balance immediately
/// after this entry was applied. Rows are never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub account_id: Uuid,
    pub counterparty_account_id: Uuid,
    pub transfer_id: Uuid,
    pub entry_type: EntryType,
    pub transfer_kind: TransferKind,
    pub amount_minor_units: i64,
    pub currency: CurrencyCode,
    pub balance_after_minor_units: i64,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    #[allow(clippy::too_many_arguments)]
    fn new(
        account_id: Uuid,
        counterparty_account_id: Uuid,
        transfer_id: Uuid,
        entry_type: EntryType,
        transfer_kind: TransferKind,
        amount_minor_units: i64,
        currency: CurrencyCode,
        balance_after_minor_units: i64,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            counterparty_account_id,
            transfer_id,
            entry_type,
            transfer_kind,
            amount_minor_units,
            currency,
            balance_after_minor_units,
            occurred_at,
            created_at: Utc::now(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn debit(
        account_id: Uuid,
        counterparty_account_id: Uuid,
        transfer_id: Uuid,
        transfer_kind: TransferKind,
        amount_minor_units: i64,
        currency: CurrencyCode,
        balance_after_minor_units: i64,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            account_id,
            counterparty_account_id,
            transfer_id,
            EntryType::Debit,
            transfer_kind,
            amount_minor_units,
            currency,
            balance_after_minor_units,
            occurred_at,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn credit(
        account_id: Uuid,
        counterparty_account_id: Uuid,
        transfer_id: Uuid,
        transfer_kind: TransferKind,
        amount_minor_units: i64,
        currency: CurrencyCode,
        balance_after_minor_units: i64,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            account_id,
            counterparty_account_id,
            transfer_id,
            EntryType::Credit,
            transfer_kind,
            amount_minor_units,
            currency,
            balance_after_minor_units,
            occurred_at,
        )
    }

    /// Credit counts positive, debit counts negative. The signed sum over
    /// all entries of one transfer is zero.
    pub fn signed_amount(&self) -> i64 {
        match self.entry_type {
            EntryType::Credit => self.amount_minor_units,
            EntryType::Debit => -self.amount_minor_units,
        }
    }
}
