use crate::ledger::TransferKind;
use crate::money::CurrencyCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountOpened {
    pub account_id: Uuid,
    pub owner_name: String,
    pub currency: CurrencyCode,
    pub initial_balance_minor_units: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountDebited {
    pub account_id: Uuid,
    pub transfer_id: Uuid,
    pub counterparty_account_id: Uuid,
    pub kind: TransferKind,
    pub amount_minor_units: i64,
    pub currency: CurrencyCode,
    pub balance_after_minor_units: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountCredited {
    pub account_id: Uuid,
    pub transfer_id: Uuid,
    pub counterparty_account_id: Uuid,
    pub kind: TransferKind,
    pub amount_minor_units: i64,
    pub currency: CurrencyCode,
    pub balance_after_minor_units: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountFrozen {
    pub account_id: Uuid,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountUnfrozen {
    pub account_id: Uuid,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountClosed {
    pub account_id: Uuid,
    pub occurred_at: DateTime<Utc>,
}

/// Domain events buffered by the Account aggregate until released.
#[derive(Debug, Clone, PartialEq)]
pub enum AccountEvent {
    Opened(AccountOpened),
    Debited(AccountDebited),
    Credited(AccountCredited),
    Frozen(AccountFrozen),
    Unfrozen(AccountUnfrozen),
    Closed(AccountClosed),
}

impl AccountEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            AccountEvent::Opened(_) => "account.opened",
            AccountEvent::Debited(_) => "account.debited",
            AccountEvent::Credited(_) => "account.credited",
            AccountEvent::Frozen(_) => "account.frozen",
            AccountEvent::Unfrozen(_) => "account.unfrozen",
            AccountEvent::Closed(_) => "account.closed",
        }
    }

    pub fn account_id(&self) -> Uuid {
        match self {
            AccountEvent::Opened(e) => e.account_id,
            AccountEvent::Debited(e) => e.account_id,
            AccountEvent::Credited(e) => e.account_id,
            AccountEvent::Frozen(e) => e.account_id,
            AccountEvent::Unfrozen(e) => e.account_id,
            AccountEvent::Closed(e) => e.account_id,
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AccountEvent::Opened(e) => e.occurred_at,
            AccountEvent::Debited(e) => e.occurred_at,
            AccountEvent::Credited(e) => e.occurred_at,
            AccountEvent::Frozen(e) => e.occurred_at,
            AccountEvent::Unfrozen(e) => e.occurred_at,
            AccountEvent::Closed(e) => e.occurred_at,
        }
    }
}
