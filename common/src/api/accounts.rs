use crate::account::Account;
use crate::ledger::LedgerEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAccountRequest {
    pub owner_name: String,
    pub currency: String,
    #[serde(default)]
    pub initial_balance_minor_units: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountResponse {
    pub id: Uuid,
    pub owner_name: String,
    pub currency: String,
    pub balance_minor_units: i64,
    pub status: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Account> for AccountResponse {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id(),
            owner_name: account.owner_name().to_string(),
            currency: account.currency().as_str().to_string(),
            balance_minor_units: account.balance().minor_units(),
            status: account.status().as_str().to_string(),
            version: account.version(),
            created_at: account.created_at(),
            updated_at: account.updated_at(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntryResponse {
    pub id: Uuid,
    pub account_id: Uuid,
    pub counterparty_account_id: Uuid,
    pub transfer_id: Uuid,
    pub entry_type: String,
    pub transfer_kind: String,
    pub amount_minor_units: i64,
    pub currency: String,
    pub balance_after_minor_units: i64,
    pub occurred_at: DateTime<Utc>,
}

impl From<&LedgerEntry> for LedgerEntryResponse {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            id: entry.id,
            account_id: entry.account_id,
            counterparty_account_id: entry.counterparty_account_id,
            transfer_id: entry.transfer_id,
            entry_type: entry.entry_type.as_str().to_string(),
            transfer_kind: entry.transfer_kind.as_str().to_string(),
            amount_minor_units: entry.amount_minor_units,
            currency: entry.currency.as_str().to_string(),
            balance_after_minor_units: entry.balance_after_minor_units,
            occurred_at: entry.occurred_at,
        }
    }
}

/// Query string for `GET /accounts/{id}/statement`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementQuery {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub per_page: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementResponse {
    pub account_id: Uuid,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub opening_balance_minor_units: i64,
    pub closing_balance_minor_units: i64,
    pub entries: Vec<LedgerEntryResponse>,
    pub page: u32,
    pub per_page: u32,
}
