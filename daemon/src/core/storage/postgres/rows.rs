use crate::core::error::EngineError;
use crate::core::idempotency::IdempotencyRecord;
use chrono::{DateTime, Utc};
use tally_common::account::Account;
use tally_common::ledger::LedgerEntry;
use tally_common::money::{CurrencyCode, Money};
use tally_common::outbox::OutboxEvent;
use tally_common::transfer::Transfer;
use uuid::Uuid;

fn corrupt(context: &str, detail: impl std::fmt::Display) -> EngineError {
    EngineError::CorruptRow(format!("{context}: {detail}"))
}

fn parse_currency(raw: &str) -> Result<CurrencyCode, EngineError> {
    CurrencyCode::new(raw.trim()).map_err(|e| corrupt("currency", e))
}

#[derive(sqlx::FromRow)]
pub struct AccountRow {
    pub id: Uuid,
    pub owner_name: String,
    pub currency: String,
    pub balance_minor_units: i64,
    pub status: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccountRow {
    pub fn into_account(self) -> Result<Account, EngineError> {
        let currency = parse_currency(&self.currency)?;
        let status = self.status.parse().map_err(|e| corrupt("status", e))?;
        let balance =
            Money::new(self.balance_minor_units, currency).map_err(|e| corrupt("balance", e))?;
        Ok(Account::from_parts(
            self.id,
            self.owner_name,
            currency,
            balance,
            status,
            self.version as u64,
            self.created_at,
            self.updated_at,
        ))
    }
}

#[derive(sqlx::FromRow)]
pub struct TransferRow {
    pub id: Uuid,
    pub reference: String,
    pub source_account_id: Uuid,
    pub destination_account_id: Uuid,
    pub amount_minor_units: i64,
    pub currency: String,
    pub status: String,
    pub description: Option<String>,
    pub failure_code: Option<String>,
    pub failure_reason: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub reversed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl TransferRow {
    pub fn into_transfer(self) -> Result<Transfer, EngineError> {
        let currency = parse_currency(&self.currency)?;
        let status = self.status.parse().map_err(|e| corrupt("status", e))?;
        let amount =
            Money::new(self.amount_minor_units, currency).map_err(|e| corrupt("amount", e))?;
        Ok(Transfer::from_parts(
            self.id,
            self.reference,
            self.source_account_id,
            self.destination_account_id,
            amount,
            status,
            self.description,
            self.failure_code,
            self.failure_reason,
            self.completed_at,
            self.failed_at,
            self.reversed_at,
            self.created_at,
            self.updated_at,
            self.version as u64,
        ))
    }
}

#[derive(sqlx::FromRow)]
pub struct LedgerEntryRow {
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
    pub created_at: DateTime<Utc>,
}

impl LedgerEntryRow {
    pub fn into_entry(self) -> Result<LedgerEntry, EngineError> {
        Ok(LedgerEntry {
            id: self.id,
            account_id: self.account_id,
            counterparty_account_id: self.counterparty_account_id,
            transfer_id: self.transfer_id,
            entry_type: self
                .entry_type
                .parse()
                .map_err(|e| corrupt("entry_type", e))?,
            transfer_kind: self
                .transfer_kind
                .parse()
                .map_err(|e| corrupt("transfer_kind", e))?,
            amount_minor_units: self.amount_minor_units,
            currency: parse_currency(&self.currency)?,
            balance_after_minor_units: self.balance_after_minor_units,
            occurred_at: self.occurred_at,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
pub struct OutboxEventRow {
    pub id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub attempt_count: i32,
    pub last_error: Option<String>,
}

impl From<OutboxEventRow> for OutboxEvent {
    fn from(row: OutboxEventRow) -> Self {
        OutboxEvent {
            id: row.id,
            aggregate_type: row.aggregate_type,
            aggregate_id: row.aggregate_id,
            event_type: row.event_type,
            payload: row.payload,
            occurred_at: row.occurred_at,
            created_at: row.created_at,
            published_at: row.published_at,
            attempt_count: row.attempt_count,
            last_error: row.last_error,
        }
    }
}

#[derive(sqlx::FromRow)]
pub struct IdempotencyRow {
    pub key: String,
    pub request_hash: String,
    pub response_status: i32,
    pub response_body: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRow {
    pub fn into_record(self) -> IdempotencyRecord {
        IdempotencyRecord {
            key: self.key,
            request_hash: self.request_hash.trim().to_string(),
            response_status: self.response_status.clamp(0, u16::MAX as i32) as u16,
            response_body: self.response_body,
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}
