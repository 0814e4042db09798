use super::rows::{AccountRow, IdempotencyRow, LedgerEntryRow, OutboxEventRow, TransferRow};
use super::PgStorageTx;
use crate::core::error::EngineError;
use crate::core::idempotency::IdempotencyRecord;
use crate::core::storage::{
    AccountProvider, IdempotencyProvider, LedgerProvider, OutboxProvider, TransferProvider,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tally_common::account::Account;
use tally_common::ledger::LedgerEntry;
use tally_common::outbox::{truncate_error, OutboxEvent};
use tally_common::transfer::{Transfer, TransferStatus};
use uuid::Uuid;

const ACCOUNT_COLUMNS: &str =
    "id, owner_name, currency, balance_minor_units, status, version, created_at, updated_at";

const TRANSFER_COLUMNS: &str = "id, reference, source_account_id, destination_account_id, \
     amount_minor_units, currency, status, description, failure_code, failure_reason, \
     completed_at, failed_at, reversed_at, created_at, updated_at, version";

const LEDGER_COLUMNS: &str = "id, account_id, counterparty_account_id, transfer_id, entry_type, \
     transfer_kind, amount_minor_units, currency, balance_after_minor_units, occurred_at, \
     created_at";

const OUTBOX_COLUMNS: &str = "id, aggregate_type, aggregate_id, event_type, payload, occurred_at, \
     created_at, published_at, attempt_count, last_error";

#[async_trait]
impl AccountProvider for PgStorageTx {
    async fn find_account(&mut self, id: Uuid) -> Result<Option<Account>, EngineError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(AccountRow::into_account).transpose()
    }

    async fn get_account_for_update(&mut self, id: Uuid) -> Result<Account, EngineError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(EngineError::AccountNotFound(id))?;
        row.into_account()
    }

    async fn save_account(&mut self, account: &Account) -> Result<(), EngineError> {
        let result = sqlx::query(
            "INSERT INTO accounts \
             (id, owner_name, currency, balance_minor_units, status, version, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (id) DO UPDATE SET \
                 owner_name = EXCLUDED.owner_name, \
                 balance_minor_units = EXCLUDED.balance_minor_units, \
                 status = EXCLUDED.status, \
                 version = EXCLUDED.version, \
                 updated_at = EXCLUDED.updated_at \
             WHERE accounts.version < EXCLUDED.version",
        )
        .bind(account.id())
        .bind(account.owner_name())
        .bind(account.currency().as_str())
        .bind(account.balance().minor_units())
        .bind(account.status().as_str())
        .bind(account.version() as i64)
        .bind(account.created_at())
        .bind(account.updated_at())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::StaleVersion(account.id()));
        }
        Ok(())
    }

    async fn list_accounts(
        &mut self,
        after: Option<Uuid>,
        limit: u64,
    ) -> Result<Vec<Account>, EngineError> {
        let rows = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts \
             WHERE ($1::uuid IS NULL OR id > $1) ORDER BY id ASC LIMIT $2"
        ))
        .bind(after)
        .bind(limit as i64)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(AccountRow::into_account).collect()
    }
}

#[async_trait]
impl TransferProvider for PgStorageTx {
    async fn find_transfer(&mut self, id: Uuid) -> Result<Option<Transfer>, EngineError> {
        let row = sqlx::query_as::<_, TransferRow>(&format!(
            "SELECT {TRANSFER_COLUMNS} FROM transfers WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(TransferRow::into_transfer).transpose()
    }

    async fn get_transfer_for_update(&mut self, id: Uuid) -> Result<Transfer, EngineError> {
        let row = sqlx::query_as::<_, TransferRow>(&format!(
            "SELECT {TRANSFER_COLUMNS} FROM transfers WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(EngineError::TransferNotFound(id))?;
        row.into_transfer()
    }

    async fn save_transfer(&mut self, transfer: &Transfer) -> Result<(), EngineError> {
        let result = sqlx::query(
            "INSERT INTO transfers \
             (id, reference, source_account_id, destination_account_id, amount_minor_units, \
              currency, status, description, failure_code, failure_reason, completed_at, \
              failed_at, reversed_at, created_at, updated_at, version) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
             ON CONFLICT (id) DO UPDATE SET \
                 status = EXCLUDED.status, \
                 failure_code = EXCLUDED.failure_code, \
                 failure_reason = EXCLUDED.failure_reason, \
                 completed_at = EXCLUDED.completed_at, \
                 failed_at = EXCLUDED.failed_at, \
                 reversed_at = EXCLUDED.reversed_at, \
                 updated_at = EXCLUDED.updated_at, \
                 version = EXCLUDED.version \
             WHERE transfers.version < EXCLUDED.version",
        )
        .bind(transfer.id())
        .bind(transfer.reference())
        .bind(transfer.source_account_id())
        .bind(transfer.destination_account_id())
        .bind(transfer.amount().minor_units())
        .bind(transfer.amount().currency().as_str())
        .bind(transfer.status().as_str())
        .bind(transfer.description())
        .bind(transfer.failure_code())
        .bind(transfer.failure_reason())
        .bind(transfer.completed_at())
        .bind(transfer.failed_at())
        .bind(transfer.reversed_at())
        .bind(transfer.created_at())
        .bind(transfer.updated_at())
        .bind(transfer.version() as i64)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::StaleVersion(transfer.id()));
        }
        Ok(())
    }

    async fn list_transfers(
        &mut self,
        status: Option<TransferStatus>,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Transfer>, EngineError> {
        let rows = sqlx::query_as::<_, TransferRow>(&format!(
            "SELECT {TRANSFER_COLUMNS} FROM transfers \
             WHERE ($1::text IS NULL OR status = $1) \
             ORDER BY created_at DESC, id DESC OFFSET $2 LIMIT $3"
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(offset as i64)
        .bind(limit as i64)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(TransferRow::into_transfer).collect()
    }

    async fn list_transfers_for_account(
        &mut self,
        account_id: Uuid,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Transfer>, EngineError> {
        let rows = sqlx::query_as::<_, TransferRow>(&format!(
            "SELECT {TRANSFER_COLUMNS} FROM transfers \
             WHERE source_account_id = $1 OR destination_account_id = $1 \
             ORDER BY created_at DESC, id DESC OFFSET $2 LIMIT $3"
        ))
        .bind(account_id)
        .bind(offset as i64)
        .bind(limit as i64)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(TransferRow::into_transfer).collect()
    }
}

#[async_trait]
impl LedgerProvider for PgStorageTx {
    async fn append_entry(&mut self, entry: &LedgerEntry) -> Result<(), EngineError> {
        // Enforced here as well as by the table check constraint
        if entry.amount_minor_units <= 0 {
            return Err(EngineError::NonPositiveLedgerAmount(
                entry.amount_minor_units,
            ));
        }

        sqlx::query(
            "INSERT INTO ledger_entries \
             (id, account_id, counterparty_account_id, transfer_id, entry_type, transfer_kind, \
              amount_minor_units, currency, balance_after_minor_units, occurred_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (account_id, transfer_id, entry_type) DO NOTHING",
        )
        .bind(entry.id)
        .bind(entry.account_id)
        .bind(entry.counterparty_account_id)
        .bind(entry.transfer_id)
        .bind(entry.entry_type.as_str())
        .bind(entry.transfer_kind.as_str())
        .bind(entry.amount_minor_units)
        .bind(entry.currency.as_str())
        .bind(entry.balance_after_minor_units)
        .bind(entry.occurred_at)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find_entry(&mut self, id: Uuid) -> Result<Option<LedgerEntry>, EngineError> {
        let row = sqlx::query_as::<_, LedgerEntryRow>(&format!(
            "SELECT {LEDGER_COLUMNS} FROM ledger_entries WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(LedgerEntryRow::into_entry).transpose()
    }

    async fn entries_for_transfer(
        &mut self,
        transfer_id: Uuid,
    ) -> Result<Vec<LedgerEntry>, EngineError> {
        let rows = sqlx::query_as::<_, LedgerEntryRow>(&format!(
            "SELECT {LEDGER_COLUMNS} FROM ledger_entries \
             WHERE transfer_id = $1 ORDER BY created_at ASC, id ASC"
        ))
        .bind(transfer_id)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(LedgerEntryRow::into_entry).collect()
    }

    async fn entries_for_account_in_range(
        &mut self,
        account_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<LedgerEntry>, EngineError> {
        let rows = sqlx::query_as::<_, LedgerEntryRow>(&format!(
            "SELECT {LEDGER_COLUMNS} FROM ledger_entries \
             WHERE account_id = $1 AND occurred_at >= $2 AND occurred_at <= $3 \
             ORDER BY occurred_at DESC, id DESC OFFSET $4 LIMIT $5"
        ))
        .bind(account_id)
        .bind(from)
        .bind(to)
        .bind(offset as i64)
        .bind(limit as i64)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(LedgerEntryRow::into_entry).collect()
    }

    async fn last_entry_before(
        &mut self,
        account_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<LedgerEntry>, EngineError> {
        let row = sqlx::query_as::<_, LedgerEntryRow>(&format!(
            "SELECT {LEDGER_COLUMNS} FROM ledger_entries \
             WHERE account_id = $1 AND occurred_at < $2 \
             ORDER BY occurred_at DESC, id DESC LIMIT 1"
        ))
        .bind(account_id)
        .bind(at)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(LedgerEntryRow::into_entry).transpose()
    }

    async fn last_entry_at_or_before(
        &mut self,
        account_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<LedgerEntry>, EngineError> {
        let row = sqlx::query_as::<_, LedgerEntryRow>(&format!(
            "SELECT {LEDGER_COLUMNS} FROM ledger_entries \
             WHERE account_id = $1 AND occurred_at <= $2 \
             ORDER BY occurred_at DESC, id DESC LIMIT 1"
        ))
        .bind(account_id)
        .bind(at)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(LedgerEntryRow::into_entry).transpose()
    }

    async fn ledger_balance(&mut self, account_id: Uuid) -> Result<Option<i64>, EngineError> {
        let balance: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(CASE WHEN entry_type = 'credit' THEN amount_minor_units \
                             ELSE -amount_minor_units END)::bigint \
             FROM ledger_entries WHERE account_id = $1",
        )
        .bind(account_id)
        .fetch_one(&mut *self.tx)
        .await?;
        // SUM over zero rows is NULL, which is exactly the no-entries case
        Ok(balance)
    }
}

#[async_trait]
impl OutboxProvider for PgStorageTx {
    async fn save_event(&mut self, event: &OutboxEvent) -> Result<(), EngineError> {
        sqlx::query(
            "INSERT INTO outbox_events \
             (id, aggregate_type, aggregate_id, event_type, payload, occurred_at, created_at, \
              published_at, attempt_count, last_error) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(event.id)
        .bind(&event.aggregate_type)
        .bind(event.aggregate_id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.occurred_at)
        .bind(event.created_at)
        .bind(event.published_at)
        .bind(event.attempt_count)
        .bind(&event.last_error)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn claim_unpublished(
        &mut self,
        limit: u64,
        max_attempts: i32,
    ) -> Result<Vec<OutboxEvent>, EngineError> {
        let rows = sqlx::query_as::<_, OutboxEventRow>(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox_events \
             WHERE published_at IS NULL AND attempt_count < $1 \
             ORDER BY created_at ASC LIMIT $2 \
             FOR UPDATE SKIP LOCKED"
        ))
        .bind(max_attempts)
        .bind(limit as i64)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(OutboxEvent::from).collect())
    }

    async fn mark_published(&mut self, id: Uuid) -> Result<(), EngineError> {
        sqlx::query(
            "UPDATE outbox_events SET published_at = NOW() \
             WHERE id = $1 AND published_at IS NULL",
        )
        .bind(id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn mark_failed(&mut self, id: Uuid, error: &str) -> Result<(), EngineError> {
        sqlx::query(
            "UPDATE outbox_events \
             SET attempt_count = attempt_count + 1, last_error = $2 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(truncate_error(error))
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find_event(&mut self, id: Uuid) -> Result<Option<OutboxEvent>, EngineError> {
        let row = sqlx::query_as::<_, OutboxEventRow>(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox_events WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(OutboxEvent::from))
    }

    async fn find_dead_lettered(
        &mut self,
        min_attempts: i32,
        limit: u64,
        after: Option<Uuid>,
    ) -> Result<Vec<OutboxEvent>, EngineError> {
        let rows = sqlx::query_as::<_, OutboxEventRow>(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox_events \
             WHERE published_at IS NULL AND attempt_count >= $1 \
               AND ($2::uuid IS NULL OR id > $2) \
             ORDER BY id ASC LIMIT $3"
        ))
        .bind(min_attempts)
        .bind(after)
        .bind(limit as i64)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(OutboxEvent::from).collect())
    }

    async fn reset_for_requeue(&mut self, id: Uuid) -> Result<bool, EngineError> {
        let result = sqlx::query(
            "UPDATE outbox_events SET attempt_count = 0, last_error = NULL \
             WHERE id = $1 AND published_at IS NULL",
        )
        .bind(id)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn reset_dead_letters(&mut self, min_attempts: i32) -> Result<u64, EngineError> {
        let result = sqlx::query(
            "UPDATE outbox_events SET attempt_count = 0, last_error = NULL \
             WHERE published_at IS NULL AND attempt_count >= $1",
        )
        .bind(min_attempts)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn count_stuck(&mut self, older_than_minutes: i64) -> Result<u64, EngineError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM outbox_events \
             WHERE published_at IS NULL \
               AND created_at < NOW() - make_interval(mins => $1)",
        )
        .bind(older_than_minutes as i32)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count as u64)
    }

    async fn count_unpublished(&mut self) -> Result<u64, EngineError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM outbox_events WHERE published_at IS NULL")
                .fetch_one(&mut *self.tx)
                .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl IdempotencyProvider for PgStorageTx {
    async fn find_record(&mut self, key: &str) -> Result<Option<IdempotencyRecord>, EngineError> {
        let row = sqlx::query_as::<_, IdempotencyRow>(
            "SELECT key, request_hash, response_status, response_body, created_at, expires_at \
             FROM idempotency_keys WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(IdempotencyRow::into_record))
    }

    async fn save_record(&mut self, record: &IdempotencyRecord) -> Result<(), EngineError> {
        sqlx::query(
            "INSERT INTO idempotency_keys \
             (key, request_hash, response_status, response_body, created_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (key) DO UPDATE SET \
                 request_hash = EXCLUDED.request_hash, \
                 response_status = EXCLUDED.response_status, \
                 response_body = EXCLUDED.response_body, \
                 created_at = EXCLUDED.created_at, \
                 expires_at = EXCLUDED.expires_at",
        )
        .bind(&record.key)
        .bind(&record.request_hash)
        .bind(record.response_status as i32)
        .bind(&record.response_body)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_record(&mut self, key: &str) -> Result<(), EngineError> {
        sqlx::query("DELETE FROM idempotency_keys WHERE key = $1")
            .bind(key)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn purge_expired(&mut self, now: DateTime<Utc>) -> Result<u64, EngineError> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at <= $1")
            .bind(now)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }
}
