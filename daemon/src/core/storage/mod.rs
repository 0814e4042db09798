mod memory;
pub mod postgres;

pub use self::memory::{MemoryStorage, MemoryTx};
pub use self::postgres::{PgStorage, PgStorageTx};

use crate::core::error::EngineError;
use crate::core::idempotency::IdempotencyRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tally_common::account::Account;
use tally_common::ledger::LedgerEntry;
use tally_common::outbox::OutboxEvent;
use tally_common::transfer::{Transfer, TransferStatus};
use uuid::Uuid;

/// Account persistence. Mutating paths read through
/// [`AccountProvider::get_account_for_update`], which holds a row-level
/// exclusive lock until the enclosing transaction ends.
#[async_trait]
pub trait AccountProvider {
    async fn find_account(&mut self, id: Uuid) -> Result<Option<Account>, EngineError>;

    async fn get_account(&mut self, id: Uuid) -> Result<Account, EngineError> {
        self.find_account(id)
            .await?
            .ok_or(EngineError::AccountNotFound(id))
    }

    async fn get_account_for_update(&mut self, id: Uuid) -> Result<Account, EngineError>;

    /// Insert-or-update by id in one statement, persisting every field.
    async fn save_account(&mut self, account: &Account) -> Result<(), EngineError>;

    /// Keyset-paginated scan in id order, for reconciliation.
    async fn list_accounts(
        &mut self,
        after: Option<Uuid>,
        limit: u64,
    ) -> Result<Vec<Account>, EngineError>;
}

/// Transfer persistence. `get_transfer_for_update` serialises concurrent
/// reversal attempts on the same transfer.
#[async_trait]
pub trait TransferProvider {
    async fn find_transfer(&mut self, id: Uuid) -> Result<Option<Transfer>, EngineError>;

    async fn get_transfer(&mut self, id: Uuid) -> Result<Transfer, EngineError> {
        self.find_transfer(id)
            .await?
            .ok_or(EngineError::TransferNotFound(id))
    }

    async fn get_transfer_for_update(&mut self, id: Uuid) -> Result<Transfer, EngineError>;

    async fn save_transfer(&mut self, transfer: &Transfer) -> Result<(), EngineError>;

    /// Newest first, optionally filtered by status.
    async fn list_transfers(
        &mut self,
        status: Option<TransferStatus>,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Transfer>, EngineError>;

    /// Transfers where the account is source or destination, newest first.
    async fn list_transfers_for_account(
        &mut self,
        account_id: Uuid,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Transfer>, EngineError>;
}

/// The append-only ledger. There are deliberately no update or delete
/// operations on this interface; history cannot be mutated through it.
#[async_trait]
pub trait LedgerProvider {
    /// Idempotent append: when a row with the same
    /// `(account_id, transfer_id, entry_type)` already exists the call
    /// succeeds without inserting. Rejects non-positive amounts
    /// independently of caller validation.
    async fn append_entry(&mut self, entry: &LedgerEntry) -> Result<(), EngineError>;

    async fn find_entry(&mut self, id: Uuid) -> Result<Option<LedgerEntry>, EngineError>;

    async fn entries_for_transfer(
        &mut self,
        transfer_id: Uuid,
    ) -> Result<Vec<LedgerEntry>, EngineError>;

    /// Entries in `[from, to]`, ordered by occurred_at descending then id
    /// descending.
    async fn entries_for_account_in_range(
        &mut self,
        account_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<LedgerEntry>, EngineError>;

    async fn last_entry_before(
        &mut self,
        account_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<LedgerEntry>, EngineError>;

    async fn last_entry_at_or_before(
        &mut self,
        account_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<LedgerEntry>, EngineError>;

    /// `sum(credits) - sum(debits)` over the account's entries, `None`
    /// when the account has no entries at all.
    async fn ledger_balance(&mut self, account_id: Uuid) -> Result<Option<i64>, EngineError>;
}

/// The transactional outbox.
#[async_trait]
pub trait OutboxProvider {
    async fn save_event(&mut self, event: &OutboxEvent) -> Result<(), EngineError>;

    /// Up to `limit` unpublished rows below the dead-letter threshold,
    /// ordered by created_at ascending, each under a row-level exclusive
    /// lock. Rows locked by another claimer are skipped without blocking.
    async fn claim_unpublished(
        &mut self,
        limit: u64,
        max_attempts: i32,
    ) -> Result<Vec<OutboxEvent>, EngineError>;

    async fn mark_published(&mut self, id: Uuid) -> Result<(), EngineError>;

    /// Increment the attempt counter and record the (truncated) error.
    async fn mark_failed(&mut self, id: Uuid, error: &str) -> Result<(), EngineError>;

    async fn find_event(&mut self, id: Uuid) -> Result<Option<OutboxEvent>, EngineError>;

    /// Unpublished rows at or above `min_attempts`, id-keyset paginated.
    async fn find_dead_lettered(
        &mut self,
        min_attempts: i32,
        limit: u64,
        after: Option<Uuid>,
    ) -> Result<Vec<OutboxEvent>, EngineError>;

    /// Reset one unpublished row for redelivery. Returns false when the
    /// row does not exist or was already published.
    async fn reset_for_requeue(&mut self, id: Uuid) -> Result<bool, EngineError>;

    /// Bulk variant of [`OutboxProvider::reset_for_requeue`] over every
    /// unpublished row at or above `min_attempts`.
    async fn reset_dead_letters(&mut self, min_attempts: i32) -> Result<u64, EngineError>;

    /// Unpublished rows older than the threshold, for health probes.
    async fn count_stuck(&mut self, older_than_minutes: i64) -> Result<u64, EngineError>;

    async fn count_unpublished(&mut self) -> Result<u64, EngineError>;
}

/// Idempotency record persistence.
#[async_trait]
pub trait IdempotencyProvider {
    async fn find_record(&mut self, key: &str) -> Result<Option<IdempotencyRecord>, EngineError>;

    async fn save_record(&mut self, record: &IdempotencyRecord) -> Result<(), EngineError>;

    async fn delete_record(&mut self, key: &str) -> Result<(), EngineError>;

    async fn purge_expired(&mut self, now: DateTime<Utc>) -> Result<u64, EngineError>;
}

/// A transactional unit of work. Dropping an uncommitted transaction
/// rolls it back on every backend.
#[async_trait]
pub trait StorageTransaction:
    AccountProvider + TransferProvider + LedgerProvider + OutboxProvider + IdempotencyProvider + Send
{
    async fn commit(self) -> Result<(), EngineError>;

    async fn rollback(self) -> Result<(), EngineError>;
}

/// A storage backend: a factory for transactions plus the short-lived
/// idempotency key lock used to single-flight concurrent first requests.
#[async_trait]
pub trait Storage: Clone + Send + Sync + 'static {
    type Tx: StorageTransaction;
    type KeyLock: Send;

    async fn begin(&self) -> Result<Self::Tx, EngineError>;

    /// Block until this process holds the exclusive lock for `key`.
    /// The lock is independent of any open transaction.
    async fn lock_idempotency_key(&self, key: &str) -> Result<Self::KeyLock, EngineError>;

    async fn release_idempotency_key(&self, lock: Self::KeyLock) -> Result<(), EngineError>;
}
