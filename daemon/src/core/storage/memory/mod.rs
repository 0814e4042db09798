//! In-memory storage backend.
//!
//! Transactions take the whole store under one async mutex and keep a
//! snapshot for rollback, so every unit of work is strictly serialised.
//! This backend powers the integration tests; the locking discipline the
//! engine relies on in production lives in the Postgres backend.

use crate::core::error::EngineError;
use crate::core::idempotency::IdempotencyRecord;
use crate::core::storage::{
    AccountProvider, IdempotencyProvider, LedgerProvider, OutboxProvider, Storage,
    StorageTransaction, TransferProvider,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tally_common::account::Account;
use tally_common::ledger::{EntryType, LedgerEntry};
use tally_common::outbox::{truncate_error, OutboxEvent};
use tally_common::transfer::{Transfer, TransferStatus};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

type LedgerKey = (Uuid, Uuid, EntryType);

#[derive(Default, Clone)]
struct MemoryInner {
    accounts: HashMap<Uuid, Account>,
    transfers: HashMap<Uuid, Transfer>,
    ledger: Vec<LedgerEntry>,
    outbox: HashMap<Uuid, OutboxEvent>,
    idempotency: HashMap<String, IdempotencyRecord>,
}

impl MemoryInner {
    fn ledger_contains(&self, key: &LedgerKey) -> bool {
        self.ledger
            .iter()
            .any(|e| e.account_id == key.0 && e.transfer_id == key.1 && e.entry_type == key.2)
    }
}

#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryInner>>,
    key_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryInner>,
    snapshot: Option<MemoryInner>,
    committed: bool,
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        // Uncommitted work is rolled back by restoring the snapshot
        if !self.committed {
            if let Some(snapshot) = self.snapshot.take() {
                *self.guard = snapshot;
            }
        }
    }
}

fn detach_account(account: &Account) -> Account {
    Account::from_parts(
        account.id(),
        account.owner_name().to_string(),
        account.currency(),
        account.balance(),
        account.status(),
        account.version(),
        account.created_at(),
        account.updated_at(),
    )
}

fn detach_transfer(transfer: &Transfer) -> Transfer {
    Transfer::from_parts(
        transfer.id(),
        transfer.reference().to_string(),
        transfer.source_account_id(),
        transfer.destination_account_id(),
        transfer.amount(),
        transfer.status(),
        transfer.description().map(str::to_string),
        transfer.failure_code().map(str::to_string),
        transfer.failure_reason().map(str::to_string),
        transfer.completed_at(),
        transfer.failed_at(),
        transfer.reversed_at(),
        transfer.created_at(),
        transfer.updated_at(),
        transfer.version(),
    )
}

#[async_trait]
impl AccountProvider for MemoryTx {
    async fn find_account(&mut self, id: Uuid) -> Result<Option<Account>, EngineError> {
        Ok(self.guard.accounts.get(&id).map(detach_account))
    }

    async fn get_account_for_update(&mut self, id: Uuid) -> Result<Account, EngineError> {
        // The whole store is exclusively held for the transaction's
        // lifetime, which subsumes the row lock.
        self.guard
            .accounts
            .get(&id)
            .map(detach_account)
            .ok_or(EngineError::AccountNotFound(id))
    }

    async fn save_account(&mut self, account: &Account) -> Result<(), EngineError> {
        if let Some(existing) = self.guard.accounts.get(&account.id()) {
            if existing.version() >= account.version() {
                return Err(EngineError::StaleVersion(account.id()));
            }
        }
        self.guard
            .accounts
            .insert(account.id(), detach_account(account));
        Ok(())
    }

    async fn list_accounts(
        &mut self,
        after: Option<Uuid>,
        limit: u64,
    ) -> Result<Vec<Account>, EngineError> {
        let mut accounts: Vec<&Account> = self
            .guard
            .accounts
            .values()
            .filter(|a| after.map(|cursor| a.id() > cursor).unwrap_or(true))
            .collect();
        accounts.sort_by_key(|a| a.id());
        Ok(accounts
            .into_iter()
            .take(limit as usize)
            .map(detach_account)
            .collect())
    }
}

#[async_trait]
impl TransferProvider for MemoryTx {
    async fn find_transfer(&mut self, id: Uuid) -> Result<Option<Transfer>, EngineError> {
        Ok(self.guard.transfers.get(&id).map(detach_transfer))
    }

    async fn get_transfer_for_update(&mut self, id: Uuid) -> Result<Transfer, EngineError> {
        self.guard
            .transfers
            .get(&id)
            .map(detach_transfer)
            .ok_or(EngineError::TransferNotFound(id))
    }

    async fn save_transfer(&mut self, transfer: &Transfer) -> Result<(), EngineError> {
        if let Some(existing) = self.guard.transfers.get(&transfer.id()) {
            if existing.version() >= transfer.version() {
                return Err(EngineError::StaleVersion(transfer.id()));
            }
        }
        self.guard
            .transfers
            .insert(transfer.id(), detach_transfer(transfer));
        Ok(())
    }

    async fn list_transfers(
        &mut self,
        status: Option<TransferStatus>,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Transfer>, EngineError> {
        let mut transfers: Vec<&Transfer> = self
            .guard
            .transfers
            .values()
            .filter(|t| status.map(|s| t.status() == s).unwrap_or(true))
            .collect();
        transfers.sort_by(|a, b| b.created_at().cmp(&a.created_at()).then(b.id().cmp(&a.id())));
        Ok(transfers
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(detach_transfer)
            .collect())
    }

    async fn list_transfers_for_account(
        &mut self,
        account_id: Uuid,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Transfer>, EngineError> {
        let mut transfers: Vec<&Transfer> = self
            .guard
            .transfers
            .values()
            .filter(|t| {
                t.source_account_id() == account_id || t.destination_account_id() == account_id
            })
            .collect();
        transfers.sort_by(|a, b| b.created_at().cmp(&a.created_at()).then(b.id().cmp(&a.id())));
        Ok(transfers
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(detach_transfer)
            .collect())
    }
}

#[async_trait]
impl LedgerProvider for MemoryTx {
    async fn append_entry(&mut self, entry: &LedgerEntry) -> Result<(), EngineError> {
        if entry.amount_minor_units <= 0 {
            return Err(EngineError::NonPositiveLedgerAmount(
                entry.amount_minor_units,
            ));
        }
        let key = (entry.account_id, entry.transfer_id, entry.entry_type);
        if self.guard.ledger_contains(&key) {
            // Idempotent retry: the row already exists
            return Ok(());
        }
        self.guard.ledger.push(entry.clone());
        Ok(())
    }

    async fn find_entry(&mut self, id: Uuid) -> Result<Option<LedgerEntry>, EngineError> {
        Ok(self.guard.ledger.iter().find(|e| e.id == id).cloned())
    }

    async fn entries_for_transfer(
        &mut self,
        transfer_id: Uuid,
    ) -> Result<Vec<LedgerEntry>, EngineError> {
        Ok(self
            .guard
            .ledger
            .iter()
            .filter(|e| e.transfer_id == transfer_id)
            .cloned()
            .collect())
    }

    async fn entries_for_account_in_range(
        &mut self,
        account_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<LedgerEntry>, EngineError> {
        let mut entries: Vec<&LedgerEntry> = self
            .guard
            .ledger
            .iter()
            .filter(|e| e.account_id == account_id && e.occurred_at >= from && e.occurred_at <= to)
            .collect();
        entries.sort_by(|a, b| {
            b.occurred_at
                .cmp(&a.occurred_at)
                .then(b.id.cmp(&a.id))
        });
        Ok(entries
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn last_entry_before(
        &mut self,
        account_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<LedgerEntry>, EngineError> {
        Ok(self
            .guard
            .ledger
            .iter()
            .filter(|e| e.account_id == account_id && e.occurred_at < at)
            .max_by(|a, b| a.occurred_at.cmp(&b.occurred_at).then(a.id.cmp(&b.id)))
            .cloned())
    }

    async fn last_entry_at_or_before(
        &mut self,
        account_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<LedgerEntry>, EngineError> {
        Ok(self
            .guard
            .ledger
            .iter()
            .filter(|e| e.account_id == account_id && e.occurred_at <= at)
            .max_by(|a, b| a.occurred_at.cmp(&b.occurred_at).then(a.id.cmp(&b.id)))
            .cloned())
    }

    async fn ledger_balance(&mut self, account_id: Uuid) -> Result<Option<i64>, EngineError> {
        let mut seen = false;
        let mut balance = 0i64;
        for entry in self.guard.ledger.iter().filter(|e| e.account_id == account_id) {
            seen = true;
            balance += entry.signed_amount();
        }
        Ok(seen.then_some(balance))
    }
}

#[async_trait]
impl OutboxProvider for MemoryTx {
    async fn save_event(&mut self, event: &OutboxEvent) -> Result<(), EngineError> {
        self.guard.outbox.insert(event.id, event.clone());
        Ok(())
    }

    async fn claim_unpublished(
        &mut self,
        limit: u64,
        max_attempts: i32,
    ) -> Result<Vec<OutboxEvent>, EngineError> {
        // The exclusive store lock means no other claimer can observe
        // these rows until this transaction ends, which is the skip-locked
        // guarantee collapsed to full serialisation.
        let mut events: Vec<&OutboxEvent> = self
            .guard
            .outbox
            .values()
            .filter(|e| e.published_at.is_none() && e.attempt_count < max_attempts)
            .collect();
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(events
            .into_iter()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn mark_published(&mut self, id: Uuid) -> Result<(), EngineError> {
        if let Some(event) = self.guard.outbox.get_mut(&id) {
            event.published_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn mark_failed(&mut self, id: Uuid, error: &str) -> Result<(), EngineError> {
        if let Some(event) = self.guard.outbox.get_mut(&id) {
            event.attempt_count += 1;
            event.last_error = Some(truncate_error(error));
        }
        Ok(())
    }

    async fn find_event(&mut self, id: Uuid) -> Result<Option<OutboxEvent>, EngineError> {
        Ok(self.guard.outbox.get(&id).cloned())
    }

    async fn find_dead_lettered(
        &mut self,
        min_attempts: i32,
        limit: u64,
        after: Option<Uuid>,
    ) -> Result<Vec<OutboxEvent>, EngineError> {
        let mut events: Vec<&OutboxEvent> = self
            .guard
            .outbox
            .values()
            .filter(|e| {
                e.published_at.is_none()
                    && e.attempt_count >= min_attempts
                    && after.map(|cursor| e.id > cursor).unwrap_or(true)
            })
            .collect();
        events.sort_by_key(|e| e.id);
        Ok(events
            .into_iter()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn reset_for_requeue(&mut self, id: Uuid) -> Result<bool, EngineError> {
        match self.guard.outbox.get_mut(&id) {
            Some(event) if event.published_at.is_none() => {
                event.attempt_count = 0;
                event.last_error = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reset_dead_letters(&mut self, min_attempts: i32) -> Result<u64, EngineError> {
        let mut reset = 0;
        for event in self.guard.outbox.values_mut() {
            if event.published_at.is_none() && event.attempt_count >= min_attempts {
                event.attempt_count = 0;
                event.last_error = None;
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn count_stuck(&mut self, older_than_minutes: i64) -> Result<u64, EngineError> {
        let threshold = Utc::now() - Duration::minutes(older_than_minutes);
        Ok(self
            .guard
            .outbox
            .values()
            .filter(|e| e.published_at.is_none() && e.created_at < threshold)
            .count() as u64)
    }

    async fn count_unpublished(&mut self) -> Result<u64, EngineError> {
        Ok(self
            .guard
            .outbox
            .values()
            .filter(|e| e.published_at.is_none())
            .count() as u64)
    }
}

#[async_trait]
impl IdempotencyProvider for MemoryTx {
    async fn find_record(&mut self, key: &str) -> Result<Option<IdempotencyRecord>, EngineError> {
        Ok(self.guard.idempotency.get(key).cloned())
    }

    async fn save_record(&mut self, record: &IdempotencyRecord) -> Result<(), EngineError> {
        self.guard
            .idempotency
            .insert(record.key.clone(), record.clone());
        Ok(())
    }

    async fn delete_record(&mut self, key: &str) -> Result<(), EngineError> {
        self.guard.idempotency.remove(key);
        Ok(())
    }

    async fn purge_expired(&mut self, now: DateTime<Utc>) -> Result<u64, EngineError> {
        let before = self.guard.idempotency.len();
        self.guard.idempotency.retain(|_, r| !r.is_expired(now));
        Ok((before - self.guard.idempotency.len()) as u64)
    }
}

#[async_trait]
impl StorageTransaction for MemoryTx {
    async fn commit(mut self) -> Result<(), EngineError> {
        self.committed = true;
        Ok(())
    }

    async fn rollback(self) -> Result<(), EngineError> {
        // Drop restores the snapshot
        Ok(())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    type Tx = MemoryTx;
    type KeyLock = OwnedMutexGuard<()>;

    async fn begin(&self) -> Result<Self::Tx, EngineError> {
        let guard = self.inner.clone().lock_owned().await;
        let snapshot = Some(guard.clone());
        Ok(MemoryTx {
            guard,
            snapshot,
            committed: false,
        })
    }

    async fn lock_idempotency_key(&self, key: &str) -> Result<Self::KeyLock, EngineError> {
        let lock = {
            let mut locks = self.key_locks.lock().await;
            locks.entry(key.to_string()).or_default().clone()
        };
        Ok(lock.lock_owned().await)
    }

    async fn release_idempotency_key(&self, lock: Self::KeyLock) -> Result<(), EngineError> {
        drop(lock);
        Ok(())
    }
}
