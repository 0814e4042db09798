//! The engine facade: account lifecycle, queries, and operator
//! recovery commands. Transfer orchestration lives in
//! [`crate::core::transfers`].

use crate::config::EngineConfig;
use crate::core::error::EngineError;
use crate::core::outbox::enqueue_events;
use crate::core::storage::{
    AccountProvider, IdempotencyProvider, LedgerProvider, OutboxProvider, Storage,
    StorageTransaction, TransferProvider,
};
use crate::core::tx::with_transaction;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use tally_common::account::Account;
use tally_common::config::{BOOTSTRAP_TRANSFER_ID, SYSTEM_ACCOUNT_ID};
use tally_common::event::DomainEvent;
use tally_common::ledger::{LedgerEntry, TransferKind};
use tally_common::money::{CurrencyCode, Money};
use tally_common::outbox::OutboxEvent;
use tally_common::transfer::{Transfer, TransferStatus};
use uuid::Uuid;

#[derive(Clone, Copy)]
enum LifecycleAction {
    Freeze,
    Unfreeze,
    Close,
}

/// A paginated account statement with derived opening/closing balances.
#[derive(Debug)]
pub struct Statement {
    pub account_id: Uuid,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub opening_balance_minor_units: i64,
    pub closing_balance_minor_units: i64,
    pub entries: Vec<LedgerEntry>,
}

pub struct Engine<S: Storage> {
    pub(crate) storage: S,
    pub(crate) config: EngineConfig,
}

impl<S: Storage> Engine<S> {
    pub fn new(storage: S, config: EngineConfig) -> Self {
        Self { storage, config }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Open an account, optionally with a bootstrap balance. A non-zero
    /// initial balance writes a single bootstrap credit against the
    /// system counterparty so the ledger stays derivable.
    pub async fn open_account(
        &self,
        owner_name: &str,
        currency: &str,
        initial_balance_minor_units: Option<i64>,
    ) -> Result<Account, EngineError> {
        let currency = CurrencyCode::new(currency)
            .map_err(|e| EngineError::Validation(e.to_string()))?;
        let initial = Money::new(initial_balance_minor_units.unwrap_or(0), currency)
            .map_err(|e| EngineError::Validation(e.to_string()))?;
        let id = Uuid::new_v4();

        let account = with_transaction(&self.storage, self.config.max_deadlock_retries, |tx| {
            let owner_name = owner_name.to_string();
            async move {
                let mut account = Account::open(id, owner_name, currency, initial)?;
                tx.save_account(&account).await?;
                enqueue_events(
                    tx,
                    account.release_events().into_iter().map(DomainEvent::from),
                )
                .await?;

                if initial.is_positive() {
                    let entry = LedgerEntry::credit(
                        id,
                        SYSTEM_ACCOUNT_ID,
                        BOOTSTRAP_TRANSFER_ID,
                        TransferKind::Bootstrap,
                        initial.minor_units(),
                        currency,
                        initial.minor_units(),
                        account.created_at(),
                    );
                    tx.append_entry(&entry).await?;
                }
                Ok(account)
            }
            .boxed()
        })
        .await?;

        info!(
            "opened account {} ({} {})",
            account.id(),
            account.balance().minor_units(),
            account.currency()
        );
        Ok(account)
    }

    pub async fn freeze_account(&self, id: Uuid) -> Result<Account, EngineError> {
        self.lifecycle(id, LifecycleAction::Freeze).await
    }

    pub async fn unfreeze_account(&self, id: Uuid) -> Result<Account, EngineError> {
        self.lifecycle(id, LifecycleAction::Unfreeze).await
    }

    pub async fn close_account(&self, id: Uuid) -> Result<Account, EngineError> {
        self.lifecycle(id, LifecycleAction::Close).await
    }

    async fn lifecycle(
        &self,
        id: Uuid,
        action: LifecycleAction,
    ) -> Result<Account, EngineError> {
        with_transaction(&self.storage, self.config.max_deadlock_retries, |tx| {
            async move {
                let mut account = tx.get_account_for_update(id).await?;
                match action {
                    LifecycleAction::Freeze => account.freeze()?,
                    LifecycleAction::Unfreeze => account.unfreeze()?,
                    LifecycleAction::Close => account.close()?,
                }
                tx.save_account(&account).await?;
                enqueue_events(
                    tx,
                    account.release_events().into_iter().map(DomainEvent::from),
                )
                .await?;
                Ok(account)
            }
            .boxed()
        })
        .await
    }

    pub async fn get_account(&self, id: Uuid) -> Result<Account, EngineError> {
        let mut tx = self.storage.begin().await?;
        let account = tx.get_account(id).await?;
        tx.commit().await?;
        Ok(account)
    }

    pub async fn get_transfer(&self, id: Uuid) -> Result<Transfer, EngineError> {
        let mut tx = self.storage.begin().await?;
        let transfer = tx.get_transfer(id).await?;
        tx.commit().await?;
        Ok(transfer)
    }

    /// Transfers newest first, optionally filtered by status. An unknown
    /// status filter is a validation error.
    pub async fn list_transfers(
        &self,
        status: Option<&str>,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Transfer>, EngineError> {
        let status = status
            .map(|s| {
                s.parse::<TransferStatus>()
                    .map_err(EngineError::Validation)
            })
            .transpose()?;

        let mut tx = self.storage.begin().await?;
        let transfers = tx.list_transfers(status, offset, limit).await?;
        tx.commit().await?;
        Ok(transfers)
    }

    pub async fn list_account_transfers(
        &self,
        account_id: Uuid,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Transfer>, EngineError> {
        let mut tx = self.storage.begin().await?;
        // surfaces AccountNotFound before an empty listing can
        tx.get_account(account_id).await?;
        let transfers = tx
            .list_transfers_for_account(account_id, offset, limit)
            .await?;
        tx.commit().await?;
        Ok(transfers)
    }

    /// Ledger entries in `[from, to]` plus opening and closing balances
    /// derived from the last snapshots outside the range boundaries.
    pub async fn account_statement(
        &self,
        account_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        offset: u64,
        limit: u64,
    ) -> Result<Statement, EngineError> {
        if to < from {
            return Err(EngineError::Validation(
                "statement range end precedes start".to_string(),
            ));
        }

        let mut tx = self.storage.begin().await?;
        tx.get_account(account_id).await?;
        let opening = tx
            .last_entry_before(account_id, from)
            .await?
            .map(|e| e.balance_after_minor_units)
            .unwrap_or(0);
        let closing = tx
            .last_entry_at_or_before(account_id, to)
            .await?
            .map(|e| e.balance_after_minor_units)
            .unwrap_or(0);
        let entries = tx
            .entries_for_account_in_range(account_id, from, to, offset, limit)
            .await?;
        tx.commit().await?;

        Ok(Statement {
            account_id,
            from,
            to,
            opening_balance_minor_units: opening,
            closing_balance_minor_units: closing,
            entries,
        })
    }

    /// Unpublished outbox rows older than the stuck threshold, for the
    /// health probe.
    pub async fn outbox_stuck_count(&self) -> Result<u64, EngineError> {
        let mut tx = self.storage.begin().await?;
        let stuck = tx.count_stuck(self.config.outbox_stuck_minutes).await?;
        tx.commit().await?;
        Ok(stuck)
    }

    // ===== Operator recovery =====

    pub async fn dead_letters(
        &self,
        min_attempts: i32,
        limit: u64,
        after: Option<Uuid>,
    ) -> Result<Vec<OutboxEvent>, EngineError> {
        let mut tx = self.storage.begin().await?;
        let events = tx.find_dead_lettered(min_attempts, limit, after).await?;
        tx.commit().await?;
        Ok(events)
    }

    /// Reset one unpublished event for redelivery.
    pub async fn requeue_outbox_event(&self, id: Uuid) -> Result<bool, EngineError> {
        let mut tx = self.storage.begin().await?;
        let reset = tx.reset_for_requeue(id).await?;
        tx.commit().await?;
        if reset {
            info!("outbox event {id} requeued");
        }
        Ok(reset)
    }

    /// Reset every dead-lettered event at or above `min_attempts`.
    pub async fn requeue_dead_letters(&self, min_attempts: i32) -> Result<u64, EngineError> {
        let mut tx = self.storage.begin().await?;
        let reset = tx.reset_dead_letters(min_attempts).await?;
        tx.commit().await?;
        info!("requeued {reset} dead-lettered outbox events");
        Ok(reset)
    }

    pub async fn purge_expired_idempotency_keys(&self) -> Result<u64, EngineError> {
        let mut tx = self.storage.begin().await?;
        let purged = tx.purge_expired(Utc::now()).await?;
        tx.commit().await?;
        Ok(purged)
    }
}
