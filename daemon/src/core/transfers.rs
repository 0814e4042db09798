//! Transfer orchestration: the initiate and reverse paths.
//!
//! Every write of one operation lands in a single transaction. A business
//! rule violation during the double entry does not roll the transaction
//! back: the transfer is rewound to failed, the failure is committed as a
//! durable business record, and the violation is re-raised to the caller.

use crate::core::double_entry::{execute_double_entry, DoubleEntryRequest};
use crate::core::engine::Engine;
use crate::core::error::EngineError;
use crate::core::outbox::enqueue_events;
use crate::core::storage::{AccountProvider, LedgerProvider, Storage, TransferProvider};
use crate::core::tx::with_transaction;
use futures::FutureExt;
use tally_common::account::AccountEvent;
use tally_common::error::TransferError;
use tally_common::event::DomainEvent;
use tally_common::ledger::{LedgerEntry, TransferKind};
use tally_common::money::{CurrencyCode, Money};
use tally_common::transfer::Transfer;
use uuid::Uuid;

/// Validated input for one transfer initiation.
#[derive(Debug, Clone)]
pub struct NewTransfer {
    pub source_account_id: Uuid,
    pub destination_account_id: Uuid,
    pub amount: Money,
    pub description: Option<String>,
}

impl NewTransfer {
    pub fn parse(
        source_account_id: Uuid,
        destination_account_id: Uuid,
        amount_minor_units: i64,
        currency: &str,
        description: Option<String>,
    ) -> Result<Self, EngineError> {
        if source_account_id == destination_account_id {
            return Err(TransferError::SameAccount.into());
        }
        if amount_minor_units <= 0 {
            return Err(TransferError::InvalidAmount(amount_minor_units).into());
        }
        let currency =
            CurrencyCode::new(currency).map_err(|e| EngineError::Validation(e.to_string()))?;
        let amount =
            Money::new(amount_minor_units, currency).map_err(|e| EngineError::Validation(e.to_string()))?;
        Ok(Self {
            source_account_id,
            destination_account_id,
            amount,
            description,
        })
    }
}

enum InitiateOutcome {
    Completed(Transfer),
    /// The failed transfer was committed; the original violation is
    /// re-raised after the transaction ends.
    Failed(Box<EngineError>),
}

/// Build the two immutable ledger rows implied by a double entry's
/// released account events.
fn ledger_entries_from_events(events: &[DomainEvent]) -> Vec<LedgerEntry> {
    events
        .iter()
        .filter_map(|event| match event {
            DomainEvent::Account(AccountEvent::Debited(e)) => Some(LedgerEntry::debit(
                e.account_id,
                e.counterparty_account_id,
                e.transfer_id,
                e.kind,
                e.amount_minor_units,
                e.currency,
                e.balance_after_minor_units,
                e.occurred_at,
            )),
            DomainEvent::Account(AccountEvent::Credited(e)) => Some(LedgerEntry::credit(
                e.account_id,
                e.counterparty_account_id,
                e.transfer_id,
                e.kind,
                e.amount_minor_units,
                e.currency,
                e.balance_after_minor_units,
                e.occurred_at,
            )),
            _ => None,
        })
        .collect()
}

impl<S: Storage> Engine<S> {
    /// Move funds between two accounts, exactly once, or not at all.
    pub async fn initiate_transfer(&self, request: NewTransfer) -> Result<Transfer, EngineError> {
        let outcome = with_transaction(&self.storage, self.config.max_deadlock_retries, |tx| {
            let request = request.clone();
            async move {
                // Early not-found detection before any write, without locks
                if tx.find_account(request.source_account_id).await?.is_none() {
                    return Err(EngineError::AccountNotFound(request.source_account_id));
                }
                if tx
                    .find_account(request.destination_account_id)
                    .await?
                    .is_none()
                {
                    return Err(EngineError::AccountNotFound(request.destination_account_id));
                }

                let mut transfer = Transfer::initiate(
                    Uuid::now_v7(),
                    request.source_account_id,
                    request.destination_account_id,
                    request.amount,
                    request.description.clone(),
                )?;
                tx.save_transfer(&transfer).await?;
                enqueue_events(
                    tx,
                    transfer.release_events().into_iter().map(DomainEvent::from),
                )
                .await?;

                transfer.mark_processing()?;
                tx.save_transfer(&transfer).await?;

                let double_entry = DoubleEntryRequest {
                    source_account_id: request.source_account_id,
                    destination_account_id: request.destination_account_id,
                    amount_minor_units: request.amount.minor_units(),
                    currency: request.amount.currency(),
                    transfer_id: transfer.id(),
                    kind: TransferKind::Transfer,
                };
                match execute_double_entry(tx, &double_entry).await {
                    Ok(outcome) => {
                        for entry in ledger_entries_from_events(&outcome.events) {
                            tx.append_entry(&entry).await?;
                        }
                        transfer.complete()?;
                        tx.save_transfer(&transfer).await?;

                        let mut events = outcome.events;
                        events.extend(
                            transfer.release_events().into_iter().map(DomainEvent::from),
                        );
                        enqueue_events(tx, events).await?;
                        Ok(InitiateOutcome::Completed(transfer))
                    }
                    Err(err) => match err.as_transfer_failure() {
                        // The service raised before saving anything, so the
                        // only writes in flight are the transfer rows; the
                        // failure itself becomes a durable business record
                        // and the transaction commits.
                        Some((code, reason)) => {
                            transfer.fail(code, &reason)?;
                            tx.save_transfer(&transfer).await?;
                            enqueue_events(
                                tx,
                                transfer.release_events().into_iter().map(DomainEvent::from),
                            )
                            .await?;
                            Ok(InitiateOutcome::Failed(Box::new(err)))
                        }
                        None => Err(err),
                    },
                }
            }
            .boxed()
        })
        .await?;

        match outcome {
            InitiateOutcome::Completed(transfer) => {
                metrics::counter!("tally_transfers_completed_total").increment(1);
                info!(
                    "transfer {} completed: {} -> {} ({})",
                    transfer.reference(),
                    transfer.source_account_id(),
                    transfer.destination_account_id(),
                    transfer.amount()
                );
                Ok(transfer)
            }
            InitiateOutcome::Failed(err) => {
                metrics::counter!("tally_transfers_failed_total").increment(1);
                warn!("transfer failed: {err}");
                Err(*err)
            }
        }
    }

    /// Compensate a completed transfer with two new ledger rows. The
    /// original rows are never touched.
    pub async fn reverse_transfer(&self, id: Uuid) -> Result<Transfer, EngineError> {
        let transfer = with_transaction(&self.storage, self.config.max_deadlock_retries, |tx| {
            async move {
                // Row lock serialises concurrent reversals of one transfer
                let mut transfer = tx.get_transfer_for_update(id).await?;
                transfer.reverse()?;

                let double_entry = DoubleEntryRequest {
                    source_account_id: transfer.destination_account_id(),
                    destination_account_id: transfer.source_account_id(),
                    amount_minor_units: transfer.amount().minor_units(),
                    currency: transfer.amount().currency(),
                    transfer_id: transfer.id(),
                    kind: TransferKind::Reversal,
                };
                // May raise InsufficientFunds when the original destination
                // has been drained since; nothing durable is recorded then.
                let outcome = execute_double_entry(tx, &double_entry).await?;

                for entry in ledger_entries_from_events(&outcome.events) {
                    tx.append_entry(&entry).await?;
                }
                tx.save_transfer(&transfer).await?;

                let mut events = outcome.events;
                events.extend(transfer.release_events().into_iter().map(DomainEvent::from));
                enqueue_events(tx, events).await?;
                Ok(transfer)
            }
            .boxed()
        })
        .await?;

        metrics::counter!("tally_transfers_reversed_total").increment(1);
        info!("transfer {} reversed", transfer.reference());
        Ok(transfer)
    }
}
