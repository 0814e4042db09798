//! Atomic double-entry execution.
//!
//! Operates on primitive DTOs only and runs inside the caller's
//! transactional scope; it never opens a transaction itself.

use crate::core::error::EngineError;
use crate::core::storage::AccountProvider;
use tally_common::event::DomainEvent;
use tally_common::ledger::TransferKind;
use tally_common::money::{CurrencyCode, Money};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct DoubleEntryRequest {
    pub source_account_id: Uuid,
    pub destination_account_id: Uuid,
    pub amount_minor_units: i64,
    pub currency: CurrencyCode,
    pub transfer_id: Uuid,
    pub kind: TransferKind,
}

#[derive(Debug)]
pub struct DoubleEntryOutcome {
    pub source_balance_after: i64,
    pub destination_balance_after: i64,
    /// The released account events, in debit-then-credit order, each
    /// tagged with its own aggregate id for outbox attribution.
    pub events: Vec<DomainEvent>,
}

/// Debit the source, credit the destination, save both aggregates.
///
/// The two row locks are always acquired in ascending id order regardless
/// of which side is the source, so two concurrent operations on the same
/// pair can never deadlock AB/BA. If either mutation raises a rule
/// violation, nothing is saved: the error propagates before any write.
pub async fn execute_double_entry<P>(
    provider: &mut P,
    request: &DoubleEntryRequest,
) -> Result<DoubleEntryOutcome, EngineError>
where
    P: AccountProvider + Send,
{
    debug_assert_ne!(request.source_account_id, request.destination_account_id);

    let amount = Money::new(request.amount_minor_units, request.currency)
        .map_err(tally_common::error::AccountError::from)?;

    // Canonical lock order: UUID byte order
    let (first, second) = if request.source_account_id < request.destination_account_id {
        (request.source_account_id, request.destination_account_id)
    } else {
        (request.destination_account_id, request.source_account_id)
    };

    let first_account = provider.get_account_for_update(first).await?;
    let second_account = provider.get_account_for_update(second).await?;

    let (mut source, mut destination) = if first == request.source_account_id {
        (first_account, second_account)
    } else {
        (second_account, first_account)
    };

    source.debit(
        amount,
        request.transfer_id,
        request.destination_account_id,
        request.kind,
    )?;
    destination.credit(
        amount,
        request.transfer_id,
        request.source_account_id,
        request.kind,
    )?;

    provider.save_account(&source).await?;
    provider.save_account(&destination).await?;

    let mut events: Vec<DomainEvent> =
        source.release_events().into_iter().map(Into::into).collect();
    events.extend(
        destination
            .release_events()
            .into_iter()
            .map(Into::<DomainEvent>::into),
    );

    Ok(DoubleEntryOutcome {
        source_balance_after: source.balance().minor_units(),
        destination_balance_after: destination.balance().minor_units(),
        events,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::{MemoryStorage, Storage, StorageTransaction};
    use tally_common::account::{Account, AccountEvent};
    use tally_common::money::Money;

    fn usd() -> CurrencyCode {
        CurrencyCode::new("USD").unwrap()
    }

    async fn seed_account(storage: &MemoryStorage, balance: i64) -> Uuid {
        let id = Uuid::new_v4();
        let mut account = Account::open(
            id,
            "owner".to_string(),
            usd(),
            Money::new(balance, usd()).unwrap(),
        )
        .unwrap();
        account.release_events();

        let mut tx = storage.begin().await.unwrap();
        tx.save_account(&account).await.unwrap();
        tx.commit().await.unwrap();
        id
    }

    #[tokio::test]
    async fn moves_funds_and_reports_snapshots() {
        let storage = MemoryStorage::new();
        let src = seed_account(&storage, 1000).await;
        let dst = seed_account(&storage, 250).await;

        let mut tx = storage.begin().await.unwrap();
        let outcome = execute_double_entry(
            &mut tx,
            &DoubleEntryRequest {
                source_account_id: src,
                destination_account_id: dst,
                amount_minor_units: 400,
                currency: usd(),
                transfer_id: Uuid::now_v7(),
                kind: TransferKind::Transfer,
            },
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(outcome.source_balance_after, 600);
        assert_eq!(outcome.destination_balance_after, 650);
        assert_eq!(outcome.events.len(), 2);

        match (&outcome.events[0], &outcome.events[1]) {
            (
                DomainEvent::Account(AccountEvent::Debited(d)),
                DomainEvent::Account(AccountEvent::Credited(c)),
            ) => {
                assert_eq!(d.account_id, src);
                assert_eq!(d.counterparty_account_id, dst);
                assert_eq!(c.account_id, dst);
                assert_eq!(c.counterparty_account_id, src);
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rule_violation_saves_nothing() {
        let storage = MemoryStorage::new();
        let src = seed_account(&storage, 100).await;
        let dst = seed_account(&storage, 0).await;

        let mut tx = storage.begin().await.unwrap();
        let err = execute_double_entry(
            &mut tx,
            &DoubleEntryRequest {
                source_account_id: src,
                destination_account_id: dst,
                amount_minor_units: 500,
                currency: usd(),
                transfer_id: Uuid::now_v7(),
                kind: TransferKind::Transfer,
            },
        )
        .await
        .unwrap_err();
        tx.commit().await.unwrap();

        assert!(err.as_transfer_failure().is_some());

        let mut tx = storage.begin().await.unwrap();
        let source = tx.get_account(src).await.unwrap();
        let destination = tx.get_account(dst).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(source.balance().minor_units(), 100);
        assert_eq!(source.version(), 0);
        assert_eq!(destination.balance().minor_units(), 0);
    }
}
