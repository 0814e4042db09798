//! Reconciliation of live account balances against the derived ledger.

use crate::core::engine::Engine;
use crate::core::error::EngineError;
use crate::core::storage::{AccountProvider, LedgerProvider, Storage, StorageTransaction};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileStatus {
    Match,
    Mismatch,
    /// Non-zero balance with no ledger entries at all. Expected only for
    /// accounts imported without history.
    NoLedgerEntry,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileEntry {
    pub account_id: Uuid,
    pub account_balance_minor_units: i64,
    pub ledger_balance_minor_units: Option<i64>,
    pub status: ReconcileStatus,
}

#[derive(Debug, Default, Serialize)]
pub struct ReconcileReport {
    pub checked: u64,
    pub matched: u64,
    pub mismatched: u64,
    pub missing_ledger: u64,
    /// Only the anomalies; matched accounts are counted, not listed.
    pub anomalies: Vec<ReconcileEntry>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.mismatched == 0 && self.missing_ledger == 0
    }
}

fn classify(balance: i64, ledger: Option<i64>) -> ReconcileStatus {
    match ledger {
        Some(derived) if derived == balance => ReconcileStatus::Match,
        Some(_) => ReconcileStatus::Mismatch,
        None if balance == 0 => ReconcileStatus::Match,
        None => ReconcileStatus::NoLedgerEntry,
    }
}

impl<S: Storage> Engine<S> {
    /// Compare every account's balance (or one account's) against
    /// `sum(credits) - sum(debits)` over its ledger entries, in batches
    /// of short read transactions.
    pub async fn reconcile(&self, account: Option<Uuid>) -> Result<ReconcileReport, EngineError> {
        let mut report = ReconcileReport::default();

        if let Some(id) = account {
            let mut tx = self.storage.begin().await?;
            let account = tx.get_account(id).await?;
            let ledger = tx.ledger_balance(id).await?;
            tx.commit().await?;
            record(&mut report, account.id(), account.balance().minor_units(), ledger);
            return Ok(report);
        }

        let mut cursor: Option<Uuid> = None;
        loop {
            let mut tx = self.storage.begin().await?;
            let accounts = tx
                .list_accounts(cursor, self.config.reconcile_batch)
                .await?;
            if accounts.is_empty() {
                tx.commit().await?;
                break;
            }
            cursor = accounts.last().map(|a| a.id());

            for account in &accounts {
                let ledger = tx.ledger_balance(account.id()).await?;
                record(
                    &mut report,
                    account.id(),
                    account.balance().minor_units(),
                    ledger,
                );
            }
            tx.commit().await?;
        }

        if report.is_clean() {
            info!("reconciliation clean: {} accounts checked", report.checked);
        } else {
            error!(
                "reconciliation found {} mismatches, {} accounts without ledger history",
                report.mismatched, report.missing_ledger
            );
        }
        Ok(report)
    }
}

fn record(report: &mut ReconcileReport, account_id: Uuid, balance: i64, ledger: Option<i64>) {
    let status = classify(balance, ledger);
    report.checked += 1;
    match status {
        ReconcileStatus::Match => report.matched += 1,
        ReconcileStatus::Mismatch => {
            report.mismatched += 1;
            warn!(
                "balance mismatch for {account_id}: account {balance}, ledger {}",
                ledger.unwrap_or(0)
            );
        }
        ReconcileStatus::NoLedgerEntry => report.missing_ledger += 1,
    }
    if status != ReconcileStatus::Match {
        report.anomalies.push(ReconcileEntry {
            account_id,
            account_balance_minor_units: balance,
            ledger_balance_minor_units: ledger,
            status,
        });
    }
}
