mod event;

pub use event::{
    TransferCompleted, TransferEvent, TransferFailed, TransferInitiated, TransferReversed,
};

use crate::config::TRANSFER_REFERENCE_PREFIX;
use crate::error::TransferError;
use crate::money::Money;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Reversed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Processing => "processing",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
            TransferStatus::Reversed => "reversed",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransferStatus::Pending),
            "processing" => Ok(TransferStatus::Processing),
            "completed" => Ok(TransferStatus::Completed),
            "failed" => Ok(TransferStatus::Failed),
            "reversed" => Ok(TransferStatus::Reversed),
            other => Err(format!("unknown transfer status: {other}")),
        }
    }
}

/// Human-readable reference: `TXN-YYYYMMDD-<12 hex>`.
fn generate_reference(at: DateTime<Utc>) -> String {
    let suffix: u64 = rand::thread_rng().gen_range(0..(1u64 << 48));
    format!(
        "{}-{}-{:012x}",
        TRANSFER_REFERENCE_PREFIX,
        at.format("%Y%m%d"),
        suffix
    )
}

/// The Transfer aggregate.
///
/// State machine: pending -> processing -> {completed, failed};
/// completed -> reversed. Completed, failed and reversed are terminal for
/// forward progress. Every transition bumps `version` by one.
#[derive(Debug, Clone)]
pub struct Transfer {
    id: Uuid,
    reference: String,
    source_account_id: Uuid,
    destination_account_id: Uuid,
    amount: Money,
    status: TransferStatus,
    description: Option<String>,
    failure_code: Option<String>,
    failure_reason: Option<String>,
    completed_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
    reversed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
    events: Vec<TransferEvent>,
}

impl Transfer {
    /// Start a new pending transfer. Emits `transfer.initiated`.
    pub fn initiate(
        id: Uuid,
        source_account_id: Uuid,
        destination_account_id: Uuid,
        amount: Money,
        description: Option<String>,
    ) -> Result<Self, TransferError> {
        if source_account_id == destination_account_id {
            return Err(TransferError::SameAccount);
        }
        if !amount.is_positive() {
            return Err(TransferError::InvalidAmount(amount.minor_units()));
        }

        let now = Utc::now();
        let reference = generate_reference(now);
        let mut transfer = Self {
            id,
            reference: reference.clone(),
            source_account_id,
            destination_account_id,
            amount,
            status: TransferStatus::Pending,
            description: description.clone(),
            failure_code: None,
            failure_reason: None,
            completed_at: None,
            failed_at: None,
            reversed_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
            events: Vec::new(),
        };
        transfer
            .events
            .push(TransferEvent::Initiated(TransferInitiated {
                transfer_id: id,
                reference,
                source_account_id,
                destination_account_id,
                amount_minor_units: amount.minor_units(),
                currency: amount.currency(),
                description,
                occurred_at: now,
            }));
        Ok(transfer)
    }

    /// Rehydrate from storage. The event buffer starts empty.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: Uuid,
        reference: String,
        source_account_id: Uuid,
        destination_account_id: Uuid,
        amount: Money,
        status: TransferStatus,
        description: Option<String>,
        failure_code: Option<String>,
        failure_reason: Option<String>,
        completed_at: Option<DateTime<Utc>>,
        failed_at: Option<DateTime<Utc>>,
        reversed_at: Option<DateTime<Utc>>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        version: u64,
    ) -> Self {
        Self {
            id,
            reference,
            source_account_id,
            destination_account_id,
            amount,
            status,
            description,
            failure_code,
            failure_reason,
            completed_at,
            failed_at,
            reversed_at,
            created_at,
            updated_at,
            version,
            events: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn source_account_id(&self) -> Uuid {
        self.source_account_id
    }

    pub fn destination_account_id(&self) -> Uuid {
        self.destination_account_id
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn failure_code(&self) -> Option<&str> {
        self.failure_code.as_deref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn failed_at(&self) -> Option<DateTime<Utc>> {
        self.failed_at
    }

    pub fn reversed_at(&self) -> Option<DateTime<Utc>> {
        self.reversed_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    fn transition(
        &mut self,
        expected: TransferStatus,
        next: TransferStatus,
        action: &'static str,
    ) -> Result<DateTime<Utc>, TransferError> {
        if self.status != expected {
            return Err(TransferError::InvalidState {
                status: self.status,
                action,
            });
        }
        let now = Utc::now();
        self.status = next;
        self.version += 1;
        self.updated_at = now;
        Ok(now)
    }

    pub fn mark_processing(&mut self) -> Result<(), TransferError> {
        self.transition(
            TransferStatus::Pending,
            TransferStatus::Processing,
            "process",
        )?;
        Ok(())
    }

    /// Finish the transfer. Emits `transfer.completed`.
    pub fn complete(&mut self) -> Result<(), TransferError> {
        let now = self.transition(
            TransferStatus::Processing,
            TransferStatus::Completed,
            "complete",
        )?;
        self.completed_at = Some(now);
        self.events
            .push(TransferEvent::Completed(TransferCompleted {
                transfer_id: self.id,
                reference: self.reference.clone(),
                occurred_at: now,
            }));
        Ok(())
    }

    /// Record a domain failure. Emits `transfer.failed`.
    pub fn fail(&mut self, code: &str, reason: &str) -> Result<(), TransferError> {
        let now = self.transition(TransferStatus::Processing, TransferStatus::Failed, "fail")?;
        self.failure_code = Some(code.to_string());
        self.failure_reason = Some(reason.to_string());
        self.failed_at = Some(now);
        self.events.push(TransferEvent::Failed(TransferFailed {
            transfer_id: self.id,
            reference: self.reference.clone(),
            failure_code: code.to_string(),
            failure_reason: reason.to_string(),
            occurred_at: now,
        }));
        Ok(())
    }

    /// Compensate a completed transfer. Emits `transfer.reversed`.
    pub fn reverse(&mut self) -> Result<(), TransferError> {
        let now = self.transition(
            TransferStatus::Completed,
            TransferStatus::Reversed,
            "reverse",
        )?;
        self.reversed_at = Some(now);
        self.events.push(TransferEvent::Reversed(TransferReversed {
            transfer_id: self.id,
            reference: self.reference.clone(),
            occurred_at: now,
        }));
        Ok(())
    }

    /// Drain the buffered events.
    pub fn release_events(&mut self) -> Vec<TransferEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn has_pending_events(&self) -> bool {
        !self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::CurrencyCode;

    fn usd_amount(units: i64) -> Money {
        Money::new(units, CurrencyCode::new("USD").unwrap()).unwrap()
    }

    fn initiate() -> Transfer {
        Transfer::initiate(
            Uuid::now_v7(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            usd_amount(500),
            Some("rent".to_string()),
        )
        .unwrap()
    }

    #[test]
    fn initiate_validates_inputs() {
        let same = Uuid::new_v4();
        assert_eq!(
            Transfer::initiate(Uuid::now_v7(), same, same, usd_amount(1), None).unwrap_err(),
            TransferError::SameAccount
        );
        assert_eq!(
            Transfer::initiate(Uuid::now_v7(), Uuid::new_v4(), Uuid::new_v4(), usd_amount(0), None)
                .unwrap_err(),
            TransferError::InvalidAmount(0)
        );
    }

    #[test]
    fn reference_format() {
        let transfer = initiate();
        let reference = transfer.reference();
        let parts: Vec<&str> = reference.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "TXN");
        assert_eq!(parts[1].len(), 8);
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[2].len(), 12);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn happy_path_transitions() {
        let mut transfer = initiate();
        assert_eq!(transfer.status(), TransferStatus::Pending);
        assert_eq!(transfer.version(), 0);

        transfer.mark_processing().unwrap();
        assert_eq!(transfer.status(), TransferStatus::Processing);
        assert_eq!(transfer.version(), 1);

        transfer.complete().unwrap();
        assert_eq!(transfer.status(), TransferStatus::Completed);
        assert_eq!(transfer.version(), 2);
        assert!(transfer.completed_at().is_some());

        transfer.reverse().unwrap();
        assert_eq!(transfer.status(), TransferStatus::Reversed);
        assert!(transfer.reversed_at().is_some());

        let events = transfer.release_events();
        let types: Vec<&str> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(
            types,
            vec![
                "transfer.initiated",
                "transfer.completed",
                "transfer.reversed"
            ]
        );
    }

    #[test]
    fn fail_records_code_and_reason() {
        let mut transfer = initiate();
        transfer.mark_processing().unwrap();
        transfer
            .fail("INSUFFICIENT_FUNDS", "insufficient funds: need 500, have 0")
            .unwrap();
        assert_eq!(transfer.status(), TransferStatus::Failed);
        assert_eq!(transfer.failure_code(), Some("INSUFFICIENT_FUNDS"));
        assert!(transfer.failed_at().is_some());

        // failed is terminal
        assert!(matches!(
            transfer.complete().unwrap_err(),
            TransferError::InvalidState { .. }
        ));
    }

    #[test]
    fn illegal_transitions_rejected() {
        let mut transfer = initiate();
        // cannot complete from pending
        assert!(matches!(
            transfer.complete().unwrap_err(),
            TransferError::InvalidState { .. }
        ));
        // cannot reverse a pending transfer
        assert!(matches!(
            transfer.reverse().unwrap_err(),
            TransferError::InvalidState { .. }
        ));

        transfer.mark_processing().unwrap();
        transfer.complete().unwrap();
        transfer.reverse().unwrap();

        // double reversal
        assert!(matches!(
            transfer.reverse().unwrap_err(),
            TransferError::InvalidState { .. }
        ));
    }
}
