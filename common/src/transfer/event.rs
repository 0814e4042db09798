use crate::money::CurrencyCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferInitiated {
    pub transfer_id: Uuid,
    pub reference: String,
    pub source_account_id: Uuid,
    pub destination_account_id: Uuid,
    pub amount_minor_units: i64,
    pub currency: CurrencyCode,
    pub description: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferCompleted {
    pub transfer_id: Uuid,
    pub reference: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferFailed {
    pub transfer_id: Uuid,
    pub reference: String,
    pub failure_code: String,
    pub failure_reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferReversed {
    pub transfer_id: Uuid,
    pub reference: String,
    pub occurred_at: DateTime<Utc>,
}

/// Domain events buffered by the Transfer aggregate until released.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Initiated(TransferInitiated),
    Completed(TransferCompleted),
    Failed(TransferFailed),
    Reversed(TransferReversed),
}

impl TransferEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            TransferEvent::Initiated(_) => "transfer.initiated",
            TransferEvent::Completed(_) => "transfer.completed",
            TransferEvent::Failed(_) => "transfer.failed",
            TransferEvent::Reversed(_) => "transfer.reversed",
        }
    }

    pub fn transfer_id(&self) -> Uuid {
        match self {
            TransferEvent::Initiated(e) => e.transfer_id,
            TransferEvent::Completed(e) => e.transfer_id,
            TransferEvent::Failed(e) => e.transfer_id,
            TransferEvent::Reversed(e) => e.transfer_id,
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TransferEvent::Initiated(e) => e.occurred_at,
            TransferEvent::Completed(e) => e.occurred_at,
            TransferEvent::Failed(e) => e.occurred_at,
            TransferEvent::Reversed(e) => e.occurred_at,
        }
    }
}
