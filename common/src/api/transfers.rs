use crate::transfer::Transfer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiateTransferRequest {
    pub source_account_id: Uuid,
    pub destination_account_id: Uuid,
    pub amount_minor_units: i64,
    pub currency: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferResponse {
    pub id: Uuid,
    pub reference: String,
    pub source_account_id: Uuid,
    pub destination_account_id: Uuid,
    pub amount_minor_units: i64,
    pub currency: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reversed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&Transfer> for TransferResponse {
    fn from(transfer: &Transfer) -> Self {
        Self {
            id: transfer.id(),
            reference: transfer.reference().to_string(),
            source_account_id: transfer.source_account_id(),
            destination_account_id: transfer.destination_account_id(),
            amount_minor_units: transfer.amount().minor_units(),
            currency: transfer.amount().currency().as_str().to_string(),
            status: transfer.status().as_str().to_string(),
            description: transfer.description().map(str::to_string),
            failure_code: transfer.failure_code().map(str::to_string),
            failure_reason: transfer.failure_reason().map(str::to_string),
            completed_at: transfer.completed_at(),
            failed_at: transfer.failed_at(),
            reversed_at: transfer.reversed_at(),
            created_at: transfer.created_at(),
        }
    }
}

/// Query string for `GET /transfers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListTransfersQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub per_page: Option<u32>,
}
