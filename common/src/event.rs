use crate::account::AccountEvent;
use crate::transfer::TransferEvent;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EventCodecError {
    #[error("unknown event type: {0}")]
    UnknownType(String),

    #[error("invalid payload for {event_type}: {source}")]
    InvalidPayload {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode {event_type}: {source}")]
    Encode {
        event_type: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// A domain event together with the aggregate it belongs to, as handed to
/// the outbox. Payloads are flat JSON maps keyed by field name; the event
/// type name alone drives decoding, and unknown names fail loudly.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    Account(AccountEvent),
    Transfer(TransferEvent),
}

impl DomainEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::Account(e) => e.event_type(),
            DomainEvent::Transfer(e) => e.event_type(),
        }
    }

    pub fn aggregate_type(&self) -> &'static str {
        match self {
            DomainEvent::Account(_) => "account",
            DomainEvent::Transfer(_) => "transfer",
        }
    }

    pub fn aggregate_id(&self) -> Uuid {
        match self {
            DomainEvent::Account(e) => e.account_id(),
            DomainEvent::Transfer(e) => e.transfer_id(),
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::Account(e) => e.occurred_at(),
            DomainEvent::Transfer(e) => e.occurred_at(),
        }
    }

    pub fn to_payload(&self) -> Result<serde_json::Value, EventCodecError> {
        let encode = |r: Result<serde_json::Value, serde_json::Error>| {
            r.map_err(|source| EventCodecError::Encode {
                event_type: self.event_type(),
                source,
            })
        };
        match self {
            DomainEvent::Account(AccountEvent::Opened(e)) => encode(serde_json::to_value(e)),
            DomainEvent::Account(AccountEvent::Debited(e)) => encode(serde_json::to_value(e)),
            DomainEvent::Account(AccountEvent::Credited(e)) => encode(serde_json::to_value(e)),
            DomainEvent::Account(AccountEvent::Frozen(e)) => encode(serde_json::to_value(e)),
            DomainEvent::Account(AccountEvent::Unfrozen(e)) => encode(serde_json::to_value(e)),
            DomainEvent::Account(AccountEvent::Closed(e)) => encode(serde_json::to_value(e)),
            DomainEvent::Transfer(TransferEvent::Initiated(e)) => encode(serde_json::to_value(e)),
            DomainEvent::Transfer(TransferEvent::Completed(e)) => encode(serde_json::to_value(e)),
            DomainEvent::Transfer(TransferEvent::Failed(e)) => encode(serde_json::to_value(e)),
            DomainEvent::Transfer(TransferEvent::Reversed(e)) => encode(serde_json::to_value(e)),
        }
    }

    pub fn from_payload(
        event_type: &str,
        payload: serde_json::Value,
    ) -> Result<Self, EventCodecError> {
        fn decode<T: serde::de::DeserializeOwned>(
            event_type: &str,
            payload: serde_json::Value,
        ) -> Result<T, EventCodecError> {
            serde_json::from_value(payload).map_err(|source| EventCodecError::InvalidPayload {
                event_type: event_type.to_string(),
                source,
            })
        }

        Ok(match event_type {
            "account.opened" => {
                DomainEvent::Account(AccountEvent::Opened(decode(event_type, payload)?))
            }
            "account.debited" => {
                DomainEvent::Account(AccountEvent::Debited(decode(event_type, payload)?))
            }
            "account.credited" => {
                DomainEvent::Account(AccountEvent::Credited(decode(event_type, payload)?))
            }
            "account.frozen" => {
                DomainEvent::Account(AccountEvent::Frozen(decode(event_type, payload)?))
            }
            "account.unfrozen" => {
                DomainEvent::Account(AccountEvent::Unfrozen(decode(event_type, payload)?))
            }
            "account.closed" => {
                DomainEvent::Account(AccountEvent::Closed(decode(event_type, payload)?))
            }
            "transfer.initiated" => {
                DomainEvent::Transfer(TransferEvent::Initiated(decode(event_type, payload)?))
            }
            "transfer.completed" => {
                DomainEvent::Transfer(TransferEvent::Completed(decode(event_type, payload)?))
            }
            "transfer.failed" => {
                DomainEvent::Transfer(TransferEvent::Failed(decode(event_type, payload)?))
            }
            "transfer.reversed" => {
                DomainEvent::Transfer(TransferEvent::Reversed(decode(event_type, payload)?))
            }
            other => return Err(EventCodecError::UnknownType(other.to_string())),
        })
    }
}

impl From<AccountEvent> for DomainEvent {
    fn from(e: AccountEvent) -> Self {
        DomainEvent::Account(e)
    }
}

impl From<TransferEvent> for DomainEvent {
    fn from(e: TransferEvent) -> Self {
        DomainEvent::Transfer(e)
    }
}
