use crate::core::error::EngineError;
use crate::core::storage::{IdempotencyProvider, Storage, StorageTransaction};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tally_common::config::MAX_IDEMPOTENCY_KEY_LEN;

/// A cached response for one idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub request_hash: String,
    pub response_status: u16,
    pub response_body: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Hex SHA-256 over `METHOD|path|body`. Scopes a key to the exact request
/// it was first used with: the same key on a different path or body is a
/// reuse, not a replay.
pub fn request_fingerprint(method: &str, path: &str, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(b"|");
    hasher.update(path.as_bytes());
    hasher.update(b"|");
    hasher.update(body);
    hex::encode(hasher.finalize())
}

/// Outcome of the pre-handler idempotency protocol.
pub enum IdempotencyDecision<S: Storage> {
    /// Stored response for this key+fingerprint; return it verbatim and
    /// do not run the handler or store again.
    Replay { status: u16, body: serde_json::Value },
    /// First flight: the key lock is held until `finish` or `abandon`.
    Proceed(InFlightKey<S>),
    /// No key on an endpoint where it is optional.
    Untracked,
}

impl<S: Storage> std::fmt::Debug for IdempotencyDecision<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdempotencyDecision::Replay { status, body } => f
                .debug_struct("Replay")
                .field("status", status)
                .field("body", body)
                .finish(),
            IdempotencyDecision::Proceed(key) => f.debug_tuple("Proceed").field(key).finish(),
            IdempotencyDecision::Untracked => write!(f, "Untracked"),
        }
    }
}

/// Held state for a first-flight request.
pub struct InFlightKey<S: Storage> {
    key: String,
    request_hash: String,
    lock: S::KeyLock,
}

impl<S: Storage> std::fmt::Debug for InFlightKey<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightKey")
            .field("key", &self.key)
            .field("request_hash", &self.request_hash)
            .finish()
    }
}

/// Runs the idempotency protocol around covered handlers.
pub struct IdempotencyGate<S: Storage> {
    storage: S,
    ttl: ChronoDuration,
}

impl<S: Storage> IdempotencyGate<S> {
    pub fn new(storage: S, ttl: Duration) -> Self {
        Self {
            storage,
            ttl: ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::hours(24)),
        }
    }

    /// Run the pre-handler protocol. `required` marks endpoints where a
    /// missing key is a client error rather than a skip.
    pub async fn begin(
        &self,
        key: Option<&str>,
        required: bool,
        method: &str,
        path: &str,
        body: &[u8],
    ) -> Result<IdempotencyDecision<S>, EngineError> {
        let key = match key {
            Some(k) if !k.is_empty() => k,
            _ if required => return Err(EngineError::IdempotencyKeyRequired),
            _ => return Ok(IdempotencyDecision::Untracked),
        };
        if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(EngineError::Validation(format!(
                "idempotency key exceeds {MAX_IDEMPOTENCY_KEY_LEN} bytes"
            )));
        }

        let request_hash = request_fingerprint(method, path, body);

        // Fast path without the lock.
        if let Some(decision) = self.check(key, &request_hash).await? {
            return Ok(decision);
        }

        // A concurrent first request may commit between the two checks, so
        // re-check once while holding the key lock.
        let lock = self.storage.lock_idempotency_key(key).await?;
        match self.check(key, &request_hash).await {
            Ok(Some(decision)) => {
                self.storage.release_idempotency_key(lock).await?;
                Ok(decision)
            }
            Ok(None) => Ok(IdempotencyDecision::Proceed(InFlightKey {
                key: key.to_string(),
                request_hash,
                lock,
            })),
            Err(err) => {
                self.storage.release_idempotency_key(lock).await?;
                Err(err)
            }
        }
    }

    /// Store the user-visible response and release the key lock. Runs for
    /// both success and domain-failure responses.
    pub async fn finish(
        &self,
        in_flight: InFlightKey<S>,
        response_status: u16,
        response_body: &serde_json::Value,
    ) -> Result<(), EngineError> {
        let now = Utc::now();
        let record = IdempotencyRecord {
            key: in_flight.key,
            request_hash: in_flight.request_hash,
            response_status,
            response_body: response_body.clone(),
            created_at: now,
            expires_at: now + self.ttl,
        };

        let mut tx = self.storage.begin().await?;
        tx.save_record(&record).await?;
        tx.commit().await?;

        self.storage.release_idempotency_key(in_flight.lock).await
    }

    /// Release the key lock without storing anything, for responses that
    /// must not be replayed (infrastructure failures).
    pub async fn abandon(&self, in_flight: InFlightKey<S>) -> Result<(), EngineError> {
        self.storage.release_idempotency_key(in_flight.lock).await
    }

    /// One protocol check: replay on key+hash match, reuse failure on hash
    /// mismatch, miss otherwise. An expired record counts as a miss and is
    /// deleted in passing.
    async fn check(
        &self,
        key: &str,
        request_hash: &str,
    ) -> Result<Option<IdempotencyDecision<S>>, EngineError> {
        let mut tx = self.storage.begin().await?;
        let found = tx.find_record(key).await?;

        let record = match found {
            Some(record) if record.is_expired(Utc::now()) => {
                tx.delete_record(key).await?;
                tx.commit().await?;
                return Ok(None);
            }
            Some(record) => record,
            None => {
                tx.commit().await?;
                return Ok(None);
            }
        };
        tx.commit().await?;

        if record.request_hash == request_hash {
            Ok(Some(IdempotencyDecision::Replay {
                status: record.response_status,
                body: record.response_body,
            }))
        } else {
            Err(EngineError::IdempotencyKeyReuse)
        }
    }
}
