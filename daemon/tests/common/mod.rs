#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use tally_common::outbox::OutboxEvent;
use tally_daemon::config::EngineConfig;
use tally_daemon::core::engine::Engine;
use tally_daemon::core::outbox::{EventSink, SinkError};
use tally_daemon::core::storage::{
    AccountProvider, LedgerProvider, MemoryStorage, OutboxProvider, Storage, StorageTransaction,
};
use uuid::Uuid;

pub fn engine() -> Engine<MemoryStorage> {
    Engine::new(MemoryStorage::new(), EngineConfig::default())
}

pub fn engine_on(storage: MemoryStorage) -> Engine<MemoryStorage> {
    Engine::new(storage, EngineConfig::default())
}

pub async fn open_usd_account(engine: &Engine<MemoryStorage>, balance: i64) -> Uuid {
    engine
        .open_account("Test Owner", "USD", Some(balance))
        .await
        .unwrap()
        .id()
}

pub async fn balance_of(storage: &MemoryStorage, id: Uuid) -> i64 {
    let mut tx = storage.begin().await.unwrap();
    let account = tx.get_account(id).await.unwrap();
    tx.commit().await.unwrap();
    account.balance().minor_units()
}

pub async fn ledger_rows_for(storage: &MemoryStorage, transfer_id: Uuid) -> Vec<tally_common::ledger::LedgerEntry> {
    let mut tx = storage.begin().await.unwrap();
    let entries = tx.entries_for_transfer(transfer_id).await.unwrap();
    tx.commit().await.unwrap();
    entries
}

/// Every unpublished outbox row, oldest first.
pub async fn unpublished_events(storage: &MemoryStorage) -> Vec<OutboxEvent> {
    let mut tx = storage.begin().await.unwrap();
    let events = tx.claim_unpublished(u64::MAX, i32::MAX).await.unwrap();
    tx.rollback().await.unwrap();
    events
}

/// Sink that records published event ids and can fail the first N calls.
pub struct RecordingSink {
    pub published: Mutex<Vec<Uuid>>,
    failures_remaining: AtomicU32,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::failing(0)
    }

    pub fn failing(failures: u32) -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            failures_remaining: AtomicU32::new(failures),
        }
    }

    pub fn published_ids(&self) -> Vec<Uuid> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn publish(&self, event: &OutboxEvent) -> Result<(), SinkError> {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(SinkError("injected dispatch failure".to_string()));
        }
        self.published.lock().unwrap().push(event.id);
        Ok(())
    }
}

/// Sink that always fails.
pub struct FailingSink;

#[async_trait]
impl EventSink for FailingSink {
    async fn publish(&self, _event: &OutboxEvent) -> Result<(), SinkError> {
        Err(SinkError("sink unavailable".to_string()))
    }
}
