mod common;

use common::*;
use std::collections::HashSet;
use std::sync::Arc;
use tally_common::account::{AccountEvent, AccountFrozen};
use tally_common::event::DomainEvent;
use tally_common::outbox::OutboxEvent;
use tally_daemon::config::OutboxConfig;
use tally_daemon::core::outbox::OutboxProcessor;
use tally_daemon::core::storage::{
    MemoryStorage, OutboxProvider, Storage, StorageTransaction,
};
use tally_daemon::core::transfers::NewTransfer;
use uuid::Uuid;

async fn seed_events(storage: &MemoryStorage, count: usize) -> Vec<Uuid> {
    let mut ids = Vec::with_capacity(count);
    let mut tx = storage.begin().await.unwrap();
    for _ in 0..count {
        let event = DomainEvent::Account(AccountEvent::Frozen(AccountFrozen {
            account_id: Uuid::new_v4(),
            occurred_at: chrono::Utc::now(),
        }));
        let row = OutboxEvent::from_domain(&event).unwrap();
        ids.push(row.id);
        tx.save_event(&row).await.unwrap();
    }
    tx.commit().await.unwrap();
    ids
}

#[tokio::test]
async fn committed_transfer_carries_its_full_event_set() {
    let engine = engine();
    let storage = engine.storage().clone();
    let a = open_usd_account(&engine, 1_000).await;
    let b = open_usd_account(&engine, 0).await;

    let transfer = engine
        .initiate_transfer(NewTransfer::parse(a, b, 250, "USD", None).unwrap())
        .await
        .unwrap();

    let events = unpublished_events(&storage).await;
    let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    // two account openings, then the transfer's own set
    assert_eq!(
        types,
        vec![
            "account.opened",
            "account.opened",
            "transfer.initiated",
            "account.debited",
            "account.credited",
            "transfer.completed",
        ]
    );

    // attribution and decodability of the stored payloads
    for event in &events {
        let decoded = event.decode().unwrap();
        assert_eq!(decoded.aggregate_id(), event.aggregate_id);
        assert_eq!(decoded.event_type(), event.event_type);
    }
    let initiated = events
        .iter()
        .find(|e| e.event_type == "transfer.initiated")
        .unwrap();
    assert_eq!(initiated.aggregate_id, transfer.id());
    assert_eq!(initiated.aggregate_type, "transfer");
}

#[tokio::test]
async fn failed_transfer_emits_initiated_and_failed_only() {
    let engine = engine();
    let storage = engine.storage().clone();
    let a = open_usd_account(&engine, 10).await;
    let b = open_usd_account(&engine, 0).await;

    engine
        .initiate_transfer(NewTransfer::parse(a, b, 100, "USD", None).unwrap())
        .await
        .unwrap_err();

    let events = unpublished_events(&storage).await;
    let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(
        types,
        vec![
            "account.opened",
            "account.opened",
            "transfer.initiated",
            "transfer.failed",
        ]
    );
    assert!(!types.contains(&"account.debited"));
}

#[tokio::test]
async fn rolled_back_transfer_leaves_no_outbox_rows() {
    let engine = engine();
    let storage = engine.storage().clone();
    let a = open_usd_account(&engine, 100).await;

    engine
        .initiate_transfer(NewTransfer::parse(a, Uuid::new_v4(), 50, "USD", None).unwrap())
        .await
        .unwrap_err();

    let events = unpublished_events(&storage).await;
    // only the two opening events survive; the aborted transfer wrote none
    assert!(events.iter().all(|e| e.event_type == "account.opened"));
}

#[tokio::test]
async fn processor_publishes_batch_and_stamps_rows() {
    let storage = MemoryStorage::new();
    let ids = seed_events(&storage, 7).await;

    let sink = Arc::new(RecordingSink::new());
    let processor = OutboxProcessor::new(
        storage.clone(),
        sink.clone(),
        OutboxConfig {
            batch: 10,
            ..OutboxConfig::default()
        },
    );

    let stats = processor.tick().await.unwrap();
    assert_eq!(stats.claimed, 7);
    assert_eq!(stats.published, 7);
    assert_eq!(stats.failed, 0);

    // claim order is oldest first
    assert_eq!(sink.published_ids(), ids);

    let mut tx = storage.begin().await.unwrap();
    assert_eq!(tx.count_unpublished().await.unwrap(), 0);
    for id in ids {
        let event = tx.find_event(id).await.unwrap().unwrap();
        assert!(event.is_published());
    }
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn two_processors_publish_disjoint_rows_exactly_once() {
    let storage = MemoryStorage::new();
    seed_events(&storage, 100).await;

    let sink_a = Arc::new(RecordingSink::new());
    let sink_b = Arc::new(RecordingSink::new());
    let config = OutboxConfig {
        batch: 10,
        ..OutboxConfig::default()
    };
    let processor_a = OutboxProcessor::new(storage.clone(), sink_a.clone(), config.clone());
    let processor_b = OutboxProcessor::new(storage.clone(), sink_b.clone(), config);

    let drain_a = async {
        while processor_a.tick().await.unwrap().claimed > 0 {}
    };
    let drain_b = async {
        while processor_b.tick().await.unwrap().claimed > 0 {}
    };
    tokio::join!(drain_a, drain_b);

    let mut all: Vec<Uuid> = sink_a.published_ids();
    all.extend(sink_b.published_ids());
    let unique: HashSet<Uuid> = all.iter().copied().collect();
    assert_eq!(all.len(), 100, "every row dispatched exactly once");
    assert_eq!(unique.len(), 100, "no row dispatched twice");

    let mut tx = storage.begin().await.unwrap();
    assert_eq!(tx.count_unpublished().await.unwrap(), 0);
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn dead_letter_after_max_attempts_then_operator_requeue() {
    let storage = MemoryStorage::new();
    let ids = seed_events(&storage, 1).await;
    let id = ids[0];

    let config = OutboxConfig {
        batch: 10,
        max_attempts: 5,
        ..OutboxConfig::default()
    };
    let failing = OutboxProcessor::new(storage.clone(), Arc::new(FailingSink), config.clone());

    for attempt in 1..=5 {
        let stats = failing.tick().await.unwrap();
        assert_eq!(stats.claimed, 1, "attempt {attempt} should claim the row");
        if attempt < 5 {
            assert_eq!(stats.failed, 1);
            assert_eq!(stats.dead_lettered, 0);
        } else {
            assert_eq!(stats.dead_lettered, 1);
        }
    }

    // at the threshold the processor stops claiming it
    let stats = failing.tick().await.unwrap();
    assert_eq!(stats.claimed, 0);

    let mut tx = storage.begin().await.unwrap();
    let event = tx.find_event(id).await.unwrap().unwrap();
    assert_eq!(event.attempt_count, 5);
    assert!(!event.is_published());
    assert_eq!(
        event.last_error.as_deref(),
        Some("sink unavailable")
    );
    let dead = tx.find_dead_lettered(5, 10, None).await.unwrap();
    assert_eq!(dead.len(), 1);
    tx.commit().await.unwrap();

    // operator requeue resets the counter, a healthy sink then delivers
    let engine = engine_on(storage.clone());
    assert!(engine.requeue_outbox_event(id).await.unwrap());

    let sink = Arc::new(RecordingSink::new());
    let healthy = OutboxProcessor::new(storage.clone(), sink.clone(), config);
    let stats = healthy.tick().await.unwrap();
    assert_eq!(stats.published, 1);
    assert_eq!(sink.published_ids(), vec![id]);
}

#[tokio::test]
async fn transient_failures_recover_without_operator() {
    let storage = MemoryStorage::new();
    seed_events(&storage, 1).await;

    // first two dispatches fail, the third succeeds
    let sink = Arc::new(RecordingSink::failing(2));
    let processor = OutboxProcessor::new(
        storage.clone(),
        sink.clone(),
        OutboxConfig {
            batch: 10,
            ..OutboxConfig::default()
        },
    );

    assert_eq!(processor.tick().await.unwrap().failed, 1);
    assert_eq!(processor.tick().await.unwrap().failed, 1);
    let stats = processor.tick().await.unwrap();
    assert_eq!(stats.published, 1);

    let mut tx = storage.begin().await.unwrap();
    let remaining = tx.count_unpublished().await.unwrap();
    tx.commit().await.unwrap();
    assert_eq!(remaining, 0);
}

#[tokio::test]
async fn requeue_refuses_published_rows() {
    let storage = MemoryStorage::new();
    let ids = seed_events(&storage, 1).await;

    let processor = OutboxProcessor::new(
        storage.clone(),
        Arc::new(RecordingSink::new()),
        OutboxConfig::default(),
    );
    processor.tick().await.unwrap();

    let engine = engine_on(storage.clone());
    // published rows stay published unless an operator explicitly requeues
    // an unpublished one; this row is already delivered
    assert!(!engine.requeue_outbox_event(ids[0]).await.unwrap());
    assert!(!engine.requeue_outbox_event(Uuid::new_v4()).await.unwrap());
}

#[tokio::test]
async fn bulk_requeue_resets_all_dead_letters() {
    let storage = MemoryStorage::new();
    seed_events(&storage, 3).await;

    let config = OutboxConfig {
        batch: 10,
        max_attempts: 2,
        ..OutboxConfig::default()
    };
    let failing = OutboxProcessor::new(storage.clone(), Arc::new(FailingSink), config.clone());
    failing.tick().await.unwrap();
    failing.tick().await.unwrap();
    assert_eq!(failing.tick().await.unwrap().claimed, 0);

    let engine = engine_on(storage.clone());
    assert_eq!(engine.requeue_dead_letters(2).await.unwrap(), 3);

    let sink = Arc::new(RecordingSink::new());
    let healthy = OutboxProcessor::new(storage.clone(), sink.clone(), config);
    assert_eq!(healthy.tick().await.unwrap().published, 3);
}
