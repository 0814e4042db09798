mod common;

use common::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tally_daemon::core::error::EngineError;
use tally_daemon::core::idempotency::{IdempotencyDecision, IdempotencyGate};
use tally_daemon::core::storage::MemoryStorage;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[tokio::test]
async fn first_flight_then_replay() {
    let storage = MemoryStorage::new();
    let gate = IdempotencyGate::new(storage, DAY);

    let in_flight = match gate
        .begin(Some("key-1"), true, "POST", "/transfers", b"{}")
        .await
        .unwrap()
    {
        IdempotencyDecision::Proceed(in_flight) => in_flight,
        _ => panic!("expected first flight"),
    };

    gate.finish(in_flight, 201, &json!({"data": {"id": "t-1"}}))
        .await
        .unwrap();

    match gate
        .begin(Some("key-1"), true, "POST", "/transfers", b"{}")
        .await
        .unwrap()
    {
        IdempotencyDecision::Replay { status, body } => {
            assert_eq!(status, 201);
            assert_eq!(body["data"]["id"], "t-1");
        }
        _ => panic!("expected replay"),
    }
}

#[tokio::test]
async fn missing_key_behaviour_depends_on_endpoint() {
    let storage = MemoryStorage::new();
    let gate = IdempotencyGate::new(storage, DAY);

    let err = gate
        .begin(None, true, "POST", "/transfers", b"{}")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::IdempotencyKeyRequired));

    match gate
        .begin(None, false, "POST", "/accounts/x/freeze", b"")
        .await
        .unwrap()
    {
        IdempotencyDecision::Untracked => {}
        _ => panic!("optional endpoints skip the protocol without a key"),
    }
}

#[tokio::test]
async fn oversized_key_is_rejected() {
    let storage = MemoryStorage::new();
    let gate = IdempotencyGate::new(storage, DAY);

    let key = "k".repeat(101);
    let err = gate
        .begin(Some(&key), true, "POST", "/transfers", b"{}")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn hash_mismatch_is_reuse() {
    let storage = MemoryStorage::new();
    let gate = IdempotencyGate::new(storage, DAY);

    let in_flight = match gate
        .begin(Some("key-2"), true, "POST", "/transfers", b"{\"a\":1}")
        .await
        .unwrap()
    {
        IdempotencyDecision::Proceed(in_flight) => in_flight,
        _ => panic!("expected first flight"),
    };
    gate.finish(in_flight, 201, &json!({})).await.unwrap();

    let err = gate
        .begin(Some("key-2"), true, "POST", "/transfers", b"{\"a\":2}")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::IdempotencyKeyReuse));
}

#[tokio::test]
async fn expired_record_is_a_miss() {
    let storage = MemoryStorage::new();
    // zero TTL: every stored record is expired by the next lookup
    let gate = IdempotencyGate::new(storage, Duration::ZERO);

    let in_flight = match gate
        .begin(Some("key-3"), true, "POST", "/transfers", b"{}")
        .await
        .unwrap()
    {
        IdempotencyDecision::Proceed(in_flight) => in_flight,
        _ => panic!("expected first flight"),
    };
    gate.finish(in_flight, 201, &json!({})).await.unwrap();

    // the expired record behaves like a first request again
    match gate
        .begin(Some("key-3"), true, "POST", "/transfers", b"{}")
        .await
        .unwrap()
    {
        IdempotencyDecision::Proceed(in_flight) => gate.abandon(in_flight).await.unwrap(),
        _ => panic!("expired record must be treated as a miss"),
    }
}

#[tokio::test]
async fn concurrent_first_requests_single_flight() {
    let storage = MemoryStorage::new();
    let gate = Arc::new(IdempotencyGate::new(storage, DAY));

    let first = match gate
        .begin(Some("key-4"), true, "POST", "/transfers", b"{}")
        .await
        .unwrap()
    {
        IdempotencyDecision::Proceed(in_flight) => in_flight,
        _ => panic!("expected first flight"),
    };

    // a second request on the same key blocks on the key lock until the
    // first stores its response, then replays it
    let contender = {
        let gate = gate.clone();
        tokio::spawn(async move {
            gate.begin(Some("key-4"), true, "POST", "/transfers", b"{}")
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!contender.is_finished());

    gate.finish(first, 201, &json!({"data": {"id": "winner"}}))
        .await
        .unwrap();

    match contender.await.unwrap().unwrap() {
        IdempotencyDecision::Replay { status, body } => {
            assert_eq!(status, 201);
            assert_eq!(body["data"]["id"], "winner");
        }
        _ => panic!("second flight must replay the committed response"),
    }
}

#[tokio::test]
async fn abandoned_flight_stores_nothing() {
    let storage = MemoryStorage::new();
    let gate = IdempotencyGate::new(storage, DAY);

    let in_flight = match gate
        .begin(Some("key-5"), true, "POST", "/transfers", b"{}")
        .await
        .unwrap()
    {
        IdempotencyDecision::Proceed(in_flight) => in_flight,
        _ => panic!("expected first flight"),
    };
    gate.abandon(in_flight).await.unwrap();

    // nothing cached: the next request is a first flight again
    match gate
        .begin(Some("key-5"), true, "POST", "/transfers", b"{}")
        .await
        .unwrap()
    {
        IdempotencyDecision::Proceed(in_flight) => gate.abandon(in_flight).await.unwrap(),
        _ => panic!("abandoned flight must not cache a response"),
    }
}

#[tokio::test]
async fn purge_removes_expired_records() {
    let storage = MemoryStorage::new();
    let engine = engine_on(storage.clone());

    let gate = IdempotencyGate::new(storage.clone(), Duration::ZERO);
    for key in ["p-1", "p-2"] {
        let in_flight = match gate
            .begin(Some(key), true, "POST", "/transfers", b"{}")
            .await
            .unwrap()
        {
            IdempotencyDecision::Proceed(in_flight) => in_flight,
            _ => panic!("expected first flight"),
        };
        gate.finish(in_flight, 201, &json!({})).await.unwrap();
    }

    assert_eq!(engine.purge_expired_idempotency_keys().await.unwrap(), 2);
    assert_eq!(engine.purge_expired_idempotency_keys().await.unwrap(), 0);
}
