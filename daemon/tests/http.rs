use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tally_daemon::config::EngineConfig;
use tally_daemon::core::engine::Engine;
use tally_daemon::core::idempotency::IdempotencyGate;
use tally_daemon::core::storage::MemoryStorage;
use tally_daemon::rpc::rpc::configure;
use tally_daemon::rpc::AppState;

const TTL: Duration = Duration::from_secs(24 * 60 * 60);

fn app_state(storage: MemoryStorage) -> web::Data<AppState<MemoryStorage>> {
    web::Data::new(AppState {
        engine: Arc::new(Engine::new(storage.clone(), EngineConfig::default())),
        gate: Arc::new(IdempotencyGate::new(storage, TTL)),
    })
}

macro_rules! init_app {
    ($storage:expr) => {
        test::init_service(
            App::new()
                .app_data(app_state($storage))
                .configure(configure::<MemoryStorage>),
        )
        .await
    };
}

macro_rules! open_account_http {
    ($app:expr, $key:expr, $balance:expr) => {{
        let req = test::TestRequest::post()
            .uri("/accounts")
            .insert_header(("X-Idempotency-Key", $key))
            .set_json(json!({
                "owner_name": "Ada Lovelace",
                "currency": "USD",
                "initial_balance_minor_units": $balance,
            }))
            .to_request();
        let resp = test::call_service($app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert!(resp.headers().get("Location").is_some());
        assert!(resp.headers().get("X-Correlation-ID").is_some());
        let body: Value = test::read_body_json(resp).await;
        body
    }};
}

#[actix_web::test]
async fn open_account_requires_idempotency_key() {
    let app = init_app!(MemoryStorage::new());

    let req = test::TestRequest::post()
        .uri("/accounts")
        .set_json(json!({"owner_name": "Ada", "currency": "USD"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "IDEMPOTENCY_KEY_REQUIRED");
}

#[actix_web::test]
async fn open_account_validation_envelope() {
    let app = init_app!(MemoryStorage::new());

    let req = test::TestRequest::post()
        .uri("/accounts")
        .insert_header(("X-Idempotency-Key", "k-blank"))
        .set_json(json!({"owner_name": "   ", "currency": "USD"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[actix_web::test]
async fn twenty_identical_posts_create_one_transfer() {
    let storage = MemoryStorage::new();
    let app = init_app!(storage.clone());

    let a = open_account_http!(&app, "open-a", 100_000)["data"]["id"]
        .as_str()
        .unwrap()
        .to_string();
    let b = open_account_http!(&app, "open-b", 0)["data"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let payload = json!({
        "source_account_id": a,
        "destination_account_id": b,
        "amount_minor_units": 1000,
        "currency": "USD",
    });

    let mut transfer_ids = Vec::new();
    for _ in 0..20 {
        let req = test::TestRequest::post()
            .uri("/transfers")
            .insert_header(("X-Idempotency-Key", "transfer-1"))
            .set_json(payload.clone())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = test::read_body_json(resp).await;
        transfer_ids.push(body["data"]["id"].as_str().unwrap().to_string());
    }
    assert!(transfer_ids.windows(2).all(|w| w[0] == w[1]));

    // exactly one transfer row and two ledger rows
    let list_req = test::TestRequest::get().uri("/transfers").to_request();
    let resp = test::call_service(&app, list_req).await;
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let account_req = test::TestRequest::get()
        .uri(&format!("/accounts/{a}"))
        .to_request();
    let resp = test::call_service(&app, account_req).await;
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["balance_minor_units"], 99_000);
}

#[actix_web::test]
async fn same_key_different_body_is_rejected() {
    let app = init_app!(MemoryStorage::new());
    open_account_http!(&app, "shared-key", 0);

    let req = test::TestRequest::post()
        .uri("/accounts")
        .insert_header(("X-Idempotency-Key", "shared-key"))
        .set_json(json!({"owner_name": "Someone Else", "currency": "USD"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "IDEMPOTENCY_KEY_REUSE");
}

#[actix_web::test]
async fn cross_path_key_reuse_is_rejected() {
    let app = init_app!(MemoryStorage::new());
    let a = open_account_http!(&app, "acc-1", 1_000)["data"]["id"]
        .as_str()
        .unwrap()
        .to_string();
    let b = open_account_http!(&app, "acc-2", 0)["data"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    // the same key on a different path carries a different fingerprint
    let req = test::TestRequest::post()
        .uri("/transfers")
        .insert_header(("X-Idempotency-Key", "acc-1"))
        .set_json(json!({
            "source_account_id": a,
            "destination_account_id": b,
            "amount_minor_units": 10,
            "currency": "USD",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "IDEMPOTENCY_KEY_REUSE");
}

#[actix_web::test]
async fn transfer_error_mapping() {
    let app = init_app!(MemoryStorage::new());
    let a = open_account_http!(&app, "map-a", 100)["data"]["id"]
        .as_str()
        .unwrap()
        .to_string();
    let b = open_account_http!(&app, "map-b", 0)["data"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    // insufficient funds -> 422
    let req = test::TestRequest::post()
        .uri("/transfers")
        .insert_header(("X-Idempotency-Key", "t-insufficient"))
        .set_json(json!({
            "source_account_id": a,
            "destination_account_id": b,
            "amount_minor_units": 500,
            "currency": "USD",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "INSUFFICIENT_FUNDS");

    // same account -> 422
    let req = test::TestRequest::post()
        .uri("/transfers")
        .insert_header(("X-Idempotency-Key", "t-same"))
        .set_json(json!({
            "source_account_id": a,
            "destination_account_id": a,
            "amount_minor_units": 10,
            "currency": "USD",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "SAME_ACCOUNT_TRANSFER");

    // unknown account -> 404
    let req = test::TestRequest::post()
        .uri("/transfers")
        .insert_header(("X-Idempotency-Key", "t-missing"))
        .set_json(json!({
            "source_account_id": a,
            "destination_account_id": uuid::Uuid::new_v4(),
            "amount_minor_units": 10,
            "currency": "USD",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "ACCOUNT_NOT_FOUND");
}

#[actix_web::test]
async fn frozen_account_conflict_and_lifecycle() {
    let app = init_app!(MemoryStorage::new());
    let a = open_account_http!(&app, "f-a", 1_000)["data"]["id"]
        .as_str()
        .unwrap()
        .to_string();
    let b = open_account_http!(&app, "f-b", 0)["data"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    // lifecycle endpoints work without an idempotency key
    let req = test::TestRequest::post()
        .uri(&format!("/accounts/{a}/freeze"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["status"], "frozen");

    let req = test::TestRequest::post()
        .uri("/transfers")
        .insert_header(("X-Idempotency-Key", "f-t"))
        .set_json(json!({
            "source_account_id": a,
            "destination_account_id": b,
            "amount_minor_units": 10,
            "currency": "USD",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "ACCOUNT_FROZEN");

    // closing a frozen non-empty account conflicts
    let req = test::TestRequest::post()
        .uri(&format!("/accounts/{a}/close"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "NON_ZERO_BALANCE_ON_CLOSE");
}

#[actix_web::test]
async fn reverse_and_double_reverse_over_http() {
    let app = init_app!(MemoryStorage::new());
    let a = open_account_http!(&app, "r-a", 5_000)["data"]["id"]
        .as_str()
        .unwrap()
        .to_string();
    let b = open_account_http!(&app, "r-b", 2_000)["data"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let req = test::TestRequest::post()
        .uri("/transfers")
        .insert_header(("X-Idempotency-Key", "r-t"))
        .set_json(json!({
            "source_account_id": a,
            "destination_account_id": b,
            "amount_minor_units": 2000,
            "currency": "USD",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let body: Value = test::read_body_json(resp).await;
    let transfer_id = body["data"]["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri(&format!("/transfers/{transfer_id}/reverse"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["status"], "reversed");

    let req = test::TestRequest::post()
        .uri(&format!("/transfers/{transfer_id}/reverse"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "INVALID_TRANSFER_STATE");

    let req = test::TestRequest::get()
        .uri(&format!("/accounts/{a}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["balance_minor_units"], 5_000);
}

#[actix_web::test]
async fn invalid_status_filter_is_bad_request() {
    let app = init_app!(MemoryStorage::new());

    let req = test::TestRequest::get()
        .uri("/transfers?status=bogus")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[actix_web::test]
async fn correlation_id_passthrough() {
    let app = init_app!(MemoryStorage::new());

    let req = test::TestRequest::get()
        .uri("/health")
        .insert_header(("X-Correlation-ID", "req-777"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("X-Correlation-ID").unwrap(),
        "req-777"
    );
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["status"], "ok");
}
