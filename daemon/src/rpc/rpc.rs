//! Route handlers and the idempotent-POST protocol glue.

use super::error::error_parts;
use super::AppState;
use crate::core::error::EngineError;
use crate::core::idempotency::IdempotencyDecision;
use crate::core::storage::Storage;
use crate::core::transfers::NewTransfer;
use actix_web::http::header::LOCATION;
use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;
use std::future::Future;
use tally_common::api::accounts::{
    AccountResponse, LedgerEntryResponse, OpenAccountRequest, StatementQuery, StatementResponse,
};
use tally_common::api::transfers::{InitiateTransferRequest, ListTransfersQuery, TransferResponse};
use tally_common::api::{ErrorEnvelope, Pagination};
use uuid::Uuid;

const IDEMPOTENCY_KEY_HEADER: &str = "X-Idempotency-Key";
const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

pub fn configure<S: Storage>(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health::<S>)))
        .service(web::resource("/accounts").route(web::post().to(open_account::<S>)))
        .service(web::resource("/accounts/{id}").route(web::get().to(get_account::<S>)))
        .service(
            web::resource("/accounts/{id}/freeze").route(web::post().to(freeze_account::<S>)),
        )
        .service(
            web::resource("/accounts/{id}/unfreeze")
                .route(web::post().to(unfreeze_account::<S>)),
        )
        .service(web::resource("/accounts/{id}/close").route(web::post().to(close_account::<S>)))
        .service(
            web::resource("/accounts/{id}/transfers")
                .route(web::get().to(account_transfers::<S>)),
        )
        .service(
            web::resource("/accounts/{id}/statement")
                .route(web::get().to(account_statement::<S>)),
        )
        .service(
            web::resource("/transfers")
                .route(web::post().to(initiate_transfer::<S>))
                .route(web::get().to(list_transfers::<S>)),
        )
        .service(web::resource("/transfers/{id}").route(web::get().to(get_transfer::<S>)))
        .service(
            web::resource("/transfers/{id}/reverse")
                .route(web::post().to(reverse_transfer::<S>)),
        );
}

fn correlation_id(req: &HttpRequest) -> String {
    req.headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn idempotency_key(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn respond(
    status: StatusCode,
    body: &serde_json::Value,
    correlation_id: &str,
    location: Option<String>,
) -> HttpResponse {
    let mut builder = HttpResponse::build(status);
    builder.insert_header((CORRELATION_ID_HEADER, correlation_id));
    if let Some(location) = location {
        builder.insert_header((LOCATION, location));
    }
    builder.json(body)
}

fn error_json(err: &EngineError) -> (StatusCode, serde_json::Value) {
    let (status, code, message) = error_parts(err);
    if status.is_server_error() {
        error!("request failed: {err}");
    }
    (status, json!(ErrorEnvelope::new(code, message)))
}

fn validation_json(message: String) -> serde_json::Value {
    json!(ErrorEnvelope::new("VALIDATION_ERROR", message))
}

type HandlerOutput = Result<(StatusCode, serde_json::Value, Option<String>), EngineError>;

/// Run the idempotency protocol around one POST handler: replay a cached
/// response, or single-flight the first request and store its
/// user-visible outcome. Responses in the 5xx range are not stored.
async fn run_idempotent<S, F, Fut>(
    state: &AppState<S>,
    req: &HttpRequest,
    body: &[u8],
    required: bool,
    op: F,
) -> HttpResponse
where
    S: Storage,
    F: FnOnce() -> Fut,
    Fut: Future<Output = HandlerOutput>,
{
    let cid = correlation_id(req);
    let key = idempotency_key(req);

    let decision = state
        .gate
        .begin(key.as_deref(), required, req.method().as_str(), req.path(), body)
        .await;

    match decision {
        Err(err) => {
            let (status, body) = error_json(&err);
            respond(status, &body, &cid, None)
        }
        Ok(IdempotencyDecision::Replay { status, body }) => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
            respond(status, &body, &cid, None)
        }
        Ok(IdempotencyDecision::Untracked) => {
            let (status, body, location) = match op().await {
                Ok(output) => output,
                Err(err) => {
                    let (status, body) = error_json(&err);
                    (status, body, None)
                }
            };
            respond(status, &body, &cid, location)
        }
        Ok(IdempotencyDecision::Proceed(in_flight)) => {
            let (status, body, location) = match op().await {
                Ok(output) => output,
                Err(err) => {
                    let (status, body) = error_json(&err);
                    (status, body, None)
                }
            };

            let stored = if status.is_server_error() {
                state.gate.abandon(in_flight).await
            } else {
                state.gate.finish(in_flight, status.as_u16(), &body).await
            };
            if let Err(err) = stored {
                error!("failed to finalise idempotency record: {err}");
            }
            respond(status, &body, &cid, location)
        }
    }
}

async fn health<S: Storage>(state: web::Data<AppState<S>>, req: HttpRequest) -> HttpResponse {
    let cid = correlation_id(&req);
    match state.engine.outbox_stuck_count().await {
        Ok(stuck) => {
            let status = if stuck == 0 { "ok" } else { "degraded" };
            respond(
                StatusCode::OK,
                &json!({"data": {"status": status, "outbox_stuck": stuck}}),
                &cid,
                None,
            )
        }
        Err(err) => {
            let (status, body) = error_json(&err);
            respond(status, &body, &cid, None)
        }
    }
}

async fn open_account<S: Storage>(
    state: web::Data<AppState<S>>,
    req: HttpRequest,
    body: web::Bytes,
) -> HttpResponse {
    let parsed: OpenAccountRequest = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(err) => {
            let cid = correlation_id(&req);
            return respond(
                StatusCode::BAD_REQUEST,
                &validation_json(format!("invalid request body: {err}")),
                &cid,
                None,
            );
        }
    };

    let engine = state.engine.clone();
    run_idempotent(&state, &req, &body, true, move || async move {
        let account = engine
            .open_account(
                &parsed.owner_name,
                &parsed.currency,
                parsed.initial_balance_minor_units,
            )
            .await?;
        let location = format!("/accounts/{}", account.id());
        Ok((
            StatusCode::CREATED,
            json!({"data": AccountResponse::from(&account)}),
            Some(location),
        ))
    })
    .await
}

async fn get_account<S: Storage>(
    state: web::Data<AppState<S>>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> HttpResponse {
    let cid = correlation_id(&req);
    match state.engine.get_account(*path).await {
        Ok(account) => respond(
            StatusCode::OK,
            &json!({"data": AccountResponse::from(&account)}),
            &cid,
            None,
        ),
        Err(err) => {
            let (status, body) = error_json(&err);
            respond(status, &body, &cid, None)
        }
    }
}

async fn freeze_account<S: Storage>(
    state: web::Data<AppState<S>>,
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Bytes,
) -> HttpResponse {
    lifecycle_action(state, req, *path, body, AccountLifecycle::Freeze).await
}

async fn unfreeze_account<S: Storage>(
    state: web::Data<AppState<S>>,
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Bytes,
) -> HttpResponse {
    lifecycle_action(state, req, *path, body, AccountLifecycle::Unfreeze).await
}

async fn close_account<S: Storage>(
    state: web::Data<AppState<S>>,
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Bytes,
) -> HttpResponse {
    lifecycle_action(state, req, *path, body, AccountLifecycle::Close).await
}

#[derive(Clone, Copy)]
enum AccountLifecycle {
    Freeze,
    Unfreeze,
    Close,
}

async fn lifecycle_action<S: Storage>(
    state: web::Data<AppState<S>>,
    req: HttpRequest,
    id: Uuid,
    body: web::Bytes,
    action: AccountLifecycle,
) -> HttpResponse {
    let engine = state.engine.clone();
    // the idempotency key is optional on lifecycle sub-paths
    run_idempotent(&state, &req, &body, false, move || async move {
        let account = match action {
            AccountLifecycle::Freeze => engine.freeze_account(id).await?,
            AccountLifecycle::Unfreeze => engine.unfreeze_account(id).await?,
            AccountLifecycle::Close => engine.close_account(id).await?,
        };
        Ok((
            StatusCode::OK,
            json!({"data": AccountResponse::from(&account)}),
            None,
        ))
    })
    .await
}

async fn account_transfers<S: Storage>(
    state: web::Data<AppState<S>>,
    req: HttpRequest,
    path: web::Path<Uuid>,
    query: web::Query<ListTransfersQuery>,
) -> HttpResponse {
    let cid = correlation_id(&req);
    let (offset, limit) = pagination(query.page, query.per_page).clamped();
    match state
        .engine
        .list_account_transfers(*path, offset, limit)
        .await
    {
        Ok(transfers) => {
            let items: Vec<TransferResponse> =
                transfers.iter().map(TransferResponse::from).collect();
            respond(StatusCode::OK, &json!({"data": items}), &cid, None)
        }
        Err(err) => {
            let (status, body) = error_json(&err);
            respond(status, &body, &cid, None)
        }
    }
}

async fn account_statement<S: Storage>(
    state: web::Data<AppState<S>>,
    req: HttpRequest,
    path: web::Path<Uuid>,
    query: web::Query<StatementQuery>,
) -> HttpResponse {
    let cid = correlation_id(&req);
    let page = pagination(query.page, query.per_page);
    let (offset, limit) = page.clamped();
    match state
        .engine
        .account_statement(*path, query.from, query.to, offset, limit)
        .await
    {
        Ok(statement) => {
            let response = StatementResponse {
                account_id: statement.account_id,
                from: statement.from,
                to: statement.to,
                opening_balance_minor_units: statement.opening_balance_minor_units,
                closing_balance_minor_units: statement.closing_balance_minor_units,
                entries: statement
                    .entries
                    .iter()
                    .map(LedgerEntryResponse::from)
                    .collect(),
                page: page.page.max(1),
                per_page: limit as u32,
            };
            respond(StatusCode::OK, &json!({"data": response}), &cid, None)
        }
        Err(err) => {
            let (status, body) = error_json(&err);
            respond(status, &body, &cid, None)
        }
    }
}

async fn initiate_transfer<S: Storage>(
    state: web::Data<AppState<S>>,
    req: HttpRequest,
    body: web::Bytes,
) -> HttpResponse {
    let parsed: InitiateTransferRequest = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(err) => {
            let cid = correlation_id(&req);
            return respond(
                StatusCode::BAD_REQUEST,
                &validation_json(format!("invalid request body: {err}")),
                &cid,
                None,
            );
        }
    };

    let engine = state.engine.clone();
    run_idempotent(&state, &req, &body, true, move || async move {
        let request = NewTransfer::parse(
            parsed.source_account_id,
            parsed.destination_account_id,
            parsed.amount_minor_units,
            &parsed.currency,
            parsed.description,
        )?;
        let transfer = engine.initiate_transfer(request).await?;
        let location = format!("/transfers/{}", transfer.id());
        Ok((
            StatusCode::CREATED,
            json!({"data": TransferResponse::from(&transfer)}),
            Some(location),
        ))
    })
    .await
}

async fn list_transfers<S: Storage>(
    state: web::Data<AppState<S>>,
    req: HttpRequest,
    query: web::Query<ListTransfersQuery>,
) -> HttpResponse {
    let cid = correlation_id(&req);
    let (offset, limit) = pagination(query.page, query.per_page).clamped();
    match state
        .engine
        .list_transfers(query.status.as_deref(), offset, limit)
        .await
    {
        Ok(transfers) => {
            let items: Vec<TransferResponse> =
                transfers.iter().map(TransferResponse::from).collect();
            respond(StatusCode::OK, &json!({"data": items}), &cid, None)
        }
        Err(err) => {
            let (status, body) = error_json(&err);
            respond(status, &body, &cid, None)
        }
    }
}

async fn get_transfer<S: Storage>(
    state: web::Data<AppState<S>>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> HttpResponse {
    let cid = correlation_id(&req);
    match state.engine.get_transfer(*path).await {
        Ok(transfer) => respond(
            StatusCode::OK,
            &json!({"data": TransferResponse::from(&transfer)}),
            &cid,
            None,
        ),
        Err(err) => {
            let (status, body) = error_json(&err);
            respond(status, &body, &cid, None)
        }
    }
}

async fn reverse_transfer<S: Storage>(
    state: web::Data<AppState<S>>,
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Bytes,
) -> HttpResponse {
    let engine = state.engine.clone();
    let id = *path;
    run_idempotent(&state, &req, &body, false, move || async move {
        let transfer = engine.reverse_transfer(id).await?;
        Ok((
            StatusCode::OK,
            json!({"data": TransferResponse::from(&transfer)}),
            None,
        ))
    })
    .await
}

fn pagination(page: Option<u32>, per_page: Option<u32>) -> Pagination {
    let defaults = Pagination::default();
    Pagination {
        page: page.unwrap_or(defaults.page),
        per_page: per_page.unwrap_or(defaults.per_page),
    }
}
