//! The HTTP surface of the engine, served with actix-web.

pub mod error;
pub mod rpc;

use crate::core::engine::Engine;
use crate::core::idempotency::IdempotencyGate;
use crate::core::storage::Storage;
use actix_web::dev::ServerHandle;
use actix_web::error::InternalError;
use actix_web::{web, App, HttpResponse, HttpServer};
use anyhow::Context;
use std::sync::Arc;
use tally_common::api::ErrorEnvelope;
use tokio::sync::Mutex;

pub struct AppState<S: Storage> {
    pub engine: Arc<Engine<S>>,
    pub gate: Arc<IdempotencyGate<S>>,
}

impl<S: Storage> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            gate: self.gate.clone(),
        }
    }
}

pub struct RpcServer {
    handle: Mutex<Option<ServerHandle>>,
}

fn bad_request_envelope(message: String) -> HttpResponse {
    HttpResponse::BadRequest().json(ErrorEnvelope::new("VALIDATION_ERROR", message))
}

impl RpcServer {
    /// Bind and spawn the HTTP server. Signal handling stays with the
    /// caller; use [`RpcServer::stop`] for shutdown.
    pub async fn start<S: Storage>(
        bind_address: &str,
        engine: Arc<Engine<S>>,
        gate: Arc<IdempotencyGate<S>>,
    ) -> Result<Self, anyhow::Error> {
        let state = web::Data::new(AppState { engine, gate });

        let server = HttpServer::new(move || {
            App::new()
                .app_data(state.clone())
                // malformed paths and query strings get the same envelope
                // as every other failure
                .app_data(web::PathConfig::default().error_handler(|err, _req| {
                    InternalError::from_response(
                        "path error",
                        bad_request_envelope(err.to_string()),
                    )
                    .into()
                }))
                .app_data(web::QueryConfig::default().error_handler(|err, _req| {
                    InternalError::from_response(
                        "query error",
                        bad_request_envelope(err.to_string()),
                    )
                    .into()
                }))
                .configure(rpc::configure::<S>)
        })
        .disable_signals()
        .bind(bind_address)
        .with_context(|| format!("failed to bind RPC server on {bind_address}"))?
        .run();

        info!("RPC server listening on {bind_address}");
        let handle = server.handle();
        tokio::spawn(server);

        Ok(Self {
            handle: Mutex::new(Some(handle)),
        })
    }

    pub async fn stop(&self, graceful: bool) {
        if let Some(handle) = self.handle.lock().await.take() {
            info!("stopping RPC server (graceful: {graceful})");
            handle.stop(graceful).await;
        }
    }
}
