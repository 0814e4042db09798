//! Outbox dispatch: the poll-and-publish daemon and its sinks.
//!
//! Delivery is at-least-once. Each tick claims a batch of unpublished
//! rows under skip-locked row locks, dispatches them to the sink, and
//! records the outcome in the same transaction, so two processors never
//! contend for the same row. Events that keep failing stop being retried
//! at the dead-letter threshold and are left for operator recovery.

use crate::config::OutboxConfig;
use crate::core::error::EngineError;
use crate::core::storage::{OutboxProvider, Storage, StorageTransaction};
use async_trait::async_trait;
use std::sync::Arc;
use tally_common::event::DomainEvent;
use tally_common::outbox::OutboxEvent;
use thiserror::Error;
use tokio::sync::watch;

/// Write domain events into the outbox within the caller's transaction.
pub(crate) async fn enqueue_events<T, I>(tx: &mut T, events: I) -> Result<(), EngineError>
where
    T: OutboxProvider + Send,
    I: IntoIterator<Item = DomainEvent> + Send,
{
    for event in events {
        let row = OutboxEvent::from_domain(&event)?;
        tx.save_event(&row).await?;
    }
    Ok(())
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct SinkError(pub String);

/// Where claimed outbox events get dispatched.
#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    async fn publish(&self, event: &OutboxEvent) -> Result<(), SinkError>;
}

/// Dispatches events as JSON over HTTP POST.
pub struct WebhookSink {
    client: reqwest::Client,
    endpoint: String,
}

impl WebhookSink {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl EventSink for WebhookSink {
    async fn publish(&self, event: &OutboxEvent) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(event)
            .send()
            .await
            .map_err(|e| SinkError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SinkError(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Logs each event instead of delivering it. The default sink when no
/// webhook endpoint is configured.
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn publish(&self, event: &OutboxEvent) -> Result<(), SinkError> {
        info!(
            "event {} {} aggregate={}/{}",
            event.id, event.event_type, event.aggregate_type, event.aggregate_id
        );
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickStats {
    pub claimed: u64,
    pub published: u64,
    pub failed: u64,
    pub dead_lettered: u64,
}

pub struct OutboxProcessor<S: Storage> {
    storage: S,
    sink: Arc<dyn EventSink>,
    config: OutboxConfig,
}

impl<S: Storage> OutboxProcessor<S> {
    pub fn new(storage: S, sink: Arc<dyn EventSink>, config: OutboxConfig) -> Self {
        Self {
            storage,
            sink,
            config,
        }
    }

    /// Claim one batch, dispatch it, and record outcomes. One transaction
    /// per tick.
    pub async fn tick(&self) -> Result<TickStats, EngineError> {
        let mut stats = TickStats::default();
        let mut tx = self.storage.begin().await?;
        let events = tx
            .claim_unpublished(self.config.batch, self.config.max_attempts)
            .await?;
        stats.claimed = events.len() as u64;

        for event in &events {
            match self.sink.publish(event).await {
                Ok(()) => {
                    tx.mark_published(event.id).await?;
                    stats.published += 1;
                }
                Err(err) => {
                    tx.mark_failed(event.id, &err.to_string()).await?;
                    let attempts = event.attempt_count + 1;
                    if attempts >= self.config.max_attempts {
                        stats.dead_lettered += 1;
                        error!(
                            "outbox event {} ({}) dead-lettered after {attempts} attempts: {err}",
                            event.id, event.event_type
                        );
                    } else {
                        stats.failed += 1;
                        warn!(
                            "outbox event {} dispatch failed (attempt {attempts}/{}): {err}",
                            event.id, self.config.max_attempts
                        );
                    }
                }
            }
        }
        tx.commit().await?;

        metrics::counter!("tally_outbox_published_total").increment(stats.published);
        metrics::counter!("tally_outbox_failed_total").increment(stats.failed);
        metrics::counter!("tally_outbox_dead_lettered_total").increment(stats.dead_lettered);
        Ok(stats)
    }

    /// Poll until the shutdown signal flips. Dispatch failures are
    /// retried on later ticks and never crash the loop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "outbox processor started (batch {}, every {})",
            self.config.batch,
            humantime::format_duration(self.config.sleep)
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.tick().await {
                Ok(stats) if stats.claimed > 0 => {
                    debug!(
                        "outbox tick: claimed {} published {} failed {} dead-lettered {}",
                        stats.claimed, stats.published, stats.failed, stats.dead_lettered
                    );
                }
                Ok(_) => {}
                Err(err) => {
                    error!("outbox tick failed: {err}");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.sleep) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!("outbox processor stopped");
    }
}
