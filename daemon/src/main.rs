use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{error, info};
use std::sync::Arc;
use tally_daemon::config::{
    EngineConfig, OutboxConfig, DEFAULT_MAX_DB_CONNECTIONS, DEFAULT_OUTBOX_BATCH,
    DEFAULT_OUTBOX_MAX_ATTEMPTS, DEFAULT_RECONCILE_BATCH, DEFAULT_RPC_BIND_ADDRESS,
    MAX_DEADLOCK_RETRIES,
};
use tally_daemon::core::engine::Engine;
use tally_daemon::core::idempotency::IdempotencyGate;
use tally_daemon::core::outbox::{EventSink, LogSink, OutboxProcessor, WebhookSink};
use tally_daemon::core::storage::PgStorage;
use tally_daemon::rpc::RpcServer;
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "tallyd", version, about = "Tally fund-transfer engine daemon")]
struct Cli {
    /// Postgres connection string; falls back to the DATABASE_URL
    /// environment variable
    #[clap(long)]
    database_url: Option<String>,
    /// Maximum database connections in the pool
    #[clap(long, default_value_t = DEFAULT_MAX_DB_CONNECTIONS)]
    max_db_connections: u32,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API, with an embedded outbox processor by default
    Serve(ServeConfig),
    /// Outbox processing and recovery
    Outbox {
        #[command(subcommand)]
        command: OutboxCommand,
    },
    /// Compare account balances against the derived ledger balances
    Reconcile {
        /// Only check this account
        #[clap(long)]
        account: Option<Uuid>,
        /// Accounts compared per batch
        #[clap(long, default_value_t = DEFAULT_RECONCILE_BATCH)]
        batch: u64,
    },
    /// Delete expired idempotency records
    PurgeIdempotency,
}

#[derive(Args)]
struct ServeConfig {
    /// RPC bind address
    #[clap(long, default_value_t = String::from(DEFAULT_RPC_BIND_ADDRESS))]
    rpc_bind_address: String,
    /// Do not run the embedded outbox processor
    #[clap(long)]
    disable_outbox_processor: bool,
    /// Transaction retry budget for storage deadlocks
    #[clap(long, default_value_t = MAX_DEADLOCK_RETRIES)]
    max_deadlock_retries: u32,
    /// Idempotency record lifetime (e.g. 24h)
    #[clap(long, default_value = "24h")]
    idempotency_ttl: humantime::Duration,
    #[clap(flatten)]
    outbox: OutboxArgs,
}

#[derive(Args)]
struct OutboxArgs {
    /// Events claimed per tick
    #[clap(long, default_value_t = DEFAULT_OUTBOX_BATCH)]
    outbox_batch: u64,
    /// Sleep between ticks (e.g. 5s)
    #[clap(long, default_value = "5s")]
    outbox_sleep: humantime::Duration,
    /// Delivery attempts before an event is dead-lettered
    #[clap(long, default_value_t = DEFAULT_OUTBOX_MAX_ATTEMPTS)]
    outbox_max_attempts: i32,
    /// Deliver events to this webhook endpoint instead of logging them
    #[clap(long)]
    outbox_webhook: Option<String>,
}

impl OutboxArgs {
    fn config(&self) -> OutboxConfig {
        OutboxConfig {
            batch: self.outbox_batch,
            sleep: *self.outbox_sleep,
            max_attempts: self.outbox_max_attempts,
        }
    }

    fn sink(&self) -> Arc<dyn EventSink> {
        match &self.outbox_webhook {
            Some(endpoint) => Arc::new(WebhookSink::new(endpoint.clone())),
            None => Arc::new(LogSink),
        }
    }
}

#[derive(Subcommand)]
enum OutboxCommand {
    /// Run the standalone outbox processor until interrupted
    Run(OutboxArgs),
    /// List unpublished events at or above the dead-letter threshold
    DeadLetters {
        #[clap(long, default_value_t = DEFAULT_OUTBOX_MAX_ATTEMPTS)]
        min_attempts: i32,
        #[clap(long, default_value_t = 50)]
        limit: u64,
    },
    /// Reset one unpublished event for redelivery
    Requeue { id: Uuid },
    /// Reset every dead-lettered event for redelivery
    RequeueAll {
        #[clap(long, default_value_t = DEFAULT_OUTBOX_MAX_ATTEMPTS)]
        min_attempts: i32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let database_url = cli
        .database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .context("--database-url or DATABASE_URL is required")?;

    let storage = PgStorage::connect(&database_url, cli.max_db_connections)
        .await
        .context("failed to connect to database")?;
    storage.init_schema().await.context("failed to apply schema")?;

    match cli.command {
        Command::Serve(config) => serve(storage, config).await,
        Command::Outbox { command } => outbox(storage, command).await,
        Command::Reconcile { account, batch } => reconcile(storage, account, batch).await,
        Command::PurgeIdempotency => {
            let engine = Engine::new(storage, EngineConfig::default());
            let purged = engine.purge_expired_idempotency_keys().await?;
            info!("purged {purged} expired idempotency records");
            Ok(())
        }
    }
}

async fn serve(storage: PgStorage, config: ServeConfig) -> Result<()> {
    let engine = Arc::new(Engine::new(
        storage.clone(),
        EngineConfig {
            max_deadlock_retries: config.max_deadlock_retries,
            ..EngineConfig::default()
        },
    ));
    let gate = Arc::new(IdempotencyGate::new(
        storage.clone(),
        *config.idempotency_ttl,
    ));

    let server = RpcServer::start(&config.rpc_bind_address, engine, gate).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let processor = if config.disable_outbox_processor {
        None
    } else {
        let processor = OutboxProcessor::new(
            storage.clone(),
            config.outbox.sink(),
            config.outbox.config(),
        );
        Some(tokio::spawn(async move {
            processor.run(shutdown_rx).await;
        }))
    };

    wait_for_shutdown().await;
    info!("shutdown signal received");

    let _ = shutdown_tx.send(true);
    server.stop(true).await;
    if let Some(handle) = processor {
        let _ = handle.await;
    }
    Ok(())
}

async fn outbox(storage: PgStorage, command: OutboxCommand) -> Result<()> {
    match command {
        OutboxCommand::Run(args) => {
            let processor = OutboxProcessor::new(storage, args.sink(), args.config());
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let runner = tokio::spawn(async move {
                processor.run(shutdown_rx).await;
            });
            wait_for_shutdown().await;
            let _ = shutdown_tx.send(true);
            let _ = runner.await;
            Ok(())
        }
        OutboxCommand::DeadLetters {
            min_attempts,
            limit,
        } => {
            let engine = Engine::new(storage, EngineConfig::default());
            let events = engine.dead_letters(min_attempts, limit, None).await?;
            if events.is_empty() {
                info!("no dead-lettered events at or above {min_attempts} attempts");
                return Ok(());
            }
            for event in events {
                println!(
                    "{} {} attempts={} last_error={}",
                    event.id,
                    event.event_type,
                    event.attempt_count,
                    event.last_error.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
        OutboxCommand::Requeue { id } => {
            let engine = Engine::new(storage, EngineConfig::default());
            if engine.requeue_outbox_event(id).await? {
                Ok(())
            } else {
                anyhow::bail!("event {id} not found or already published")
            }
        }
        OutboxCommand::RequeueAll { min_attempts } => {
            let engine = Engine::new(storage, EngineConfig::default());
            engine.requeue_dead_letters(min_attempts).await?;
            Ok(())
        }
    }
}

async fn reconcile(storage: PgStorage, account: Option<Uuid>, batch: u64) -> Result<()> {
    let engine = Engine::new(
        storage,
        EngineConfig {
            reconcile_batch: batch,
            ..EngineConfig::default()
        },
    );
    let report = engine.reconcile(account).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.is_clean() {
        error!(
            "reconciliation found anomalies in {} of {} accounts",
            report.anomalies.len(),
            report.checked
        );
        std::process::exit(1);
    }
    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                error!("failed to install SIGTERM handler: {err}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
