//! Postgres storage backend.
//!
//! All safety-critical reads take explicit row locks (`FOR UPDATE`), the
//! outbox claim uses `FOR UPDATE SKIP LOCKED`, and the ledger append leans
//! on the `(account_id, transfer_id, entry_type)` unique constraint for
//! retry idempotency. Queries use the runtime API so the crate builds
//! without a live database.

mod providers;
mod rows;

use crate::core::error::EngineError;
use crate::core::storage::{Storage, StorageTransaction};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};

const SCHEMA: &str = include_str!("schema.sql");

#[derive(Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    /// Connect and size the pool. Each unit of work holds exactly one
    /// connection for the duration of its transaction.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, EngineError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded schema. Idempotent.
    pub async fn init_schema(&self) -> Result<(), EngineError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub struct PgStorageTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StorageTransaction for PgStorageTx {
    async fn commit(self) -> Result<(), EngineError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), EngineError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// A session-level advisory lock on a dedicated pooled connection.
///
/// Released explicitly through the storage; if the guard is dropped
/// without release (cancelled request), the connection is detached from
/// the pool and closed, which releases the lock server-side instead of
/// leaking it into a reused connection.
pub struct PgKeyLock {
    conn: Option<PoolConnection<Postgres>>,
    key: i64,
}

impl Drop for PgKeyLock {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            drop(conn.detach());
        }
    }
}

/// Stable 64-bit advisory-lock key for an idempotency key string.
fn advisory_key(key: &str) -> i64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

#[async_trait]
impl Storage for PgStorage {
    type Tx = PgStorageTx;
    type KeyLock = PgKeyLock;

    async fn begin(&self) -> Result<Self::Tx, EngineError> {
        let tx = self.pool.begin().await?;
        Ok(PgStorageTx { tx })
    }

    async fn lock_idempotency_key(&self, key: &str) -> Result<Self::KeyLock, EngineError> {
        let key = advisory_key(key);
        let mut conn = self.pool.acquire().await?;
        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(key)
            .execute(&mut *conn)
            .await?;
        Ok(PgKeyLock {
            conn: Some(conn),
            key,
        })
    }

    async fn release_idempotency_key(&self, mut lock: Self::KeyLock) -> Result<(), EngineError> {
        if let Some(mut conn) = lock.conn.take() {
            sqlx::query("SELECT pg_advisory_unlock($1)")
                .bind(lock.key)
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }
}
