//! Scoped transactional unit of work with bounded deadlock retry.

use crate::config::DEADLOCK_BACKOFF_BASE;
use crate::core::error::EngineError;
use crate::core::storage::{Storage, StorageTransaction};
use futures::future::BoxFuture;
use rand::Rng;
use std::time::Duration;

/// Run `op` inside a transaction: commit on success, roll back on any
/// failure. A deadlock signal from the store retries the whole closure up
/// to `max_attempts` times with randomised exponential backoff; every
/// other failure propagates on first occurrence.
///
/// The closure may run more than once and must be restartable from
/// scratch; its return value is passed through verbatim.
pub async fn with_transaction<S, T, F>(
    storage: &S,
    max_attempts: u32,
    op: F,
) -> Result<T, EngineError>
where
    S: Storage,
    F: for<'a> Fn(&'a mut S::Tx) -> BoxFuture<'a, Result<T, EngineError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let mut tx = storage.begin().await?;
        let result = op(&mut tx).await;

        let err = match result {
            Ok(value) => match tx.commit().await {
                Ok(()) => return Ok(value),
                // commits can deadlock too under row-lock contention
                Err(err) => err,
            },
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("rollback failed after {err}: {rollback_err}");
                }
                err
            }
        };

        if err.is_deadlock() && attempt < max_attempts {
            let delay = backoff_delay(attempt);
            debug!(
                "deadlock on attempt {attempt}/{max_attempts}, retrying in {}ms",
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
            continue;
        }
        return Err(err);
    }
}

/// Exponential backoff with full jitter on top.
fn backoff_delay(attempt: u32) -> Duration {
    let base = DEADLOCK_BACKOFF_BASE * 2u32.saturating_pow(attempt - 1);
    let jitter = rand::thread_rng().gen_range(0..=base.as_millis() as u64);
    base + Duration::from_millis(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::MemoryStorage;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn returns_closure_value_verbatim() {
        let storage = MemoryStorage::new();
        let value = with_transaction(&storage, 3, |_tx| async move { Ok(42u64) }.boxed())
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn retries_deadlocks_up_to_budget() {
        let storage = MemoryStorage::new();
        let calls = AtomicU32::new(0);

        let result: Result<(), EngineError> = with_transaction(&storage, 3, |_tx| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(EngineError::Deadlock) }.boxed()
        })
        .await;

        assert!(matches!(result, Err(EngineError::Deadlock)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn deadlock_resolving_mid_budget_succeeds() {
        let storage = MemoryStorage::new();
        let calls = AtomicU32::new(0);

        let result = with_transaction(&storage, 3, |_tx| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(EngineError::Deadlock)
                } else {
                    Ok("done")
                }
            }
            .boxed()
        })
        .await
        .unwrap();

        assert_eq!(result, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_deadlock_errors_do_not_retry() {
        let storage = MemoryStorage::new();
        let calls = AtomicU32::new(0);

        let result: Result<(), EngineError> = with_transaction(&storage, 3, |_tx| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(EngineError::Validation("nope".to_string())) }.boxed()
        })
        .await;

        assert!(matches!(result, Err(EngineError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
