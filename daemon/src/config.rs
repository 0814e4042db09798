use std::time::Duration;

// bind addresses
pub const DEFAULT_RPC_BIND_ADDRESS: &str = "127.0.0.1:8080";

// A whole-transaction retry budget for storage deadlocks. Non-deadlock
// failures are never retried.
pub const MAX_DEADLOCK_RETRIES: u32 = 3;

// Base delay for the randomised exponential backoff between deadlock
// retries.
pub const DEADLOCK_BACKOFF_BASE: Duration = Duration::from_millis(50);

// Outbox processor defaults
pub const DEFAULT_OUTBOX_BATCH: u64 = 25;
pub const DEFAULT_OUTBOX_SLEEP: Duration = Duration::from_secs(5);
pub const DEFAULT_OUTBOX_MAX_ATTEMPTS: i32 = 5;

// Unpublished rows older than this many minutes count as stuck for the
// health probe.
pub const DEFAULT_OUTBOX_STUCK_MINUTES: i64 = 10;

// Idempotency records are replayable for this long after first write.
pub const DEFAULT_IDEMPOTENCY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

// Accounts compared per reconciliation batch.
pub const DEFAULT_RECONCILE_BATCH: u64 = 100;

// Database pool sizing
pub const DEFAULT_MAX_DB_CONNECTIONS: u32 = 10;

/// Engine-level knobs shared by the request path.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_deadlock_retries: u32,
    pub reconcile_batch: u64,
    pub outbox_stuck_minutes: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_deadlock_retries: MAX_DEADLOCK_RETRIES,
            reconcile_batch: DEFAULT_RECONCILE_BATCH,
            outbox_stuck_minutes: DEFAULT_OUTBOX_STUCK_MINUTES,
        }
    }
}

/// Outbox processor knobs.
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    pub batch: u64,
    pub sleep: Duration,
    pub max_attempts: i32,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            batch: DEFAULT_OUTBOX_BATCH,
            sleep: DEFAULT_OUTBOX_SLEEP,
            max_attempts: DEFAULT_OUTBOX_MAX_ATTEMPTS,
        }
    }
}
