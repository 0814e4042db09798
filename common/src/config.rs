use uuid::Uuid;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Account constraints
pub const MAX_OWNER_NAME_LEN: usize = 255;

// Transfer reference format: TXN-YYYYMMDD-<12 hex chars>
pub const TRANSFER_REFERENCE_PREFIX: &str = "TXN";

// Idempotency keys are caller supplied and bounded
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 100;

// Outbox last_error is truncated to this many bytes at a char boundary
pub const MAX_OUTBOX_ERROR_BYTES: usize = 500;

// Counterparty recorded on bootstrap credits written when an account is
// opened with a non-zero initial balance. This is a sentinel, not a
// persisted account.
pub const SYSTEM_ACCOUNT_ID: Uuid = Uuid::from_u128(1);

// Transfer id recorded on bootstrap credits. Fixed so the ledger uniqueness
// guard (account_id, transfer_id, entry_type) also covers repeated
// bootstrap attempts against the same account.
pub const BOOTSTRAP_TRANSFER_ID: Uuid = Uuid::from_u128(2);
