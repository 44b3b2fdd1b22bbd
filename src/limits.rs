use crate::model::Ms;

pub const HOUR_MS: Ms = 3_600_000;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Shortest rental accepted. Exactly one day is allowed.
pub const MIN_RENTAL_MS: Ms = DAY_MS;

/// How far in the past a rental may start.
pub const START_GRACE_MS: Ms = DAY_MS;

pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 1_000;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 60_000;

/// Bounded queue between ledger callers and the WAL writer task.
pub const WAL_CHANNEL_CAPACITY: usize = 4096;

/// Per-asset broadcast buffer for ledger notifications.
pub const NOTIFY_CHANNEL_CAPACITY: usize = 256;
