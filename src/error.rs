use std::fmt;

use thiserror::Error;
use ulid::Ulid;

use crate::model::{Ms, ReservationStatus};

/// Malformed booking input. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("start {start} is more than {grace_ms} ms in the past")]
    StartInPast { start: Ms, grace_ms: Ms },
    #[error("end {end} must be after start {start}")]
    EndNotAfterStart { start: Ms, end: Ms },
    #[error("rental of {duration_ms} ms is shorter than the minimum {min_ms} ms")]
    BelowMinimumPeriod { duration_ms: Ms, min_ms: Ms },
    #[error("price overflow")]
    PriceOverflow,
}

/// Storage or lock failure. Callers may retry with backoff.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("timed out waiting for the lock on asset {0}")]
    LockTimeout(Ulid),
    /// The request deadline passed before the lock was even requested.
    #[error("deadline elapsed during {0}")]
    Timeout(&'static str),
    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    /// The asset's availability flag is off.
    Retired,
    /// Another pending or active reservation overlaps the window.
    Overlap,
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnavailableReason::Retired => f.write_str("asset is flagged unavailable"),
            UnavailableReason::Overlap => f.write_str("window overlaps an existing reservation"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BookingError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("asset {asset_id} unavailable: {reason}")]
    Unavailable {
        asset_id: Ulid,
        reason: UnavailableReason,
    },
    #[error("access denied to reservation {0}")]
    AccessDenied(Ulid),
    #[error("reservation {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Ulid,
        from: ReservationStatus,
        to: ReservationStatus,
    },
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
