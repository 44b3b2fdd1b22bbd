//! Reservation storage.
//!
//! [`ReservationLedger`] is the persistence contract the oracle and the
//! booking service are written against. It performs no business validation:
//! any transition the caller asks for is applied as long as the stored status
//! still equals the expected one.
//!
//! Two implementations ship with the crate:
//! - [`MemoryLedger`]: process-local, used by tests and embedders that bring
//!   their own durability.
//! - [`WalLedger`]: write-ahead-logged, replayed on open.

mod durable;
mod memory;

pub use durable::WalLedger;
pub use memory::MemoryLedger;

use std::cmp::Reverse;

use async_trait::async_trait;
use thiserror::Error;
use ulid::Ulid;

use crate::error::{BookingError, PersistenceError};
use crate::model::{Reservation, ReservationStatus, Span};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("reservation not found: {0}")]
    NotFound(Ulid),
    #[error("reservation already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("WAL error: {0}")]
    Wal(String),
}

impl From<LedgerError> for PersistenceError {
    fn from(e: LedgerError) -> Self {
        PersistenceError::Storage(e.to_string())
    }
}

impl From<LedgerError> for BookingError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::NotFound(id) => BookingError::NotFound(id),
            other => BookingError::Persistence(other.into()),
        }
    }
}

#[async_trait]
pub trait ReservationLedger: Send + Sync {
    async fn create(&self, reservation: &Reservation) -> Result<(), LedgerError>;

    async fn get_by_id(&self, id: Ulid) -> Result<Reservation, LedgerError>;

    /// Most recently created first.
    async fn get_by_holder(&self, holder_id: Ulid) -> Result<Vec<Reservation>, LedgerError>;

    /// Compare-and-set on status. Returns the number of rows changed (0 or 1);
    /// an unknown id changes nothing.
    async fn update_status_if_current(
        &self,
        id: Ulid,
        expected: ReservationStatus,
        next: ReservationStatus,
    ) -> Result<u64, LedgerError>;

    /// Reservations on `asset_id` overlapping `span` whose status is in `statuses`.
    async fn overlap_count(
        &self,
        asset_id: Ulid,
        span: Span,
        statuses: &[ReservationStatus],
    ) -> Result<usize, LedgerError>;
}

/// Newest first. Ids come from a monotonic generator, so they break
/// same-millisecond ties in creation order.
pub(crate) fn sort_newest_first(reservations: &mut [Reservation]) {
    reservations.sort_by_key(|r| Reverse((r.created_at, r.id)));
}
