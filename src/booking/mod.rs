//! Booking orchestration: validation, pricing, and the reservation lifecycle.
//!
//! The service keeps no reservation state of its own. Every operation reads
//! the ledger first and every status change is a compare-and-set against the
//! status it read.

mod pricing;

pub use pricing::{rental_days, total_price, validate_window};

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};
use ulid::{Generator, Ulid};

use crate::directory::AssetDirectory;
use crate::error::{BookingError, PersistenceError, UnavailableReason};
use crate::ledger::ReservationLedger;
use crate::limits::DEFAULT_LOCK_TIMEOUT_MS;
use crate::model::*;
use crate::observability::{RESERVATIONS_TOTAL, TRANSITIONS_TOTAL};
use crate::oracle::{AvailabilityOracle, Decision};

/// A holder's request for one asset over `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewReservation {
    pub asset_id: Ulid,
    pub holder_id: Ulid,
    pub start: Ms,
    pub end: Ms,
}

pub struct BookingService {
    directory: Arc<dyn AssetDirectory>,
    ledger: Arc<dyn ReservationLedger>,
    oracle: AvailabilityOracle,
    lock_timeout: Duration,
    ids: Mutex<Generator>,
}

impl BookingService {
    pub fn new(directory: Arc<dyn AssetDirectory>, ledger: Arc<dyn ReservationLedger>) -> Self {
        Self {
            oracle: AvailabilityOracle::new(ledger.clone()),
            directory,
            ledger,
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            ids: Mutex::new(Generator::new()),
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn oracle(&self) -> &AvailabilityOracle {
        &self.oracle
    }

    /// Create a pending reservation, waiting at most the configured lock
    /// timeout for the asset.
    pub async fn create_reservation(&self, req: NewReservation) -> Result<Reservation, BookingError> {
        let deadline = Instant::now() + self.lock_timeout;
        self.create_reservation_with_deadline(req, deadline).await
    }

    pub async fn create_reservation_with_deadline(
        &self,
        req: NewReservation,
        deadline: Instant,
    ) -> Result<Reservation, BookingError> {
        let result = self.create_inner(req, deadline).await;
        let outcome = match &result {
            Ok(_) => "accepted",
            Err(BookingError::Validation(_)) => "invalid",
            Err(BookingError::Unavailable { .. }) => "unavailable",
            Err(BookingError::NotFound(_)) => "not_found",
            Err(BookingError::Persistence(
                PersistenceError::LockTimeout(_) | PersistenceError::Timeout(_),
            )) => "timeout",
            Err(_) => "error",
        };
        metrics::counter!(RESERVATIONS_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn create_inner(
        &self,
        req: NewReservation,
        deadline: Instant,
    ) -> Result<Reservation, BookingError> {
        let now = now_ms();
        let span = validate_window(req.start, req.end, now)?;

        let asset = timeout_at(deadline, self.directory.get_by_id(req.asset_id))
            .await
            .map_err(|_| PersistenceError::Timeout("asset lookup"))??;
        if !asset.available {
            return Err(BookingError::Unavailable {
                asset_id: asset.id,
                reason: UnavailableReason::Retired,
            });
        }
        let total_price = total_price(asset.day_rate, span)?;

        let draft = Reservation {
            id: self.next_id(),
            asset_id: asset.id,
            holder_id: req.holder_id,
            span,
            total_price,
            status: ReservationStatus::Pending,
            created_at: now,
        };
        match self.oracle.try_reserve(draft, Some(deadline)).await {
            Ok(Decision::Accepted(reservation)) => {
                info!(
                    reservation = %reservation.id,
                    asset = %reservation.asset_id,
                    holder = %reservation.holder_id,
                    price = %reservation.total_price,
                    "reservation created"
                );
                Ok(reservation)
            }
            Ok(Decision::Rejected { overlapping }) => {
                debug!(asset = %asset.id, overlapping, "reservation rejected");
                Err(BookingError::Unavailable {
                    asset_id: asset.id,
                    reason: UnavailableReason::Overlap,
                })
            }
            Err(e) => {
                warn!(asset = %asset.id, error = %e, "reservation attempt failed");
                Err(e.into())
            }
        }
    }

    /// Only the holder may read a reservation.
    pub async fn get_reservation(&self, id: Ulid, requester: Ulid) -> Result<Reservation, BookingError> {
        let reservation = self.ledger.get_by_id(id).await?;
        if reservation.holder_id != requester {
            return Err(BookingError::AccessDenied(id));
        }
        Ok(reservation)
    }

    /// Most recently created first.
    pub async fn list_reservations_for_holder(
        &self,
        holder_id: Ulid,
    ) -> Result<Vec<Reservation>, BookingError> {
        Ok(self.ledger.get_by_holder(holder_id).await?)
    }

    pub async fn cancel_reservation(&self, id: Ulid, requester: Ulid) -> Result<Reservation, BookingError> {
        let current = self.get_reservation(id, requester).await?;
        self.transition(current, ReservationStatus::Canceled).await
    }

    /// Who may approve is decided by the caller; only the status is checked here.
    pub async fn approve_reservation(&self, id: Ulid) -> Result<Reservation, BookingError> {
        let current = self.ledger.get_by_id(id).await?;
        self.transition(current, ReservationStatus::Active).await
    }

    /// Advisory: `true` if a reservation for the window would currently be
    /// accepted. Nothing is held, so a later create may still lose a race.
    pub async fn is_available(&self, asset_id: Ulid, start: Ms, end: Ms) -> Result<bool, BookingError> {
        if end <= start {
            return Err(crate::error::ValidationError::EndNotAfterStart { start, end }.into());
        }
        let asset = self.directory.get_by_id(asset_id).await?;
        if !asset.available {
            return Ok(false);
        }
        Ok(self.oracle.is_free(asset_id, Span::new(start, end)).await?)
    }

    async fn transition(
        &self,
        current: Reservation,
        next: ReservationStatus,
    ) -> Result<Reservation, BookingError> {
        let result = self.apply_transition(current, next).await;
        let outcome = if result.is_ok() { "ok" } else { "rejected" };
        metrics::counter!(TRANSITIONS_TOTAL, "to" => next.as_str(), "outcome" => outcome)
            .increment(1);
        result
    }

    async fn apply_transition(
        &self,
        current: Reservation,
        next: ReservationStatus,
    ) -> Result<Reservation, BookingError> {
        let id = current.id;
        if !current.status.can_transition_to(next) {
            return Err(BookingError::InvalidTransition {
                id,
                from: current.status,
                to: next,
            });
        }

        let changed = self
            .ledger
            .update_status_if_current(id, current.status, next)
            .await?;
        if changed == 0 {
            // Someone moved it first; report what it is now.
            let from = self.ledger.get_by_id(id).await?.status;
            debug!(reservation = %id, %from, to = %next, "lost status race");
            return Err(BookingError::InvalidTransition { id, from, to: next });
        }

        info!(reservation = %id, from = %current.status, to = %next, "reservation status changed");
        Ok(Reservation {
            status: next,
            ..current
        })
    }

    fn next_id(&self) -> Ulid {
        match self.ids.lock() {
            Ok(mut ids) => ids.generate().unwrap_or_else(|_| Ulid::new()),
            Err(_) => Ulid::new(),
        }
    }
}
