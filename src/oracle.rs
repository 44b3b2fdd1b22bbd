//! Per-asset critical section around "check overlaps, then insert".
//!
//! Every asset gets its own async mutex, created on first use. Requests for
//! different assets never wait on each other. Once a request holds an asset's
//! lock, the check and the insert run on a detached task that owns the guard,
//! so a caller that gives up cannot leave a half-finished critical section.

use std::sync::Arc;
use std::time::Instant as StdInstant;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::error::PersistenceError;
use crate::ledger::ReservationLedger;
use crate::model::{BLOCKING_STATUSES, Reservation, Span};
use crate::observability::{ASSET_LOCKS, CRITICAL_SECTION_SECONDS, LOCK_WAIT_SECONDS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The draft was stored as given.
    Accepted(Reservation),
    /// Pending or active reservations already cover part of the window.
    Rejected { overlapping: usize },
}

pub struct AvailabilityOracle {
    ledger: Arc<dyn ReservationLedger>,
    locks: DashMap<Ulid, Arc<Mutex<()>>>,
}

impl AvailabilityOracle {
    pub fn new(ledger: Arc<dyn ReservationLedger>) -> Self {
        Self {
            ledger,
            locks: DashMap::new(),
        }
    }

    /// Atomically store `draft` if no blocking reservation on its asset
    /// overlaps its span.
    ///
    /// With a `deadline`, giving up while waiting for the lock yields
    /// [`PersistenceError::LockTimeout`] and stores nothing. The deadline
    /// does not apply once the lock is held.
    pub async fn try_reserve(
        &self,
        draft: Reservation,
        deadline: Option<Instant>,
    ) -> Result<Decision, PersistenceError> {
        let asset_id = draft.asset_id;
        let lock = self.lock_for(asset_id);

        let waiting = StdInstant::now();
        let guard = match deadline {
            Some(deadline) => timeout_at(deadline, lock.lock_owned())
                .await
                .map_err(|_| {
                    warn!(asset = %asset_id, "gave up waiting for asset lock");
                    PersistenceError::LockTimeout(asset_id)
                })?,
            None => lock.lock_owned().await,
        };
        metrics::histogram!(LOCK_WAIT_SECONDS).record(waiting.elapsed().as_secs_f64());

        let ledger = self.ledger.clone();
        let section = tokio::spawn(async move {
            let _guard = guard;
            let started = StdInstant::now();
            let decision = check_and_insert(ledger.as_ref(), draft).await;
            metrics::histogram!(CRITICAL_SECTION_SECONDS)
                .record(started.elapsed().as_secs_f64());
            decision
        });
        section
            .await
            .map_err(|e| PersistenceError::Storage(format!("critical section aborted: {e}")))?
    }

    /// Lock-free probe. The answer may be stale by the time it is read.
    pub async fn is_free(&self, asset_id: Ulid, span: Span) -> Result<bool, PersistenceError> {
        let overlapping = self
            .ledger
            .overlap_count(asset_id, span, &BLOCKING_STATUSES)
            .await?;
        Ok(overlapping == 0)
    }

    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    pub(crate) fn lock_for(&self, asset_id: Ulid) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.get(&asset_id) {
            return lock.value().clone();
        }
        let lock = self.locks.entry(asset_id).or_default().value().clone();
        metrics::gauge!(ASSET_LOCKS).set(self.locks.len() as f64);
        lock
    }
}

async fn check_and_insert(
    ledger: &dyn ReservationLedger,
    draft: Reservation,
) -> Result<Decision, PersistenceError> {
    let overlapping = ledger
        .overlap_count(draft.asset_id, draft.span, &BLOCKING_STATUSES)
        .await?;
    if overlapping > 0 {
        debug!(asset = %draft.asset_id, overlapping, "window taken");
        return Ok(Decision::Rejected { overlapping });
    }
    ledger.create(&draft).await?;
    Ok(Decision::Accepted(draft))
}
