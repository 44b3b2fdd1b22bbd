use dashmap::mapref::entry::Entry;
use tokio::sync::oneshot;
use tracing::{debug, info};
use ulid::Ulid;

use crate::model::*;

use super::super::LedgerError;
use super::{WalCommand, WalLedger};

impl WalLedger {
    pub(crate) async fn insert(&self, reservation: &Reservation) -> Result<(), LedgerError> {
        let gate = self.compaction_gate.clone().read_owned().await;
        let guard = self
            .schedule_or_insert(reservation.asset_id)
            .write_owned()
            .await;

        // Claim the id before the append so a duplicate racing on another
        // asset cannot slip in. Readers of the index then block on our lock.
        match self.reservation_to_asset.entry(reservation.id) {
            Entry::Occupied(_) => return Err(LedgerError::AlreadyExists(reservation.id)),
            Entry::Vacant(slot) => {
                slot.insert(reservation.asset_id);
            }
        }

        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
        };
        self.commit(gate, guard, event).await?;
        debug!(reservation = %reservation.id, asset = %reservation.asset_id, "reservation persisted");
        Ok(())
    }

    pub(crate) async fn compare_and_set_status(
        &self,
        id: Ulid,
        expected: ReservationStatus,
        next: ReservationStatus,
    ) -> Result<u64, LedgerError> {
        let gate = self.compaction_gate.clone().read_owned().await;
        let Some(asset_id) = self.asset_for(&id) else {
            return Ok(0);
        };
        let Some(schedule) = self.get_schedule(&asset_id) else {
            return Ok(0);
        };
        let guard = schedule.write_owned().await;
        match guard.get(&id) {
            Some(r) if r.status == expected => {}
            _ => return Ok(0),
        }

        let event = Event::StatusChanged {
            id,
            asset_id,
            from: expected,
            to: next,
        };
        self.commit(gate, guard, event).await?;
        Ok(1)
    }

    /// Active reservations whose window has ended by `now`, as `(id, asset)`.
    /// Schedules locked by a writer are skipped; the next sweep picks them up.
    pub fn collect_finished(&self, now: Ms) -> Vec<(Ulid, Ulid)> {
        let mut finished = Vec::new();
        for entry in self.schedules.iter() {
            let Ok(guard) = entry.value().try_read() else {
                continue;
            };
            finished.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| r.status == ReservationStatus::Active && r.span.end <= now)
                    .map(|r| (r.id, r.asset_id)),
            );
        }
        finished
    }

    /// Rewrite the WAL as one creation event per reservation, carrying its
    /// current status, in creation order.
    pub async fn compact_wal(&self) -> Result<(), LedgerError> {
        let _gate = self.compaction_gate.write().await;

        let schedules: Vec<_> = self.schedules.iter().map(|e| e.value().clone()).collect();
        let mut reservations = Vec::with_capacity(self.reservation_to_asset.len());
        for schedule in schedules {
            reservations.extend(schedule.read().await.reservations.iter().cloned());
        }
        reservations.sort_by_key(|r| (r.created_at, r.id));
        let count = reservations.len();
        let events = reservations
            .into_iter()
            .map(|reservation| Event::ReservationCreated { reservation })
            .collect();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| LedgerError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| LedgerError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| LedgerError::Wal(e.to_string()))?;
        metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
        info!(reservations = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
