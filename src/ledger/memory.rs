use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ulid::Ulid;

use crate::model::*;

use super::{LedgerError, ReservationLedger, sort_newest_first};

/// Non-durable ledger. Each asset's schedule sits behind one DashMap shard
/// lock, which makes the status compare-and-set atomic.
#[derive(Default)]
pub struct MemoryLedger {
    schedules: DashMap<Ulid, AssetSchedule>,
    reservation_to_asset: DashMap<Ulid, Ulid>,
    by_holder: DashMap<Ulid, Vec<Ulid>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.reservation_to_asset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservation_to_asset.is_empty()
    }

    fn lookup(&self, id: &Ulid) -> Option<Reservation> {
        let asset_id = *self.reservation_to_asset.get(id)?;
        let schedule = self.schedules.get(&asset_id)?;
        schedule.get(id).cloned()
    }
}

#[async_trait]
impl ReservationLedger for MemoryLedger {
    async fn create(&self, reservation: &Reservation) -> Result<(), LedgerError> {
        match self.reservation_to_asset.entry(reservation.id) {
            Entry::Occupied(_) => return Err(LedgerError::AlreadyExists(reservation.id)),
            Entry::Vacant(slot) => {
                // Schedule first: readers resolve the id through the index.
                self.schedules
                    .entry(reservation.asset_id)
                    .or_insert_with(|| AssetSchedule::new(reservation.asset_id))
                    .insert(reservation.clone());
                self.by_holder
                    .entry(reservation.holder_id)
                    .or_default()
                    .push(reservation.id);
                slot.insert(reservation.asset_id);
            }
        }
        Ok(())
    }

    async fn get_by_id(&self, id: Ulid) -> Result<Reservation, LedgerError> {
        self.lookup(&id).ok_or(LedgerError::NotFound(id))
    }

    async fn get_by_holder(&self, holder_id: Ulid) -> Result<Vec<Reservation>, LedgerError> {
        let ids = self
            .by_holder
            .get(&holder_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut out: Vec<Reservation> = ids.iter().filter_map(|id| self.lookup(id)).collect();
        sort_newest_first(&mut out);
        Ok(out)
    }

    async fn update_status_if_current(
        &self,
        id: Ulid,
        expected: ReservationStatus,
        next: ReservationStatus,
    ) -> Result<u64, LedgerError> {
        let Some(asset_id) = self.reservation_to_asset.get(&id).map(|e| *e.value()) else {
            return Ok(0);
        };
        let Some(mut schedule) = self.schedules.get_mut(&asset_id) else {
            return Ok(0);
        };
        match schedule.get_mut(&id) {
            Some(r) if r.status == expected => {
                r.status = next;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn overlap_count(
        &self,
        asset_id: Ulid,
        span: Span,
        statuses: &[ReservationStatus],
    ) -> Result<usize, LedgerError> {
        Ok(self
            .schedules
            .get(&asset_id)
            .map(|s| s.overlap_count(&span, statuses))
            .unwrap_or(0))
    }
}
