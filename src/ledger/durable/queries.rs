use async_trait::async_trait;
use ulid::Ulid;

use crate::model::*;

use super::super::{LedgerError, ReservationLedger, sort_newest_first};
use super::WalLedger;

impl WalLedger {
    async fn lookup(&self, id: &Ulid) -> Option<Reservation> {
        let asset_id = self.asset_for(id)?;
        let schedule = self.get_schedule(&asset_id)?;
        let guard = schedule.read().await;
        guard.get(id).cloned()
    }
}

#[async_trait]
impl ReservationLedger for WalLedger {
    async fn create(&self, reservation: &Reservation) -> Result<(), LedgerError> {
        self.insert(reservation).await
    }

    async fn get_by_id(&self, id: Ulid) -> Result<Reservation, LedgerError> {
        self.lookup(&id).await.ok_or(LedgerError::NotFound(id))
    }

    async fn get_by_holder(&self, holder_id: Ulid) -> Result<Vec<Reservation>, LedgerError> {
        let ids = self
            .by_holder
            .get(&holder_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut out = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(r) = self.lookup(id).await {
                out.push(r);
            }
        }
        sort_newest_first(&mut out);
        Ok(out)
    }

    async fn update_status_if_current(
        &self,
        id: Ulid,
        expected: ReservationStatus,
        next: ReservationStatus,
    ) -> Result<u64, LedgerError> {
        self.compare_and_set_status(id, expected, next).await
    }

    async fn overlap_count(
        &self,
        asset_id: Ulid,
        span: Span,
        statuses: &[ReservationStatus],
    ) -> Result<usize, LedgerError> {
        let Some(schedule) = self.get_schedule(&asset_id) else {
            return Ok(0);
        };
        let guard = schedule.read().await;
        Ok(guard.overlap_count(&span, statuses))
    }
}
