use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::ledger::{ReservationLedger, WalLedger};
use crate::model::{Ms, ReservationStatus, now_ms};
use crate::observability::SWEEPER_COMPLETED_TOTAL;

/// Background task that marks active reservations completed once their
/// window has ended.
pub async fn run_completer(ledger: Arc<WalLedger>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        complete_finished(&ledger, now_ms()).await;
    }
}

/// One completion sweep. Returns how many reservations moved to completed.
pub async fn complete_finished(ledger: &WalLedger, now: Ms) -> usize {
    let mut completed = 0;
    for (id, asset_id) in ledger.collect_finished(now) {
        match ledger
            .update_status_if_current(id, ReservationStatus::Active, ReservationStatus::Completed)
            .await
        {
            Ok(1) => {
                completed += 1;
                info!(reservation = %id, asset = %asset_id, "reservation completed");
            }
            Ok(_) => debug!(reservation = %id, "completion skipped, status moved"),
            Err(e) => warn!(reservation = %id, error = %e, "completion failed"),
        }
    }
    if completed > 0 {
        metrics::counter!(SWEEPER_COMPLETED_TOTAL).increment(completed as u64);
    }
    completed
}

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(ledger: Arc<WalLedger>, threshold: u64, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        compact_if_needed(&ledger, threshold).await;
    }
}

/// Returns whether a compaction ran.
pub async fn compact_if_needed(ledger: &WalLedger, threshold: u64) -> bool {
    let appends = ledger.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match ledger.compact_wal().await {
        Ok(()) => true,
        Err(e) => {
            warn!(appends, error = %e, "WAL compaction failed");
            false
        }
    }
}
