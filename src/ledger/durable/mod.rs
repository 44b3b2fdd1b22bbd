mod mutations;
mod queries;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{
    OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock, broadcast, mpsc, oneshot,
};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::WAL_CHANNEL_CAPACITY;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

use super::LedgerError;

pub(crate) type SharedSchedule = Arc<RwLock<AssetSchedule>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
    #[cfg(test)]
    FailNextFlushAfter { bytes: usize },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL. Appends that queue up while a flush is
/// running are written together and share one fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_command(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(other) = deferred {
            handle_command(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    // All or nothing: a batch that fails anywhere is rolled back in full and
    // every caller in it is told so.
    let result = match batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
    {
        Ok(()) => wal.flush_sync(),
        Err(e) => {
            wal.discard_staged();
            Err(e)
        }
    };

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_command(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
        #[cfg(test)]
        WalCommand::FailNextFlushAfter { bytes } => wal.fail_next_flush_after(bytes),
    }
}

/// Durable reservation ledger.
///
/// Every asset's schedule sits behind its own `RwLock`; mutations take the
/// write lock, append to the WAL, then apply in memory. Status
/// compare-and-set is therefore atomic per reservation.
///
/// The append and the in-memory apply run on a spawned task that owns the
/// write guard, so memory always follows what the writer persisted even when
/// the caller stops waiting.
pub struct WalLedger {
    schedules: DashMap<Ulid, SharedSchedule>,
    wal_tx: mpsc::Sender<WalCommand>,
    notify: Arc<NotifyHub>,
    /// Reverse lookup: reservation id → asset id.
    reservation_to_asset: Arc<DashMap<Ulid, Ulid>>,
    by_holder: Arc<DashMap<Ulid, Vec<Ulid>>>,
    /// Mutations hold it shared; compaction holds it exclusively so the
    /// snapshot it writes cannot miss an acknowledged append.
    compaction_gate: Arc<RwLock<()>>,
}

/// Apply an event to a schedule. Caller holds the schedule's lock.
///
/// A status change only applies on top of the status it was made from;
/// returns `false` when the event was skipped.
fn apply_to_schedule(schedule: &mut AssetSchedule, event: &Event) -> bool {
    match event {
        Event::ReservationCreated { reservation } => {
            schedule.insert(reservation.clone());
            true
        }
        Event::StatusChanged { id, from, to, .. } => match schedule.get_mut(id) {
            Some(r) if r.status == *from => {
                r.status = *to;
                true
            }
            _ => false,
        },
    }
}

/// Write event to WAL via the background group-commit writer.
async fn wal_append(wal_tx: &mpsc::Sender<WalCommand>, event: &Event) -> Result<(), LedgerError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append {
            event: event.clone(),
            response: tx,
        })
        .await
        .map_err(|_| LedgerError::Wal("WAL writer shut down".into()))?;
    rx.await
        .map_err(|_| LedgerError::Wal("WAL writer dropped response".into()))?
        .map_err(|e| LedgerError::Wal(e.to_string()))
}

impl WalLedger {
    /// Open the ledger at `wal_path`, rebuilding state from the log. Must be
    /// called inside a tokio runtime: the WAL writer runs as a task.
    pub fn open(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let (wal, events) = Wal::open(&wal_path)?;

        let mut rebuilt: HashMap<Ulid, AssetSchedule> = HashMap::new();
        let reservation_to_asset = DashMap::new();
        let by_holder: DashMap<Ulid, Vec<Ulid>> = DashMap::new();
        let mut skipped = 0usize;
        for event in &events {
            if let Event::ReservationCreated { reservation } = event {
                reservation_to_asset.insert(reservation.id, reservation.asset_id);
                by_holder
                    .entry(reservation.holder_id)
                    .or_default()
                    .push(reservation.id);
            }
            let asset_id = event.asset_id();
            let schedule = rebuilt
                .entry(asset_id)
                .or_insert_with(|| AssetSchedule::new(asset_id));
            if !apply_to_schedule(schedule, event) {
                skipped += 1;
            }
        }
        if skipped > 0 {
            warn!(
                path = %wal_path.display(),
                skipped,
                "status changes that did not match the replayed status were ignored"
            );
        }
        info!(
            path = %wal_path.display(),
            events = events.len(),
            reservations = reservation_to_asset.len(),
            "reservation ledger replayed"
        );

        let (wal_tx, wal_rx) = mpsc::channel(WAL_CHANNEL_CAPACITY);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            schedules: rebuilt
                .into_iter()
                .map(|(id, s)| (id, Arc::new(RwLock::new(s))))
                .collect(),
            wal_tx,
            notify,
            reservation_to_asset: Arc::new(reservation_to_asset),
            by_holder: Arc::new(by_holder),
            compaction_gate: Arc::new(RwLock::new(())),
        })
    }

    /// Committed events for one asset, from now on.
    pub fn subscribe(&self, asset_id: Ulid) -> broadcast::Receiver<Event> {
        self.notify.subscribe(asset_id)
    }

    pub fn reservation_count(&self) -> usize {
        self.reservation_to_asset.len()
    }

    pub(crate) fn get_schedule(&self, asset_id: &Ulid) -> Option<SharedSchedule> {
        self.schedules.get(asset_id).map(|e| e.value().clone())
    }

    fn schedule_or_insert(&self, asset_id: Ulid) -> SharedSchedule {
        self.schedules
            .entry(asset_id)
            .or_insert_with(|| Arc::new(RwLock::new(AssetSchedule::new(asset_id))))
            .clone()
    }

    fn asset_for(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_to_asset.get(reservation_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify on a spawned task that owns both guards.
    ///
    /// A creation event's id must already be claimed in the reverse index;
    /// the task releases the claim if the append fails and records the
    /// holder once it succeeds.
    fn spawn_commit(
        &self,
        gate: OwnedRwLockReadGuard<()>,
        mut schedule: OwnedRwLockWriteGuard<AssetSchedule>,
        event: Event,
    ) -> JoinHandle<Result<(), LedgerError>> {
        let wal_tx = self.wal_tx.clone();
        let notify = self.notify.clone();
        let reservation_to_asset = self.reservation_to_asset.clone();
        let by_holder = self.by_holder.clone();
        tokio::spawn(async move {
            let result = wal_append(&wal_tx, &event).await;
            match (&result, &event) {
                (Ok(()), _) => {
                    apply_to_schedule(&mut schedule, &event);
                    if let Event::ReservationCreated { reservation } = &event {
                        by_holder
                            .entry(reservation.holder_id)
                            .or_default()
                            .push(reservation.id);
                    }
                    notify.send(&event);
                }
                (Err(_), Event::ReservationCreated { reservation }) => {
                    reservation_to_asset.remove(&reservation.id);
                }
                (Err(_), Event::StatusChanged { .. }) => {}
            }
            drop(schedule);
            drop(gate);
            result
        })
    }

    /// Run a commit to completion and surface its result.
    async fn commit(
        &self,
        gate: OwnedRwLockReadGuard<()>,
        schedule: OwnedRwLockWriteGuard<AssetSchedule>,
        event: Event,
    ) -> Result<(), LedgerError> {
        self.spawn_commit(gate, schedule, event)
            .await
            .map_err(|e| LedgerError::Wal(format!("commit task failed: {e}")))?
    }
}
