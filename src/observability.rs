use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use tracing_subscriber::EnvFilter;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: reservation attempts. Labels: outcome.
pub const RESERVATIONS_TOTAL: &str = "rentwell_reservations_total";

/// Counter: status transitions. Labels: to, outcome.
pub const TRANSITIONS_TOTAL: &str = "rentwell_transitions_total";

/// Histogram: time spent waiting to enter an asset's critical section, in seconds.
pub const LOCK_WAIT_SECONDS: &str = "rentwell_lock_wait_seconds";

/// Histogram: time spent inside an asset's critical section, in seconds.
pub const CRITICAL_SECTION_SECONDS: &str = "rentwell_critical_section_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: asset locks in the registry.
pub const ASSET_LOCKS: &str = "rentwell_asset_locks";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "rentwell_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "rentwell_wal_flush_batch_size";

/// Counter: reservations moved to completed by the sweeper.
pub const SWEEPER_COMPLETED_TOTAL: &str = "rentwell_sweeper_completed_total";

/// Counter: WAL compactions run.
pub const WAL_COMPACTIONS_TOTAL: &str = "rentwell_wal_compactions_total";

/// Install the fmt subscriber, filtered by `RUST_LOG` (default `info`).
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
