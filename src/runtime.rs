use std::io;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::booking::BookingService;
use crate::config::Config;
use crate::directory::AssetDirectory;
use crate::ledger::WalLedger;
use crate::notify::NotifyHub;
use crate::sweeper;

/// A booking service on a durable ledger, with its background tasks.
pub struct BookingRuntime {
    service: Arc<BookingService>,
    ledger: Arc<WalLedger>,
    tasks: Vec<JoinHandle<()>>,
}

impl BookingRuntime {
    /// Open (or create) the ledger under `config.data_dir` and start the
    /// completion sweeper and WAL compactor. Call from inside a tokio runtime.
    pub fn start(config: &Config, directory: Arc<dyn AssetDirectory>) -> io::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let notify = Arc::new(NotifyHub::new());
        let ledger = Arc::new(WalLedger::open(config.wal_path(), notify)?);
        let service = Arc::new(
            BookingService::new(directory, ledger.clone()).with_lock_timeout(config.lock_timeout),
        );

        let tasks = vec![
            tokio::spawn(sweeper::run_completer(ledger.clone(), config.sweep_interval)),
            tokio::spawn(sweeper::run_compactor(
                ledger.clone(),
                config.compact_threshold,
                config.sweep_interval,
            )),
        ];

        info!(
            data_dir = %config.data_dir.display(),
            lock_timeout_ms = config.lock_timeout.as_millis() as u64,
            compact_threshold = config.compact_threshold,
            sweep_interval_ms = config.sweep_interval.as_millis() as u64,
            "booking runtime started"
        );
        Ok(Self {
            service,
            ledger,
            tasks,
        })
    }

    pub fn service(&self) -> Arc<BookingService> {
        self.service.clone()
    }

    pub fn ledger(&self) -> Arc<WalLedger> {
        self.ledger.clone()
    }

    /// Stop the background tasks. Requests already in flight still finish.
    pub fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        info!("booking runtime stopped");
    }
}
