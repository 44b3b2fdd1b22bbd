//! Asset reservation engine: no two pending or active reservations on the
//! same asset ever overlap, however many requests race for it.

pub mod booking;
pub mod config;
pub mod directory;
pub mod error;
pub mod ledger;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod oracle;
pub mod runtime;
pub mod sweeper;
pub mod wal;

pub use booking::{BookingService, NewReservation};
pub use config::Config;
pub use directory::{AssetDirectory, MemoryDirectory};
pub use error::{BookingError, PersistenceError, UnavailableReason, ValidationError};
pub use ledger::{MemoryLedger, ReservationLedger, WalLedger};
pub use runtime::BookingRuntime;
