use std::fmt;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as Ms)
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Reservation lifecycle.
///
/// ```text
/// pending ──approve──▶ active ──(external)──▶ completed
///    │
///    └──cancel──▶ canceled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Active,
    Completed,
    Canceled,
}

/// Statuses that occupy the asset. Only these take part in overlap checks.
pub const BLOCKING_STATUSES: [ReservationStatus; 2] =
    [ReservationStatus::Pending, ReservationStatus::Active];

impl ReservationStatus {
    pub const ALL: [ReservationStatus; 4] = [
        ReservationStatus::Pending,
        ReservationStatus::Active,
        ReservationStatus::Completed,
        ReservationStatus::Canceled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Active => "active",
            ReservationStatus::Completed => "completed",
            ReservationStatus::Canceled => "canceled",
        }
    }

    pub fn is_blocking(self) -> bool {
        BLOCKING_STATUSES.contains(&self)
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    pub fn can_transition_to(self, next: ReservationStatus) -> bool {
        matches!(
            (self, next),
            (ReservationStatus::Pending, ReservationStatus::Active)
                | (ReservationStatus::Pending, ReservationStatus::Canceled)
                | (ReservationStatus::Active, ReservationStatus::Completed)
        )
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed-point amount with two fractional digits, stored as minor units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_minor(units: i64) -> Self {
        Self(units)
    }

    pub fn minor_units(self) -> i64 {
        self.0
    }

    /// Round half-even to two fractional digits. `None` if the amount does not fit.
    pub fn from_decimal(amount: Decimal) -> Option<Self> {
        (amount.round_dp(2) * Decimal::ONE_HUNDRED)
            .to_i64()
            .map(Self)
    }

    pub fn to_decimal(self) -> Decimal {
        Decimal::new(self.0, 2)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

/// A rentable unit as seen by the core: price and the coarse availability flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub id: Ulid,
    pub day_rate: Decimal,
    /// Manual toggle, independent of bookings. `false` vetoes every new reservation.
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub asset_id: Ulid,
    pub holder_id: Ulid,
    pub span: Span,
    pub total_price: Money,
    pub status: ReservationStatus,
    pub created_at: Ms,
}

/// All reservations on one asset, sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct AssetSchedule {
    pub asset_id: Ulid,
    pub reservations: Vec<Reservation>,
}

impl AssetSchedule {
    pub fn new(asset_id: Ulid) -> Self {
        Self {
            asset_id,
            reservations: Vec::new(),
        }
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn get(&self, id: &Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == *id)
    }

    pub fn get_mut(&mut self, id: &Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == *id)
    }

    /// Return only reservations whose span overlaps the query window.
    /// Uses binary search to skip reservations starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }

    pub fn overlap_count(&self, query: &Span, statuses: &[ReservationStatus]) -> usize {
        self.overlapping(query)
            .filter(|r| statuses.contains(&r.status))
            .count()
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationCreated {
        reservation: Reservation,
    },
    StatusChanged {
        id: Ulid,
        asset_id: Ulid,
        from: ReservationStatus,
        to: ReservationStatus,
    },
}

impl Event {
    pub fn asset_id(&self) -> Ulid {
        match self {
            Event::ReservationCreated { reservation } => reservation.asset_id,
            Event::StatusChanged { asset_id, .. } => *asset_id,
        }
    }
}

#[cfg(test)]
pub(crate) fn reservation(asset_id: Ulid, start: Ms, end: Ms, status: ReservationStatus) -> Reservation {
    Reservation {
        id: Ulid::new(),
        asset_id,
        holder_id: Ulid::new(),
        span: Span::new(start, end),
        total_price: Money::ZERO,
        status,
        created_at: 0,
    }
}
