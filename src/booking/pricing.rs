use rust_decimal::Decimal;

use crate::error::ValidationError;
use crate::limits::{DAY_MS, MIN_RENTAL_MS, START_GRACE_MS};
use crate::model::{Money, Ms, Span};

/// Check a requested window against `now`.
pub fn validate_window(start: Ms, end: Ms, now: Ms) -> Result<Span, ValidationError> {
    if start < now.saturating_sub(START_GRACE_MS) {
        return Err(ValidationError::StartInPast {
            start,
            grace_ms: START_GRACE_MS,
        });
    }
    if end <= start {
        return Err(ValidationError::EndNotAfterStart { start, end });
    }
    let duration_ms = end.saturating_sub(start);
    if duration_ms < MIN_RENTAL_MS {
        return Err(ValidationError::BelowMinimumPeriod {
            duration_ms,
            min_ms: MIN_RENTAL_MS,
        });
    }
    Ok(Span::new(start, end))
}

/// Whole days billed: the duration truncated to days, never less than one.
pub fn rental_days(span: Span) -> i64 {
    (span.duration_ms() / DAY_MS).max(1)
}

pub fn total_price(day_rate: Decimal, span: Span) -> Result<Money, ValidationError> {
    day_rate
        .checked_mul(Decimal::from(rental_days(span)))
        .and_then(Money::from_decimal)
        .ok_or(ValidationError::PriceOverflow)
}
