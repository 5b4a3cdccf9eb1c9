use std::sync::Mutex;

use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::{Decimal, RoundingStrategy, prelude::Zero};

use crate::{AMOUNT_SCALE, Amount};

pub const SECONDS_PER_YEAR: i64 = 365 * 24 * 60 * 60;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Used by simulations and tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Accrual curve of the investment executor.
///
/// Implementations must return zero for a zero (or negative) elapsed time and
/// must never decrease as `elapsed` grows for a fixed principal.
pub trait YieldModel: Send + Sync {
    fn accrued(&self, principal: Amount, elapsed: TimeDelta) -> Amount;
}

/// Simple, non-compounding annual rate accrued per second.
#[derive(Debug, Clone, Copy)]
pub struct SimpleRate {
    pub annual_rate_bps: u32,
}

impl YieldModel for SimpleRate {
    fn accrued(&self, principal: Amount, elapsed: TimeDelta) -> Amount {
        let seconds = elapsed.num_seconds();
        if seconds <= 0 || principal <= Decimal::zero() || self.annual_rate_bps == 0 {
            return Decimal::zero();
        }
        let yearly = principal
            .checked_mul(Decimal::from(self.annual_rate_bps))
            .and_then(|v| v.checked_div(Decimal::from(10_000)));
        let accrued = yearly
            .and_then(|v| v.checked_mul(Decimal::from(seconds)))
            .and_then(|v| v.checked_div(Decimal::from(SECONDS_PER_YEAR)))
            .unwrap_or(Decimal::MAX);
        accrued.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::ToZero)
    }
}
