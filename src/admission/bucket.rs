//! Token bucket
//!
//! Tokens are kept in milli-units so sub-unit refills between ticks are not
//! lost. Capacity is one second of the provisioned rate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::OperationKind;

/// Counters for one bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketStats {
    pub kind: OperationKind,
    /// Provisioned units per second
    pub capacity: u64,
    /// Whole units currently available
    pub available: u64,
    /// Units handed out since startup
    pub granted_units: u64,
    /// Requests rejected since startup
    pub throttled: u64,
}

pub(super) struct TokenBucket {
    kind: OperationKind,
    /// Units per second
    rate: AtomicU64,
    tokens_milli: AtomicU64,
    granted_units: AtomicU64,
    throttled: AtomicU64,
}

impl TokenBucket {
    pub fn new(kind: OperationKind, rate: u64) -> Self {
        Self {
            kind,
            rate: AtomicU64::new(rate),
            tokens_milli: AtomicU64::new(rate.saturating_mul(1000)),
            granted_units: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
        }
    }

    /// Take `units` tokens, or report how long until they could exist
    ///
    /// `tick` is the replenishment granularity; the suggested wait is rounded
    /// up to whole ticks since tokens only arrive on tick boundaries.
    pub fn try_take(&self, units: u64, tick: Duration) -> Result<(), Duration> {
        let needed = units.saturating_mul(1000);
        let mut current = self.tokens_milli.load(Ordering::Acquire);

        loop {
            if current < needed {
                self.throttled.fetch_add(1, Ordering::Relaxed);
                return Err(self.wait_for(needed - current, needed, tick));
            }

            match self.tokens_milli.compare_exchange_weak(
                current,
                current - needed,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.granted_units.fetch_add(units, Ordering::Relaxed);
                    return Ok(());
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Add tokens for `elapsed` time, capped at one second's worth
    pub fn refill(&self, elapsed: Duration) {
        let rate = self.rate.load(Ordering::Relaxed);
        // units/s × ms = milli-units
        let added = rate.saturating_mul(elapsed.as_millis() as u64);
        if added == 0 {
            return;
        }
        let cap = rate.saturating_mul(1000);

        let _ = self
            .tokens_milli
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(added).min(cap))
            });
    }

    /// Change the provisioned rate, clamping current tokens to the new cap
    pub fn set_rate(&self, rate: u64) {
        self.rate.store(rate, Ordering::Relaxed);
        let cap = rate.saturating_mul(1000);
        let _ = self
            .tokens_milli
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.min(cap))
            });
    }

    pub fn rate(&self) -> u64 {
        self.rate.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> BucketStats {
        BucketStats {
            kind: self.kind,
            capacity: self.rate(),
            available: self.tokens_milli.load(Ordering::Acquire) / 1000,
            granted_units: self.granted_units.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
        }
    }

    fn wait_for(&self, deficit_milli: u64, needed_milli: u64, tick: Duration) -> Duration {
        let rate = self.rate().max(1);
        let tick_ms = (tick.as_millis() as u64).max(1);

        // A request larger than the bucket can never fit; suggest a full refill.
        let deficit = if needed_milli > rate.saturating_mul(1000) {
            rate.saturating_mul(1000)
        } else {
            deficit_milli
        };

        // milli-units ÷ (units/s) = ms
        let ms = (deficit + rate - 1) / rate;
        let ticks = ((ms + tick_ms - 1) / tick_ms).max(1);
        Duration::from_millis(ticks * tick_ms)
    }
}
