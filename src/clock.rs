//! Time source used by the circuit breaker and the cache.
//!
//! Components never call `Timestamp::now()` directly so that tests can drive
//! reset timeouts and TTL expiry with a [`ManualClock`].

use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use jiff::Timestamp;

/// Source of wall-clock time.
pub trait Clock: Debug + Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Shared clock handle passed to every component.
pub type SharedClock = Arc<dyn Clock>;

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Starts at the current system time.
    pub fn starting_now() -> Self {
        Self::new(Timestamp::now())
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        let millis = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        if let Ok(next) = Timestamp::from_millisecond(now.as_millisecond().saturating_add(millis)) {
            *now = next;
        }
    }

    pub fn set(&self, to: Timestamp) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Milliseconds elapsed from `since` to `now`, clamped at zero.
pub fn elapsed_ms(now: Timestamp, since: Timestamp) -> u64 {
    let delta = now.as_millisecond() - since.as_millisecond();
    u64::try_from(delta).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(Timestamp::UNIX_EPOCH);
        clock.advance(Duration::from_millis(1500));
        assert_eq!(clock.now().as_millisecond(), 1500);
    }

    #[test]
    fn test_elapsed_ms_clamps_negative() {
        let earlier = Timestamp::from_millisecond(1_000).unwrap();
        let later = Timestamp::from_millisecond(4_000).unwrap();
        assert_eq!(elapsed_ms(later, earlier), 3_000);
        assert_eq!(elapsed_ms(earlier, later), 0);
    }
}
