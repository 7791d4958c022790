//! Wall-clock and monotonic time, behind a trait so tests can supply a
//! synthetic clock instead of `SystemTime::now()`/`Instant::now()`.
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// A source of wall-clock (seconds since epoch) and monotonic time.
///
/// Peer `last_seen` stamps use the wall clock; deadline arithmetic
/// in the search coordinator uses the monotonic clock so it is immune to
/// clock adjustments made while a search is in flight.
pub trait Clock {
    /// Current wall-clock time, in seconds since the Unix epoch.
    fn now_secs(&self) -> u64;
    /// Current monotonic instant, for elapsed-time measurement only.
    fn now_monotonic(&self) -> Instant;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    fn now_monotonic(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_monotonic_nondecreasing() {
        let clock = SystemClock;
        let a = clock.now_monotonic();
        let b = clock.now_monotonic();
        assert!(b >= a);
    }

    #[test]
    fn system_clock_wall_time_is_plausible() {
        let clock = SystemClock;
        // Any time after 2020-01-01 in epoch seconds.
        assert!(clock.now_secs() > 1_577_836_800);
    }
}
