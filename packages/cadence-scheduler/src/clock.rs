use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Monotonic time source consulted by the idle queue and the timer source.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// `now + delay`, saturated to the furthest instant the platform can
/// represent. A target clamped this way is never reached in practice.
pub fn saturating_deadline(now: Instant, delay: Duration) -> Instant {
    let mut span = delay;
    loop {
        if let Some(at) = now.checked_add(span) {
            return at;
        }
        span /= 2;
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to. Used by tests and by hosts that
/// replay recorded frames.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed_nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed_nanos: AtomicU64::new(0),
        }
    }

    /// Saturates at `u64::MAX` nanoseconds of elapsed time.
    pub fn advance(&self, by: Duration) {
        let by = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        let _ = self
            .elapsed_nanos
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |elapsed| {
                Some(elapsed.saturating_add(by))
            });
    }

    /// Time since the clock was created, as seen by [`Clock::now`].
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_nanos.load(Ordering::Relaxed))
    }

    pub fn origin(&self) -> Instant {
        self.origin
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        saturating_deadline(self.origin, self.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_saturates_instead_of_truncating() {
        let clock = ManualClock::new();
        clock.advance(Duration::from_secs(1));
        clock.advance(Duration::MAX);
        assert_eq!(clock.elapsed(), Duration::from_nanos(u64::MAX));

        clock.advance(Duration::from_secs(1));
        assert_eq!(clock.elapsed(), Duration::from_nanos(u64::MAX));
        assert!(clock.now() > clock.origin());
    }

    #[test]
    fn saturating_deadline_clamps_unrepresentable_targets() {
        let now = Instant::now();
        assert_eq!(
            saturating_deadline(now, Duration::from_millis(5)),
            now + Duration::from_millis(5)
        );
        let far = saturating_deadline(now, Duration::MAX);
        assert!(far > now + Duration::from_secs(365 * 24 * 60 * 60));
        assert_eq!(saturating_deadline(now, Duration::ZERO), now);
    }
}
