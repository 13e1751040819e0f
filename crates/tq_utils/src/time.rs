use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde_derive::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct EpochMillis(u128);

impl EpochMillis {
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        // A clock set before the epoch is treated as the epoch itself.
        let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self(since_epoch.as_millis())
    }

    pub fn as_millis(self) -> u128 {
        self.0
    }

    pub fn from_millis(millis: u128) -> Self {
        Self(millis)
    }

    /// Time elapsed from `earlier` to `self`, or zero if `earlier` is in the future.
    pub fn saturating_duration_since(self, earlier: EpochMillis) -> Duration {
        let millis = self.0.saturating_sub(earlier.0);
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }
}

/// Source of time for everything in the queue that makes decisions based on time passing,
/// like worker liveness. Injected so those decisions can be tested deterministically.
pub trait Clock: Send + Sync {
    /// Monotonic time, used for measuring elapsed durations.
    fn now(&self) -> Instant;

    /// Wall-clock time, used for timestamps that are reported outward.
    fn epoch_now(&self) -> EpochMillis;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn epoch_now(&self) -> EpochMillis {
        EpochMillis::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock(Arc<ManualClockInner>);

#[derive(Debug)]
struct ManualClockInner {
    start: Instant,
    start_epoch: EpochMillis,
    elapsed: Mutex<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self(Arc::new(ManualClockInner {
            start: Instant::now(),
            start_epoch: EpochMillis::now(),
            elapsed: Mutex::new(Duration::ZERO),
        }))
    }

    pub fn advance(&self, by: Duration) {
        *self.0.elapsed.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.0.start + *self.0.elapsed.lock()
    }

    fn epoch_now(&self) -> EpochMillis {
        let elapsed = self.0.elapsed.lock().as_millis();
        EpochMillis::from_millis(self.0.start_epoch.as_millis() + elapsed)
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::{Clock, EpochMillis, ManualClock};

    #[test]
    fn manual_clock_only_moves_when_advanced() {
        let clock = ManualClock::new();
        let before = clock.now();
        let epoch_before = clock.epoch_now();

        assert_eq!(clock.now(), before);

        clock.advance(Duration::from_secs(3));

        assert_eq!(clock.now() - before, Duration::from_secs(3));
        assert_eq!(
            clock.epoch_now().saturating_duration_since(epoch_before),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn clones_share_time() {
        let clock = ManualClock::new();
        let other = clock.clone();
        let before = other.now();

        clock.advance(Duration::from_millis(10));

        assert_eq!(other.now() - before, Duration::from_millis(10));
    }

    #[test]
    fn duration_since_later_time_is_zero() {
        let earlier = EpochMillis::from_millis(10);
        let later = EpochMillis::from_millis(30);

        assert_eq!(earlier.saturating_duration_since(later), Duration::ZERO);
        assert_eq!(
            later.saturating_duration_since(earlier),
            Duration::from_millis(20)
        );
    }
}
