use chrono::{DateTime, TimeDelta, Utc};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Time source for a session: an absolute wallclock for anchoring and a
/// monotonic counter for measuring elapsed time.
pub trait SessionClock: Clone + Send + Sync {
    fn wallclock(&self) -> DateTime<Utc>;

    /// Non-decreasing time since an arbitrary fixed origin.
    fn monotonic(&self) -> Duration;
}

/// Rounds to whole microseconds (six decimal digits of a second).
pub fn round_to_micros(d: Duration) -> i64 {
    let nanos = d.as_nanos();
    ((nanos + 500) / 1_000) as i64
}

#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionClock for SystemClock {
    fn wallclock(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    base_us: Arc<AtomicI64>,
    elapsed_ns: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(base: DateTime<Utc>) -> Self {
        Self {
            base_us: Arc::new(AtomicI64::new(base.timestamp_micros())),
            elapsed_ns: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Moves the wallclock without touching the monotonic counter, the way a
    /// system clock adjustment would.
    pub fn set_wallclock(&self, now: DateTime<Utc>) {
        let elapsed = round_to_micros(self.monotonic());
        self.base_us
            .store(now.timestamp_micros() - elapsed, Ordering::SeqCst);
    }

    pub fn advance(&self, d: Duration) {
        self.elapsed_ns
            .fetch_add(d.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(DateTime::<Utc>::UNIX_EPOCH + TimeDelta::seconds(1_700_000_000))
    }
}

impl SessionClock for ManualClock {
    fn wallclock(&self) -> DateTime<Utc> {
        let base = DateTime::<Utc>::UNIX_EPOCH
            + TimeDelta::microseconds(self.base_us.load(Ordering::SeqCst));
        base + TimeDelta::nanoseconds(self.monotonic().as_nanos() as i64)
    }

    fn monotonic(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns.load(Ordering::SeqCst))
    }
}
