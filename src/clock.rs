use std::time::{SystemTime, UNIX_EPOCH};

/// Abstracts the wall-clock source used for event timestamps and id minting.
///
/// Production code uses [`SystemClock`]; tests inject deterministic clocks to
/// make timestamp-ordering and clock-retreat scenarios reproducible.
pub trait Clock: Send + Sync + 'static {
    /// Current time in nanoseconds since the Unix epoch.
    fn now_nanos(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_nanos(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0)
    }
}

/// A TSC-backed clock for parity with higher-resolution deployments, anchored
/// to wall-clock time at construction. Not used by default: this crate's
/// contract only requires wall-clock, millisecond-granularity ordering.
pub struct QuantaClock {
    anchor_wall_nanos: i64,
    anchor_instant: quanta::Instant,
}

impl QuantaClock {
    pub fn new() -> Self {
        QuantaClock {
            anchor_wall_nanos: SystemClock.now_nanos(),
            anchor_instant: quanta::Instant::now(),
        }
    }
}

impl Default for QuantaClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for QuantaClock {
    fn now_nanos(&self) -> i64 {
        let elapsed = quanta::Instant::now().duration_since(self.anchor_instant);
        self.anchor_wall_nanos + elapsed.as_nanos() as i64
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Clock;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// A clock whose value is set explicitly, for monotonicity/retreat tests.
    pub struct FixedClock(AtomicI64);

    impl FixedClock {
        pub fn new(nanos: i64) -> Self {
            FixedClock(AtomicI64::new(nanos))
        }

        pub fn set(&self, nanos: i64) {
            self.0.store(nanos, Ordering::SeqCst);
        }
    }

    impl Clock for FixedClock {
        fn now_nanos(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }
}
