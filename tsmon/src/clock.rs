use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{SystemTime, UNIX_EPOCH},
};

/// A source of wall-clock time, in fractional seconds since the UNIX epoch.
///
/// Stores stamp start times with it and the flush path stamps end times with it.
pub trait Clock: fmt::Debug + Send + Sync {
    /// Returns the current time.
    fn now(&self) -> f64;
}

/// The system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0)
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same underlying time, so a test can keep a handle while a store or `State` owns another.
#[derive(Clone, Debug, Default)]
pub struct MockClock {
    bits: Arc<AtomicU64>,
}

impl MockClock {
    /// Creates a new `MockClock` set to the given time.
    pub fn new(now: f64) -> Self {
        Self { bits: Arc::new(AtomicU64::new(now.to_bits())) }
    }

    /// Sets the current time.
    pub fn set(&self, now: f64) {
        self.bits.store(now.to_bits(), Ordering::Release);
    }

    /// Moves the current time forward by `secs`.
    pub fn advance(&self, secs: f64) {
        self.set(self.now() + secs);
    }
}

impl Clock for MockClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }
}
