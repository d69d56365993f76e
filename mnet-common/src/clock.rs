use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::time::Instant;

use crate::Tick;

/// A source of virtual time in ticks.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current tick.
    fn now(&self) -> Tick;

    /// Returns the number of ticks per second.
    fn hz(&self) -> u32;

    /// Returns the wall-clock duration of a single tick.
    fn tick_duration(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / self.hz().max(1) as u64)
    }
}

/// A clock that derives ticks from the elapsed monotonic time since it was created.
///
/// It reads [`tokio::time::Instant`], so a paused tokio runtime (`tokio::time::pause`) drives it
/// deterministically.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Instant,
    hz: u32,
}

impl MonotonicClock {
    /// Creates a new clock ticking `hz` times per second, starting at tick 0.
    pub fn new(hz: u32) -> Self {
        Self { start: Instant::now(), hz: hz.max(1) }
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Tick {
        let elapsed = self.start.elapsed();
        (elapsed.as_nanos() * self.hz as u128 / 1_000_000_000) as Tick
    }

    fn hz(&self) -> u32 {
        self.hz
    }
}

/// A clock that only moves when told to. Cloned handles share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
    hz: u32,
}

impl ManualClock {
    /// Creates a new manual clock at tick 0.
    pub fn new(hz: u32) -> Self {
        Self { now: Arc::new(AtomicU64::new(0)), hz: hz.max(1) }
    }

    /// Moves the clock forward by `ticks`.
    pub fn advance(&self, ticks: Tick) {
        self.now.fetch_add(ticks, Ordering::Relaxed);
    }

    /// Sets the clock to `tick`. Time never moves backwards, so earlier values are ignored.
    pub fn set(&self, tick: Tick) {
        self.now.fetch_max(tick, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Tick {
        self.now.load(Ordering::Relaxed)
    }

    fn hz(&self) -> u32 {
        self.hz
    }
}
