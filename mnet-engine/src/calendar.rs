//! A calendar queue: a power-of-two ring of FIFO buckets, one per tick modulo the ring length.
//!
//! ```text
//!            current
//!               │
//!   ┌───┬───┬───▼───┬───┬───┬───┬───┐
//!   │ 6 │ 7 │ 0 │ 1 │ 2 │ 3 │ 4 │ 5 │   tick & mask
//!   └───┴───┴───────┴───┴───┴───┴───┘
//!                 ◀──── horizon ────▶
//! ```
//!
//! The queue has no notion of absolute time beyond its current tick. An item scheduled more than
//! one horizon ahead (or in the past) lands in a bucket that is drained before its tick, so it is
//! dispatched early. [`CalendarQueue::schedule`] reports this as [`Scheduled::Aliased`] but still
//! accepts the item; keeping every wait below the horizon is up to the configuration.
use std::collections::VecDeque;

use mnet_common::Tick;

/// Outcome of [`CalendarQueue::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduled {
    /// The item will be dispatched at its tick.
    OnTime,
    /// The tick is outside the horizon and the item will be dispatched at the wrong tick.
    Aliased,
}

#[derive(Debug)]
pub struct CalendarQueue<T> {
    buckets: Box<[VecDeque<T>]>,
    mask: u64,
    current: Tick,
    len: usize,
}

impl<T> CalendarQueue<T> {
    /// Creates a calendar with `2^bits` buckets whose current tick is `start`.
    ///
    /// # Panics
    ///
    /// Panics if `bits` is larger than 24.
    pub fn new(bits: u8, start: Tick) -> Self {
        assert!(bits <= 24, "calendar of 2^{bits} buckets is too large");

        let len = 1usize << bits;
        Self {
            buckets: (0..len).map(|_| VecDeque::new()).collect(),
            mask: len as u64 - 1,
            current: start,
            len: 0,
        }
    }

    /// The tick whose bucket is drained next.
    #[inline]
    pub fn current(&self) -> Tick {
        self.current
    }

    /// Number of ticks ahead of the current tick that can be scheduled without aliasing.
    #[inline]
    pub fn horizon(&self) -> Tick {
        self.mask + 1
    }

    /// Number of items waiting in the calendar.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends `item` to the bucket of tick `at`.
    pub fn schedule(&mut self, item: T, at: Tick) -> Scheduled {
        self.buckets[(at & self.mask) as usize].push_back(item);
        self.len += 1;

        if at < self.current || at - self.current >= self.horizon() {
            Scheduled::Aliased
        } else {
            Scheduled::OnTime
        }
    }

    /// Removes the next item from the bucket of the current tick. Items scheduled into that
    /// bucket while it is being drained are returned as well.
    pub fn pop_current(&mut self) -> Option<T> {
        let item = self.buckets[(self.current & self.mask) as usize].pop_front()?;
        self.len -= 1;
        Some(item)
    }

    /// Moves on to the next tick. Anything left in the current bucket stays there and comes up
    /// again one horizon later.
    #[inline]
    pub fn step(&mut self) {
        self.current += 1;
    }

    /// Jumps to `tick` if the calendar is empty and `tick` is ahead. Returns `true` if it did.
    pub fn fast_forward(&mut self, tick: Tick) -> bool {
        if self.is_empty() && tick > self.current {
            self.current = tick;
            return true;
        }

        false
    }

    /// Returns the next item due strictly before `now`, along with the tick it was dispatched
    /// at, stepping over empty buckets.
    pub fn pop_due(&mut self, now: Tick) -> Option<(Tick, T)> {
        while self.current < now {
            if let Some(item) = self.pop_current() {
                return Some((self.current, item));
            }

            if !self.fast_forward(now) {
                self.step();
            }
        }

        None
    }
}
