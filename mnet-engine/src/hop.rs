use std::{
    fmt,
    net::Ipv4Addr,
    sync::atomic::{AtomicU64, Ordering},
};

use parking_lot::{Mutex, MutexGuard};

use crate::discipline::{Discipline, DisciplineId};
use mnet_common::Tick;
use mnet_wire::records::{HopRecord, StatsRecord};

/// Index of a hop in the hop arena of a [`Topology`](crate::Topology).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HopId(u32);

impl HopId {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for HopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hop#{}", self.0)
    }
}

/// Static configuration of a hop, in scheduler units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HopSettings {
    /// Bandwidth in bytes per tick. Zero means unlimited.
    pub bytes_per_tick: u32,
    /// Propagation delay in ticks.
    pub delay: Tick,
    /// Loss probability as a fraction of [`LOSS_MAX`](mnet_wire::records::LOSS_MAX).
    pub loss: u32,
    /// Bandwidth queue capacity in packets.
    pub capacity: u32,
    /// Emulator core that owns the hop, `None` if it is emulated here.
    pub owner: Option<Ipv4Addr>,
    /// Discipline installed on the hop.
    pub discipline: DisciplineId,
}

impl HopSettings {
    /// Converts a bulk-load record for a scheduler running at `hz` ticks per second.
    ///
    /// A configured bandwidth never rounds down to "unlimited": links slower than one byte per
    /// tick are emulated at one byte per tick.
    pub fn from_record(record: &HopRecord, hz: u32) -> Self {
        let bytes_per_tick = match record.bandwidth_bps {
            0 => 0,
            bps => (bps as u64 / 8 / hz.max(1) as u64).max(1) as u32,
        };

        Self {
            bytes_per_tick,
            delay: record.delay_ms as u64 * hz as u64 / 1000,
            loss: record.loss,
            capacity: record.queue_slots,
            owner: record.owner,
            discipline: DisciplineId(record.discipline),
        }
    }

    #[inline]
    pub const fn is_local(&self) -> bool {
        self.owner.is_none()
    }

    #[inline]
    pub const fn is_bandwidth_limited(&self) -> bool {
        self.bytes_per_tick != 0
    }
}

/// An occupied slot of the bandwidth queue.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Slot {
    pub(crate) len: u32,
    pub(crate) exit: Tick,
}

/// The virtual bandwidth queue of a hop. The ring is allocated once when the hop is built.
#[derive(Debug)]
pub(crate) struct HopQueue {
    slots: Box<[Slot]>,
    /// Slot due to exit next.
    head: usize,
    occupied: usize,
    byte_depth: u64,
    /// Bytes already paid for by the service time of the previous packet.
    pub(crate) fragment: u32,
}

impl HopQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: vec![Slot::default(); capacity].into_boxed_slice(),
            head: 0,
            occupied: 0,
            byte_depth: 0,
            fragment: 0,
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.occupied
    }

    #[inline]
    pub(crate) fn byte_depth(&self) -> u64 {
        self.byte_depth
    }

    #[inline]
    pub(crate) fn is_full(&self) -> bool {
        self.occupied == self.slots.len()
    }

    /// Retires every slot whose exit tick lies strictly before `now`.
    pub(crate) fn retire(&mut self, now: Tick) {
        while self.occupied > 0 && self.slots[self.head].exit < now {
            self.byte_depth -= self.slots[self.head].len as u64;
            self.head = (self.head + 1) % self.slots.len();
            self.occupied -= 1;
        }
    }

    /// Exit tick of the most recently admitted packet.
    pub(crate) fn tail_exit(&self) -> Option<Tick> {
        if self.occupied == 0 {
            return None;
        }

        let tail = (self.head + self.occupied - 1) % self.slots.len();
        Some(self.slots[tail].exit)
    }

    /// Records a packet in the next free slot. The caller checks [`Self::is_full`] first.
    pub(crate) fn push(&mut self, len: u32, exit: Tick) {
        debug_assert!(!self.is_full());

        let slot = (self.head + self.occupied) % self.slots.len();
        self.slots[slot] = Slot { len, exit };
        self.occupied += 1;
        self.byte_depth += len as u64;
    }

    pub(crate) fn snapshot(&self) -> QueueSnapshot {
        let slot_bytes = (0..self.occupied)
            .map(|i| self.slots[(self.head + i) % self.slots.len()].len as u64)
            .sum();

        QueueSnapshot {
            occupied: self.occupied,
            capacity: self.slots.len(),
            byte_depth: self.byte_depth,
            slot_bytes,
            fragment: self.fragment,
            tail_exit: self.tail_exit(),
        }
    }
}

/// A point-in-time view of a hop's bandwidth queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub occupied: usize,
    pub capacity: usize,
    /// Tracked byte depth.
    pub byte_depth: u64,
    /// Sum of the lengths of the occupied slots, which must equal `byte_depth`.
    pub slot_bytes: u64,
    pub fragment: u32,
    pub tail_exit: Option<Tick>,
}

/// Everything about a hop that is guarded by its lock.
pub(crate) struct HopState {
    pub(crate) settings: HopSettings,
    pub(crate) queue: HopQueue,
    pub(crate) discipline: Option<Box<dyn Discipline>>,
}

impl fmt::Debug for HopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HopState")
            .field("settings", &self.settings)
            .field("queue", &self.queue)
            .field("discipline", &self.discipline.is_some())
            .finish()
    }
}

/// Cumulative hop counters. Updated without the hop lock.
#[derive(Debug, Default)]
pub(crate) struct HopCounters {
    packets: AtomicU64,
    bytes: AtomicU64,
    queue_drops: AtomicU64,
    loss_drops: AtomicU64,
}

/// A single virtual link: its configuration, its bandwidth queue and its counters.
#[derive(Debug)]
pub struct Hop {
    id: HopId,
    state: Mutex<HopState>,
    counters: HopCounters,
}

impl Hop {
    pub(crate) fn new(
        id: HopId,
        settings: HopSettings,
        discipline: Option<Box<dyn Discipline>>,
    ) -> Self {
        // Hops owned by other cores never queue anything here.
        let capacity = if settings.is_local() { settings.capacity as usize } else { 0 };

        Self {
            id,
            state: Mutex::new(HopState { settings, queue: HopQueue::new(capacity), discipline }),
            counters: HopCounters::default(),
        }
    }

    #[inline]
    pub fn id(&self) -> HopId {
        self.id
    }

    /// Returns the current settings of the hop.
    pub fn settings(&self) -> HopSettings {
        self.state.lock().settings
    }

    /// Returns the owner of the hop, `None` if it is emulated on this core.
    pub fn owner(&self) -> Option<Ipv4Addr> {
        self.state.lock().settings.owner
    }

    /// Returns a snapshot of the bandwidth queue.
    pub fn queue(&self) -> QueueSnapshot {
        self.state.lock().queue.snapshot()
    }

    #[inline]
    pub(crate) fn lock(&self) -> MutexGuard<'_, HopState> {
        self.state.lock()
    }

    #[inline]
    pub(crate) fn record_admit(&self, bytes: u32) {
        self.counters.packets.fetch_add(1, Ordering::Relaxed);
        self.counters.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_queue_drop(&self) {
        self.counters.queue_drops.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_loss_drop(&self) {
        self.counters.loss_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Packets admitted to the hop.
    #[inline]
    pub fn packets(&self) -> u64 {
        self.counters.packets.load(Ordering::Relaxed)
    }

    /// Bytes admitted to the hop.
    #[inline]
    pub fn bytes(&self) -> u64 {
        self.counters.bytes.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn queue_drops(&self) -> u64 {
        self.counters.queue_drops.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn loss_drops(&self) -> u64 {
        self.counters.loss_drops.load(Ordering::Relaxed)
    }

    /// The statistics record of this hop. Drops include both queue overflows and random loss.
    pub fn stats(&self) -> StatsRecord {
        StatsRecord {
            packets: self.packets(),
            bytes: self.bytes(),
            drops: self.queue_drops() + self.loss_drops(),
        }
    }
}

impl Drop for Hop {
    fn drop(&mut self) {
        if let Some(mut discipline) = self.state.get_mut().discipline.take() {
            discipline.free(self.id);
        }
    }
}
