//! The path walker moves packets along their path, one hop at a time.
//!
//! ```text
//!  Fresh ──▶ AtHop(0) ──emulate──▶ Queued ──tick──▶ AtHop(1) ── ... ──▶ AtHop(len) ──▶ released
//!               │                                      │
//!               └── dropped                            └── remote hop ──▶ other core
//! ```
//!
//! A walk runs until the packet is released, dropped, handed to another core or parked in the
//! calendar. Every walk happens with the scheduler locked, so a packet is only ever touched by
//! one walk at a time.
use std::{
    mem,
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};

use bytes::Bytes;
use parking_lot::Mutex;
use rand::RngCore;
use tracing::{debug, error, trace, warn};

use crate::{
    discipline::{Discipline, DisciplineCtx},
    emulate::{emulate, Refusal},
    hop::HopState,
    remote::RemoteForwarder,
    CalendarQueue, DropReason, EngineStats, Hop, HopId, Packet, Payload, Phase, ProtocolError,
    QueueState, ScheduleMode, Scheduled, Topology,
};
use mnet_common::Tick;

/// The random source shared by every hop.
pub(crate) type SharedRng = Mutex<Box<dyn RngCore + Send>>;

/// A discipline timeout for a hop of a particular topology.
#[derive(Debug)]
pub(crate) struct HopTimer {
    topology: Arc<Topology>,
    hop: HopId,
}

/// The calendars and maintenance bookkeeping, guarded by the scheduler lock.
#[derive(Debug)]
pub(crate) struct Scheduler {
    pub(crate) packets: CalendarQueue<Packet>,
    /// Discipline timeouts. Stepped in lockstep with `packets`.
    pub(crate) timers: CalendarQueue<HopTimer>,
    pub(crate) last_flush: Tick,
    pub(crate) last_maintenance: Tick,
}

impl Scheduler {
    pub(crate) fn new(bits: u8, start: Tick) -> Self {
        Self {
            packets: CalendarQueue::new(bits, start),
            timers: CalendarQueue::new(bits, start),
            last_flush: start,
            last_maintenance: start,
        }
    }

    /// The next tick to be drained.
    #[inline]
    pub(crate) fn current(&self) -> Tick {
        self.packets.current()
    }
}

/// One pass of walking, borrowing everything it needs from the engine.
pub(crate) struct Walker<'a> {
    pub(crate) mode: ScheduleMode,
    pub(crate) stats: &'a EngineStats,
    pub(crate) remote: &'a Mutex<RemoteForwarder>,
    pub(crate) rng: &'a SharedRng,
    pub(crate) scheduler: &'a mut Scheduler,
    /// Packets released to the host during this pass, handed over once the scheduler lock is
    /// dropped.
    pub(crate) released: &'a mut Vec<(Bytes, Tick)>,
}

impl Walker<'_> {
    /// Drains every calendar bucket before `now`, resuming the walk of each packet at the tick
    /// of its bucket. Discipline timeouts of a tick fire after its packets.
    pub(crate) fn run_due(&mut self, now: Tick) {
        while self.scheduler.current() < now {
            let tick = self.scheduler.current();

            while let Some(packet) = self.scheduler.packets.pop_current() {
                self.walk(packet, tick);
            }

            while let Some(timer) = self.scheduler.timers.pop_current() {
                self.fire(timer, tick);
            }

            if self.scheduler.packets.is_empty() && self.scheduler.timers.is_empty() {
                self.scheduler.packets.fast_forward(now);
                self.scheduler.timers.fast_forward(now);
            } else {
                self.scheduler.packets.step();
                self.scheduler.timers.step();
            }
        }
    }

    /// Walks `packet` from wherever it is in its path at tick `now`.
    pub(crate) fn walk(&mut self, mut packet: Packet, now: Tick) {
        loop {
            match packet.phase {
                Phase::Fresh => {
                    let first = packet.cursor.path.first().copied();
                    if let Some(id) = first {
                        match packet.cursor.topology.hop(id).map(Hop::owner) {
                            None => {
                                return self.drop_packet(packet, DropReason::Fatal("unknown hop"));
                            }
                            Some(Some(_)) => {
                                return self.drop_packet(
                                    packet,
                                    DropReason::Fatal("first hop of a path is remote"),
                                );
                            }
                            Some(None) => {}
                        }
                    }

                    packet.phase = Phase::AtHop;
                }
                Phase::Queued(QueueState::Both) => {
                    self.dequeue(&mut packet, now);
                    packet.phase = Phase::AtHop;
                }
                Phase::Queued(QueueState::Bandwidth) => {
                    self.dequeue(&mut packet, now);
                    packet.phase = Phase::Queued(QueueState::Delay);

                    let delay = mem::take(&mut packet.pending_delay);
                    if delay > 0 {
                        return self.schedule(packet, now + delay);
                    }
                }
                Phase::Queued(QueueState::Delay) => packet.phase = Phase::AtHop,
                Phase::AtHop => match self.cross(packet, now) {
                    Some(next) => packet = next,
                    None => return,
                },
            }
        }
    }

    /// Crosses the hop at the packet's index. Returns the packet if its walk continues right
    /// away.
    fn cross(&mut self, mut packet: Packet, now: Tick) -> Option<Packet> {
        let Some(&id) = packet.cursor.path.get(packet.hop) else {
            self.release(packet, now);
            return None;
        };

        let topology = Arc::clone(&packet.cursor.topology);
        let Some(hop) = topology.hop(id) else {
            self.drop_packet(packet, DropReason::Fatal("unknown hop"));
            return None;
        };

        if let Some(owner) = hop.owner() {
            let to = self.remote.lock().address_of(owner);
            self.hand_off(packet, to, now);
            return None;
        }

        let result = {
            let mut rng = self.rng.lock();
            emulate(hop, &mut packet, now, &mut **rng)
        };

        let admission = match result {
            Ok(admission) => admission,
            Err(Refusal::Loss) => {
                self.drop_packet(packet, DropReason::Loss);
                return None;
            }
            Err(Refusal::QueueOverflow) => {
                self.drop_packet(packet, DropReason::QueueOverflow);
                return None;
            }
        };

        if admission.service == 0 && hop.settings().is_bandwidth_limited() {
            self.stats.increment_zero_service();
        }

        if let Some(at) = admission.timeout {
            self.arm(&topology, id, at, now);
        }

        packet.hop += 1;
        packet.hop_count += 1;
        packet.last_hop = Some(id);
        packet.wait = packet.wait.saturating_add((admission.arrival() - now) as u32);

        let resume = match self.mode {
            ScheduleMode::Unified => {
                packet.phase = Phase::Queued(QueueState::Both);
                admission.arrival()
            }
            ScheduleMode::Split => {
                packet.phase = Phase::Queued(QueueState::Bandwidth);
                packet.pending_delay = admission.delay;
                admission.exit
            }
        };

        if resume <= now {
            return Some(packet);
        }

        self.schedule(packet, resume);
        None
    }

    fn schedule(&mut self, packet: Packet, at: Tick) {
        if self.scheduler.packets.schedule(packet, at) == Scheduled::Aliased {
            self.stats.increment_aliased();
            debug!(at, current = self.scheduler.current(), "Packet scheduled beyond the horizon");
        }
    }

    /// Runs the dequeue hook of the hop the packet just left.
    fn dequeue(&mut self, packet: &mut Packet, now: Tick) {
        let Some(id) = packet.last_hop else { return };
        let topology = Arc::clone(&packet.cursor.topology);
        let Some(hop) = topology.hop(id) else { return };

        if let Some(at) = run_hook(hop, now, |discipline, ctx| discipline.dequeue(ctx, packet)) {
            self.arm(&topology, id, at, now);
        }
    }

    /// Schedules a discipline timeout. Timeouts are never due before the next tick.
    fn arm(&mut self, topology: &Arc<Topology>, hop: HopId, at: Tick, now: Tick) {
        let timer = HopTimer { topology: Arc::clone(topology), hop };
        if self.scheduler.timers.schedule(timer, at.max(now + 1)) == Scheduled::Aliased {
            self.stats.increment_aliased();
        }
    }

    fn fire(&mut self, timer: HopTimer, now: Tick) {
        let Some(hop) = timer.topology.hop(timer.hop) else { return };

        if let Some(at) = run_hook(hop, now, |discipline, ctx| discipline.timeout(ctx)) {
            self.arm(&timer.topology, timer.hop, at, now);
        }
    }

    /// The packet crossed its last hop.
    fn release(&mut self, mut packet: Packet, now: Tick) {
        match packet.take_payload() {
            Payload::Local(bytes) => {
                trace!(src = %packet.src, dst = %packet.dst, wait = packet.wait, now, "Released");
                self.stats.increment_released();
                self.released.push((bytes, now));
            }
            Payload::CachedAwaitingReturn(handle) => {
                packet.payload = Payload::CachedAwaitingReturn(handle);
                match packet.home {
                    Some(home) => self.hand_off(packet, home, now),
                    None => self.drop_packet(packet, DropReason::Fatal("cached at its own home")),
                }
            }
            Payload::RemoteOnly => {
                self.drop_packet(packet, DropReason::Fatal("released without a payload"))
            }
        }
    }

    fn hand_off(&mut self, packet: Packet, to: SocketAddr, now: Tick) {
        let (src, dst, hop) = (packet.src, packet.dst, packet.hop);
        trace!(%src, %dst, hop, %to, "Handing off");

        if let Err(reason) = self.remote.lock().forward(packet, to, now) {
            record_drop(self.stats, reason, src, dst);
        }
    }

    pub(crate) fn drop_packet(&self, packet: Packet, reason: DropReason) {
        record_drop(self.stats, reason, packet.src, packet.dst);
    }
}

/// Counts and logs a dropped packet.
pub(crate) fn record_drop(
    stats: &EngineStats,
    reason: DropReason,
    src: Ipv4Addr,
    dst: Ipv4Addr,
) {
    match reason {
        DropReason::Loss => {
            stats.increment_loss_drops();
            trace!(%src, %dst, "Lost");
        }
        DropReason::QueueOverflow => {
            stats.increment_queue_drops();
            trace!(%src, %dst, "Queue overflow");
        }
        DropReason::NoPath => {
            stats.increment_no_path();
            stats.increment_errors();
            debug!(%src, %dst, "No path");
        }
        DropReason::ResourceExhausted => {
            stats.increment_errors();
            warn!(%src, %dst, "Dropped, resources exhausted");
        }
        DropReason::Protocol(ProtocolError::TtlExhausted) => {
            stats.increment_remote_ttl_drops();
            debug!(%src, %dst, "TTL exhausted");
        }
        DropReason::Protocol(e) => {
            stats.increment_remote_errors();
            debug!(%src, %dst, "Remote protocol error: {e}");
        }
        DropReason::Fatal(what) => {
            stats.increment_errors();
            error!(%src, %dst, "Invariant violated: {what}");
        }
    }
}

/// Runs a discipline hook on `hop`, if it has a discipline. Returns the timeout it requested.
fn run_hook(
    hop: &Hop,
    now: Tick,
    hook: impl FnOnce(&mut dyn Discipline, &mut DisciplineCtx<'_>),
) -> Option<Tick> {
    let mut state = hop.lock();
    let HopState { settings, queue, discipline } = &mut *state;
    let discipline = discipline.as_mut()?;

    let mut ctx = DisciplineCtx::new(hop.id(), now, settings, queue.len(), queue.byte_depth());
    hook(&mut **discipline, &mut ctx);

    ctx.timeout
}
