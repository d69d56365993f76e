//! The hop emulator: loss, bandwidth queueing and delay for one packet crossing one hop.
//!
//! Service time in the bandwidth queue is `len / bytes_per_tick` ticks. Packets rarely divide a
//! tick evenly, so the queue keeps a byte clock:
//!
//! - A packet that needs several ticks pays for whole ticks, and the unused part of its last tick
//!   is kept as the `fragment`. The next packet consumes the fragment first, for free.
//! - A packet smaller than one tick's budget (after the fragment) is rounded up with probability
//!   `remainder / bytes_per_tick` and down otherwise, which keeps small packets on fast links
//!   from systematically gaining or losing bandwidth.
//!
//! The fragment is reset whenever the queue drains, so an idle link never hands out stale credit.
use rand::RngCore;

use crate::{
    discipline::DisciplineCtx,
    hop::{HopQueue, HopState},
    Hop, Packet,
};
use mnet_common::Tick;
use mnet_wire::records::LOSS_MAX;

/// The outcome of a packet admitted to a hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Tick at which the packet leaves the bandwidth queue.
    pub exit: Tick,
    /// Ticks of service the packet added to the queue.
    pub service: Tick,
    /// Propagation delay still to be applied after `exit`.
    pub delay: Tick,
    /// Timeout requested by the hop's discipline, if any.
    pub timeout: Option<Tick>,
}

impl Admission {
    /// Tick at which the packet reaches the end of the hop.
    #[inline]
    pub const fn arrival(&self) -> Tick {
        self.exit + self.delay
    }
}

/// Why a hop refused a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Refusal {
    Loss,
    QueueOverflow,
}

impl HopQueue {
    /// Service time for `len` bytes on a link of `bpt` bytes per tick, spending and refilling the
    /// fragment.
    fn service<R: RngCore + ?Sized>(&mut self, len: u32, bpt: u32, rng: &mut R) -> Tick {
        if self.fragment >= len {
            self.fragment -= len;
            return 0;
        }

        let len = (len - self.fragment) as u64;
        let bpt = bpt as u64;
        self.fragment = 0;

        match (len / bpt, len % bpt) {
            (whole, 0) => whole,
            (0, rem) => {
                if (rng.next_u32() as u64 % bpt) < rem {
                    1
                } else {
                    0
                }
            }
            (whole, rem) => {
                self.fragment = (bpt - rem) as u32;
                whole + 1
            }
        }
    }
}

impl HopState {
    /// Runs loss and the bandwidth queue for a packet of `len` bytes arriving at `now`.
    pub(crate) fn admit<R: RngCore + ?Sized>(
        &mut self,
        len: u32,
        now: Tick,
        rng: &mut R,
    ) -> Result<Admission, Refusal> {
        let settings = self.settings;

        if settings.loss != 0 && (rng.next_u32() & LOSS_MAX) < settings.loss {
            return Err(Refusal::Loss);
        }

        if !settings.is_bandwidth_limited() {
            return Ok(Admission { exit: now, service: 0, delay: settings.delay, timeout: None });
        }

        let queue = &mut self.queue;
        queue.retire(now);
        if queue.is_full() {
            return Err(Refusal::QueueOverflow);
        }

        let tail = match queue.tail_exit() {
            Some(tail) => tail,
            None => {
                queue.fragment = 0;
                now
            }
        };

        let service = queue.service(len, settings.bytes_per_tick, rng);
        let exit = tail + service;
        queue.push(len, exit);

        Ok(Admission { exit, service, delay: settings.delay, timeout: None })
    }
}

/// Emulates `hop` for `packet` at `now`: admission, counters and the discipline's enqueue hook.
pub(crate) fn emulate<R: RngCore + ?Sized>(
    hop: &Hop,
    packet: &mut Packet,
    now: Tick,
    rng: &mut R,
) -> Result<Admission, Refusal> {
    let mut state = hop.lock();

    let mut admission = match state.admit(packet.len(), now, rng) {
        Ok(admission) => admission,
        Err(refusal) => {
            match refusal {
                Refusal::Loss => hop.record_loss_drop(),
                Refusal::QueueOverflow => hop.record_queue_drop(),
            }
            return Err(refusal);
        }
    };

    hop.record_admit(packet.len());

    let HopState { settings, queue, discipline } = &mut *state;
    if let Some(discipline) = discipline {
        let mut ctx = DisciplineCtx::new(hop.id(), now, settings, queue.len(), queue.byte_depth());
        discipline.enqueue(&mut ctx, packet);
        admission.timeout = ctx.timeout;
    }

    Ok(admission)
}
