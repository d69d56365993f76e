use std::net::{Ipv4Addr, SocketAddr};

use mnet_common::{constants::REMOTE_PORT, ManualClock};
use mnet_engine::{ChannelHost, EmulatorOptions, Engine, Released, TopologyBuilder};
use mnet_wire::records::HopRecord;
use rand::rngs::mock::StepRng;

mod config;
mod driver;
mod remote;
mod scenario;

pub(crate) const CORE_A: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 1);
pub(crate) const CORE_B: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 2);

/// A virtual endpoint address.
pub(crate) fn node(n: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, n)
}

/// The forwarding address of an emulator core.
pub(crate) fn forwarding(core: Ipv4Addr) -> SocketAddr {
    SocketAddr::new(core.into(), REMOTE_PORT)
}

/// An engine on a manual clock, releasing into a channel. Sub-tick packets always round up.
pub(crate) struct Core {
    pub(crate) engine: Engine,
    pub(crate) clock: ManualClock,
    pub(crate) released: Released,
}

pub(crate) fn core(options: EmulatorOptions) -> Core {
    let _ = tracing_subscriber::fmt::try_init();

    let clock = ManualClock::new(options.get_hz());
    let (host, released) = ChannelHost::new();
    let engine = Engine::with_clock(options, clock.clone(), host).with_rng(StepRng::new(0, 0));

    Core { engine, clock, released }
}

/// Node 1 to node 2 over two delay-only hops: hop 0 (2 ticks) emulated by core A, hop 1
/// (3 ticks) by core B.
pub(crate) fn two_cores() -> TopologyBuilder {
    TopologyBuilder::new()
        .hop(HopRecord::new().delay(2).owner(CORE_A))
        .hop(HopRecord::new().delay(3).owner(CORE_B))
        .node(node(1), 0)
        .node(node(2), 1)
        .path(0, 1, [0, 1])
}

/// Delivers everything `from` has queued for other cores to `to`. Returns the number of
/// datagrams delivered.
pub(crate) fn exchange(from: &Core, from_core: Ipv4Addr, to: &Core) -> usize {
    let outbound = from.engine.take_outbound();
    let count = outbound.len();

    for (datagram, _) in outbound {
        to.engine.receive_remote(datagram, forwarding(from_core));
    }

    count
}
