use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use tokio_stream::StreamExt;

use mnet::{
    constants::REMOTE_PORT, ip, memory::MemoryNetwork, records::HopRecord, ChannelHost, Emulator,
    EmulatorOptions, TopologyBuilder,
};

/// Two emulator cores in one process. Core A emulates the access link, core B the long-haul link.
#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt::try_init();

    let core_a = Ipv4Addr::new(192, 168, 0, 1);
    let core_b = Ipv4Addr::new(192, 168, 0, 2);

    // Both cores load the same tables. Each one emulates the hops it owns.
    let topology = || {
        TopologyBuilder::new()
            .hop(HopRecord::new().bandwidth(10_000_000).delay(5).queue(64).owner(core_a))
            .hop(HopRecord::new().bandwidth(100_000_000).delay(40).queue(256).owner(core_b))
            .node(Ipv4Addr::new(10, 0, 0, 1), 0)
            .node(Ipv4Addr::new(10, 0, 0, 2), 1)
            .path(0, 1, [0, 1])
    };

    let network = MemoryNetwork::new();
    let (host, mut released) = ChannelHost::new();
    let (host_b, _) = ChannelHost::new();

    let mut a = Emulator::with_options(
        network.endpoint(),
        EmulatorOptions::default().local_core(core_a),
        host,
    );
    let mut b = Emulator::with_options(
        network.endpoint(),
        EmulatorOptions::default().local_core(core_b),
        host_b,
    );

    a.load_topology(topology()).unwrap();
    b.load_topology(topology()).unwrap();
    a.bind(SocketAddr::new(core_a.into(), REMOTE_PORT)).await.unwrap();
    b.bind(SocketAddr::new(core_b.into(), REMOTE_PORT)).await.unwrap();

    for _ in 0..10 {
        a.intercept(ip::build(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), 1380));
    }

    let mut received = 0;
    while let Ok(Some((packet, tick))) =
        tokio::time::timeout(Duration::from_secs(1), released.next()).await
    {
        received += 1;
        println!("Released {} bytes at tick {tick}", packet.len());

        if received == 10 {
            break;
        }
    }

    println!("Core A: {:?}", a.stats());
    println!("Core B: {:?}", b.stats());
}
