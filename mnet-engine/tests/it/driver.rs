use std::time::Duration;

use bytes::BytesMut;
use mnet_engine::{ip, ChannelHost, Emulator, EmulatorError, EmulatorOptions, Intercept};
use mnet_transport::{memory::MemoryNetwork, udp::Udp, Transport};
use mnet_wire::remote::{Datagram, RemoteDescriptor};
use tokio::net::UdpSocket;
use tokio_stream::StreamExt;

use crate::{forwarding, node, two_cores, CORE_A, CORE_B};

#[tokio::test(start_paused = true)]
async fn two_emulators_over_memory() {
    let _ = tracing_subscriber::fmt::try_init();

    let network = MemoryNetwork::new();
    let (host_a, mut released_a) = ChannelHost::new();
    let (host_b, mut released_b) = ChannelHost::new();

    let mut a = Emulator::with_options(
        network.endpoint(),
        EmulatorOptions::default().local_core(CORE_A),
        host_a,
    );
    let mut b = Emulator::with_options(
        network.endpoint(),
        EmulatorOptions::default().local_core(CORE_B),
        host_b,
    );

    a.load_topology(two_cores()).unwrap();
    b.load_topology(two_cores()).unwrap();
    a.bind(forwarding(CORE_A)).await.unwrap();
    b.bind(forwarding(CORE_B)).await.unwrap();
    assert_eq!(a.local_addr(), Some(forwarding(CORE_A)));

    let packet = ip::build(node(1), node(2), 1000);
    assert_eq!(a.intercept(packet.clone()), Intercept::Consumed);

    let (released, tick) =
        tokio::time::timeout(Duration::from_secs(1), released_a.next()).await.unwrap().unwrap();
    assert_eq!(released, packet);
    // Two ticks on A, three on B, plus at most a tick of transit each way.
    assert!((5..=8).contains(&tick), "released at {tick}");

    assert_eq!(a.engine().pending_cached(), 0);
    assert_eq!(a.stats().remote_sent(), 1);
    assert_eq!(b.stats().remote_received(), 1);
    assert!(released_b.try_next().is_none());
}

#[tokio::test]
async fn binding_twice_fails() {
    let (host, _released) = ChannelHost::new();
    let network = MemoryNetwork::new();

    let mut emulator = Emulator::new(network.endpoint(), host);
    emulator.bind(forwarding(CORE_A)).await.unwrap();
    assert!(!emulator.is_stopped());

    assert!(matches!(
        emulator.bind(forwarding(CORE_B)).await,
        Err(EmulatorError::AlreadyBound)
    ));
}

#[tokio::test]
async fn failed_bind_can_be_retried() {
    let (host, _released) = ChannelHost::new();
    let network = MemoryNetwork::new();

    let mut squatter = network.endpoint();
    squatter.bind(forwarding(CORE_A)).await.unwrap();

    let mut emulator = Emulator::new(network.endpoint(), host);
    assert!(matches!(emulator.bind(forwarding(CORE_A)).await, Err(EmulatorError::Transport(_))));
    emulator.bind(forwarding(CORE_B)).await.unwrap();
}

#[tokio::test]
async fn udp_datagrams_reach_the_engine() {
    let _ = tracing_subscriber::fmt::try_init();

    let (host, _released) = ChannelHost::new();
    let mut emulator =
        Emulator::with_options(Udp::new(), EmulatorOptions::default().remote_ttl(1), host);
    emulator.load_topology(two_cores()).unwrap();
    emulator.bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = emulator.local_addr().unwrap();
    assert_ne!(addr.port(), 0);

    let descriptor = RemoteDescriptor {
        handle: 1,
        expire: 1_000_000,
        len: 100,
        wait: 0,
        src: node(1),
        dst: node(2),
        hop: 1,
        ttl: 0,
    };
    let mut buf = BytesMut::new();
    Datagram::Digest(vec![descriptor]).encode(&mut buf).unwrap();

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.send_to(&buf, addr).await.unwrap();

    // Garbage costs a counter, not the driver.
    socket.send_to(b"garbage", addr).await.unwrap();

    let stats = emulator.engine().stats();
    tokio::time::timeout(Duration::from_secs(5), async {
        while stats.remote_ttl_drops() == 0 || stats.remote_errors() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(stats.remote_received(), 1);
    assert!(!emulator.is_stopped());
}
