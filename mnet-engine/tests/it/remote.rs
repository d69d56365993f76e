use mnet_engine::{ip, EmulatorOptions};
use mnet_wire::remote::{Datagram, RemoteDescriptor};

use crate::{core, exchange, forwarding, node, two_cores, Core, CORE_A, CORE_B};

fn pair(options: EmulatorOptions) -> (Core, Core) {
    let a = core(options.clone().local_core(CORE_A));
    let b = core(options.local_core(CORE_B));
    a.engine.load_topology(two_cores()).unwrap();
    b.engine.load_topology(two_cores()).unwrap();

    (a, b)
}

/// Sends a packet from node 1 through hop 0 on core A. Returns the descriptor A hands to B.
fn hand_off(a: &Core) -> RemoteDescriptor {
    a.engine.intercept(ip::build(node(1), node(2), 80));
    a.clock.set(3);
    a.engine.advance();

    let outbound = a.engine.take_outbound();
    let [(Datagram::Digest(descriptors), to)] = &outbound[..] else {
        panic!("expected a single digest, got {outbound:?}");
    };
    assert_eq!(*to, forwarding(CORE_B));
    assert_eq!(descriptors.len(), 1);

    descriptors[0]
}

#[test]
fn payload_returns_home_and_is_released() {
    let (mut a, b) = pair(EmulatorOptions::default());
    let packet = ip::build(node(1), node(2), 80);

    a.engine.intercept(packet.clone());
    a.clock.set(3);
    a.engine.advance();
    assert_eq!(a.engine.pending_cached(), 1);

    b.clock.set(3);
    assert_eq!(exchange(&a, CORE_A, &b), 1);
    assert_eq!(b.engine.stats().remote_received(), 1);
    assert_eq!(b.engine.queued(), 1);

    // Hop 1 takes three ticks on B, then only the descriptor goes back.
    b.clock.set(7);
    b.engine.advance();
    assert_eq!(b.engine.pending_cached(), 0);

    a.clock.set(7);
    assert_eq!(exchange(&b, CORE_B, &a), 1);

    let (released, tick) = a.released.try_next().unwrap();
    assert_eq!(released, packet);
    assert_eq!(tick, 7);
    assert_eq!(a.engine.pending_cached(), 0);
    assert_eq!(a.engine.stats().released(), 1);
    assert_eq!(a.engine.stats().remote_sent(), 1);
    assert_eq!(b.engine.stats().remote_sent(), 1);
}

#[test]
fn without_pcache_the_last_core_releases() {
    let (a, mut b) = pair(EmulatorOptions::default().pcache(false));
    let packet = ip::build(node(1), node(2), 80);

    a.engine.intercept(packet.clone());
    a.clock.set(3);
    a.engine.advance();
    assert_eq!(a.engine.pending_cached(), 0);

    b.clock.set(3);
    exchange(&a, CORE_A, &b);
    b.clock.set(7);
    b.engine.advance();

    assert_eq!(b.released.try_next(), Some((packet, 6)));
    assert!(b.engine.take_outbound().is_empty());
}

#[test]
fn expired_entries_are_reclaimed() {
    let options = EmulatorOptions::default().remote_expire(10).maintenance_ticks(1);
    let (mut a, _b) = pair(options);

    let mut descriptor = hand_off(&a);
    assert_eq!(descriptor.expire, 12);
    assert_eq!(a.engine.pending_cached(), 1);

    // B never answers.
    a.clock.set(20);
    a.engine.advance();
    assert_eq!(a.engine.pending_cached(), 0);
    assert_eq!(a.engine.stats().remote_expired(), 1);

    // A late return finds nothing to reunite with.
    descriptor.hop = 2;
    a.engine.receive_remote(Datagram::Digest(vec![descriptor]), forwarding(CORE_B));
    assert_eq!(a.engine.stats().remote_errors(), 1);
    assert!(a.released.try_next().is_none());
}

#[test]
fn mismatched_returns_keep_the_entry() {
    let (mut a, _b) = pair(EmulatorOptions::default());
    let mut descriptor = hand_off(&a);
    descriptor.hop = 2;

    let mut forged = descriptor;
    forged.len += 1;
    a.engine.receive_remote(Datagram::Digest(vec![forged]), forwarding(CORE_B));
    assert_eq!(a.engine.stats().remote_errors(), 1);
    assert_eq!(a.engine.pending_cached(), 1);

    a.engine.receive_remote(Datagram::Digest(vec![descriptor]), forwarding(CORE_B));
    assert_eq!(a.released.try_next().map(|(packet, _)| packet.len()), Some(100));
    assert_eq!(a.engine.pending_cached(), 0);
}

#[test]
fn unknown_handles_are_invariant_violations() {
    let (a, _b) = pair(EmulatorOptions::default());
    let mut descriptor = hand_off(&a);
    descriptor.hop = 2;
    descriptor.handle += 1;

    a.engine.receive_remote(Datagram::Digest(vec![descriptor]), forwarding(CORE_B));
    assert_eq!(a.engine.stats().errors(), 1);
    assert_eq!(a.engine.pending_cached(), 1);
}

#[test]
fn ttl_bounds_core_traversals() {
    let (a, b) = pair(EmulatorOptions::default().remote_ttl(0));

    let descriptor = hand_off(&a);
    assert_eq!(descriptor.ttl, 0);

    b.engine.receive_remote(Datagram::Digest(vec![descriptor]), forwarding(CORE_A));
    assert_eq!(b.engine.stats().remote_ttl_drops(), 1);
    assert_eq!(b.engine.queued(), 0);
}

#[test]
fn bad_hop_indices_are_rejected() {
    let (a, b) = pair(EmulatorOptions::default());
    let descriptor = hand_off(&a);

    for hop in [0, 3] {
        let bad = RemoteDescriptor { hop, ..descriptor };
        b.engine.receive_remote(Datagram::Digest(vec![bad]), forwarding(CORE_A));
    }

    let mut missing = descriptor;
    missing.handle = 0;
    b.engine.receive_remote(Datagram::Digest(vec![missing]), forwarding(CORE_A));

    assert_eq!(b.engine.stats().remote_errors(), 3);
    assert_eq!(b.engine.queued(), 0);
}

#[test]
fn aggregation_waits_for_the_flush_period() {
    let options = EmulatorOptions::default().aggregate_flush_ticks(5);
    let (a, _b) = pair(options);

    for _ in 0..3 {
        a.engine.intercept(ip::build(node(1), node(2), 80));
    }

    a.clock.set(3);
    a.engine.advance();
    assert!(a.engine.take_outbound().is_empty());
    assert_eq!(a.engine.pending_cached(), 3);

    a.clock.set(5);
    a.engine.advance();
    let outbound = a.engine.take_outbound();
    assert!(matches!(&outbound[..], [(Datagram::Digest(descriptors), _)] if descriptors.len() == 3));
    assert_eq!(a.engine.stats().remote_sent(), 3);
}

#[test]
fn explicit_flush_sends_right_away() {
    let options = EmulatorOptions::default().aggregate_flush_ticks(1000);
    let (a, _b) = pair(options);

    a.engine.intercept(ip::build(node(1), node(2), 80));
    a.clock.set(3);
    a.engine.advance();
    assert!(a.engine.take_outbound().is_empty());

    a.engine.flush();
    assert_eq!(a.engine.take_outbound().len(), 1);
}
