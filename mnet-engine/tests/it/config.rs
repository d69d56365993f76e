use mnet_engine::{ip, ConfigError, EmulatorOptions, HopId, TopologyBuilder};
use mnet_wire::records::{self, HopRecord, NodeRecord, PathRecord};

use crate::{core, node, CORE_A, CORE_B};

fn delay_only(delay: u32) -> TopologyBuilder {
    TopologyBuilder::new()
        .hop(HopRecord::new().delay(delay))
        .node(node(1), 0)
        .node(node(2), 1)
        .path(0, 1, [0])
}

#[test]
fn failed_reload_keeps_the_active_topology() {
    let mut core = core(EmulatorOptions::default());
    assert_eq!(core.engine.load_topology(delay_only(1)).unwrap(), 1);

    let broken = delay_only(1).path(1, 0, [7]);
    assert!(matches!(
        core.engine.load_topology(broken),
        Err(ConfigError::UnknownHop { origin: 1, destination: 0, hop: 7 })
    ));
    assert_eq!(core.engine.topology().generation(), 1);

    core.engine.intercept(ip::build(node(1), node(2), 80));
    core.clock.set(2);
    core.engine.advance();
    assert_eq!(core.released.try_next().map(|(_, tick)| tick), Some(1));

    assert_eq!(core.engine.load_topology(delay_only(3)).unwrap(), 2);
}

#[test]
fn load_from_binary_tables() {
    let mut core = core(EmulatorOptions::default());

    let hops = records::encode_table(
        &[HopRecord::new().bandwidth(8_000_000).delay(2).queue(16), HopRecord::new().delay(1)],
        HopRecord::encode,
    );
    let paths = records::encode_table(&[PathRecord::new(0, 1, vec![0, 1])], PathRecord::encode);
    let nodes = records::encode_table(
        &[NodeRecord { addr: node(1), node: 0 }, NodeRecord { addr: node(2), node: 1 }],
        NodeRecord::encode,
    );

    assert_eq!(core.engine.load_tables(hops, paths, nodes).unwrap(), 1);
    assert_eq!(core.engine.topology().hops().len(), 2);

    // 1000 bytes: one tick of service, two of delay on hop 0, one of delay on hop 1.
    core.engine.intercept(ip::build(node(1), node(2), 980));
    core.clock.set(10);
    core.engine.advance();
    assert_eq!(core.released.try_next().map(|(_, tick)| tick), Some(4));

    let stats = records::decode_stats(core.engine.hop_stats_table()).unwrap();
    assert_eq!(stats.iter().map(|s| s.bytes).collect::<Vec<_>>(), [1000, 1000]);
}

#[test]
fn truncated_tables_are_rejected() {
    let core = core(EmulatorOptions::default());

    let hops = records::encode_table(&[HopRecord::new()], HopRecord::encode).slice(..10);
    let result = core.engine.load_tables(hops, Default::default(), Default::default());
    assert!(matches!(result, Err(ConfigError::Wire(_))));
    assert_eq!(core.engine.topology().generation(), 0);
}

#[test]
fn modified_hops_apply_to_the_next_packet() {
    let mut core = core(EmulatorOptions::default());
    core.engine.load_topology(delay_only(5)).unwrap();

    core.engine.intercept(ip::build(node(1), node(2), 80));
    core.engine.modify_hop(HopId::new(0), &HopRecord::new().delay(1)).unwrap();
    core.engine.intercept(ip::build(node(1), node(2), 80));

    core.clock.set(10);
    core.engine.advance();

    // The second packet overtakes the first.
    let ticks: Vec<_> = core.released.drain().into_iter().map(|(_, tick)| tick).collect();
    assert_eq!(ticks, [1, 5]);
}

#[test]
fn modifying_the_owner_moves_a_hop_here() {
    let mut core = core(EmulatorOptions::default().local_core(CORE_A));
    core.engine
        .load_topology(
            TopologyBuilder::new()
                .hop(HopRecord::new().delay(1).owner(CORE_B))
                .node(node(1), 0)
                .node(node(2), 1)
                .path(0, 1, [0]),
        )
        .unwrap();

    // Paths start on the core that intercepts them.
    core.engine.intercept(ip::build(node(1), node(2), 80));
    assert_eq!(core.engine.stats().errors(), 1);

    core.engine.modify_hop(HopId::new(0), &HopRecord::new().delay(1).owner(CORE_A)).unwrap();
    assert_eq!(core.engine.topology().hop(HopId::new(0)).unwrap().owner(), None);

    core.engine.intercept(ip::build(node(1), node(2), 80));
    core.clock.set(2);
    core.engine.advance();
    assert_eq!(core.released.try_next().map(|(_, tick)| tick), Some(1));
}

#[test]
fn waits_beyond_the_horizon_alias() {
    let mut core = core(EmulatorOptions::default().calendar_bits(4));
    core.engine.load_topology(delay_only(20)).unwrap();

    core.engine.intercept(ip::build(node(1), node(2), 80));
    assert_eq!(core.engine.stats().aliased(), 1);

    // Sixteen buckets: the packet comes up one horizon early.
    core.clock.set(30);
    core.engine.advance();
    assert_eq!(core.released.try_next().map(|(_, tick)| tick), Some(4));
}
