use mnet_engine::{ip, EmulatorOptions, HopId, Intercept, ScheduleMode, TopologyBuilder};
use mnet_wire::records::HopRecord;

use crate::{core, node};

/// One hop from node 1 to node 2, with the bandwidth given in bytes per tick at 1000 Hz.
fn single_hop(bytes_per_tick: u32, delay: u32, queue: u32) -> TopologyBuilder {
    TopologyBuilder::new()
        .hop(HopRecord::new().bandwidth(bytes_per_tick * 8000).delay(delay).queue(queue))
        .node(node(1), 0)
        .node(node(2), 1)
        .path(0, 1, [0])
}

#[test]
fn four_packets_released_in_order_fifth_overflows() {
    let mut core = core(EmulatorOptions::default());
    core.engine.load_topology(single_hop(1000, 5, 4)).unwrap();

    for _ in 0..5 {
        let packet = ip::build(node(1), node(2), 230);
        assert_eq!(core.engine.intercept(packet), Intercept::Consumed);
    }
    assert_eq!(core.engine.stats().queue_drops(), 1);
    assert_eq!(core.engine.queued(), 4);

    core.clock.set(20);
    core.engine.advance();

    let ticks: Vec<_> = core.released.drain().into_iter().map(|(_, tick)| tick).collect();
    assert_eq!(ticks, [6, 7, 8, 9]);
    assert_eq!(core.engine.stats().released(), 4);
    assert_eq!(core.engine.hop_stats()[0].drops, 1);
}

#[test]
fn queue_stays_within_capacity_under_overload() {
    let mut core = core(EmulatorOptions::default());
    core.engine.load_topology(single_hop(1000, 1, 8)).unwrap();
    let topology = core.engine.topology();
    let hop = topology.hop(HopId::new(0)).unwrap();

    // Three 500 byte packets per tick on a link that carries two.
    let mut sent = 0;
    for tick in 0..200 {
        core.clock.set(tick);
        core.engine.advance();

        for _ in 0..3 {
            core.engine.intercept(ip::build(node(1), node(2), 480));
            sent += 1;
        }

        let queue = hop.queue();
        assert!(queue.occupied <= queue.capacity);
        assert_eq!(queue.byte_depth, queue.slot_bytes);
    }

    core.clock.set(400);
    core.engine.advance();

    let released = core.released.drain();
    let stats = core.engine.stats();
    assert_eq!(released.len() as u64 + stats.queue_drops(), sent);
    assert!(released.windows(2).all(|w| w[0].1 <= w[1].1));
    assert_eq!(core.engine.queued(), 0);
}

#[test]
fn schedule_modes_agree_on_release_ticks() {
    for mode in [ScheduleMode::Unified, ScheduleMode::Split] {
        let mut core = core(EmulatorOptions::default().schedule_mode(mode));
        core.engine.load_topology(single_hop(1000, 5, 4)).unwrap();

        // 2000 bytes: two ticks of service, then five of delay.
        core.engine.intercept(ip::build(node(1), node(2), 1980));
        core.engine.intercept(ip::build(node(1), node(2), 980));

        core.clock.set(20);
        core.engine.advance();

        let ticks: Vec<_> = core.released.drain().into_iter().map(|(_, tick)| tick).collect();
        assert_eq!(ticks, [7, 8], "{mode:?}");
    }
}

#[test]
fn delays_add_up_along_the_path() {
    let mut core = core(EmulatorOptions::default());
    core.engine
        .load_topology(
            TopologyBuilder::new()
                .hop(HopRecord::new().delay(2))
                .hop(HopRecord::new().delay(3))
                .hop(HopRecord::new())
                .node(node(1), 0)
                .node(node(2), 1)
                .path(0, 1, [0, 1, 2]),
        )
        .unwrap();

    core.engine.intercept(ip::build(node(1), node(2), 80));

    core.clock.set(5);
    core.engine.advance();
    assert!(core.released.try_next().is_none());

    core.clock.set(6);
    core.engine.advance();
    assert_eq!(core.released.try_next().map(|(_, tick)| tick), Some(5));

    let stats = core.engine.hop_stats();
    assert!(stats.iter().all(|hop| hop.packets == 1 && hop.bytes == 100));
}

#[test]
fn lossy_hop_drops_everything() {
    let mut core = core(EmulatorOptions::default());
    core.engine
        .load_topology(
            TopologyBuilder::new()
                .hop(HopRecord::new().delay(1).loss(1.0))
                .node(node(1), 0)
                .node(node(2), 1)
                .path(0, 1, [0]),
        )
        .unwrap();

    for _ in 0..10 {
        core.engine.intercept(ip::build(node(1), node(2), 100));
    }

    core.clock.set(10);
    core.engine.advance();

    assert!(core.released.try_next().is_none());
    assert_eq!(core.engine.stats().loss_drops(), 10);
    assert_eq!(core.engine.hop_stats()[0].drops, 10);
    assert_eq!(core.engine.hop_stats()[0].packets, 0);
}

#[test]
fn late_ticks_are_caught_up() {
    let mut core = core(EmulatorOptions::default());
    core.engine.load_topology(single_hop(1000, 3, 4)).unwrap();

    core.engine.intercept(ip::build(node(1), node(2), 230));

    // The driver was not scheduled for ten ticks.
    core.clock.set(10);
    assert_eq!(core.engine.advance(), 10);

    assert_eq!(core.engine.stats().missed_ticks(), 9);
    assert_eq!(core.released.try_next().map(|(_, tick)| tick), Some(4));
    assert_eq!(core.engine.current_tick(), 10);
}
