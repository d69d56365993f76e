use std::{
    mem,
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};

use arc_swap::ArcSwap;
use bytes::Bytes;
use parking_lot::Mutex;
use rand::{rngs::StdRng, RngCore, SeedableRng};
use tracing::{debug, error, info};

use crate::{
    host::HostStack,
    ip,
    packet::Cursor,
    remote::RemoteForwarder,
    walker::{record_drop, Scheduler, SharedRng, Walker},
    CacheHandle, ConfigError, DisciplineRegistry, DropReason, EmulatorOptions, EngineStats, HopId,
    HopSettings, Packet, Payload, Phase, ProtocolError, Topology, TopologyBuilder,
};
use mnet_common::{Clock, MonotonicClock, Tick};
use mnet_wire::{
    records::{self, HopRecord, StatsRecord},
    remote::{Datagram, RemoteDescriptor},
};

/// What [`Engine::intercept`] did with a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intercept {
    /// The packet is the engine's now. It will be released, handed off or dropped.
    Consumed,
    /// The packet is not virtual traffic and is handed back untouched.
    Refused(Bytes),
}

/// The emulation engine of a single core.
///
/// The engine is synchronous. Packets enter through [`Engine::intercept`] (from the host stack)
/// and [`Engine::receive_remote`] (from other cores), virtual time moves forward with
/// [`Engine::advance`], and datagrams for other cores are collected with
/// [`Engine::take_outbound`]. The [`Emulator`](crate::Emulator) drives all of this from a tokio
/// task; tests drive it by hand with a [`ManualClock`](mnet_common::ManualClock).
///
/// Lock order: scheduler, remote forwarder, random source, hop.
pub struct Engine {
    options: EmulatorOptions,
    clock: Arc<dyn Clock>,
    topology: ArcSwap<Topology>,
    /// Serializes reconfiguration.
    reconfigure: Mutex<()>,
    registry: DisciplineRegistry,
    scheduler: Mutex<Scheduler>,
    remote: Mutex<RemoteForwarder>,
    rng: SharedRng,
    host: Arc<dyn HostStack>,
    stats: Arc<EngineStats>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("options", &self.options)
            .field("generation", &self.topology.load().generation())
            .field("registry", &self.registry)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Creates a new engine ticking on the monotonic clock at the configured rate.
    pub fn new<H: HostStack>(options: EmulatorOptions, host: H) -> Self {
        let clock = MonotonicClock::new(options.get_hz());
        Self::with_clock(options, clock, host)
    }

    /// Creates a new engine on the given clock. The clock is expected to tick at the configured
    /// rate.
    pub fn with_clock<C: Clock, H: HostStack>(options: EmulatorOptions, clock: C, host: H) -> Self {
        let rng: Box<dyn RngCore + Send> = match options.get_seed() {
            Some(seed) => Box::new(StdRng::seed_from_u64(seed)),
            None => Box::new(StdRng::from_entropy()),
        };

        let start = clock.now();

        Self {
            scheduler: Mutex::new(Scheduler::new(options.get_calendar_bits(), start)),
            remote: Mutex::new(RemoteForwarder::new(&options)),
            options,
            clock: Arc::new(clock),
            topology: ArcSwap::from_pointee(Topology::default()),
            reconfigure: Mutex::new(()),
            registry: DisciplineRegistry::new(),
            rng: Mutex::new(rng),
            host: Arc::new(host),
            stats: Arc::new(EngineStats::default()),
        }
    }

    /// Replaces the random source, for instance with a deterministic one in tests.
    pub fn with_rng<R: RngCore + Send + 'static>(self, rng: R) -> Self {
        *self.rng.lock() = Box::new(rng);
        self
    }

    /// Uses the given discipline registry for all future topology loads.
    pub fn with_registry(mut self, registry: DisciplineRegistry) -> Self {
        self.registry = registry;
        self
    }

    #[inline]
    pub fn options(&self) -> &EmulatorOptions {
        &self.options
    }

    /// The discipline registry consulted when hops are built or modified.
    #[inline]
    pub fn registry(&self) -> &DisciplineRegistry {
        &self.registry
    }

    #[inline]
    pub fn stats(&self) -> &Arc<EngineStats> {
        &self.stats
    }

    /// The active topology.
    pub fn topology(&self) -> Arc<Topology> {
        self.topology.load_full()
    }

    /// The wall-clock duration of a tick.
    #[inline]
    pub fn tick_duration(&self) -> std::time::Duration {
        self.clock.tick_duration()
    }

    /// The next tick the scheduler will drain.
    pub fn current_tick(&self) -> Tick {
        self.scheduler.lock().current()
    }

    /// Packets waiting in the calendar.
    pub fn queued(&self) -> usize {
        self.scheduler.lock().packets.len()
    }

    /// Payloads held in the pending cache.
    pub fn pending_cached(&self) -> usize {
        self.remote.lock().cached()
    }

    /// Validates and builds a new topology, then swaps it in. On error the active topology is
    /// left untouched. Packets in flight finish on the topology they started on.
    ///
    /// Returns the generation of the new topology.
    pub fn load_topology(&self, builder: TopologyBuilder) -> Result<u64, ConfigError> {
        let _guard = self.reconfigure.lock();

        let generation = self.topology.load().generation() + 1;
        let builder = match self.options.get_local_core() {
            Some(core) => builder.localize(core),
            None => builder,
        };

        let topology = builder.build(generation, self.options.get_hz(), &self.registry)?;
        info!(
            generation,
            hops = topology.hops().len(),
            nodes = topology.paths().nodes(),
            "Loaded topology"
        );

        self.topology.store(Arc::new(topology));
        Ok(generation)
    }

    /// Loads a topology from binary hop, path and node tables.
    pub fn load_tables(&self, hops: Bytes, paths: Bytes, nodes: Bytes) -> Result<u64, ConfigError> {
        self.load_topology(TopologyBuilder::from_tables(hops, paths, nodes)?)
    }

    /// Changes the bandwidth, delay, loss, owner and discipline of a hop in place. The queue
    /// capacity of a hop never changes after it is built.
    pub fn modify_hop(&self, id: HopId, record: &HopRecord) -> Result<(), ConfigError> {
        let _guard = self.reconfigure.lock();

        let topology = self.topology.load();
        let hop = topology.hop(id).ok_or(ConfigError::NoSuchHop(id.index() as u32))?;

        let mut settings = HopSettings::from_record(record, self.options.get_hz());
        if settings.owner.is_some() && settings.owner == self.options.get_local_core() {
            settings.owner = None;
        }

        let mut state = hop.lock();
        settings.capacity = state.settings.capacity;

        if settings.is_local() && settings.is_bandwidth_limited() && state.queue.capacity() == 0 {
            return Err(ConfigError::ZeroQueue(id.index() as u32));
        }

        if settings.discipline != state.settings.discipline
            || settings.is_local() != state.settings.is_local()
        {
            let installed =
                if settings.is_local() { self.registry.install(id, &settings)? } else { None };

            if let Some(mut old) = mem::replace(&mut state.discipline, installed) {
                old.free(id);
            }
        }

        debug!(%id, ?settings, "Modified hop");
        state.settings = settings;

        Ok(())
    }

    /// The statistics of every hop of the active topology, in hop order.
    pub fn hop_stats(&self) -> Vec<StatsRecord> {
        self.topology.load().hops().iter().map(|hop| hop.stats()).collect()
    }

    /// The statistics of every hop as a binary record table.
    pub fn hop_stats_table(&self) -> Bytes {
        records::encode_table(&self.hop_stats(), StatsRecord::encode)
    }

    /// Offers a packet from the host stack to the engine.
    pub fn intercept(&self, packet: Bytes) -> Intercept {
        self.stats.increment_seen();

        let subnet = self.options.get_subnet();
        let header = match ip::parse(&packet) {
            Some(header) if subnet.contains(header.dst) => header,
            _ => {
                self.stats.increment_refused();
                return Intercept::Refused(packet);
            }
        };

        self.stats.increment_accepted();

        let (src, dst, packet) = match subnet.normalize(header.src, header.dst) {
            Some((src, dst)) => (src, dst, ip::rewrite(packet, src, dst)),
            None => (header.src, header.dst, packet),
        };

        let topology = self.topology.load_full();
        let Some(path) = topology.lookup(src, dst).cloned() else {
            record_drop(&self.stats, DropReason::NoPath, src, dst);
            return Intercept::Consumed;
        };

        let mut packet = Packet::local(Cursor { topology, path }, src, dst, packet);
        packet.ttl = self.options.get_remote_ttl();

        self.run(|walker, now| {
            walker.run_due(now);
            walker.walk(packet, now);
        });

        Intercept::Consumed
    }

    /// Takes in a datagram received from the core at `from`.
    pub fn receive_remote(&self, datagram: Datagram, from: SocketAddr) {
        let descriptors = datagram.into_descriptors();
        self.stats.increment_remote_received(descriptors.len());

        let topology = self.topology.load_full();
        self.run(|walker, now| {
            walker.run_due(now);

            for (descriptor, payload) in descriptors {
                if let Err(reason) = self.resume_remote(walker, &topology, descriptor, payload, now)
                {
                    debug!(%from, "Dropping remote descriptor: {reason}");
                    record_drop(&self.stats, reason, descriptor.src, descriptor.dst);
                }
            }
        });
    }

    fn resume_remote(
        &self,
        walker: &mut Walker<'_>,
        topology: &Arc<Topology>,
        mut descriptor: RemoteDescriptor,
        payload: Option<Bytes>,
        now: Tick,
    ) -> Result<(), DropReason> {
        if descriptor.ttl <= 0 {
            return Err(ProtocolError::TtlExhausted.into());
        }
        descriptor.ttl -= 1;

        let path =
            topology.lookup(descriptor.src, descriptor.dst).cloned().ok_or(DropReason::NoPath)?;
        if descriptor.hop == 0 || descriptor.hop as usize > path.len() {
            return Err(ProtocolError::BadHop(descriptor.hop).into());
        }

        let home = topology.home_of(&path);
        let cursor = Cursor { topology: Arc::clone(topology), path };

        if home.is_none() && descriptor.is_cached() {
            let mut packet = match self.remote.lock().reunite(&descriptor, now) {
                Ok(packet) => packet,
                Err(ProtocolError::UnknownHandle(handle)) => {
                    error!(handle, "Returning descriptor has an unknown cache handle");
                    return Err(DropReason::Fatal("unknown cache handle"));
                }
                Err(e) => return Err(e.into()),
            };

            packet.cursor = cursor;
            packet.hop = descriptor.hop as usize;
            packet.wait = descriptor.wait;
            packet.ttl = descriptor.ttl;
            packet.phase = Phase::AtHop;

            walker.walk(packet, now);
            return Ok(());
        }

        let payload = match (payload, CacheHandle::new(descriptor.handle)) {
            (Some(bytes), _) => Payload::Local(bytes),
            (None, Some(handle)) => Payload::CachedAwaitingReturn(handle),
            (None, None) => return Err(ProtocolError::MissingPayload.into()),
        };

        let home = home.map(|core| self.address_of(core));
        walker.walk(Packet::remote(&descriptor, cursor, home, payload), now);

        Ok(())
    }

    #[inline]
    fn address_of(&self, core: Ipv4Addr) -> SocketAddr {
        SocketAddr::new(core.into(), self.options.get_remote_port())
    }

    /// Moves virtual time forward to the clock: drains every due calendar bucket, then flushes
    /// aggregation buffers and expires the pending cache when their periods are up.
    ///
    /// Returns the tick the engine advanced to.
    pub fn advance(&self) -> Tick {
        self.run(|walker, now| {
            let behind = now.saturating_sub(walker.scheduler.current());
            if behind > 1 {
                self.stats.increment_missed_ticks(behind - 1);
            }

            walker.run_due(now);

            let scheduler = &mut *walker.scheduler;
            if now - scheduler.last_flush >= self.options.get_aggregate_flush_ticks() {
                scheduler.last_flush = now;
                self.remote.lock().flush_aggregates();
            }

            if now - scheduler.last_maintenance >= self.options.get_maintenance_ticks() {
                scheduler.last_maintenance = now;
                let expired = self.remote.lock().expire(now);
                if expired > 0 {
                    debug!(expired, now, "Expired pending cache entries");
                    self.stats.increment_remote_expired(expired);
                }
            }

            now
        })
    }

    /// Flushes every aggregation buffer right away.
    pub fn flush(&self) {
        self.remote.lock().flush_aggregates();
    }

    /// Takes the datagrams waiting to be sent to other cores.
    pub fn take_outbound(&self) -> Vec<(Datagram, SocketAddr)> {
        let outbound = self.remote.lock().take_outbound();
        let descriptors = outbound.iter().map(|(datagram, _)| datagram.descriptor_count()).sum();
        self.stats.increment_remote_sent(descriptors);

        outbound
    }

    /// Runs `f` with the scheduler locked, after catching up with the clock. Packets released
    /// along the way are handed to the host once the lock is dropped.
    fn run<T>(&self, f: impl FnOnce(&mut Walker<'_>, Tick) -> T) -> T {
        let mut released = Vec::new();

        let result = {
            let mut scheduler = self.scheduler.lock();
            let now = self.clock.now().max(scheduler.current());

            let mut walker = Walker {
                mode: self.options.get_schedule_mode(),
                stats: &self.stats,
                remote: &self.remote,
                rng: &self.rng,
                scheduler: &mut *scheduler,
                released: &mut released,
            };

            let result = f(&mut walker, now);
            self.stats.set_queued(scheduler.packets.len());
            result
        };

        self.stats.set_pcache_occupancy(self.remote.lock().cached());

        for (packet, tick) in released {
            self.host.reinject(packet, tick);
        }

        result
    }
}
