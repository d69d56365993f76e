use std::net::Ipv4Addr;

use mnet_common::{
    constants::{DEFAULT_HZ, REMOTE_PORT},
    Tick, VirtualSubnet,
};

/// The default number of calendar bits, a ring of 16384 buckets.
const DEFAULT_CALENDAR_BITS: u8 = 14;

/// How the delay of a hop is scheduled relative to its bandwidth queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScheduleMode {
    /// A single calendar entry at `exit + delay`. The discipline's dequeue hook runs when the
    /// packet wakes up at the end of the hop.
    #[default]
    Unified,
    /// One calendar entry at the bandwidth exit, where the dequeue hook runs, and a second one
    /// after the delay.
    Split,
}

#[derive(Debug, Clone)]
pub struct EmulatorOptions {
    /// Scheduler ticks per second.
    hz: u32,
    /// The calendar has `2^calendar_bits` buckets, which is also its horizon in ticks.
    calendar_bits: u8,
    /// Only packets destined to this subnet are emulated.
    subnet: VirtualSubnet,
    /// UDP port of the remote forwarding service on every core.
    remote_port: u16,
    /// The address of this core. Hops owned by this address are emulated locally.
    local_core: Option<Ipv4Addr>,
    /// Number of cores a packet may traverse before it is dropped.
    remote_ttl: i8,
    /// Ticks a cached payload is kept while its control state is away. `None` means one second.
    remote_expire: Option<Tick>,
    /// Keep payloads at home and send only descriptors to other cores.
    pcache: bool,
    /// Maximum number of payloads held in the pending cache.
    pcache_capacity: usize,
    /// Pack descriptors for the same core into a single digest datagram.
    aggregate: bool,
    /// Ticks between flushes of the aggregation buffers.
    aggregate_flush_ticks: Tick,
    /// Ticks between pending cache expiry runs.
    maintenance_ticks: Tick,
    /// Maximum number of cores with a pending aggregation buffer.
    max_cores: usize,
    schedule_mode: ScheduleMode,
    /// Seed for the random source. `None` seeds from the operating system.
    seed: Option<u64>,
}

impl Default for EmulatorOptions {
    fn default() -> Self {
        Self {
            hz: DEFAULT_HZ,
            calendar_bits: DEFAULT_CALENDAR_BITS,
            subnet: VirtualSubnet::default(),
            remote_port: REMOTE_PORT,
            local_core: None,
            remote_ttl: 40,
            remote_expire: None,
            pcache: true,
            pcache_capacity: 65536,
            aggregate: true,
            aggregate_flush_ticks: 1,
            maintenance_ticks: 100,
            max_cores: 32,
            schedule_mode: ScheduleMode::Unified,
            seed: None,
        }
    }
}

impl EmulatorOptions {
    /// Sets the number of scheduler ticks per second.
    pub fn hz(mut self, hz: u32) -> Self {
        self.hz = hz.max(1);
        self
    }

    /// Sets the calendar size to `2^bits` buckets. Waits longer than that many ticks alias onto
    /// an earlier bucket.
    pub fn calendar_bits(mut self, bits: u8) -> Self {
        self.calendar_bits = bits.min(24);
        self
    }

    /// Sets the virtual subnet.
    pub fn subnet(mut self, subnet: VirtualSubnet) -> Self {
        self.subnet = subnet;
        self
    }

    /// Sets the UDP port of the remote forwarding service.
    pub fn remote_port(mut self, port: u16) -> Self {
        self.remote_port = port;
        self
    }

    /// Sets the address of this core. Hops whose owner is this address are emulated locally,
    /// so every core can load the same tables.
    pub fn local_core(mut self, addr: Ipv4Addr) -> Self {
        self.local_core = Some(addr);
        self
    }

    /// Sets the number of cores a packet may traverse.
    pub fn remote_ttl(mut self, ttl: i8) -> Self {
        self.remote_ttl = ttl;
        self
    }

    /// Sets how many ticks a cached payload is kept while its control state is away.
    pub fn remote_expire(mut self, ticks: Tick) -> Self {
        self.remote_expire = Some(ticks);
        self
    }

    /// Enables or disables the pending cache. Without it, payloads travel with their
    /// descriptors.
    pub fn pcache(mut self, enabled: bool) -> Self {
        self.pcache = enabled;
        self
    }

    /// Sets the maximum number of payloads in the pending cache.
    pub fn pcache_capacity(mut self, capacity: usize) -> Self {
        self.pcache_capacity = capacity;
        self
    }

    /// Enables or disables descriptor aggregation.
    pub fn aggregate(mut self, enabled: bool) -> Self {
        self.aggregate = enabled;
        self
    }

    /// Sets the number of ticks between flushes of the aggregation buffers.
    pub fn aggregate_flush_ticks(mut self, ticks: Tick) -> Self {
        self.aggregate_flush_ticks = ticks.max(1);
        self
    }

    /// Sets the number of ticks between pending cache expiry runs.
    pub fn maintenance_ticks(mut self, ticks: Tick) -> Self {
        self.maintenance_ticks = ticks.max(1);
        self
    }

    /// Sets the maximum number of cores with a pending aggregation buffer.
    pub fn max_cores(mut self, max_cores: usize) -> Self {
        self.max_cores = max_cores;
        self
    }

    pub fn schedule_mode(mut self, mode: ScheduleMode) -> Self {
        self.schedule_mode = mode;
        self
    }

    /// Seeds the random source, making loss and rounding decisions reproducible.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    #[inline]
    pub fn get_hz(&self) -> u32 {
        self.hz
    }

    #[inline]
    pub fn get_calendar_bits(&self) -> u8 {
        self.calendar_bits
    }

    #[inline]
    pub fn get_subnet(&self) -> VirtualSubnet {
        self.subnet
    }

    #[inline]
    pub fn get_remote_port(&self) -> u16 {
        self.remote_port
    }

    #[inline]
    pub fn get_local_core(&self) -> Option<Ipv4Addr> {
        self.local_core
    }

    #[inline]
    pub fn get_remote_ttl(&self) -> i8 {
        self.remote_ttl
    }

    /// Ticks a cached payload is kept, one second worth of ticks unless configured.
    #[inline]
    pub fn get_remote_expire(&self) -> Tick {
        self.remote_expire.unwrap_or(self.hz as Tick)
    }

    #[inline]
    pub fn get_pcache(&self) -> bool {
        self.pcache
    }

    #[inline]
    pub fn get_pcache_capacity(&self) -> usize {
        self.pcache_capacity
    }

    #[inline]
    pub fn get_aggregate(&self) -> bool {
        self.aggregate
    }

    #[inline]
    pub fn get_aggregate_flush_ticks(&self) -> Tick {
        self.aggregate_flush_ticks
    }

    #[inline]
    pub fn get_maintenance_ticks(&self) -> Tick {
        self.maintenance_ticks
    }

    #[inline]
    pub fn get_max_cores(&self) -> usize {
        self.max_cores
    }

    #[inline]
    pub fn get_schedule_mode(&self) -> ScheduleMode {
        self.schedule_mode
    }

    #[inline]
    pub fn get_seed(&self) -> Option<u64> {
        self.seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = EmulatorOptions::default();
        assert_eq!(options.get_hz(), 1000);
        assert_eq!(options.get_calendar_bits(), 14);
        assert_eq!(options.get_remote_port(), 5347);
        assert_eq!(options.get_remote_ttl(), 40);
        assert_eq!(options.get_remote_expire(), 1000);
        assert_eq!(options.get_max_cores(), 32);
        assert_eq!(options.get_schedule_mode(), ScheduleMode::Unified);
        assert!(options.get_pcache());
        assert!(options.get_aggregate());
    }

    #[test]
    fn expiry_follows_the_tick_rate() {
        let options = EmulatorOptions::default().hz(250);
        assert_eq!(options.get_remote_expire(), 250);

        let options = options.remote_expire(17).calendar_bits(40);
        assert_eq!(options.get_remote_expire(), 17);
        assert_eq!(options.get_calendar_bits(), 24);
    }
}
