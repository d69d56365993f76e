use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Engine-wide counters. Shared between the engine, the driver task and the front-end.
#[derive(Debug, Default)]
pub struct EngineStats {
    /// Packets offered by the host stack.
    seen: AtomicU64,
    /// Packets taken over by the engine.
    accepted: AtomicU64,
    /// Packets handed back to the host because they are not virtual.
    refused: AtomicU64,
    /// Packets released to the host at the end of their path.
    released: AtomicU64,
    loss_drops: AtomicU64,
    queue_drops: AtomicU64,
    no_path: AtomicU64,
    /// Packets dropped for any other reason, including invariant violations.
    errors: AtomicU64,
    /// Descriptors sent to other cores.
    remote_sent: AtomicU64,
    /// Descriptors received from other cores.
    remote_received: AtomicU64,
    remote_expired: AtomicU64,
    remote_ttl_drops: AtomicU64,
    /// Protocol errors and failed sends on the remote channel.
    remote_errors: AtomicU64,
    /// Payloads currently in the pending cache.
    pcache_occupancy: AtomicUsize,
    /// Packets currently waiting in the calendar.
    queued: AtomicUsize,
    /// Ticks that had to be caught up because the driver fell behind.
    missed_ticks: AtomicU64,
    /// Hop crossings whose bandwidth service time rounded to zero ticks.
    zero_service: AtomicU64,
    /// Calendar entries scheduled beyond the horizon.
    aliased: AtomicU64,
}

impl EngineStats {
    #[inline]
    pub(crate) fn increment_seen(&self) {
        self.seen.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_refused(&self) {
        self.refused.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_released(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_loss_drops(&self) {
        self.loss_drops.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_queue_drops(&self) {
        self.queue_drops.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_no_path(&self) {
        self.no_path.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_remote_sent(&self, descriptors: usize) {
        self.remote_sent.fetch_add(descriptors as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_remote_received(&self, descriptors: usize) {
        self.remote_received.fetch_add(descriptors as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_remote_expired(&self, entries: usize) {
        self.remote_expired.fetch_add(entries as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_remote_ttl_drops(&self) {
        self.remote_ttl_drops.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_remote_errors(&self) {
        self.remote_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn set_pcache_occupancy(&self, entries: usize) {
        self.pcache_occupancy.store(entries, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn set_queued(&self, packets: usize) {
        self.queued.store(packets, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_missed_ticks(&self, ticks: u64) {
        self.missed_ticks.fetch_add(ticks, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_zero_service(&self) {
        self.zero_service.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_aliased(&self) {
        self.aliased.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn seen(&self) -> u64 {
        self.seen.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn refused(&self) -> u64 {
        self.refused.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn loss_drops(&self) -> u64 {
        self.loss_drops.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn queue_drops(&self) -> u64 {
        self.queue_drops.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn no_path(&self) -> u64 {
        self.no_path.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn remote_sent(&self) -> u64 {
        self.remote_sent.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn remote_received(&self) -> u64 {
        self.remote_received.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn remote_expired(&self) -> u64 {
        self.remote_expired.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn remote_ttl_drops(&self) -> u64 {
        self.remote_ttl_drops.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn remote_errors(&self) -> u64 {
        self.remote_errors.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn pcache_occupancy(&self) -> usize {
        self.pcache_occupancy.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn missed_ticks(&self) -> u64 {
        self.missed_ticks.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn zero_service(&self) -> u64 {
        self.zero_service.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn aliased(&self) -> u64 {
        self.aliased.load(Ordering::Relaxed)
    }
}
