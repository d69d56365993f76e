//! The pending cache: packets whose control state is away at other cores while their payload
//! waits here, at home.
use std::collections::BTreeSet;

use rustc_hash::FxHashMap;

use crate::{packet::CacheHandle, Packet, ProtocolError};
use mnet_common::Tick;
use mnet_wire::remote::RemoteDescriptor;

#[derive(Debug)]
struct Entry {
    packet: Packet,
    expire: Tick,
}

#[derive(Debug)]
pub(crate) struct PendingCache {
    entries: FxHashMap<u64, Entry>,
    /// Entries ordered by expiry tick, for maintenance.
    by_expiry: BTreeSet<(Tick, u64)>,
    /// The last handle given out.
    last: u64,
    capacity: usize,
}

impl PendingCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self { entries: FxHashMap::default(), by_expiry: BTreeSet::new(), last: 0, capacity }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Caches `packet` until `expire` and returns the descriptor to send in its place. Gives the
    /// packet back if the cache is full.
    pub(crate) fn insert(
        &mut self,
        mut packet: Packet,
        expire: Tick,
    ) -> Result<RemoteDescriptor, Packet> {
        if self.entries.len() >= self.capacity {
            return Err(packet);
        }

        let handle = self.next_handle();
        packet.handle = Some(handle);
        packet.expire = expire;
        let descriptor = packet.descriptor();

        self.by_expiry.insert((expire, handle.get()));
        self.entries.insert(handle.get(), Entry { packet, expire });

        Ok(descriptor)
    }

    fn next_handle(&mut self) -> CacheHandle {
        loop {
            self.last = self.last.wrapping_add(1);
            if let Some(handle) = CacheHandle::new(self.last) {
                if !self.entries.contains_key(&handle.get()) {
                    return handle;
                }
            }
        }
    }

    /// Takes the cached packet matching a returning descriptor.
    ///
    /// An expired descriptor is refused even if its entry is still cached; the entry is left for
    /// [`Self::expire`] so it is counted exactly once.
    pub(crate) fn reunite(
        &mut self,
        descriptor: &RemoteDescriptor,
        now: Tick,
    ) -> Result<Packet, ProtocolError> {
        let handle = descriptor.handle;
        if descriptor.expire <= now {
            return Err(ProtocolError::Expired(handle));
        }

        if descriptor.hop == 0 {
            return Err(ProtocolError::BadHop(0));
        }

        let entry = self.entries.get(&handle).ok_or(ProtocolError::UnknownHandle(handle))?;
        let packet = &entry.packet;
        if entry.expire != descriptor.expire
            || packet.src != descriptor.src
            || packet.dst != descriptor.dst
            || packet.len != descriptor.len
        {
            return Err(ProtocolError::Mismatch(handle));
        }

        let entry = self.entries.remove(&handle).ok_or(ProtocolError::UnknownHandle(handle))?;
        self.by_expiry.remove(&(entry.expire, handle));

        Ok(entry.packet)
    }

    /// Drops every entry that expired at or before `now`. Returns the number of entries dropped.
    pub(crate) fn expire(&mut self, now: Tick) -> usize {
        let mut expired = 0;
        while let Some(&(expire, handle)) = self.by_expiry.first() {
            if expire > now {
                break;
            }

            self.by_expiry.pop_first();
            if self.entries.remove(&handle).is_some() {
                expired += 1;
            }
        }

        expired
    }
}
