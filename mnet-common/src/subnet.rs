use std::net::Ipv4Addr;

/// The virtual address space that emulated endpoints live in.
///
/// Endpoints are addressed inside a private prefix (`10.0.0.0/8` by default). The low 16 bits of
/// an address select the virtual node. A destination carrying the force bit asks the emulator to
/// route the packet through the virtual topology even when both endpoints sit on the same host:
/// the bit is moved from the destination onto the source so replies travel back the same way.
///
/// ```text
///   10.0.1.7 -> 10.128.2.9      (force bit set on the destination)
///   10.128.1.7 -> 10.0.2.9      (after normalization)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualSubnet {
    network: u32,
    mask: u32,
    force_bit: u32,
}

impl Default for VirtualSubnet {
    fn default() -> Self {
        Self::new(Ipv4Addr::new(10, 0, 0, 0), 8)
    }
}

impl VirtualSubnet {
    /// The bit that marks a forced route, in host byte order.
    pub const FORCE_BIT: u32 = 0x0080_0000;
    /// Mask selecting the node bits of an address.
    pub const NODE_MASK: u32 = 0xffff;

    /// Creates a new virtual subnet from a network address and prefix length.
    pub fn new(network: Ipv4Addr, prefix_len: u8) -> Self {
        let mask = match prefix_len.min(32) {
            0 => 0,
            len => u32::MAX << (32 - len as u32),
        };

        Self { network: u32::from(network) & mask, mask, force_bit: Self::FORCE_BIT }
    }

    /// Returns `true` if the address belongs to the virtual subnet.
    #[inline]
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & self.mask == self.network
    }

    /// Returns the node bits of the address, used to look up its node id.
    #[inline]
    pub fn node_bits(addr: Ipv4Addr) -> u16 {
        (u32::from(addr) & Self::NODE_MASK) as u16
    }

    /// Moves the force bit from the destination onto the source. Returns `None` if the
    /// destination does not carry it.
    pub fn normalize(&self, src: Ipv4Addr, dst: Ipv4Addr) -> Option<(Ipv4Addr, Ipv4Addr)> {
        let (src, dst) = (u32::from(src), u32::from(dst));
        if dst & self.force_bit == 0 {
            return None;
        }

        Some(((src | self.force_bit).into(), (dst & !self.force_bit).into()))
    }
}
