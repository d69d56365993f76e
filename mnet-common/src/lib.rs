#![doc(issue_tracker_base_url = "https://github.com/chainbound/msg-rs/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod clock;
pub use clock::{Clock, ManualClock, MonotonicClock};

mod subnet;
pub use subnet::VirtualSubnet;

/// A discrete unit of virtual time. Tick 0 is the moment the emulator clock started.
pub type Tick = u64;

#[allow(non_upper_case_globals)]
pub mod constants {
    pub const KiB: u32 = 1024;
    pub const MiB: u32 = 1024 * KiB;

    /// Well-known UDP port of the remote forwarding service.
    pub const REMOTE_PORT: u16 = 5347;
    /// Maximum transmission unit between emulator cores.
    pub const MTU: usize = 1500;
    /// Bytes of IPv4 + UDP header that the MTU has to accommodate.
    pub const UDP_IP_HEADER_LEN: usize = 28;
    /// Default scheduler tick rate.
    pub const DEFAULT_HZ: u32 = 1000;
}
