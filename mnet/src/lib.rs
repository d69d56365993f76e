#![doc(issue_tracker_base_url = "https://github.com/chainbound/msg-rs/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub use mnet_common::{constants, Clock, ManualClock, MonotonicClock, Tick, VirtualSubnet};
pub use mnet_engine::*;
pub use mnet_transport::{memory, udp, Transport};
pub use mnet_wire::{records, remote};
