#![doc(issue_tracker_base_url = "https://github.com/chainbound/msg-rs/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! The packet emulation engine.
//!
//! ```text
//!  host stack ──intercept──▶ Path Walker ──▶ Hop Emulator ──▶ Calendar Queue
//!      ▲                         │  ▲                              │
//!      │                   remote hop │ tick                       │
//!      │                         ▼  │                              │
//!      └──────reinject──── Remote Forwarding ◀──── transport ◀─────┘
//! ```
//!
//! The [`Engine`] is synchronous and can be driven by hand, which is what most tests do. The
//! [`Emulator`] wraps it with a tokio driver that runs the tick loop and moves datagrams between
//! the engine and a [`Transport`](mnet_transport::Transport).

use std::{io, net::Ipv4Addr};

use thiserror::Error;

mod aggregate;
mod calendar;
pub use calendar::{CalendarQueue, Scheduled};

mod discipline;
pub use discipline::{Discipline, DisciplineCtx, DisciplineId, DisciplineRegistry};

mod driver;

mod emulate;
pub use emulate::Admission;

mod emulator;
pub use emulator::Emulator;

mod engine;
pub use engine::{Engine, Intercept};

mod hop;
pub use hop::{Hop, HopId, HopSettings, QueueSnapshot};

mod host;
pub use host::{ChannelHost, HostStack, Released};

pub mod ip;

mod options;
pub use options::{EmulatorOptions, ScheduleMode};

mod packet;
pub use packet::{CacheHandle, Packet, Payload, Phase, QueueState};

mod path;
pub use path::{NodeId, Path, PathTable};

mod pcache;
mod remote;

mod stats;
pub use stats::EngineStats;

mod topology;
pub use topology::{Topology, TopologyBuilder};

mod walker;

/// Rejected configuration. The previously active topology stays in place.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Malformed record table: {0}")]
    Wire(#[from] mnet_wire::Error),
    #[error("Path {origin} -> {destination} references unknown hop {hop}")]
    UnknownHop { origin: u16, destination: u16, hop: u32 },
    #[error("Duplicate path {0} -> {1}")]
    DuplicatePath(u16, u16),
    #[error("Node bits of {0} are already mapped")]
    DuplicateNode(Ipv4Addr),
    #[error("Too many nodes: {0}")]
    TooManyNodes(usize),
    #[error("Hop {0} is bandwidth limited but has no queue slots")]
    ZeroQueue(u32),
    #[error("Unknown discipline: {0}")]
    UnknownDiscipline(u32),
    #[error("No such hop: {0}")]
    NoSuchHop(u32),
}

/// Why a packet left the engine without being released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DropReason {
    /// Random loss on a hop.
    #[error("Loss")]
    Loss,
    /// The bandwidth queue of a hop was full.
    #[error("Queue overflow")]
    QueueOverflow,
    /// The address pair has no path.
    #[error("No path")]
    NoPath,
    /// No room to hold the packet, like a full pending cache.
    #[error("Resource exhausted")]
    ResourceExhausted,
    /// The remote channel delivered something unusable.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// An invariant was violated. Indicates a bug elsewhere, the packet is dropped anyway.
    #[error("Invariant violated: {0}")]
    Fatal(&'static str),
}

/// Errors on the remote forwarding channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("TTL exhausted")]
    TtlExhausted,
    #[error("Unknown cache handle {0}")]
    UnknownHandle(u64),
    #[error("Cache entry {0} expired")]
    Expired(u64),
    #[error("Reunification fields of handle {0} do not match")]
    Mismatch(u64),
    #[error("Invalid hop index {0}")]
    BadHop(u32),
    #[error("Descriptor carries neither payload nor cache handle")]
    MissingPayload,
}

#[derive(Debug, Error)]
pub enum EmulatorError {
    #[error("IO error: {0:?}")]
    Io(#[from] io::Error),
    #[error("Transport error: {0}")]
    Transport(#[from] mnet_transport::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Emulator is already bound")]
    AlreadyBound,
}
