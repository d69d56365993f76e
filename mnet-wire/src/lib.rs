#![doc(issue_tracker_base_url = "https://github.com/chainbound/msg-rs/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub mod checksum;
pub mod records;
pub mod remote;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid wire ID: {0:#04x}")]
    WireId(u8),
    #[error("Invalid datagram kind: {0}")]
    Kind(u8),
    #[error("Length mismatch: header says {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
    #[error("Checksum mismatch: expected {expected:#06x}, computed {actual:#06x}")]
    Checksum { expected: u16, actual: u16 },
    #[error("Invalid descriptor count: {0}")]
    Count(usize),
    #[error("Datagram too large: {0} bytes")]
    TooLarge(usize),
    #[error("Truncated {what}: need {need} bytes, have {have}")]
    Truncated { what: &'static str, need: usize, have: usize },
    #[error("Record table of {len} bytes is not a multiple of the {record} byte record size")]
    RecordSize { len: usize, record: usize },
}

/// Lets [`tokio_util::udp::UdpFramed`] surface socket errors through the codec error type.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("IO error: {0:?}")]
    Io(#[from] std::io::Error),
    #[error("Wire protocol error: {0}")]
    Wire(#[from] Error),
}
