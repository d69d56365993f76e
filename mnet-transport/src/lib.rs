#![doc(issue_tracker_base_url = "https://github.com/chainbound/msg-rs/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

use std::{io, net::SocketAddr};

use futures::{Sink, Stream};
use thiserror::Error;

use mnet_wire::{remote::Datagram, CodecError};

pub mod memory;
pub mod udp;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0:?}")]
    Io(#[from] io::Error),
    #[error("Wire protocol error: {0}")]
    Wire(#[from] mnet_wire::Error),
    #[error("Transport is not bound")]
    NotBound,
    #[error("Address already in use: {0}")]
    AddrInUse(SocketAddr),
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Io(e) => Self::Io(e),
            CodecError::Wire(e) => Self::Wire(e),
        }
    }
}

impl Error {
    /// Returns `true` if the error only affects a single datagram and the transport can keep
    /// being used.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Wire(_))
    }
}

/// A connectionless transport between emulator cores.
///
/// A transport is a stream of received datagrams tagged with their sender and a sink of
/// datagrams tagged with their destination. Delivery is best effort, exactly like UDP: a
/// datagram to an unknown or unreachable peer is silently lost.
#[async_trait::async_trait]
pub trait Transport:
    Stream<Item = Result<(Datagram, SocketAddr), Error>>
    + Sink<(Datagram, SocketAddr), Error = Error>
    + Send
    + Unpin
    + 'static
{
    /// Returns the local address this transport is bound to, if any.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Binds the transport to the given address.
    async fn bind(&mut self, addr: SocketAddr) -> Result<(), Error>;
}
