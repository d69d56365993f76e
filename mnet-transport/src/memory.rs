use std::{
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use bytes::BytesMut;
use futures::{Sink, Stream};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::trace;

use crate::{Error, Transport};
use mnet_wire::remote::Datagram;

type Inbox = mpsc::UnboundedSender<(Datagram, SocketAddr)>;

/// An in-process network of emulator cores. Datagrams still go through the wire codec, so
/// everything a real network would reject is rejected here too.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    peers: Arc<Mutex<FxHashMap<SocketAddr, Inbox>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new unbound endpoint on this network.
    pub fn endpoint(&self) -> Memory {
        Memory { network: self.clone(), addr: None, inbox: None }
    }

    /// Removes a peer from the network. Datagrams sent to it are lost from now on.
    pub fn disconnect(&self, addr: &SocketAddr) {
        self.peers.lock().remove(addr);
    }

    fn deliver(&self, from: SocketAddr, to: SocketAddr, datagram: Datagram) -> Result<(), Error> {
        // Encode and decode so that the codec limits apply to in-process traffic as well.
        let mut buf = BytesMut::new();
        datagram.encode(&mut buf)?;
        let datagram = Datagram::decode(buf.freeze())?;

        let peers = self.peers.lock();
        match peers.get(&to) {
            Some(inbox) if inbox.send((datagram, from)).is_ok() => {}
            _ => trace!(%from, %to, "Datagram to unknown peer lost"),
        }

        Ok(())
    }
}

/// A single endpoint on a [`MemoryNetwork`].
#[derive(Debug)]
pub struct Memory {
    network: MemoryNetwork,
    addr: Option<SocketAddr>,
    inbox: Option<UnboundedReceiverStream<(Datagram, SocketAddr)>>,
}

impl Drop for Memory {
    fn drop(&mut self) {
        if let Some(addr) = self.addr {
            self.network.disconnect(&addr);
        }
    }
}

#[async_trait::async_trait]
impl Transport for Memory {
    fn local_addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    async fn bind(&mut self, addr: SocketAddr) -> Result<(), Error> {
        let mut peers = self.network.peers.lock();
        if peers.contains_key(&addr) {
            return Err(Error::AddrInUse(addr));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        peers.insert(addr, tx);

        self.addr = Some(addr);
        self.inbox = Some(UnboundedReceiverStream::new(rx));

        Ok(())
    }
}

impl Stream for Memory {
    type Item = Result<(Datagram, SocketAddr), Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let Some(inbox) = self.get_mut().inbox.as_mut() else {
            return Poll::Ready(Some(Err(Error::NotBound)));
        };

        Pin::new(inbox).poll_next(cx).map(|item| item.map(Ok))
    }
}

impl Sink<(Datagram, SocketAddr)> for Memory {
    type Error = Error;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if self.addr.is_none() {
            return Poll::Ready(Err(Error::NotBound));
        }

        Poll::Ready(Ok(()))
    }

    fn start_send(
        self: Pin<&mut Self>,
        (datagram, to): (Datagram, SocketAddr),
    ) -> Result<(), Self::Error> {
        let from = self.addr.ok_or(Error::NotBound)?;
        self.network.deliver(from, to, datagram)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use futures::{SinkExt, StreamExt};
    use mnet_wire::remote::RemoteDescriptor;

    use super::*;

    fn digest(handle: u64) -> Datagram {
        Datagram::Digest(vec![RemoteDescriptor {
            handle,
            expire: 100,
            len: 64,
            wait: 0,
            src: Ipv4Addr::new(10, 0, 0, 1),
            dst: Ipv4Addr::new(10, 0, 0, 2),
            hop: 1,
            ttl: 40,
        }])
    }

    #[tokio::test]
    async fn memory_exchange() {
        let network = MemoryNetwork::new();
        let a_addr: SocketAddr = "192.168.0.1:5347".parse().unwrap();
        let b_addr: SocketAddr = "192.168.0.2:5347".parse().unwrap();

        let mut a = network.endpoint();
        let mut b = network.endpoint();
        a.bind(a_addr).await.unwrap();
        b.bind(b_addr).await.unwrap();

        a.send((digest(1), b_addr)).await.unwrap();
        a.send((digest(2), b_addr)).await.unwrap();

        assert_eq!(b.next().await.unwrap().unwrap(), (digest(1), a_addr));
        assert_eq!(b.next().await.unwrap().unwrap(), (digest(2), a_addr));
    }

    #[tokio::test]
    async fn address_reuse_and_unknown_peers() {
        let network = MemoryNetwork::new();
        let addr: SocketAddr = "192.168.0.1:5347".parse().unwrap();

        let mut a = network.endpoint();
        a.bind(addr).await.unwrap();

        let mut dup = network.endpoint();
        assert!(matches!(dup.bind(addr).await, Err(Error::AddrInUse(_))));

        // Lost, like UDP.
        a.send((digest(1), "192.168.0.9:5347".parse().unwrap())).await.unwrap();

        drop(a);
        let mut again = network.endpoint();
        again.bind(addr).await.unwrap();
    }

    #[tokio::test]
    async fn codec_limits_apply() {
        let network = MemoryNetwork::new();
        let mut a = network.endpoint();
        a.bind("192.168.0.1:5347".parse().unwrap()).await.unwrap();

        let res = a.send((Datagram::Digest(vec![]), "192.168.0.2:5347".parse().unwrap())).await;
        assert!(matches!(res, Err(Error::Wire(mnet_wire::Error::Count(0)))));
    }
}
