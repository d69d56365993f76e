use std::{
    net::SocketAddr,
    pin::Pin,
    task::{Context, Poll},
};

use futures::{Sink, Stream};
use tokio::net::UdpSocket;
use tokio_util::udp::UdpFramed;

use crate::{Error, Transport};
use mnet_wire::remote::{Codec, Datagram};

/// The UDP transport used between emulator cores on separate hosts.
#[derive(Debug, Default)]
pub struct Udp {
    framed: Option<UdpFramed<Codec>>,
}

impl Udp {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Transport for Udp {
    fn local_addr(&self) -> Option<SocketAddr> {
        self.framed.as_ref().and_then(|f| f.get_ref().local_addr().ok())
    }

    async fn bind(&mut self, addr: SocketAddr) -> Result<(), Error> {
        let socket = UdpSocket::bind(addr).await?;
        tracing::debug!(local = ?socket.local_addr().ok(), "Bound UDP transport");

        self.framed = Some(UdpFramed::new(socket, Codec::new()));

        Ok(())
    }
}

impl Stream for Udp {
    type Item = Result<(Datagram, SocketAddr), Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let Some(framed) = self.get_mut().framed.as_mut() else {
            return Poll::Ready(Some(Err(Error::NotBound)));
        };

        Pin::new(framed).poll_next(cx).map(|item| item.map(|res| res.map_err(Error::from)))
    }
}

impl Sink<(Datagram, SocketAddr)> for Udp {
    type Error = Error;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let Some(framed) = self.get_mut().framed.as_mut() else {
            return Poll::Ready(Err(Error::NotBound));
        };

        Pin::new(framed).poll_ready(cx).map_err(Error::from)
    }

    fn start_send(self: Pin<&mut Self>, item: (Datagram, SocketAddr)) -> Result<(), Self::Error> {
        let framed = self.get_mut().framed.as_mut().ok_or(Error::NotBound)?;
        Pin::new(framed).start_send(item).map_err(Error::from)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let Some(framed) = self.get_mut().framed.as_mut() else {
            return Poll::Ready(Err(Error::NotBound));
        };

        Pin::new(framed).poll_flush(cx).map_err(Error::from)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let Some(framed) = self.get_mut().framed.as_mut() else {
            return Poll::Ready(Ok(()));
        };

        Pin::new(framed).poll_close(cx).map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use bytes::Bytes;
    use futures::{SinkExt, StreamExt};
    use mnet_wire::remote::RemoteDescriptor;

    use super::*;

    #[tokio::test]
    async fn udp_exchange() {
        let _ = tracing_subscriber::fmt::try_init();

        let mut a = Udp::new();
        let mut b = Udp::new();
        a.bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        b.bind("127.0.0.1:0".parse().unwrap()).await.unwrap();

        let descriptor = RemoteDescriptor {
            handle: 0,
            expire: 0,
            len: 5,
            wait: 0,
            src: Ipv4Addr::new(10, 0, 0, 1),
            dst: Ipv4Addr::new(10, 0, 0, 2),
            hop: 1,
            ttl: 40,
        };
        let datagram = Datagram::Tunnel { descriptor, payload: Bytes::from_static(b"hello") };

        a.send((datagram.clone(), b.local_addr().unwrap())).await.unwrap();

        let (received, from) = b.next().await.unwrap().unwrap();
        assert_eq!(received, datagram);
        assert_eq!(from, a.local_addr().unwrap());
    }

    #[tokio::test]
    async fn garbage_is_a_recoverable_error() {
        let mut b = Udp::new();
        b.bind("127.0.0.1:0".parse().unwrap()).await.unwrap();

        let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        raw.send_to(b"definitely not a datagram", b.local_addr().unwrap()).await.unwrap();

        let err = b.next().await.unwrap().unwrap_err();
        assert!(err.is_recoverable());
    }
}
