use std::{
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::trace;

use mnet_common::Tick;

/// The host IP stack packets are released to once they reach the end of their path.
pub trait HostStack: Send + Sync + 'static {
    /// Hands a fully emulated packet back to the host for delivery. `tick` is the virtual time
    /// of the release.
    fn reinject(&self, packet: Bytes, tick: Tick);
}

impl<F> HostStack for F
where
    F: Fn(Bytes, Tick) + Send + Sync + 'static,
{
    fn reinject(&self, packet: Bytes, tick: Tick) {
        self(packet, tick)
    }
}

/// A [`HostStack`] that forwards released packets over a channel.
#[derive(Debug, Clone)]
pub struct ChannelHost {
    tx: mpsc::UnboundedSender<(Bytes, Tick)>,
}

impl ChannelHost {
    /// Creates a new host together with the stream of packets released to it.
    pub fn new() -> (Self, Released) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, Released { inner: UnboundedReceiverStream::new(rx) })
    }
}

impl HostStack for ChannelHost {
    fn reinject(&self, packet: Bytes, tick: Tick) {
        if self.tx.send((packet, tick)).is_err() {
            trace!(tick, "Released packet dropped, receiver is gone");
        }
    }
}

/// Packets released to a [`ChannelHost`], with the tick they were released at.
#[derive(Debug)]
pub struct Released {
    inner: UnboundedReceiverStream<(Bytes, Tick)>,
}

impl Released {
    /// Returns the next released packet if one is ready, without waiting.
    pub fn try_next(&mut self) -> Option<(Bytes, Tick)> {
        self.inner.as_mut().try_recv().ok()
    }

    /// Collects every packet released so far.
    pub fn drain(&mut self) -> Vec<(Bytes, Tick)> {
        std::iter::from_fn(|| self.try_next()).collect()
    }
}

impl Stream for Released {
    type Item = (Bytes, Tick);

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}
