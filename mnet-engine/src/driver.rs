use std::{
    collections::VecDeque,
    future::Future,
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::{SinkExt, StreamExt};
use tokio::time::Interval;
use tracing::{debug, warn};

use crate::{EmulatorError, Engine};
use mnet_transport::Transport;
use mnet_wire::remote::Datagram;

/// Runs the tick loop of an [`Engine`] and moves datagrams between it and the transport.
pub(crate) struct EmulatorDriver<T: Transport> {
    /// The engine, shared with the [`Emulator`](crate::Emulator) front-end.
    pub(crate) engine: Arc<Engine>,
    /// The transport to the other cores.
    pub(crate) transport: T,
    /// Fires once per scheduler tick.
    pub(crate) tick: Interval,
    /// Datagrams waiting for the transport.
    pub(crate) egress: VecDeque<(Datagram, SocketAddr)>,
    pub(crate) should_flush: bool,
}

impl<T: Transport> EmulatorDriver<T> {
    /// Writes as much of the egress queue as the transport accepts. Send errors only cost the
    /// datagram at hand.
    fn poll_egress(&mut self, cx: &mut Context<'_>) {
        while !self.egress.is_empty() {
            match self.transport.poll_ready_unpin(cx) {
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(e)) => {
                    warn!("Transport not ready: {e}");
                    self.engine.stats().increment_remote_errors();
                    self.egress.clear();
                    break;
                }
                Poll::Pending => break,
            }

            let Some((datagram, to)) = self.egress.pop_front() else { break };
            if let Err(e) = self.transport.start_send_unpin((datagram, to)) {
                debug!(%to, "Failed to send datagram: {e}");
                self.engine.stats().increment_remote_errors();
            }
            self.should_flush = true;
        }

        if self.should_flush {
            match self.transport.poll_flush_unpin(cx) {
                Poll::Ready(Ok(())) => self.should_flush = false,
                Poll::Ready(Err(e)) => {
                    debug!("Failed to flush transport: {e}");
                    self.engine.stats().increment_remote_errors();
                    self.should_flush = false;
                }
                Poll::Pending => {}
            }
        }
    }
}

impl<T: Transport> Future for EmulatorDriver<T> {
    type Output = Result<(), EmulatorError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        loop {
            this.poll_egress(cx);

            if this.tick.poll_tick(cx).is_ready() {
                this.engine.advance();
                this.egress.extend(this.engine.take_outbound());

                continue;
            }

            match this.transport.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok((datagram, from)))) => {
                    this.engine.receive_remote(datagram, from);
                    this.egress.extend(this.engine.take_outbound());

                    continue;
                }
                Poll::Ready(Some(Err(e))) if e.is_recoverable() => {
                    debug!("Dropping malformed datagram: {e}");
                    this.engine.stats().increment_remote_errors();

                    continue;
                }
                Poll::Ready(Some(Err(e))) => {
                    warn!("Transport failed: {e}");
                    return Poll::Ready(Err(e.into()));
                }
                Poll::Ready(None) => {
                    debug!("Transport closed, stopping driver");
                    return Poll::Ready(Ok(()));
                }
                Poll::Pending => {}
            }

            return Poll::Pending;
        }
    }
}
