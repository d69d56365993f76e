use std::{collections::VecDeque, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, info_span, Instrument};

use crate::{
    driver::EmulatorDriver, EmulatorError, EmulatorOptions, Engine, EngineStats, HostStack,
    Intercept, TopologyBuilder,
};
use mnet_transport::Transport;

/// An emulator core: an [`Engine`] driven by a background task that ticks virtual time and
/// exchanges datagrams with the other cores over a [`Transport`].
///
/// ```no_run
/// use mnet_engine::{ChannelHost, Emulator};
/// use mnet_transport::udp::Udp;
///
/// # async fn run() -> Result<(), mnet_engine::EmulatorError> {
/// let (host, _released) = ChannelHost::new();
/// let mut emulator = Emulator::new(Udp::new(), host);
/// emulator.bind("0.0.0.0:5347".parse().unwrap()).await?;
/// # Ok(())
/// # }
/// ```
pub struct Emulator<T: Transport> {
    /// The engine, shared with the driver.
    engine: Arc<Engine>,
    /// The transport. Moved to the driver task once the emulator is bound.
    transport: Option<T>,
    local_addr: Option<SocketAddr>,
    driver: Option<JoinHandle<Result<(), EmulatorError>>>,
}

impl<T: Transport> std::fmt::Debug for Emulator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emulator")
            .field("engine", &self.engine)
            .field("local_addr", &self.local_addr)
            .field("running", &self.driver.is_some())
            .finish()
    }
}

impl<T: Transport> Emulator<T> {
    /// Creates a new emulator with the default [`EmulatorOptions`].
    pub fn new<H: HostStack>(transport: T, host: H) -> Self {
        Self::with_options(transport, EmulatorOptions::default(), host)
    }

    /// Creates a new emulator with the given options.
    pub fn with_options<H: HostStack>(transport: T, options: EmulatorOptions, host: H) -> Self {
        Self::with_engine(transport, Engine::new(options, host))
    }

    /// Creates a new emulator around an existing engine.
    pub fn with_engine(transport: T, engine: Engine) -> Self {
        Self { engine: Arc::new(engine), transport: Some(transport), local_addr: None, driver: None }
    }

    /// Binds the transport to the given address and spawns the driver task.
    pub async fn bind(&mut self, addr: SocketAddr) -> Result<(), EmulatorError> {
        let mut transport = self.transport.take().ok_or(EmulatorError::AlreadyBound)?;

        if let Err(e) = transport.bind(addr).await {
            self.transport = Some(transport);
            return Err(e.into());
        }

        let local_addr = transport.local_addr().unwrap_or(addr);
        self.local_addr = Some(local_addr);

        let mut tick = tokio::time::interval(self.engine.tick_duration());
        // The engine catches up with the clock by itself.
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let driver = EmulatorDriver {
            engine: Arc::clone(&self.engine),
            transport,
            tick,
            egress: VecDeque::new(),
            should_flush: false,
        };

        debug!(%local_addr, "Emulator bound, starting driver");
        self.driver = Some(tokio::spawn(driver.instrument(info_span!("emulator", %local_addr))));

        Ok(())
    }

    /// Offers a packet from the host stack. See [`Engine::intercept`].
    pub fn intercept(&self, packet: Bytes) -> Intercept {
        self.engine.intercept(packet)
    }

    /// Loads a new topology. See [`Engine::load_topology`].
    pub fn load_topology(&self, builder: TopologyBuilder) -> Result<u64, EmulatorError> {
        Ok(self.engine.load_topology(builder)?)
    }

    #[inline]
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    #[inline]
    pub fn stats(&self) -> &EngineStats {
        self.engine.stats()
    }

    /// Returns the address the emulator is bound to, if any.
    #[inline]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Returns `true` if the driver task has stopped, for instance because the transport failed.
    pub fn is_stopped(&self) -> bool {
        self.driver.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl<T: Transport> Drop for Emulator<T> {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}
