use std::{fmt, sync::Arc};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::{hop::HopSettings, ConfigError, HopId, Packet};
use mnet_common::Tick;

/// Selects the discipline of a hop. [`DisciplineId::NONE`] installs nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DisciplineId(pub u32);

impl DisciplineId {
    pub const NONE: Self = Self(0);

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// What a discipline hook gets to see of its hop.
#[derive(Debug)]
pub struct DisciplineCtx<'a> {
    /// The hop the discipline is installed on.
    pub hop: HopId,
    /// The current tick.
    pub now: Tick,
    /// The settings of the hop.
    pub settings: &'a HopSettings,
    /// Packets currently in the bandwidth queue.
    pub occupied: usize,
    /// Bytes currently in the bandwidth queue.
    pub byte_depth: u64,
    pub(crate) timeout: Option<Tick>,
}

impl<'a> DisciplineCtx<'a> {
    pub(crate) const fn new(
        hop: HopId,
        now: Tick,
        settings: &'a HopSettings,
        occupied: usize,
        byte_depth: u64,
    ) -> Self {
        Self { hop, now, settings, occupied, byte_depth, timeout: None }
    }

    /// Requests a call to [`Discipline::timeout`] at the given tick. Only the last request made
    /// during a hook is kept.
    pub fn schedule_timeout(&mut self, at: Tick) {
        self.timeout = Some(at);
    }
}

/// A per-hop discipline, like a congestion signaling module. Disciplines observe packets and
/// may annotate them, but they never change the scheduling decisions of the hop.
///
/// All hooks run with the hop lock held and must not block.
pub trait Discipline: Send + 'static {
    /// Called when the discipline is installed on a hop.
    fn alloc(&mut self, _hop: HopId, _settings: &HopSettings) {}

    /// Called when the discipline is removed from a hop, either because the hop was modified or
    /// because the topology it belongs to was torn down.
    fn free(&mut self, _hop: HopId) {}

    /// Called after a packet was admitted to the hop.
    fn enqueue(&mut self, ctx: &mut DisciplineCtx<'_>, packet: &mut Packet);

    /// Called when a packet leaves the hop's bandwidth queue.
    fn dequeue(&mut self, ctx: &mut DisciplineCtx<'_>, packet: &mut Packet);

    /// Called when a timeout requested through [`DisciplineCtx::schedule_timeout`] fires.
    fn timeout(&mut self, _ctx: &mut DisciplineCtx<'_>) {}
}

type Factory = Arc<dyn Fn() -> Box<dyn Discipline> + Send + Sync>;

/// Registry of discipline factories, keyed by discipline id.
#[derive(Clone, Default)]
pub struct DisciplineRegistry {
    factories: Arc<RwLock<FxHashMap<DisciplineId, Factory>>>,
}

impl fmt::Debug for DisciplineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.factories.read().keys().map(|id| id.0).collect();
        ids.sort_unstable();
        f.debug_struct("DisciplineRegistry").field("ids", &ids).finish()
    }
}

impl DisciplineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a discipline factory. Replaces any previous factory with the same id.
    ///
    /// # Panics
    ///
    /// Panics if `id` is [`DisciplineId::NONE`].
    pub fn register<F, D>(&self, id: DisciplineId, factory: F)
    where
        F: Fn() -> D + Send + Sync + 'static,
        D: Discipline,
    {
        assert!(!id.is_none(), "discipline id 0 is reserved");
        self.factories.write().insert(id, Arc::new(move || Box::new(factory())));
    }

    /// Creates and allocates a discipline for the given hop.
    pub(crate) fn install(
        &self,
        hop: HopId,
        settings: &HopSettings,
    ) -> Result<Option<Box<dyn Discipline>>, ConfigError> {
        if settings.discipline.is_none() {
            return Ok(None);
        }

        let factory = self
            .factories
            .read()
            .get(&settings.discipline)
            .cloned()
            .ok_or(ConfigError::UnknownDiscipline(settings.discipline.0))?;

        let mut discipline = factory();
        discipline.alloc(hop, settings);

        Ok(Some(discipline))
    }

    /// Returns `true` if a factory is registered for `id`.
    pub fn contains(&self, id: DisciplineId) -> bool {
        id.is_none() || self.factories.read().contains_key(&id)
    }
}
