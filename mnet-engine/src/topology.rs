use std::net::Ipv4Addr;

use bytes::Bytes;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::{
    discipline::DisciplineRegistry,
    hop::{Hop, HopSettings},
    path::{NodeId, PathTable},
    ConfigError, HopId, Path,
};
use mnet_common::VirtualSubnet;
use mnet_wire::records::{self, HopRecord, NodeRecord, PathRecord};

/// Upper bound on the number of virtual nodes. The path table is dense, so its size grows with
/// the square of this.
pub const MAX_NODES: usize = 4096;

/// The hop arena and the path table built from one bulk load. Immutable apart from the hop
/// queues; replaced as a whole on reconfiguration.
#[derive(Debug, Default)]
pub struct Topology {
    generation: u64,
    hops: Vec<Hop>,
    paths: PathTable,
}

impl Topology {
    /// Monotonic counter of the bulk load this topology came from. The empty topology an engine
    /// starts with is generation 0.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub fn hop(&self, id: HopId) -> Option<&Hop> {
        self.hops.get(id.index())
    }

    #[inline]
    pub fn hops(&self) -> &[Hop] {
        &self.hops
    }

    #[inline]
    pub fn paths(&self) -> &PathTable {
        &self.paths
    }

    /// Resolves the path between two addresses.
    #[inline]
    pub fn lookup(&self, src: Ipv4Addr, dst: Ipv4Addr) -> Option<&Path> {
        self.paths.lookup(src, dst)
    }

    /// The owner of the first hop of `path`, which is the home core of every packet walking it.
    pub(crate) fn home_of(&self, path: &Path) -> Option<Ipv4Addr> {
        path.first().and_then(|id| self.hop(*id)).and_then(Hop::owner)
    }
}

/// Collects hop, path and node records and builds a [`Topology`] from them.
///
/// ```
/// use std::net::Ipv4Addr;
/// use mnet_engine::TopologyBuilder;
/// use mnet_wire::records::HopRecord;
///
/// let builder = TopologyBuilder::new()
///     .hop(HopRecord::new().bandwidth(8_000_000).delay(5).queue(16))
///     .node(Ipv4Addr::new(10, 0, 0, 1), 0)
///     .node(Ipv4Addr::new(10, 0, 0, 2), 1)
///     .path(0, 1, [0]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct TopologyBuilder {
    hops: Vec<HopRecord>,
    paths: Vec<PathRecord>,
    nodes: Vec<NodeRecord>,
}

impl TopologyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes the binary hop, path and node tables.
    pub fn from_tables(hops: Bytes, paths: Bytes, nodes: Bytes) -> Result<Self, ConfigError> {
        Ok(Self {
            hops: records::decode_hops(hops)?,
            paths: records::decode_paths(paths)?,
            nodes: records::decode_nodes(nodes)?,
        })
    }

    /// Appends a hop. Hops are numbered in the order they are added.
    pub fn hop(mut self, hop: HopRecord) -> Self {
        self.hops.push(hop);
        self
    }

    /// Adds a path from `origin` to `destination` over the given hop indices.
    pub fn path(mut self, origin: u16, destination: u16, hops: impl Into<Vec<u32>>) -> Self {
        self.paths.push(PathRecord::new(origin, destination, hops));
        self
    }

    /// Maps the node bits of `addr` to `node`.
    pub fn node(mut self, addr: Ipv4Addr, node: u16) -> Self {
        self.nodes.push(NodeRecord { addr, node });
        self
    }

    /// Clears the owner of every hop owned by `core`, so those hops are emulated locally.
    pub(crate) fn localize(mut self, core: Ipv4Addr) -> Self {
        for hop in &mut self.hops {
            if hop.owner == Some(core) {
                hop.owner = None;
            }
        }
        self
    }

    /// Validates the records and builds the topology. Disciplines are allocated last, so a
    /// rejected configuration never allocates any.
    pub(crate) fn build(
        self,
        generation: u64,
        hz: u32,
        registry: &DisciplineRegistry,
    ) -> Result<Topology, ConfigError> {
        let settings: Vec<_> =
            self.hops.iter().map(|record| HopSettings::from_record(record, hz)).collect();

        for (i, hop) in settings.iter().enumerate() {
            if hop.is_local() && hop.is_bandwidth_limited() && hop.capacity == 0 {
                return Err(ConfigError::ZeroQueue(i as u32));
            }

            if !registry.contains(hop.discipline) {
                return Err(ConfigError::UnknownDiscipline(hop.discipline.0));
            }
        }

        let mut node_map = FxHashMap::default();
        let mut nodes = 0;
        for record in &self.nodes {
            let bits = VirtualSubnet::node_bits(record.addr);
            if node_map.insert(bits, NodeId(record.node)).is_some() {
                return Err(ConfigError::DuplicateNode(record.addr));
            }
            nodes = nodes.max(record.node as usize + 1);
        }

        for path in &self.paths {
            nodes = nodes.max(path.origin.max(path.destination) as usize + 1);
        }

        if nodes > MAX_NODES {
            return Err(ConfigError::TooManyNodes(nodes));
        }

        let mut table = PathTable::new(nodes, node_map);
        for record in &self.paths {
            let hops = record
                .hops
                .iter()
                .map(|&hop| {
                    if hop as usize >= settings.len() {
                        return Err(ConfigError::UnknownHop {
                            origin: record.origin,
                            destination: record.destination,
                            hop,
                        });
                    }
                    Ok(HopId::new(hop))
                })
                .collect::<Result<Path, _>>()?;

            if !table.insert(NodeId(record.origin), NodeId(record.destination), hops) {
                return Err(ConfigError::DuplicatePath(record.origin, record.destination));
            }
        }

        let mut hops = Vec::with_capacity(settings.len());
        for (i, settings) in settings.into_iter().enumerate() {
            let id = HopId::new(i as u32);
            // Only local hops run their discipline.
            let discipline =
                if settings.is_local() { registry.install(id, &settings)? } else { None };
            hops.push(Hop::new(id, settings, discipline));
        }

        debug!(generation, hops = hops.len(), nodes, paths = table.len(), "Built topology");

        Ok(Topology { generation, hops, paths: table })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DisciplineId;

    fn builder() -> TopologyBuilder {
        TopologyBuilder::new()
            .hop(HopRecord::new().bandwidth(8_000_000).delay(5).queue(4))
            .hop(HopRecord::new().delay(10))
            .node(Ipv4Addr::new(10, 0, 0, 1), 0)
            .node(Ipv4Addr::new(10, 0, 0, 2), 1)
            .path(0, 1, [0, 1])
            .path(1, 0, [1])
    }

    #[test]
    fn build_and_lookup() {
        let topology = builder().build(1, 1000, &DisciplineRegistry::new()).unwrap();
        assert_eq!(topology.hops().len(), 2);
        assert_eq!(topology.paths().nodes(), 2);

        let path = topology.lookup(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(&**path.unwrap(), &[HopId::new(0), HopId::new(1)]);
        assert_eq!(topology.hop(HopId::new(1)).unwrap().settings().delay, 10);
        assert!(topology.hop(HopId::new(2)).is_none());
    }

    #[test]
    fn invalid_records_are_rejected() {
        let registry = DisciplineRegistry::new();

        let err = builder().path(0, 0, [9]).build(1, 1000, &registry).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownHop { hop: 9, .. }));

        let err = builder().path(0, 1, [1]).build(1, 1000, &registry).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicatePath(0, 1)));

        let err = builder().node(Ipv4Addr::new(10, 9, 0, 1), 3).build(1, 1000, &registry);
        assert!(matches!(err, Err(ConfigError::DuplicateNode(_))));

        let err = builder().hop(HopRecord::new().bandwidth(1_000_000)).build(1, 1000, &registry);
        assert!(matches!(err, Err(ConfigError::ZeroQueue(2))));

        let err = builder().hop(HopRecord::new().discipline(3)).build(1, 1000, &registry);
        assert!(matches!(err, Err(ConfigError::UnknownDiscipline(3))));

        let err = builder().path(5000, 0, Vec::<u32>::new()).build(1, 1000, &registry);
        assert!(matches!(err, Err(ConfigError::TooManyNodes(5001))));
    }

    #[test]
    fn remote_hops_skip_queue_validation() {
        let registry = DisciplineRegistry::new();
        registry.register(DisciplineId(3), || crate::discipline::tests::Probe::default());

        let topology = builder()
            .hop(HopRecord::new().bandwidth(1_000_000).owner(Ipv4Addr::new(192, 168, 0, 2)))
            .hop(HopRecord::new().discipline(3).owner(Ipv4Addr::new(192, 168, 0, 2)))
            .build(1, 1000, &registry)
            .unwrap();

        assert_eq!(topology.hops().len(), 4);
    }

    #[test]
    fn hops_owned_by_this_core_are_local() {
        let core = Ipv4Addr::new(192, 168, 0, 1);
        let topology = TopologyBuilder::new()
            .hop(HopRecord::new().bandwidth(8_000_000).queue(4).owner(core))
            .hop(HopRecord::new().owner(Ipv4Addr::new(192, 168, 0, 2)))
            .localize(core)
            .build(1, 1000, &DisciplineRegistry::new())
            .unwrap();

        assert_eq!(topology.hop(HopId::new(0)).unwrap().owner(), None);
        assert_eq!(topology.hop(HopId::new(0)).unwrap().queue().capacity, 4);
        assert!(topology.hop(HopId::new(1)).unwrap().owner().is_some());
    }

    #[test]
    fn from_tables() {
        let hops = records::encode_table(
            &[HopRecord::new().bandwidth(8_000_000).queue(8)],
            HopRecord::encode,
        );
        let paths = records::encode_table(&[PathRecord::new(0, 1, [0])], PathRecord::encode);
        let nodes = records::encode_table(
            &[
                NodeRecord { addr: Ipv4Addr::new(10, 0, 0, 1), node: 0 },
                NodeRecord { addr: Ipv4Addr::new(10, 0, 0, 2), node: 1 },
            ],
            NodeRecord::encode,
        );

        let topology = TopologyBuilder::from_tables(hops.clone(), paths, nodes)
            .unwrap()
            .build(1, 1000, &DisciplineRegistry::new())
            .unwrap();
        assert!(topology.lookup(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)).is_some());

        let truncated = hops.slice(..5);
        assert!(matches!(
            TopologyBuilder::from_tables(truncated, Bytes::new(), Bytes::new()),
            Err(ConfigError::Wire(_))
        ));
    }
}
