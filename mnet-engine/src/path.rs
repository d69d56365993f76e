use std::{net::Ipv4Addr, sync::Arc};

use rustc_hash::FxHashMap;

use crate::HopId;
use mnet_common::VirtualSubnet;

/// A virtual node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u16);

/// The ordered hops between two virtual nodes. Shared, never mutated once built.
pub type Path = Arc<[HopId]>;

/// Maps (origin, destination) node pairs to paths.
///
/// The table is dense: `nodes * nodes` cells, each either empty or a [`Path`]. Real addresses are
/// translated to node ids by their node bits (see [`VirtualSubnet::node_bits`]).
#[derive(Debug, Default)]
pub struct PathTable {
    nodes: usize,
    cells: Vec<Option<Path>>,
    node_map: FxHashMap<u16, NodeId>,
}

impl PathTable {
    pub(crate) fn new(nodes: usize, node_map: FxHashMap<u16, NodeId>) -> Self {
        Self { nodes, cells: vec![None; nodes * nodes], node_map }
    }

    pub(crate) fn insert(&mut self, origin: NodeId, destination: NodeId, path: Path) -> bool {
        let index = self.index(origin, destination);
        let cell = &mut self.cells[index];
        if cell.is_some() {
            return false;
        }

        *cell = Some(path);
        true
    }

    #[inline]
    fn index(&self, origin: NodeId, destination: NodeId) -> usize {
        origin.0 as usize * self.nodes + destination.0 as usize
    }

    /// Number of nodes in the table.
    #[inline]
    pub fn nodes(&self) -> usize {
        self.nodes
    }

    /// Number of paths in the table.
    pub fn len(&self) -> usize {
        self.cells.iter().filter(|cell| cell.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Translates a real address to its node id.
    #[inline]
    pub fn node(&self, addr: Ipv4Addr) -> Option<NodeId> {
        self.node_map.get(&VirtualSubnet::node_bits(addr)).copied()
    }

    /// Returns the path between two nodes.
    #[inline]
    pub fn get(&self, origin: NodeId, destination: NodeId) -> Option<&Path> {
        if origin.0 as usize >= self.nodes || destination.0 as usize >= self.nodes {
            return None;
        }

        self.cells[self.index(origin, destination)].as_ref()
    }

    /// Resolves the path between two addresses.
    pub fn lookup(&self, src: Ipv4Addr, dst: Ipv4Addr) -> Option<&Path> {
        self.get(self.node(src)?, self.node(dst)?)
    }
}
