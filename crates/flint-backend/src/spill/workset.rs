use flint_common::ir::NodeId;

use crate::live::Distance;

/// A value resident in a register, tagged with its next-use distance.
#[derive(Clone, Copy, Debug)]
pub struct Loc {
    pub node: NodeId,
    pub time: Distance,
}

/// The simulated register contents at a program point: at most
/// `capacity` values, each with the distance to its next use.
#[derive(Clone, Debug)]
pub struct Workset {
    vals: Vec<Loc>,
    capacity: usize,
}

impl Workset {
    pub fn new(capacity: usize) -> Self {
        Self {
            vals: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.vals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vals.is_empty()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.vals.iter().any(|loc| loc.node == node)
    }

    /// Insert a value if not yet present. The set must not be full.
    pub fn insert(&mut self, node: NodeId) {
        if self.contains(node) {
            return;
        }

        assert!(self.vals.len() < self.capacity, "working set already full");
        self.vals.push(Loc {
            node,
            time: 0,
        });
    }

    pub fn remove(&mut self, node: NodeId) {
        self.vals.retain(|loc| loc.node != node);
    }

    pub fn clear(&mut self) {
        self.vals.clear();
    }

    /// Replace the contents with the given locations, which must fit.
    pub fn fill(&mut self, locs: &[Loc]) {
        assert!(locs.len() <= self.capacity);
        self.vals.clear();
        self.vals.extend_from_slice(locs);
    }

    /// Recompute every entry's next-use distance.
    pub fn refresh_times(&mut self, mut distance: impl FnMut(NodeId) -> Distance) {
        for loc in self.vals.iter_mut() {
            loc.time = distance(loc.node);
        }
    }

    /// Sort ascending by next-use distance; ties break on node id so
    /// eviction is deterministic.
    pub fn sort(&mut self) {
        self.vals.sort_by_key(|loc| (loc.time, loc.node));
    }

    pub fn truncate(&mut self, len: usize) {
        self.vals.truncate(len);
    }

    pub fn locs(&self) -> &[Loc] {
        &self.vals
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.vals.iter().map(|loc| loc.node)
    }
}
