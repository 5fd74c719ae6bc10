use std::collections::HashSet;

use flint_common::ir::{BlockId, Graph, NodeId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A node-selection strategy for the list scheduler. The scheduler
/// owns readiness and liveness bookkeeping; the selector only picks
/// among the ready candidates.
pub trait Selector {
    fn init_graph(&mut self, _graph: &Graph) {}

    fn init_block(&mut self, _graph: &Graph, _block: BlockId) {}

    /// A node became ready, possibly triggered by scheduling `prev`.
    fn node_ready(&mut self, _graph: &Graph, _node: NodeId, _prev: Option<NodeId>) {}

    /// Pick one node out of the non-empty ready set. `live` holds the
    /// values in use beyond the cursor.
    fn select(&mut self, graph: &Graph, ready: &HashSet<NodeId>, live: &HashSet<NodeId>) -> NodeId;

    fn node_selected(&mut self, _graph: &Graph, _node: NodeId) {}

    fn finish_block(&mut self, _block: BlockId) {}

    fn finish_graph(&mut self) {}
}

/// Always schedules the first ready node. Deterministic, and the
/// baseline the schedule round-trip guarantee is stated against.
#[derive(Debug, Default)]
pub struct Trivial;

impl Selector for Trivial {
    fn select(&mut self, _graph: &Graph, ready: &HashSet<NodeId>, _live: &HashSet<NodeId>) -> NodeId {
        *ready.iter().min().unwrap()
    }
}

/// Picks uniformly among the ready nodes. Seeded, so a given seed
/// reproduces its schedule.
#[derive(Debug)]
pub struct Random {
    rng: StdRng,
}

impl Random {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for Random {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Selector for Random {
    fn select(&mut self, _graph: &Graph, ready: &HashSet<NodeId>, _live: &HashSet<NodeId>) -> NodeId {
        let mut ordered: Vec<NodeId> = ready.iter().copied().collect();
        ordered.sort();
        ordered[self.rng.gen_range(0..ordered.len())]
    }
}

/// Greedily keeps the register pressure down: prefer nodes that free
/// more live operands than they add.
#[derive(Debug, Default)]
pub struct Pressure;

impl Selector for Pressure {
    fn select(&mut self, graph: &Graph, ready: &HashSet<NodeId>, live: &HashSet<NodeId>) -> NodeId {
        let mut ordered: Vec<NodeId> = ready.iter().copied().collect();
        ordered.sort();

        let score = |node: NodeId| {
            let mut freed = 0i32;
            let mut seen = Vec::new();

            for value in graph.ins(node) {
                let value = graph.skip_proj(*value);
                if live.contains(&value) && !seen.contains(&value) {
                    seen.push(value);
                    freed += 1;
                }
            }

            let defines = if graph.users(node).is_empty() { 0 } else { 1 };
            freed - defines
        };

        ordered
            .into_iter()
            .max_by_key(|node| score(*node))
            .unwrap()
    }
}
