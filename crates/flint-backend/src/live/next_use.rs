use std::collections::HashMap;

use flint_common::ir::{reverse_postorder, BlockId, Graph, NodeFlags, NodeId};
use log::trace;

use super::Liveness;

/// Next-use distances count instructions; phis and projections do not
/// advance the counter.
pub type Distance = u32;

/// "No further use" — saturating arithmetic keeps it absorbing.
pub const INFINITY: Distance = Distance::MAX;

/// The next-use oracle: for every block, the distance from its first
/// instruction to the next use of each value, propagated bottom-up
/// through the control flow to a fixpoint. Queries from an arbitrary
/// instruction walk the schedule forward and fall back to the successor
/// tables at the block end.
///
/// Values flagged do-not-spill report distance zero so the spiller
/// never evicts them.
pub struct NextUses<'a> {
    graph: &'a Graph,
    live: &'a Liveness,
    at_entry: HashMap<BlockId, HashMap<NodeId, Distance>>,
}

impl<'a> NextUses<'a> {
    pub fn new(graph: &'a Graph, live: &'a Liveness) -> Self {
        let mut uses = Self {
            graph,
            live,
            at_entry: HashMap::new(),
        };

        let order = reverse_postorder(graph);
        let mut changed = true;
        while changed {
            changed = false;
            for block in order.iter().rev() {
                let table = uses.compute_block(*block);
                if uses.at_entry.get(block) != Some(&table) {
                    uses.at_entry.insert(*block, table);
                    changed = true;
                }
            }
        }

        uses
    }

    /// Distance from the entry of `block` to the next use of `value`.
    pub fn from_entry(&self, block: BlockId, value: NodeId) -> Distance {
        if self.dont_spill(value) {
            return 0;
        }

        self.at_entry
            .get(&block)
            .and_then(|table| table.get(&value))
            .copied()
            .unwrap_or(INFINITY)
    }

    /// Distance from the instruction `from` to the next use of `value`.
    /// With `skip_uses_at_from`, uses by `from` itself do not count;
    /// the spiller sets this when asking on behalf of a definition.
    pub fn distance(&self, from: NodeId, value: NodeId, skip_uses_at_from: bool) -> Distance {
        if self.dont_spill(value) {
            return 0;
        }

        let block = self.graph.block_of(from);
        let mut steps: Distance = 0;
        let mut at = Some(from);

        while let Some(node) = at {
            if !self.graph.is_phi(node) && !self.graph.is_proj(node) {
                let skip = node == from && skip_uses_at_from;
                if !skip && self.graph.ins(node).contains(&value) {
                    return steps;
                }
                steps += 1;
            }
            at = self.graph.sched.next(node);
        }

        steps.saturating_add(self.after_block(block, value))
    }

    /// Distance from the end of `block` to the next use of `value`.
    fn after_block(&self, block: BlockId, value: NodeId) -> Distance {
        let mut best = INFINITY;

        for succ in self.graph.succs(block) {
            for (index, pred) in self.graph.preds(*succ).iter().enumerate() {
                if *pred != block {
                    continue;
                }

                for phi in self.graph.block_nodes(*succ) {
                    if self.graph.is_phi(phi) && self.graph.input(phi, index) == value {
                        return 0;
                    }
                }
            }

            if self.live.is_live_in(*succ, value) {
                best = best.min(self.from_entry(*succ, value));
            }
        }

        best
    }

    fn dont_spill(&self, value: NodeId) -> bool {
        self.graph
            .info(value)
            .flags
            .contains(NodeFlags::DONT_SPILL)
    }

    fn compute_block(&self, block: BlockId) -> HashMap<NodeId, Distance> {
        let nodes = self.graph.sched.nodes(block);
        let len: Distance = nodes
            .iter()
            .filter(|n| !self.graph.is_phi(**n) && !self.graph.is_proj(**n))
            .count() as Distance;

        let mut table: HashMap<NodeId, Distance> = HashMap::new();

        // Uses beyond the block end: phi arguments on our out-edges and
        // the successors' own tables, shifted by the block length.
        for succ in self.graph.succs(block) {
            for (index, pred) in self.graph.preds(*succ).iter().enumerate() {
                if *pred != block {
                    continue;
                }

                for phi in self.graph.block_nodes(*succ) {
                    if self.graph.is_phi(phi) {
                        let arg = self.graph.input(phi, index);
                        merge(&mut table, arg, len);
                    }
                }
            }

            if let Some(succ_table) = self.at_entry.get(succ) {
                for (value, dist) in succ_table {
                    if self.live.is_live_in(*succ, *value) {
                        merge(&mut table, *value, len.saturating_add(*dist));
                    }
                }
            }
        }

        // Walk backwards; the earliest use of a value wins.
        let mut index = len;
        for node in nodes.into_iter().rev() {
            if self.graph.is_phi(node) || self.graph.is_proj(node) {
                continue;
            }

            index -= 1;
            for value in self.graph.ins(node) {
                table.insert(*value, index);
            }
        }

        trace!("next-use table for {}: {} values", block, table.len());
        table
    }
}

fn merge(table: &mut HashMap<NodeId, Distance>, value: NodeId, dist: Distance) {
    let entry = table.entry(value).or_insert(INFINITY);
    *entry = (*entry).min(dist);
}
