pub use env::SpillEnv;
pub use workset::{Loc, Workset};

mod env;
mod workset;

#[cfg(test)]
mod tests;

use std::collections::{HashMap, HashSet};

use flint_common::ir::{reverse_postorder, BlockId, Graph, NodeFlags, NodeId, Op};
use flint_common::opspec::Target;
use flint_common::regs::ClassId;
use itertools::Itertools;
use log::{debug, info, trace};

use crate::live::{liveness, Distance, Liveness, NextUses};
use crate::{defined_values, in_class, used_values};

/// Belady spilling for one register class: simulate a register file of
/// size `k` per block using next-use distances, evicting the values
/// used farthest in the future, and reconcile the per-block working
/// sets along control-flow edges afterwards.
pub fn belady(graph: &mut Graph, target: &Target, class: ClassId) {
    let n_regs = target.class(class).n_allocatable();
    info!(
        "belady spilling class {} (k = {})",
        target.class(class).name,
        n_regs
    );

    let mut senv = SpillEnv::new(class);
    {
        let graph: &Graph = graph;
        let live = liveness(graph);
        let uses = NextUses::new(graph, &live);
        let mut walker = Belady {
            graph,
            class,
            n_regs,
            live: &live,
            uses: &uses,
            senv: &mut senv,
            states: HashMap::new(),
            depth: 0,
        };

        for block in reverse_postorder(graph) {
            walker.process(block);
        }
        walker.fix_block_borders();
    }

    senv.materialize(graph);
}

struct BlockState {
    ws_start: Workset,
    ws_end: Option<Workset>,
}

struct Belady<'a> {
    graph: &'a Graph,
    class: ClassId,
    n_regs: usize,
    live: &'a Liveness,
    uses: &'a NextUses<'a>,
    senv: &'a mut SpillEnv,
    states: HashMap<BlockId, BlockState>,
    depth: usize,
}

impl Belady<'_> {
    /// Decide for every value of a block whether it is used from a
    /// register or reloaded before the use.
    fn process(&mut self, block: BlockId) {
        if self.states.contains_key(&block) {
            return;
        }

        let ws_start = self.start_workset(block);
        debug!("deciding for {}", block);

        let mut ws = ws_start;
        let mut used: HashSet<NodeId> = HashSet::new();

        for node in self.graph.sched.nodes(block) {
            assert!(
                ws.len() <= self.n_regs,
                "too many values in working set at {}",
                node
            );

            // Projections are handled with their tuple; phis are not
            // real instructions.
            if self.graph.is_phi(node) || self.graph.is_proj(node) {
                continue;
            }
            trace!("  at {}", node);

            let vals = used_values(self.graph, self.class, node);
            self.displace(block, &mut ws, &mut used, vals, true, node);

            let defs = defined_values(self.graph, self.class, node);
            self.displace(block, &mut ws, &mut used, defs, false, node);
        }

        self.states.get_mut(&block).unwrap().ws_end = Some(ws);
    }

    /// Make room so `new_vals` can be held in registers, disposing as
    /// few values as possible and the worst ones first. For usages the
    /// incoming values are reload requests.
    fn displace(
        &mut self,
        block: BlockId,
        ws: &mut Workset,
        used: &mut HashSet<NodeId>,
        new_vals: Vec<NodeId>,
        is_usage: bool,
        instr: NodeId,
    ) {
        let mut to_insert = Vec::with_capacity(self.n_regs);
        let mut demand = 0;

        for value in new_vals {
            if is_usage {
                used.insert(value);
            }

            if !ws.contains(value) {
                demand += 1;
                to_insert.push(value);
                if is_usage {
                    trace!("    reload {} before {}", value, instr);
                    self.senv.add_reload(value, instr);
                }
            } else {
                assert!(is_usage, "defined value already in working set");
                trace!("    keep {}", value);
            }
        }

        assert!(
            demand <= self.n_regs,
            "{} demands {} registers, class has {}",
            instr,
            demand,
            self.n_regs
        );

        let max_allowed = self.n_regs - demand;
        if ws.len() > max_allowed {
            ws.refresh_times(|value| self.distance(instr, value, !is_usage));
            ws.sort();

            for loc in ws.locs()[max_allowed..].to_vec() {
                let value = loc.node;
                assert!(
                    !self.graph.info(value).flags.contains(NodeFlags::DONT_SPILL),
                    "all register candidates at {} are pinned, cannot evict {}",
                    instr,
                    value
                );

                if !used.contains(&value) {
                    // Disposed before its first use here: it was never
                    // really needed live-in.
                    self.states.get_mut(&block).unwrap().ws_start.remove(value);
                    if self.graph.is_phi(value) && self.graph.block_of(value) == block {
                        self.senv.spill_phi(value);
                    }
                    trace!("    dispose {} (unused so far)", value);
                } else {
                    trace!("    dispose {}", value);
                }
            }

            ws.truncate(max_allowed);
        }

        for value in to_insert {
            ws.insert(value);
        }
    }

    /// The starting working set of a block: a clone of a sole
    /// predecessor's end set, otherwise the best `k` of the values
    /// live at entry plus the block's phis. Phis that do not make the
    /// cut are spilled.
    fn start_workset(&mut self, block: BlockId) -> Workset {
        let preds: Vec<BlockId> = self.graph.preds(block).to_vec();

        if preds.len() == 1 && block != self.graph.entry() {
            let pred = preds[0];
            assert!(pred != block, "{} is its own single predecessor", block);

            if !self.states.contains_key(&pred) {
                self.depth += 1;
                assert!(
                    self.depth <= self.graph.block_count(),
                    "predecessor recursion exceeded the block count"
                );
                self.process(pred);
                self.depth -= 1;
            }

            let ws_start = self.states[&pred]
                .ws_end
                .clone()
                .expect("cyclic single-predecessor chain");
            self.states.insert(
                block,
                BlockState {
                    ws_start: ws_start.clone(),
                    ws_end: None,
                },
            );
            return ws_start;
        }

        debug!("computing start working set of {}", block);
        let mut starters: Vec<Loc> = Vec::new();

        for node in self.graph.block_nodes(block) {
            if self.graph.is_phi(node) && in_class(self.graph, self.class, node) {
                starters.push(Loc {
                    node,
                    time: self.uses.from_entry(block, node),
                });
            }
        }

        for value in self.live.live_in(block) {
            if in_class(self.graph, self.class, value) {
                starters.push(Loc {
                    node: value,
                    time: self.uses.from_entry(block, value),
                });
            }
        }

        let starters: Vec<Loc> = starters
            .into_iter()
            .sorted_by_key(|loc| (loc.time, loc.node))
            .collect();

        let count = starters.len().min(self.n_regs);
        let mut ws_start = Workset::new(self.n_regs);
        ws_start.fill(&starters[..count]);

        // The remaining phis cannot start in a register.
        for loc in starters[count..].iter() {
            if self.graph.is_phi(loc.node) && self.graph.block_of(loc.node) == block {
                trace!("    spilling phi {}", loc.node);
                self.senv.spill_phi(loc.node);
            }
        }

        self.states.insert(
            block,
            BlockState {
                ws_start: ws_start.clone(),
                ws_end: None,
            },
        );
        ws_start
    }

    /// The per-block walk assumes its own live-ins; repair the
    /// discrepancies against each predecessor's end working set.
    fn fix_block_borders(&mut self) {
        debug!("fixing block borders");

        for block in self.graph.blocks() {
            let ws_start: Vec<NodeId> = match self.states.get(&block) {
                Some(state) => state.ws_start.iter().collect(),
                None => continue,
            };

            let preds = self.graph.preds(block).to_vec();
            for (index, pred) in preds.into_iter().enumerate() {
                let pred_end = match self.states.get(&pred) {
                    Some(state) => state.ws_end.as_ref().expect("processed predecessor"),
                    None => continue,
                };

                for value in ws_start.iter() {
                    // A phi of this block stands for its argument on
                    // the incoming edge.
                    let value = if self.graph.is_phi(*value) && self.graph.block_of(*value) == block
                    {
                        self.graph.input(*value, index)
                    } else {
                        *value
                    };

                    // Unknowns are available everywhere.
                    if self.graph.op(value) == Op::Unknown {
                        continue;
                    }

                    if !pred_end.contains(value) {
                        trace!("    reload {} on edge {} -> {}", value, pred, block);
                        self.senv.add_reload_on_edge(value, block, index);
                    }
                }
            }
        }
    }

    fn distance(&self, from: NodeId, value: NodeId, skip_uses_at_from: bool) -> Distance {
        assert!(
            !self.graph.info(value).flags.contains(NodeFlags::IGNORE),
            "{} should never appear in a working set",
            value
        );
        self.uses.distance(from, value, skip_uses_at_from)
    }
}
