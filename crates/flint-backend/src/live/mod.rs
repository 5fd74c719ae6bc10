pub use next_use::{NextUses, Distance, INFINITY};

mod next_use;

use std::collections::{HashMap, HashSet};

use flint_common::ir::{reverse_postorder, BlockId, Graph, NodeId, Op};

/// Per-block live-in/live-out sets over all register values, computed
/// with a backward worklist. Phi definitions are not live into their
/// own block; phi arguments are live out of the corresponding
/// predecessor. Consumers filter by register class at the use site.
#[derive(Debug)]
pub struct Liveness {
    pub live_in: HashMap<BlockId, HashSet<NodeId>>,
    pub live_out: HashMap<BlockId, HashSet<NodeId>>,
}

impl Liveness {
    pub fn live_in(&self, block: BlockId) -> impl Iterator<Item = NodeId> + '_ {
        self.live_in.get(&block).into_iter().flatten().copied()
    }

    pub fn live_out(&self, block: BlockId) -> impl Iterator<Item = NodeId> + '_ {
        self.live_out.get(&block).into_iter().flatten().copied()
    }

    pub fn is_live_in(&self, block: BlockId, value: NodeId) -> bool {
        self.live_in
            .get(&block)
            .map(|set| set.contains(&value))
            .unwrap_or(false)
    }
}

pub fn liveness(graph: &Graph) -> Liveness {
    let mut analyzer = Analyzer {
        graph,
        live_in: HashMap::new(),
        live_out: HashMap::new(),
    };
    analyzer.analyze();

    Liveness {
        live_in: analyzer.live_in,
        live_out: analyzer.live_out,
    }
}

struct Analyzer<'a> {
    graph: &'a Graph,
    live_in: HashMap<BlockId, HashSet<NodeId>>,
    live_out: HashMap<BlockId, HashSet<NodeId>>,
}

impl Analyzer<'_> {
    fn analyze(&mut self) {
        let mut worklist: Vec<BlockId> = reverse_postorder(self.graph);
        worklist.reverse();

        while let Some(block) = worklist.pop() {
            if self.analyze_block(block) {
                worklist.extend(self.graph.preds(block).iter().copied());
            }
        }
    }

    /// Recompute one block; returns whether its live-in set grew.
    fn analyze_block(&mut self, block: BlockId) -> bool {
        let mut live = self.out_for(block);
        self.live_out.insert(block, live.clone());

        // Keep-alive edges of the end node act as uses at block end.
        for node in self.graph.block_nodes(block) {
            if self.graph.op(node) == Op::End {
                for value in self.graph.ins(node) {
                    if self.graph.mode(*value).is_data() {
                        live.insert(*value);
                    }
                }
            }
        }

        let nodes = self.graph.sched.nodes(block);
        for node in nodes.into_iter().rev() {
            if self.graph.is_phi(node) {
                continue;
            }

            if self.graph.mode(node).is_data() {
                live.remove(&node);
            }

            for value in self.graph.ins(node) {
                if self.graph.mode(*value).is_data() {
                    live.insert(*value);
                }
            }
        }

        for node in self.graph.block_nodes(block) {
            if self.graph.is_phi(node) {
                live.remove(&node);
            }
        }

        let entry = self.live_in.entry(block).or_default();
        let old = entry.len();
        entry.extend(live);
        entry.len() > old
    }

    /// Live-out of a block: the live-ins of its successors minus their
    /// phi definitions, plus the phi arguments flowing over our edges.
    fn out_for(&self, block: BlockId) -> HashSet<NodeId> {
        let mut res = HashSet::new();

        for succ in self.graph.succs(block) {
            for value in self.live_in.get(succ).into_iter().flatten() {
                res.insert(*value);
            }

            for phi in self.graph.block_nodes(*succ) {
                if !self.graph.is_phi(phi) {
                    continue;
                }

                res.remove(&phi);
                for (index, pred) in self.graph.preds(*succ).iter().enumerate() {
                    if *pred == block {
                        let arg = self.graph.input(phi, index);
                        if self.graph.mode(arg).is_data() {
                            res.insert(arg);
                        }
                    }
                }
            }
        }

        res
    }
}

#[cfg(test)]
mod tests {
    use flint_common::ir::Mode;
    use flint_common::opspec::ia32;

    use super::*;

    #[test]
    fn straight_line_uses() {
        let target = ia32();
        let mut graph = Graph::new();
        let entry = graph.entry();
        let next = graph.add_block();
        graph.set_preds(next, vec![entry]);

        let imm = target.opcode("imm");
        let add = target.opcode("add");

        let a = graph.add_machine(entry, target, imm, Mode::Int32, &[]);
        let b = graph.add_machine(entry, target, imm, Mode::Int32, &[]);
        let c = graph.add_machine(next, target, add, Mode::Int32, &[a, b]);
        crate::nodes::keep(&mut graph, next, &[c]);

        let live = liveness(&graph);
        assert!(live.is_live_in(next, a));
        assert!(live.is_live_in(next, b));
        assert!(live.live_out.get(&entry).unwrap().contains(&a));
        assert!(!live.is_live_in(next, c));
        assert!(!live.live_out.get(&next).unwrap().contains(&c));
    }

    #[test]
    fn phi_arguments_live_out_of_their_predecessor() {
        let target = ia32();
        let mut graph = Graph::new();
        let entry = graph.entry();
        let then = graph.add_block();
        let elze = graph.add_block();
        let join = graph.add_block();
        graph.set_preds(then, vec![entry]);
        graph.set_preds(elze, vec![entry]);
        graph.set_preds(join, vec![then, elze]);

        let imm = target.opcode("imm");
        let x = graph.add_machine(then, target, imm, Mode::Int32, &[]);
        let y = graph.add_machine(elze, target, imm, Mode::Int32, &[]);

        let phi = graph.add(join, Op::Phi, Mode::Int32, &[x, y]);
        crate::nodes::keep(&mut graph, join, &[phi]);

        let live = liveness(&graph);
        assert!(live.live_out.get(&then).unwrap().contains(&x));
        assert!(!live.live_out.get(&then).unwrap().contains(&y));
        assert!(live.live_out.get(&elze).unwrap().contains(&y));
        assert!(!live.is_live_in(join, phi));
        assert!(!live.is_live_in(join, x));
    }
}
