pub use bipartite::Bipartite;
pub use insn::{Insn, Operand, scan};

mod bipartite;
mod insn;

#[cfg(test)]
mod tests;

use std::collections::{HashMap, HashSet};

use flint_common::ir::{BlockId, DomTree, Graph, NodeId};
use flint_common::opspec::Target;
use flint_common::regs::{ClassId, RegisterSet};
use log::{debug, info, trace};

use crate::live::liveness;
use crate::{defined_values, get_reg, nodes, set_reg, used_values};

/// Resolve register-pinned operands: in front of every constrained
/// instruction a Perm spreads the live values onto fresh projections,
/// outputs are paired with compatible inputs, and a bipartite matching
/// against the class registers fixes the assignment. Values living
/// through the instruction take the remaining registers.
pub fn handle(graph: &mut Graph, target: &Target, class: ClassId) {
    info!(
        "handling register constraints for class {}",
        target.class(class).name
    );

    let dom = DomTree::compute(graph);
    for block in dom.preorder().to_vec() {
        let worklist: Vec<NodeId> = graph
            .sched
            .nodes(block)
            .into_iter()
            .filter(|node| {
                !graph.is_phi(*node) && scan(graph, target, class, *node).has_constraints
            })
            .collect();

        for node in worklist {
            handle_insn(graph, target, class, &dom, block, node);
        }
    }
}

fn handle_insn(
    graph: &mut Graph,
    target: &Target,
    class: ClassId,
    dom: &DomTree,
    block: BlockId,
    node: NodeId,
) {
    debug!("handling constraints at {}", node);

    let vals = live_before(graph, class, block, node);
    let perm = if vals.is_empty() {
        None
    } else {
        let (perm, projs) = nodes::perm(graph, block, &vals, node);
        reroute_through_perm(graph, dom, block, perm, &vals, &projs);
        Some((perm, projs))
    };

    // Rescan: the constrained operands now read Perm projections.
    let mut insn = scan(graph, target, class, node);
    pair_up(graph, &mut insn);

    let cls = target.class(class);
    let n_regs = cls.len();
    let mut bp = Bipartite::new(n_regs, n_regs);
    let mut queued: Vec<(NodeId, Option<NodeId>)> = Vec::new();
    let mut in_queue: HashSet<NodeId> = HashSet::new();

    for index in 0..insn.ops.len() {
        let op = &insn.ops[index];
        if in_queue.contains(&op.carrier) {
            continue;
        }

        let partner = op.partner.map(|at| insn.ops[at].carrier);
        if partner.map(|p| in_queue.contains(&p)).unwrap_or(false) {
            continue;
        }

        // Paired operands share a register from the intersection of
        // their admissible sets.
        let regs = match op.partner {
            Some(at) => op.regs.intersect(insn.ops[at].regs),
            None => op.regs,
        };

        let left = queued.len();
        assert!(left < n_regs, "more constrained operands than registers at {}", node);
        for reg in regs.iter() {
            bp.add(left, reg);
        }

        in_queue.insert(op.carrier);
        if let Some(partner) = partner {
            in_queue.insert(partner);
        }
        queued.push((op.carrier, partner));
    }

    // Values living through the instruction compete for the remaining
    // registers without further constraints.
    if let Some((_, projs)) = &perm {
        for proj in projs.iter() {
            if in_queue.contains(proj) || !lives_past(graph, node, *proj) {
                continue;
            }

            let left = queued.len();
            assert!(left < n_regs, "more live values than registers at {}", node);
            for reg in cls.allocatable().iter() {
                bp.add(left, reg);
            }

            in_queue.insert(*proj);
            queued.push((*proj, None));
        }
    }

    let matching = bp.matching();
    for (left, (carrier, partner)) in queued.iter().enumerate() {
        let reg = matching[left].unwrap_or_else(|| {
            panic!(
                "no register for constrained operand {} at {}, the spiller broke its contract",
                carrier, node
            )
        });

        trace!("  {} -> {}", carrier, cls.register(reg).name);
        set_reg(graph, *carrier, reg);
        if let Some(partner) = partner {
            trace!("  {} -> {} (paired)", partner, cls.register(reg).name);
            set_reg(graph, *partner, reg);
        }
    }

    // Any projection still without a register takes a free one.
    if let Some((_, projs)) = &perm {
        let mut used = RegisterSet::EMPTY;
        for proj in projs.iter() {
            if let Some(reg) = get_reg(graph, *proj) {
                used.insert(reg);
            }
        }

        for proj in projs.iter() {
            if get_reg(graph, *proj).is_none() {
                let reg = cls
                    .allocatable()
                    .difference(used)
                    .first()
                    .unwrap_or_else(|| panic!("no free register left for {}", proj));
                trace!("  {} -> {} (filler)", proj, cls.register(reg).name);
                set_reg(graph, *proj, reg);
                used.insert(reg);
            }
        }
    }
}

/// The class-relevant values live directly in front of `node`, in id
/// order.
fn live_before(graph: &Graph, class: ClassId, block: BlockId, node: NodeId) -> Vec<NodeId> {
    let live = liveness(graph);
    let mut live_now: im::HashSet<NodeId> = live
        .live_out(block)
        .filter(|value| crate::in_class(graph, class, *value))
        .collect();

    for at in graph.sched.nodes(block).into_iter().rev() {
        if at == node {
            let mut before = live_now.clone();
            for def in defined_values(graph, class, node) {
                before.remove(&def);
            }
            for value in used_values(graph, class, node) {
                before.insert(value);
            }

            let mut vals: Vec<NodeId> = before.into_iter().collect();
            vals.sort();
            return vals;
        }

        for def in defined_values(graph, class, at) {
            live_now.remove(&def);
        }
        if !graph.is_phi(at) {
            for value in used_values(graph, class, at) {
                live_now.insert(value);
            }
        }
    }

    unreachable!("{} is not scheduled in {}", node, block)
}

/// Every use of a permuted value at or behind the Perm reads the
/// corresponding projection instead.
fn reroute_through_perm(
    graph: &mut Graph,
    dom: &DomTree,
    block: BlockId,
    perm: NodeId,
    vals: &[NodeId],
    projs: &[NodeId],
) {
    let positions: HashMap<NodeId, usize> = graph
        .sched
        .nodes(block)
        .into_iter()
        .enumerate()
        .map(|(index, node)| (node, index))
        .collect();
    let perm_pos = positions[&perm];

    for (value, proj) in vals.iter().zip(projs.iter()) {
        for at in graph.users(*value).to_vec() {
            if at.user == perm {
                continue;
            }

            let rewire = if graph.is_phi(at.user) {
                let edge = graph.preds(graph.block_of(at.user))[at.index];
                edge == block || dom.strictly_dominates(block, edge)
            } else if graph.block_of(at.user) == block {
                positions
                    .get(&at.user)
                    .map(|pos| *pos > perm_pos)
                    .unwrap_or(false)
            } else {
                dom.strictly_dominates(block, graph.block_of(at.user))
            };

            if rewire {
                graph.set_input(at.user, at.index, *proj);
            }
        }
    }
}

/// Pair every output with an input it may share a register with:
/// should-be-same partners first, then the input with the smallest
/// admissible set that does not live past the instruction.
fn pair_up(graph: &Graph, insn: &mut Insn) {
    for out in 0..insn.use_start {
        if insn.ops[out].partner.is_some() {
            continue;
        }

        if let Some(same) = insn.ops[out].req.same_as {
            let found = (insn.use_start..insn.ops.len())
                .find(|at| insn.ops[*at].pos == same && insn.ops[*at].partner.is_none());
            if let Some(at) = found {
                insn.ops[out].partner = Some(at);
                insn.ops[at].partner = Some(out);
                continue;
            }
        }

        let mut smallest: Option<usize> = None;
        let mut smallest_n_regs = usize::MAX;
        for at in insn.use_start..insn.ops.len() {
            let op = &insn.ops[at];
            if op.partner.is_some() || lives_past(graph, insn.node, op.carrier) {
                continue;
            }
            if insn.ops[out].req.differ_from == Some(op.pos) {
                continue;
            }

            let overlap = op.regs.intersect(insn.ops[out].regs);
            if !overlap.is_empty() && op.regs.len() < smallest_n_regs {
                smallest = Some(at);
                smallest_n_regs = op.regs.len();
            }
        }

        if let Some(at) = smallest {
            let carrier = insn.ops[at].carrier;
            for other in insn.use_start..insn.ops.len() {
                if insn.ops[other].carrier == carrier {
                    insn.ops[other].partner = Some(out);
                }
            }
            insn.ops[out].partner = Some(at);
        }
    }
}

/// Whether `value` is still needed after `node`: anything besides the
/// instruction itself reads it.
fn lives_past(graph: &Graph, node: NodeId, value: NodeId) -> bool {
    graph.users(value).iter().any(|at| at.user != node)
}
