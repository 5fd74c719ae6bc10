pub use selector::{Pressure, Random, Selector, Trivial};

mod selector;

#[cfg(test)]
mod tests;

use std::collections::HashSet;

use flint_common::ir::{BlockId, Graph, Mode, NodeId, Op};
use log::{debug, info, trace};

/// List-schedule every block of the graph: rebuild each block's
/// schedule as a total order respecting data, memory and dependency
/// edges, delegating tie-breaks to the selector. Phis and the start
/// marker go first; keeps, copy-keeps and syncs are scheduled as soon
/// as they are ready; projections follow their tuple immediately.
pub fn schedule<S: Selector>(graph: &mut Graph, selector: &mut S) {
    info!("list scheduling {} blocks", graph.block_count());
    selector.init_graph(graph);

    let mut states = vec![SchedState::default(); graph.len()];
    let blocks: Vec<BlockId> = graph.blocks().collect();
    for block in blocks {
        schedule_block(graph, selector, &mut states, block);
    }

    selector.finish_graph();
}

#[derive(Clone, Copy, Debug, Default)]
struct SchedState {
    not_sched_users: isize,
    scheduled: bool,
}

struct BlockCtx {
    block: BlockId,
    ready: HashSet<NodeId>,
    live: HashSet<NodeId>,
    expected: HashSet<NodeId>,
}

fn schedule_block<S: Selector>(
    graph: &mut Graph,
    selector: &mut S,
    states: &mut [SchedState],
    block: BlockId,
) {
    debug!("scheduling {}", block);

    let nodes: Vec<NodeId> = graph.block_nodes(block).collect();
    graph.sched.clear_block(block);
    selector.init_block(graph, block);

    let mut ctx = BlockCtx {
        block,
        ready: HashSet::new(),
        live: HashSet::new(),
        expected: HashSet::new(),
    };

    for node in nodes.iter().copied() {
        if !graph.op(node).in_schedule() || skippable(graph, node) {
            continue;
        }
        ctx.expected.insert(node);
    }

    for node in nodes.iter().copied() {
        if !ctx.expected.contains(&node) {
            continue;
        }

        if graph.is_phi(node) || graph.op(node) == Op::Start {
            // Phis only transfer data flow from the predecessors; they
            // and the start marker go straight to the block head.
            add_to_sched(graph, selector, states, &mut ctx, node);
            continue;
        }

        if states[node.index()].scheduled || ctx.ready.contains(&node) {
            continue;
        }

        let mut ready = true;
        for operand in operands(graph, node) {
            if graph.op(operand).in_schedule() && graph.block_of(operand) == block {
                ready = false;
            } else {
                // Live-in values raise the pressure from the start.
                ctx.live.insert(operand);
            }
        }

        if ready {
            make_ready(graph, selector, states, &mut ctx, None, node);
        }
    }

    while !ctx.ready.is_empty() {
        // Keeps must be scheduled the moment they are ready.
        let forced = ctx
            .ready
            .iter()
            .filter(|node| graph.op(**node).forces_scheduling())
            .min()
            .copied();

        let node = match forced {
            Some(node) => node,
            None => selector.select(graph, &ctx.ready, &ctx.live),
        };
        assert!(ctx.ready.contains(&node), "selector picked a non-ready node");

        trace!("  picked {}", node);
        add_to_sched(graph, selector, states, &mut ctx, node);
    }

    for node in ctx.expected.iter() {
        assert!(
            states[node.index()].scheduled,
            "data dependencies in {} are cyclic: {} cannot be scheduled",
            block,
            node
        );
    }

    selector.finish_block(block);
}

/// Dead nodes and nodes held only by the keep-alive anchor do not get
/// a schedule slot, unless they have an observable effect.
fn skippable(graph: &Graph, node: NodeId) -> bool {
    graph
        .users(node)
        .iter()
        .all(|at| graph.op(at.user) == Op::End)
        && graph.dep_users(node).is_empty()
        && !has_effect(graph, node)
}

fn has_effect(graph: &Graph, node: NodeId) -> bool {
    matches!(
        graph.op(node),
        Op::Jump | Op::Cond | Op::Return | Op::Keep | Op::CopyKeep | Op::Sync | Op::Barrier
    ) || matches!(graph.mode(node), Mode::Control | Mode::Memory)
}

fn operands(graph: &Graph, node: NodeId) -> Vec<NodeId> {
    graph
        .ins(node)
        .iter()
        .chain(graph.deps(node).iter())
        .copied()
        .collect()
}

/// Append a node to the block schedule, update the liveness snapshot
/// and try to make its consumers ready.
fn add_to_sched<S: Selector>(
    graph: &mut Graph,
    selector: &mut S,
    states: &mut [SchedState],
    ctx: &mut BlockCtx,
    node: NodeId,
) {
    if !graph.is_proj(node) {
        for operand in operands(graph, node) {
            let value = graph.skip_proj(operand);
            if ctx.live.contains(&value) {
                states[value.index()].not_sched_users -= 1;
                if states[value.index()].not_sched_users <= 0 {
                    ctx.live.remove(&value);
                }
            }
        }

        // Users in other blocks keep the pressure up for good; their
        // blocks are scheduled separately.
        let successors = num_successors(graph, node) as isize;
        if successors > 0 {
            states[node.index()].not_sched_users = successors;
            ctx.live.insert(node);
        }
    }

    trace!("  adding {}", node);
    graph.sched.append(ctx.block, node);
    states[node.index()].scheduled = true;
    ctx.ready.remove(&node);
    selector.node_selected(graph, node);

    let mut users: Vec<NodeId> = graph
        .users(node)
        .iter()
        .map(|at| at.user)
        .chain(graph.dep_users(node).iter().copied())
        .collect();
    users.dedup();

    for user in users {
        if !graph.is_phi(user) {
            make_ready(graph, selector, states, ctx, Some(node), user);
        }
    }
}

/// Put a node into the ready set once all of its block-local operands
/// are scheduled. Projections skip the ready set and go straight
/// behind their tuple.
fn make_ready<S: Selector>(
    graph: &mut Graph,
    selector: &mut S,
    states: &mut [SchedState],
    ctx: &mut BlockCtx,
    prev: Option<NodeId>,
    node: NodeId,
) {
    if graph.block_of(node) != ctx.block || !ctx.expected.contains(&node) {
        return;
    }
    if states[node.index()].scheduled || ctx.ready.contains(&node) {
        return;
    }

    for operand in operands(graph, node) {
        if graph.op(operand).in_schedule()
            && graph.block_of(operand) == ctx.block
            && !states[operand.index()].scheduled
        {
            return;
        }
    }

    if graph.is_proj(node) {
        add_to_sched(graph, selector, states, ctx, node);
    } else {
        trace!("  ready {}", node);
        ctx.ready.insert(node);
        selector.node_ready(graph, node, prev);
    }
}

/// The number of consumers that keep a value live: for tuple producers
/// the users of all data projections, otherwise all users except the
/// keep-alive anchor.
fn num_successors(graph: &Graph, node: NodeId) -> usize {
    if graph.mode(node) == Mode::Tuple {
        graph
            .projs(node)
            .into_iter()
            .map(|proj| {
                if graph.mode(proj) == Mode::Tuple {
                    num_successors(graph, proj)
                } else if graph.mode(proj).is_data() {
                    graph.users(proj).len()
                } else {
                    0
                }
            })
            .sum()
    } else {
        graph
            .users(node)
            .iter()
            .filter(|at| graph.op(at.user) != Op::End)
            .count()
    }
}
