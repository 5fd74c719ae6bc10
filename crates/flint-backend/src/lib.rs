pub mod color;
pub mod constraint;
pub mod live;
pub mod nodes;
pub mod sched;
pub mod spill;
pub mod verify;

#[cfg(test)]
pub(crate) mod testutil;

use flint_common::ir::{Graph, Mode, NodeFlags, NodeId, Op};
use flint_common::opspec::Target;
use flint_common::regs::{ClassId, RegReq, ReqFlags};
use log::{info, trace};

use sched::Selector;

/// Run the whole backend pipeline on a graph: Belady spilling per
/// register class, list scheduling, then constraint handling and
/// chordal coloring per class. Aborts on any broken invariant; on
/// return every class-relevant value carries a physical register.
pub fn run<S: Selector>(graph: &mut Graph, target: &Target, selector: &mut S) {
    info!("allocating registers for target {}", target.name);

    for class in target.class_ids() {
        spill::belady(graph, target, class);
    }

    sched::schedule(graph, selector);

    for class in target.class_ids() {
        constraint::handle(graph, target, class);
        color::assign(graph, target, class);
    }

    verify::verify(graph, target);
    trace!("done allocating");
}

/// The register requirement of the value `node` produces, or `None` if
/// it produces no register value (memory, control, tuple carriers).
pub fn value_req(graph: &Graph, node: NodeId) -> Option<&RegReq> {
    if !graph.mode(node).is_data() {
        return None;
    }

    graph.info(node).outs.first().and_then(|req| req.as_ref())
}

/// Whether `node` produces a value the allocator must place in a
/// register of `class`.
pub fn in_class(graph: &Graph, class: ClassId, node: NodeId) -> bool {
    if graph.info(node).flags.contains(NodeFlags::IGNORE) {
        return false;
    }

    match value_req(graph, node) {
        Some(req) => req.class == class && !req.flags.contains(ReqFlags::IGNORE),
        None => false,
    }
}

/// The register assigned to the value `node` produces, if any.
pub fn get_reg(graph: &Graph, node: NodeId) -> Option<usize> {
    graph.info(node).assigned.first().copied().flatten()
}

pub fn set_reg(graph: &mut Graph, node: NodeId, reg: usize) {
    let assigned = &mut graph.info_mut(node).assigned;
    if assigned.is_empty() {
        assigned.push(Some(reg));
    } else {
        assigned[0] = Some(reg);
    }
}

/// The class-relevant values `node` defines: the node itself, or its
/// projections for tuple producers.
pub fn defined_values(graph: &Graph, class: ClassId, node: NodeId) -> Vec<NodeId> {
    if graph.mode(node) == Mode::Tuple {
        graph
            .projs(node)
            .into_iter()
            .filter(|proj| in_class(graph, class, *proj))
            .collect()
    } else if in_class(graph, class, node) {
        vec![node]
    } else {
        vec![]
    }
}

/// The distinct class-relevant values `node` reads, in input order.
pub fn used_values(graph: &Graph, class: ClassId, node: NodeId) -> Vec<NodeId> {
    let mut vals = Vec::new();
    for value in graph.ins(node) {
        if in_class(graph, class, *value) && !vals.contains(value) {
            vals.push(*value);
        }
    }
    vals
}

/// Whether `node` terminates its block.
pub fn is_terminator(graph: &Graph, node: NodeId) -> bool {
    matches!(graph.op(node), Op::Jump | Op::Cond | Op::Return)
        || (graph.mode(node) == Mode::Control && matches!(graph.op(node), Op::Machine(_)))
}
