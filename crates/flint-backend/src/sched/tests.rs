use flint_common::ir::{Graph, Mode, NodeId};
use flint_common::opspec::ia32;

use crate::nodes;
use crate::testutil::{imm, tiny_target};

use super::{schedule, Random, Trivial};

fn position(graph: &Graph, node: NodeId) -> usize {
    graph
        .sched
        .nodes(graph.block_of(node))
        .iter()
        .position(|at| *at == node)
        .unwrap()
}

#[test]
fn data_predecessors_come_first() {
    let target = ia32();
    let mut graph = Graph::new();
    let entry = graph.entry();

    let imm_op = target.opcode("imm");
    let add = target.opcode("add");
    let mull = target.opcode("mull");

    let a = graph.add_machine(entry, target, imm_op, Mode::Int32, &[]);
    let b = graph.add_machine(entry, target, imm_op, Mode::Int32, &[]);

    let sums: Vec<NodeId> = (0..6)
        .map(|_| graph.add_machine(entry, target, add, Mode::Int32, &[a, b]))
        .collect();

    let mul = graph.add_machine(entry, target, mull, Mode::Tuple, &[a, b]);
    let lo = graph.add_proj(mul, 0, Mode::Int32);
    let hi = graph.add_proj(mul, 1, Mode::Int32);

    let mut keep_all = sums.clone();
    keep_all.push(lo);
    keep_all.push(hi);
    nodes::keep(&mut graph, entry, &keep_all);

    schedule(&mut graph, &mut Trivial);

    for node in graph.sched.nodes(entry) {
        for value in graph.ins(node) {
            if graph.block_of(*value) == entry && graph.sched.is_scheduled(*value) {
                assert!(position(&graph, *value) < position(&graph, node));
            }
        }
    }

    // Projections sit directly behind their tuple.
    assert_eq!(position(&graph, lo), position(&graph, mul) + 1);
    assert_eq!(position(&graph, hi), position(&graph, mul) + 2);
}

#[test]
fn rescheduling_is_idempotent() {
    let target = ia32();
    let mut graph = Graph::new();
    let entry = graph.entry();

    let imm_op = target.opcode("imm");
    let add = target.opcode("add");

    let a = graph.add_machine(entry, target, imm_op, Mode::Int32, &[]);
    let b = graph.add_machine(entry, target, imm_op, Mode::Int32, &[]);
    let c = graph.add_machine(entry, target, add, Mode::Int32, &[a, b]);
    let d = graph.add_machine(entry, target, add, Mode::Int32, &[c, a]);
    nodes::keep(&mut graph, entry, &[d]);

    schedule(&mut graph, &mut Trivial);
    let first = graph.sched.nodes(entry);

    schedule(&mut graph, &mut Trivial);
    assert_eq!(graph.sched.nodes(entry), first);
}

#[test]
fn random_selection_is_reproducible() {
    let target = ia32();
    let mut graph = Graph::new();
    let entry = graph.entry();

    let imm_op = target.opcode("imm");
    let vals: Vec<NodeId> = (0..8)
        .map(|_| graph.add_machine(entry, target, imm_op, Mode::Int32, &[]))
        .collect();
    nodes::keep(&mut graph, entry, &vals);

    schedule(&mut graph, &mut Random::new(7));
    let first = graph.sched.nodes(entry);

    schedule(&mut graph, &mut Random::new(7));
    assert_eq!(graph.sched.nodes(entry), first);
}

#[test]
fn keeps_are_scheduled_as_soon_as_ready() {
    let target = tiny_target(4);
    let mut graph = Graph::new();
    let entry = graph.entry();

    let a = imm(&mut graph, &target, entry);
    let b = imm(&mut graph, &target, entry);
    let keep_a = nodes::keep(&mut graph, entry, &[a]);
    let keep_b = nodes::keep(&mut graph, entry, &[b]);

    schedule(&mut graph, &mut Trivial);

    // The trivial selector would put b before keep_a; the keep rule
    // overrides it.
    assert_eq!(position(&graph, keep_a), position(&graph, a) + 1);
    assert_eq!(position(&graph, keep_b), position(&graph, b) + 1);
}

#[test]
#[should_panic(expected = "cyclic")]
fn ready_set_starvation_is_fatal() {
    let target = tiny_target(4);
    let mut graph = Graph::new();
    let entry = graph.entry();

    let a = imm(&mut graph, &target, entry);
    let add = target.opcode("add");
    let x = graph.add_machine(entry, &target, add, Mode::Int32, &[a, a]);
    let y = graph.add_machine(entry, &target, add, Mode::Int32, &[x, a]);
    graph.set_input(x, 1, y);
    nodes::keep(&mut graph, entry, &[x, y]);

    schedule(&mut graph, &mut Trivial);
}

#[test]
fn phis_occupy_the_block_head() {
    let target = tiny_target(4);
    let mut graph = Graph::new();
    let entry = graph.entry();
    let p1 = graph.add_block();
    let p2 = graph.add_block();
    let join = graph.add_block();
    graph.set_preds(p1, vec![entry]);
    graph.set_preds(p2, vec![entry]);
    graph.set_preds(join, vec![p1, p2]);

    let x = imm(&mut graph, &target, p1);
    let y = imm(&mut graph, &target, p2);

    let add = target.opcode("add");
    let filler = imm(&mut graph, &target, join);
    let phi = crate::testutil::phi(&mut graph, join, &[x, y]);
    let sum = graph.add_machine(join, &target, add, Mode::Int32, &[phi, filler]);
    nodes::keep(&mut graph, join, &[sum]);

    schedule(&mut graph, &mut Trivial);

    // The phi precedes the filler even though the filler was created
    // first.
    assert_eq!(position(&graph, phi), 0);
}
