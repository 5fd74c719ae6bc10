//! Executable invariants over an allocated graph, run at the end of
//! the pipeline. Any violation is a bug in an earlier stage and
//! aborts.

use std::collections::HashMap;

use flint_common::ir::{Graph, Mode, NodeId, Op};
use flint_common::opspec::Target;
use flint_common::regs::{ClassId, RegReq, RegisterSet};
use log::debug;

use crate::color::borders;
use crate::live::liveness;
use crate::get_reg;

pub fn verify(graph: &Graph, target: &Target) {
    debug!("verifying the allocated graph");

    verify_schedule(graph);
    verify_perms(graph);
    verify_spill_chains(graph);

    for class in target.class_ids() {
        verify_class(graph, target, class);
    }
}

/// Every block-local data predecessor of a scheduled node comes
/// earlier in the schedule.
fn verify_schedule(graph: &Graph) {
    for block in graph.blocks() {
        let positions: HashMap<NodeId, usize> = graph
            .sched
            .nodes(block)
            .into_iter()
            .enumerate()
            .map(|(index, node)| (node, index))
            .collect();

        for (node, position) in positions.iter() {
            if graph.is_phi(*node) {
                continue;
            }

            for value in graph.ins(*node) {
                if graph.block_of(*value) == block && graph.sched.is_scheduled(*value) {
                    assert!(
                        positions[value] < *position,
                        "{} is scheduled behind its user {}",
                        value,
                        node
                    );
                }
            }
        }
    }
}

/// Simulate each block's border list: register pressure stays within
/// the class budget and no two overlapping values share a register.
fn verify_class(graph: &Graph, target: &Target, class: ClassId) {
    let cls = target.class(class);
    let live = liveness(graph);
    let allocatable = cls.allocatable();
    let budget = cls.n_allocatable();

    for block in graph.blocks() {
        let mut owners: HashMap<usize, NodeId> = HashMap::new();

        for border in borders(graph, class, &live, block) {
            let value = border.value;
            let reg = get_reg(graph, value)
                .unwrap_or_else(|| panic!("{} was left without a register", value));

            if border.is_def {
                assert!(
                    allocatable.contains(reg),
                    "{} got the unallocatable register {}",
                    value,
                    cls.register(reg).name
                );

                if let Some(other) = owners.insert(reg, value) {
                    panic!(
                        "{} and {} interfere but share register {}",
                        other,
                        value,
                        cls.register(reg).name
                    );
                }
                assert!(
                    owners.len() <= budget,
                    "register pressure in {} exceeds {}",
                    block,
                    budget
                );
            } else {
                owners.remove(&reg);
            }
        }
    }

    verify_limits(graph, class);
}

/// Registers respect every limited operand requirement.
fn verify_limits(graph: &Graph, class: ClassId) {
    for node in graph.node_ids() {
        for (position, req) in graph.info(node).ins.iter().enumerate() {
            if let Some(limited) = limited_of(req, class) {
                let carrier = graph.input(node, position);
                if let Some(reg) = get_reg(graph, carrier) {
                    assert!(
                        limited.contains(reg),
                        "input {} of {} is outside its limited set",
                        position,
                        node
                    );
                }
            }
        }

        for (index, req) in graph.info(node).outs.iter().enumerate() {
            if let Some(limited) = limited_of(req, class) {
                let carrier = match out_carrier(graph, node, index) {
                    Some(carrier) => carrier,
                    None => continue,
                };
                if let Some(reg) = get_reg(graph, carrier) {
                    assert!(
                        limited.contains(reg),
                        "output {} of {} is outside its limited set",
                        index,
                        node
                    );
                }
            }
        }
    }
}

/// A Perm maps its input requirements onto its outputs one-to-one.
fn verify_perms(graph: &Graph) {
    for node in graph.node_ids() {
        if graph.op(node) != Op::Perm {
            continue;
        }

        let info = graph.info(node);
        assert_eq!(info.ins.len(), info.outs.len(), "{} is lopsided", node);
        assert_eq!(
            req_multiset(&info.ins),
            req_multiset(&info.outs),
            "{} does not preserve its requirements",
            node
        );
    }
}

/// Reloads read frame entities some spill wrote.
fn verify_spill_chains(graph: &Graph) {
    let written: Vec<_> = graph
        .node_ids()
        .filter(|node| graph.op(*node) == Op::Spill)
        .map(|node| graph.info(node).entity.expect("spill without an entity"))
        .collect();

    for node in graph.node_ids() {
        if graph.op(node) == Op::Reload {
            let entity = graph.info(node).entity.expect("reload without an entity");
            assert!(
                written.contains(&entity),
                "{} reloads an entity no spill wrote",
                node
            );
        }
    }
}

fn limited_of(req: &Option<RegReq>, class: ClassId) -> Option<RegisterSet> {
    match req {
        Some(req) if req.class == class => req.limited,
        _ => None,
    }
}

fn out_carrier(graph: &Graph, node: NodeId, index: usize) -> Option<NodeId> {
    if graph.mode(node) == Mode::Tuple {
        graph
            .projs(node)
            .into_iter()
            .find(|proj| matches!(graph.op(*proj), Op::Proj(at) if at == index))
    } else if index == 0 {
        Some(node)
    } else {
        None
    }
}

fn req_multiset(reqs: &[Option<RegReq>]) -> Vec<(usize, Vec<usize>)> {
    let mut set: Vec<(usize, Vec<usize>)> = reqs
        .iter()
        .flatten()
        .map(|req| {
            let limited = req
                .limited
                .map(|regs| regs.iter().collect())
                .unwrap_or_default();
            (req.class.0, limited)
        })
        .collect();
    set.sort();
    set
}

#[cfg(test)]
mod tests {
    use flint_common::ir::{Graph, Mode, Op};
    use flint_common::opspec::ia32;

    use crate::sched::Trivial;
    use crate::testutil::{imm, tiny_target};
    use crate::{get_reg, nodes, run};

    fn count(graph: &Graph, op: Op) -> usize {
        graph.node_ids().filter(|id| graph.op(*id) == op).count()
    }

    #[test]
    fn pipeline_allocates_a_constrained_program() {
        let target = ia32();
        let mut graph = Graph::new();
        let entry = graph.entry();

        let imm_op = target.opcode("imm");
        let add = target.opcode("add");
        let mull = target.opcode("mull");

        let a = graph.add_machine(entry, target, imm_op, Mode::Int32, &[]);
        let b = graph.add_machine(entry, target, imm_op, Mode::Int32, &[]);
        let c = graph.add_machine(entry, target, imm_op, Mode::Int32, &[]);
        let d = graph.add_machine(entry, target, imm_op, Mode::Int32, &[]);

        let mul = graph.add_machine(entry, target, mull, Mode::Tuple, &[a, b]);
        let lo = graph.add_proj(mul, 0, Mode::Int32);
        let hi = graph.add_proj(mul, 1, Mode::Int32);

        let sum = graph.add_machine(entry, target, add, Mode::Int32, &[c, lo]);
        nodes::keep(&mut graph, entry, &[sum, hi, d]);

        run(&mut graph, target, &mut Trivial);

        // The widening multiply writes eax/edx, and its first operand
        // was fed through a Perm projection pinned to eax.
        assert_eq!(get_reg(&graph, lo), Some(0));
        assert_eq!(get_reg(&graph, hi), Some(2));

        let fed = graph.input(mul, 0);
        assert!(graph.is_proj(fed));
        assert_eq!(get_reg(&graph, fed), Some(0));

        // The four-input Perm covered everything live across the
        // multiply.
        assert_eq!(count(&graph, Op::Perm), 1);
    }

    #[test]
    fn pipeline_spills_under_pressure() {
        let target = tiny_target(2);
        let mut graph = Graph::new();
        let entry = graph.entry();

        let a = imm(&mut graph, &target, entry);
        let b = imm(&mut graph, &target, entry);
        let c = imm(&mut graph, &target, entry);
        let ka = nodes::keep(&mut graph, entry, &[a]);
        let kb = nodes::keep(&mut graph, entry, &[b]);
        let kc = nodes::keep(&mut graph, entry, &[c]);

        run(&mut graph, &target, &mut Trivial);

        assert_eq!(count(&graph, Op::Spill), 1);
        assert_eq!(count(&graph, Op::Reload), 1);

        for keep in [ka, kb, kc] {
            let value = graph.input(keep, 0);
            assert!(get_reg(&graph, value).is_some());
        }
    }

    #[test]
    fn pipeline_handles_border_reloads() {
        let target = tiny_target(2);
        let mut graph = Graph::new();
        let entry = graph.entry();
        let p1 = graph.add_block();
        let p2 = graph.add_block();
        let join = graph.add_block();
        graph.set_preds(p1, vec![entry]);
        graph.set_preds(p2, vec![entry]);
        graph.set_preds(join, vec![p1, p2]);

        let a = imm(&mut graph, &target, entry);
        let b = imm(&mut graph, &target, entry);
        nodes::keep(&mut graph, p1, &[]);
        let c = imm(&mut graph, &target, p2);
        nodes::keep(&mut graph, p2, &[c]);
        nodes::keep(&mut graph, join, &[a]);
        let kb = nodes::keep(&mut graph, join, &[b]);

        run(&mut graph, &target, &mut Trivial);

        let reload = graph.input(kb, 0);
        assert_eq!(graph.op(reload), Op::Reload);
        assert_ne!(get_reg(&graph, reload), None);
    }

    #[test]
    fn pipeline_colors_loops() {
        let target = tiny_target(3);
        let mut graph = Graph::new();
        let entry = graph.entry();
        let head = graph.add_block();
        let body = graph.add_block();
        let exit = graph.add_block();
        graph.set_preds(head, vec![entry, body]);
        graph.set_preds(body, vec![head]);
        graph.set_preds(exit, vec![head]);

        let init = imm(&mut graph, &target, entry);
        let step = imm(&mut graph, &target, body);

        let phi = crate::testutil::phi(&mut graph, head, &[init, step]);
        nodes::keep(&mut graph, head, &[phi]);
        nodes::keep(&mut graph, exit, &[phi]);

        run(&mut graph, &target, &mut Trivial);

        let regs: Vec<Option<usize>> = [init, step, phi]
            .iter()
            .map(|value| get_reg(&graph, *value))
            .collect();
        assert!(regs.iter().all(|reg| reg.is_some()));
    }
}
