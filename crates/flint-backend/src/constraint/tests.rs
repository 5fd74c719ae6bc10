use flint_common::ir::{Graph, Mode, Op};
use flint_common::opspec::{ia32, OpFlags, OpSpec, Target};
use flint_common::regs::{ClassId, RegReq, Register, RegisterClass, RegisterKind, RegisterSet};

use crate::{get_reg, nodes};

use super::handle;

const CLASS: ClassId = ClassId(0);

/// Six registers and one instruction with asymmetric limited sets:
/// inputs admit {r0..r3} and {r1..r5}, the output admits {r0, r1}.
fn paired_target() -> Target {
    let registers = ["r0", "r1", "r2", "r3", "r4", "r5"]
        .iter()
        .copied()
        .map(|name| Register {
            name,
            kind: RegisterKind::CALLER_SAVE,
        })
        .collect();

    let ops = vec![
        OpSpec {
            name: "imm",
            ins: vec![],
            outs: vec![Some(RegReq::class(CLASS))],
            projs: vec![],
            flags: OpFlags::empty(),
            cmp: None,
            emit: "mov %D0, %C",
            latency: 1,
        },
        OpSpec {
            name: "pick",
            ins: vec![
                Some(RegReq::limited(CLASS, [0, 1, 2, 3].into_iter().collect())),
                Some(RegReq::limited(CLASS, [1, 2, 3, 4, 5].into_iter().collect())),
            ],
            outs: vec![Some(RegReq::limited(CLASS, [0, 1].into_iter().collect()))],
            projs: vec![],
            flags: OpFlags::empty(),
            cmp: None,
            emit: "pick %D0, %S0, %S1",
            latency: 1,
        },
    ];

    Target {
        name: "paired",
        classes: vec![RegisterClass::new("r", Mode::Int32, registers)],
        ops,
        stack_pointer: (CLASS, 0),
    }
}

#[test]
fn outputs_pair_with_the_smallest_compatible_input() {
    let target = paired_target();
    let mut graph = Graph::new();
    let entry = graph.entry();

    let imm = target.opcode("imm");
    let pick = target.opcode("pick");

    let a = graph.add_machine(entry, &target, imm, Mode::Int32, &[]);
    let b = graph.add_machine(entry, &target, imm, Mode::Int32, &[]);
    let out = graph.add_machine(entry, &target, pick, Mode::Int32, &[a, b]);
    nodes::keep(&mut graph, entry, &[out]);

    handle(&mut graph, &target, CLASS);

    // Both operands were routed through the Perm.
    let fed_a = graph.input(out, 0);
    let fed_b = graph.input(out, 1);
    assert!(graph.is_proj(fed_a));
    assert!(graph.is_proj(fed_b));

    // The output pairs with the first input (smaller admissible set)
    // and shares its register, from the pair intersection {r0, r1}.
    let out_reg = get_reg(&graph, out).unwrap();
    assert_eq!(get_reg(&graph, fed_a), Some(out_reg));
    assert!(out_reg <= 1);

    // The second operand stays admissible and distinct.
    let b_reg = get_reg(&graph, fed_b).unwrap();
    assert_ne!(b_reg, out_reg);
    assert!((1..=5).contains(&b_reg));
}

#[test]
fn shift_counts_end_up_in_ecx() {
    let target = ia32();
    let mut graph = Graph::new();
    let entry = graph.entry();

    let imm = target.opcode("imm");
    let shl = target.opcode("shl");

    let value = graph.add_machine(entry, target, imm, Mode::Int32, &[]);
    let count = graph.add_machine(entry, target, imm, Mode::Int32, &[]);
    let shifted = graph.add_machine(entry, target, shl, Mode::Int32, &[value, count]);
    nodes::keep(&mut graph, entry, &[shifted]);

    handle(&mut graph, target, ClassId(0));

    let fed_count = graph.input(shifted, 1);
    assert_eq!(get_reg(&graph, fed_count), Some(1));

    // The should-be-same output shares the first operand's register.
    let fed_value = graph.input(shifted, 0);
    assert_eq!(get_reg(&graph, shifted), get_reg(&graph, fed_value));
}

#[test]
fn perms_preserve_requirements_and_cover_live_values() {
    let target = paired_target();
    let mut graph = Graph::new();
    let entry = graph.entry();

    let imm = target.opcode("imm");
    let pick = target.opcode("pick");

    let a = graph.add_machine(entry, &target, imm, Mode::Int32, &[]);
    let b = graph.add_machine(entry, &target, imm, Mode::Int32, &[]);
    let through = graph.add_machine(entry, &target, imm, Mode::Int32, &[]);
    let out = graph.add_machine(entry, &target, pick, Mode::Int32, &[a, b]);
    nodes::keep(&mut graph, entry, &[out, through]);

    handle(&mut graph, &target, CLASS);

    let perms: Vec<_> = graph
        .node_ids()
        .filter(|id| graph.op(*id) == Op::Perm)
        .collect();
    assert_eq!(perms.len(), 1);

    let perm = perms[0];
    let info = graph.info(perm);
    assert_eq!(info.ins.len(), 3);
    assert_eq!(info.ins, info.outs);

    // The value living through the instruction got one of the free
    // registers and its use was rerouted.
    let projs = graph.projs(perm);
    let through_proj = projs
        .into_iter()
        .find(|proj| graph.skip_proj(*proj) == perm && graph.users(*proj).iter().any(|u| graph.op(u.user) == Op::Keep))
        .expect("live-through projection");
    assert!(get_reg(&graph, through_proj).is_some());

    let taken: RegisterSet = [out, graph.input(out, 0), graph.input(out, 1), through_proj]
        .iter()
        .filter_map(|value| get_reg(&graph, *value))
        .collect();
    // out shares with its partner: three distinct registers in total.
    assert_eq!(taken.len(), 3);
}
