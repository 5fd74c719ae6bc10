//! Shared helpers for the test suites: a tiny target with a
//! configurable register budget and a phi constructor.

use flint_common::ir::{BlockId, Graph, Mode, NodeId, NodeInfo, Op};
use flint_common::opspec::{OpFlags, OpSpec, Target};
use flint_common::regs::{ClassId, RegReq, Register, RegisterClass, RegisterKind};

pub const CLASS: ClassId = ClassId(0);

/// A target with `k` allocatable registers, one ignored stack pointer
/// and a minimal operation table.
pub fn tiny_target(k: usize) -> Target {
    const NAMES: [&str; 6] = ["r0", "r1", "r2", "r3", "r4", "r5"];
    assert!(k <= NAMES.len());

    let mut registers: Vec<Register> = NAMES[..k]
        .iter()
        .copied()
        .map(|name| Register {
            name,
            kind: RegisterKind::CALLER_SAVE,
        })
        .collect();
    registers.push(Register {
        name: "sp",
        kind: RegisterKind::IGNORE,
    });

    let class = RegisterClass::new("r", Mode::Int32, registers);

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
            name: "add",
            ins: vec![Some(RegReq::class(CLASS)), Some(RegReq::class(CLASS))],
            outs: vec![Some(RegReq::class(CLASS))],
            projs: vec![],
            flags: OpFlags::COMMUTATIVE,
            cmp: None,
            emit: "add %D0, %S1",
            latency: 1,
        },
    ];

    Target {
        name: "tiny",
        classes: vec![class],
        ops,
        stack_pointer: (CLASS, k),
    }
}

pub fn phi(graph: &mut Graph, block: BlockId, ins: &[NodeId]) -> NodeId {
    let in_reqs = ins.iter().map(|_| Some(RegReq::class(CLASS))).collect();
    let info = NodeInfo::new(in_reqs, vec![Some(RegReq::class(CLASS))]);
    graph.add_with_info(block, Op::Phi, Mode::Int32, ins, info)
}

pub fn imm(graph: &mut Graph, target: &Target, block: BlockId) -> NodeId {
    let op = target.opcode("imm");
    graph.add_machine(block, target, op, Mode::Int32, &[])
}
