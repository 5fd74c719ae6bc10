use flint_common::ir::{Graph, Mode, NodeId, Op};
use flint_common::opspec::Target;
use flint_common::regs::{ClassId, RegReq, RegisterSet};

use crate::{in_class, value_req};

/// One register-carrying operand position of an instruction. The
/// carrier is the value holding the register: the defined value for
/// outputs, the producing node for inputs.
#[derive(Clone, Debug)]
pub struct Operand {
    pub carrier: NodeId,
    /// Output index for defs, input position for uses.
    pub pos: usize,
    pub req: RegReq,
    /// Admissible registers.
    pub regs: RegisterSet,
    /// Index of the paired operand within the instruction, if any.
    pub partner: Option<usize>,
}

/// An instruction's operands, outputs first: `ops[..use_start]` are
/// defs, the rest are uses.
#[derive(Debug)]
pub struct Insn {
    pub node: NodeId,
    pub ops: Vec<Operand>,
    pub use_start: usize,
    pub has_constraints: bool,
}

pub fn scan(graph: &Graph, target: &Target, class: ClassId, node: NodeId) -> Insn {
    let cls = target.class(class);
    let mut ops = Vec::new();

    if graph.mode(node) == Mode::Tuple {
        for proj in graph.projs(node) {
            if in_class(graph, class, proj) {
                let req = value_req(graph, proj).unwrap().clone();
                let regs = req.admissible(cls);
                let pos = match graph.op(proj) {
                    Op::Proj(index) => index,
                    _ => unreachable!(),
                };
                ops.push(Operand {
                    carrier: proj,
                    pos,
                    req,
                    regs,
                    partner: None,
                });
            }
        }
    } else if in_class(graph, class, node) {
        let req = value_req(graph, node).unwrap().clone();
        let regs = req.admissible(cls);
        ops.push(Operand {
            carrier: node,
            pos: 0,
            req,
            regs,
            partner: None,
        });
    }

    let use_start = ops.len();

    for (pos, value) in graph.ins(node).iter().enumerate() {
        let req = match graph.info(node).ins.get(pos).cloned().flatten() {
            Some(req) if req.class == class => req,
            _ => continue,
        };

        let regs = req.admissible(cls);
        ops.push(Operand {
            carrier: *value,
            pos,
            req,
            regs,
            partner: None,
        });
    }

    let has_constraints = ops.iter().any(|op| op.req.is_limited());

    Insn {
        node,
        ops,
        use_start,
        has_constraints,
    }
}
