use bitflags::bitflags;

use super::EntityId;
use crate::regs::RegReq;

bitflags! {
    pub struct NodeFlags: u8 {
        /// The value must never be evicted from a register; the next-use
        /// oracle reports distance zero for it.
        const DONT_SPILL = 0b001;
        /// The value can be recomputed instead of reloaded.
        const REMAT      = 0b010;
        /// Not considered for register allocation at all.
        const IGNORE     = 0b100;
    }
}

/// Per-node backend record: register requirements per operand position,
/// the registers assigned by the colorer, and the frame entity for
/// nodes that touch the stack frame.
///
/// Requirement slots are `None` for positions that do not carry a
/// register value (memory and control operands).
#[derive(Clone, Debug, Default)]
pub struct NodeInfo {
    pub ins: Vec<Option<RegReq>>,
    pub outs: Vec<Option<RegReq>>,
    pub assigned: Vec<Option<usize>>,
    pub entity: Option<EntityId>,
    pub flags: NodeFlags,
}

impl Default for NodeFlags {
    fn default() -> Self {
        NodeFlags::empty()
    }
}

impl NodeInfo {
    pub fn new(ins: Vec<Option<RegReq>>, outs: Vec<Option<RegReq>>) -> Self {
        let assigned = vec![None; outs.len()];
        Self {
            ins,
            outs,
            assigned,
            entity: None,
            flags: NodeFlags::empty(),
        }
    }
}
