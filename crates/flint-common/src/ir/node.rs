use std::fmt::{self, Display};

use super::BlockId;
use crate::opspec::Opcode;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// The semantic type of a value. Data modes occupy registers, the token
/// modes thread ordering constraints, and `Tuple` marks nodes whose
/// actual values are carried by their projections.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Mode {
    Int8,
    Int16,
    Int32,
    Uint8,
    Uint16,
    Uint32,
    Ptr,
    Float32,
    Float64,
    Memory,
    Control,
    Tuple,
}

impl Mode {
    pub fn is_data(self) -> bool {
        !matches!(self, Mode::Memory | Mode::Control | Mode::Tuple)
    }

    pub fn is_signed(self) -> bool {
        matches!(self, Mode::Int8 | Mode::Int16 | Mode::Int32)
    }

    pub fn is_float(self) -> bool {
        matches!(self, Mode::Float32 | Mode::Float64)
    }

    /// Size of a value of this mode in the frame, in bytes.
    pub fn bytes(self) -> usize {
        match self {
            Mode::Int8 | Mode::Uint8 => 1,
            Mode::Int16 | Mode::Uint16 => 2,
            Mode::Int32 | Mode::Uint32 | Mode::Ptr | Mode::Float32 => 4,
            Mode::Float64 => 8,
            Mode::Memory | Mode::Control | Mode::Tuple => 0,
        }
    }
}

impl Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Int8 => "i8",
            Mode::Int16 => "i16",
            Mode::Int32 => "i32",
            Mode::Uint8 => "u8",
            Mode::Uint16 => "u16",
            Mode::Uint32 => "u32",
            Mode::Ptr => "ptr",
            Mode::Float32 => "f32",
            Mode::Float64 => "f64",
            Mode::Memory => "mem",
            Mode::Control => "ctl",
            Mode::Tuple => "tuple",
        };
        write!(f, "{}", name)
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Op {
    /// Block-start marker, scheduled first in the entry block.
    Start,
    /// Keep-alive anchor. Never scheduled.
    End,
    Phi,
    Proj(usize),
    /// Defined nowhere, available everywhere.
    Unknown,
    /// A target instruction described by the operation table.
    Machine(Opcode),
    Jump,
    Cond,

    Spill,
    Reload,
    Perm,
    Copy,
    Keep,
    CopyKeep,
    MemPerm,
    IncSp(i32),
    AddSp,
    SubSp,
    Call,
    Return,
    FrameAddr,
    Barrier,
    RegParams,
    Sync,
}

impl Op {
    pub fn is_phi(self) -> bool {
        matches!(self, Op::Phi)
    }

    pub fn is_proj(self) -> bool {
        matches!(self, Op::Proj(_))
    }

    /// Keeps, copy-keeps and syncs must be scheduled as soon as they
    /// become ready.
    pub fn forces_scheduling(self) -> bool {
        matches!(self, Op::Keep | Op::CopyKeep | Op::Sync)
    }

    /// Whether nodes of this op occupy a slot in a block schedule.
    pub fn in_schedule(self) -> bool {
        !matches!(self, Op::End | Op::Unknown)
    }

    pub fn name(self) -> &'static str {
        match self {
            Op::Start => "Start",
            Op::End => "End",
            Op::Phi => "Phi",
            Op::Proj(_) => "Proj",
            Op::Unknown => "Unknown",
            Op::Machine(_) => "Machine",
            Op::Jump => "Jump",
            Op::Cond => "Cond",
            Op::Spill => "Spill",
            Op::Reload => "Reload",
            Op::Perm => "Perm",
            Op::Copy => "Copy",
            Op::Keep => "Keep",
            Op::CopyKeep => "CopyKeep",
            Op::MemPerm => "MemPerm",
            Op::IncSp(_) => "IncSp",
            Op::AddSp => "AddSp",
            Op::SubSp => "SubSp",
            Op::Call => "Call",
            Op::Return => "Return",
            Op::FrameAddr => "FrameAddr",
            Op::Barrier => "Barrier",
            Op::RegParams => "RegParams",
            Op::Sync => "Sync",
        }
    }
}

impl Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Clone, Debug)]
pub struct Node {
    pub op: Op,
    pub mode: Mode,
    pub(crate) ins: Vec<NodeId>,
    pub(crate) deps: Vec<NodeId>,
    pub(crate) block: BlockId,
}
