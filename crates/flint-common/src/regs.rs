use std::fmt::{self, Display};

use bitflags::bitflags;

use crate::ir::Mode;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ClassId(pub usize);

bitflags! {
    pub struct RegisterKind: u8 {
        const CALLER_SAVE = 0b0001;
        const CALLEE_SAVE = 0b0010;
        /// Never handed out by the allocator (e.g. the stack pointer).
        const IGNORE      = 0b0100;
        /// A placeholder without hardware backing (no-reg, unknown).
        const SYNTHETIC   = 0b1000;
    }
}

/// A set of registers of one class, as a bitset over register indices.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct RegisterSet(u64);

impl RegisterSet {
    pub const EMPTY: RegisterSet = RegisterSet(0);

    pub fn single(index: usize) -> Self {
        assert!(index < 64);
        RegisterSet(1 << index)
    }

    pub fn insert(&mut self, index: usize) {
        assert!(index < 64);
        self.0 |= 1 << index;
    }

    pub fn remove(&mut self, index: usize) {
        self.0 &= !(1 << index);
    }

    pub fn contains(&self, index: usize) -> bool {
        index < 64 && self.0 & (1 << index) != 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// The lowest-indexed register in the set.
    pub fn first(&self) -> Option<usize> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as usize)
        }
    }

    pub fn intersect(self, other: RegisterSet) -> RegisterSet {
        RegisterSet(self.0 & other.0)
    }

    pub fn union(self, other: RegisterSet) -> RegisterSet {
        RegisterSet(self.0 | other.0)
    }

    pub fn difference(self, other: RegisterSet) -> RegisterSet {
        RegisterSet(self.0 & !other.0)
    }

    pub fn is_subset(self, other: RegisterSet) -> bool {
        self.0 & !other.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> {
        let bits = self.0;
        (0..64).filter(move |i| bits & (1 << i) != 0)
    }
}

impl FromIterator<usize> for RegisterSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = RegisterSet::EMPTY;
        for index in iter {
            set.insert(index);
        }
        set
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Register {
    pub name: &'static str,
    pub kind: RegisterKind,
}

/// A named set of interchangeable physical registers. The class mode is
/// the widest mode the class can hold, which is the mode of the
/// last-listed register.
#[derive(Clone, Debug)]
pub struct RegisterClass {
    pub name: &'static str,
    pub mode: Mode,
    pub registers: Vec<Register>,
}

impl RegisterClass {
    pub fn new(name: &'static str, mode: Mode, registers: Vec<Register>) -> Self {
        Self {
            name,
            mode,
            registers,
        }
    }

    /// All registers of the class, including ignored and synthetic ones.
    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    pub fn register(&self, index: usize) -> &Register {
        &self.registers[index]
    }

    pub fn index_of(&self, name: &str) -> usize {
        self.registers
            .iter()
            .position(|reg| reg.name == name)
            .unwrap_or_else(|| panic!("no register {} in class {}", name, self.name))
    }

    /// Registers the allocator may hand out.
    pub fn allocatable(&self) -> RegisterSet {
        self.registers
            .iter()
            .enumerate()
            .filter(|(_, reg)| {
                !reg.kind
                    .intersects(RegisterKind::IGNORE | RegisterKind::SYNTHETIC)
            })
            .map(|(index, _)| index)
            .collect()
    }

    /// The register budget `k` the spiller works against.
    pub fn n_allocatable(&self) -> usize {
        self.allocatable().len()
    }
}

bitflags! {
    pub struct ReqFlags: u8 {
        /// The operand produces the new stack pointer.
        const PRODUCES_SP = 0b01;
        /// The operand never takes part in allocation.
        const IGNORE      = 0b10;
    }
}

/// The register requirement attached to one operand position.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RegReq {
    pub class: ClassId,
    /// Admissible registers, if narrower than the whole class.
    pub limited: Option<RegisterSet>,
    /// Output idiom: must be assigned the same register as input N.
    pub same_as: Option<usize>,
    /// Must not share a register with input N.
    pub differ_from: Option<usize>,
    pub flags: ReqFlags,
}

impl RegReq {
    pub fn class(class: ClassId) -> Self {
        Self {
            class,
            limited: None,
            same_as: None,
            differ_from: None,
            flags: ReqFlags::empty(),
        }
    }

    pub fn limited(class: ClassId, regs: RegisterSet) -> Self {
        assert!(!regs.is_empty());
        Self {
            limited: Some(regs),
            ..Self::class(class)
        }
    }

    pub fn same_as(class: ClassId, input: usize) -> Self {
        Self {
            same_as: Some(input),
            ..Self::class(class)
        }
    }

    pub fn differ_from(class: ClassId, input: usize) -> Self {
        Self {
            differ_from: Some(input),
            ..Self::class(class)
        }
    }

    pub fn ignore(class: ClassId) -> Self {
        Self {
            flags: ReqFlags::IGNORE,
            ..Self::class(class)
        }
    }

    pub fn is_limited(&self) -> bool {
        self.limited.is_some()
    }

    /// The registers this requirement admits.
    pub fn admissible(&self, class: &RegisterClass) -> RegisterSet {
        match self.limited {
            Some(regs) => regs,
            None => class.allocatable(),
        }
    }
}

impl Display for RegReq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cls{}", self.class.0)?;
        if let Some(regs) = self.limited {
            write!(f, "[")?;
            for (i, reg) in regs.iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                write!(f, "r{}", reg)?;
            }
            write!(f, "]")?;
        }
        if let Some(n) = self.same_as {
            write!(f, " same_as({})", n)?;
        }
        if let Some(n) = self.differ_from {
            write!(f, " differ_from({})", n)?;
        }
        Ok(())
    }
}
