use bitflags::bitflags;
use once_cell::sync::Lazy;

use crate::ir::{Mode, Node};
use crate::regs::{ClassId, RegReq, Register, RegisterClass, RegisterKind, RegisterSet};

/// Index into a target's operation table.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Opcode(pub usize);

bitflags! {
    pub struct OpFlags: u8 {
        const COMMUTATIVE = 0b0001;
        /// Must stay in the block it was created in.
        const PINNED      = 0b0010;
        /// Carries a label the emitter must place.
        const LABELED     = 0b0100;
        /// Changes control flow; always the last node of its block.
        const CONTROL     = 0b1000;
    }
}

/// The declarative description of one target opcode: operand register
/// requirements, projection names for tuple producers, flags, a
/// structural comparator for equivalence testing, an emit template and
/// a latency. This table is the only target-specific knowledge the
/// pipeline consumes.
#[derive(Clone, Debug)]
pub struct OpSpec {
    pub name: &'static str,
    pub ins: Vec<Option<RegReq>>,
    pub outs: Vec<Option<RegReq>>,
    pub projs: Vec<&'static str>,
    pub flags: OpFlags,
    pub cmp: Option<fn(&Node, &Node) -> bool>,
    pub emit: &'static str,
    pub latency: u32,
}

#[derive(Clone, Debug)]
pub struct Target {
    pub name: &'static str,
    pub classes: Vec<RegisterClass>,
    pub ops: Vec<OpSpec>,
    /// Class and index of the stack-pointer register.
    pub stack_pointer: (ClassId, usize),
}

impl Target {
    pub fn class(&self, id: ClassId) -> &RegisterClass {
        &self.classes[id.0]
    }

    pub fn class_ids(&self) -> impl Iterator<Item = ClassId> {
        (0..self.classes.len()).map(ClassId)
    }

    pub fn op(&self, op: Opcode) -> &OpSpec {
        &self.ops[op.0]
    }

    pub fn opcode(&self, name: &str) -> Opcode {
        self.ops
            .iter()
            .position(|spec| spec.name == name)
            .map(Opcode)
            .unwrap_or_else(|| panic!("no opcode {} in target {}", name, self.name))
    }
}

/// Conditional-move mnemonic for min/max. Signedness is decided here,
/// once, from the mode; emit templates do not repeat the test.
pub fn min_max_mnemonic(mode: Mode, is_max: bool) -> &'static str {
    match (mode.is_signed(), is_max) {
        (true, true) => "cmovl",
        (true, false) => "cmovg",
        (false, true) => "cmovb",
        (false, false) => "cmova",
    }
}

/// The 32-bit x86 target, built once per process.
pub fn ia32() -> &'static Target {
    &IA32
}

static IA32: Lazy<Target> = Lazy::new(build_ia32);

const GP: ClassId = ClassId(0);
const FP: ClassId = ClassId(1);

const EAX: usize = 0;
const ECX: usize = 1;
const EDX: usize = 2;
const ESP: usize = 7;

fn cmp_mode(a: &Node, b: &Node) -> bool {
    a.mode == b.mode
}

fn build_ia32() -> Target {
    let gp = RegisterClass::new(
        "gp",
        Mode::Int32,
        vec![
            reg("eax", RegisterKind::CALLER_SAVE),
            reg("ecx", RegisterKind::CALLER_SAVE),
            reg("edx", RegisterKind::CALLER_SAVE),
            reg("ebx", RegisterKind::CALLEE_SAVE),
            reg("esi", RegisterKind::CALLEE_SAVE),
            reg("edi", RegisterKind::CALLEE_SAVE),
            reg("ebp", RegisterKind::CALLEE_SAVE | RegisterKind::IGNORE),
            reg("esp", RegisterKind::IGNORE),
            reg("gp_noreg", RegisterKind::SYNTHETIC),
            reg("gp_unknown", RegisterKind::SYNTHETIC),
        ],
    );

    let fp = RegisterClass::new(
        "fp",
        Mode::Float64,
        vec![
            reg("xmm0", RegisterKind::CALLER_SAVE),
            reg("xmm1", RegisterKind::CALLER_SAVE),
            reg("xmm2", RegisterKind::CALLER_SAVE),
            reg("xmm3", RegisterKind::CALLER_SAVE),
            reg("xmm4", RegisterKind::CALLER_SAVE),
            reg("xmm5", RegisterKind::CALLER_SAVE),
            reg("xmm6", RegisterKind::CALLER_SAVE),
            reg("xmm7", RegisterKind::CALLER_SAVE),
            reg("fp_noreg", RegisterKind::SYNTHETIC),
        ],
    );

    let ops = vec![
        two_address("add", OpFlags::COMMUTATIVE, "add %D0, %S1", 1),
        two_address("sub", OpFlags::empty(), "sub %D0, %S1", 1),
        two_address("and", OpFlags::COMMUTATIVE, "and %D0, %S1", 1),
        two_address("or", OpFlags::COMMUTATIVE, "or %D0, %S1", 1),
        two_address("xor", OpFlags::COMMUTATIVE, "xor %D0, %S1", 1),
        shift("shl", "shl %D0, cl"),
        shift("shr", "shr %D0, cl"),
        shift("sar", "sar %D0, cl"),
        OpSpec {
            name: "neg",
            ins: vec![Some(RegReq::class(GP))],
            outs: vec![Some(RegReq::same_as(GP, 0))],
            projs: vec![],
            flags: OpFlags::empty(),
            cmp: None,
            emit: "neg %D0",
            latency: 1,
        },
        OpSpec {
            name: "imm",
            ins: vec![],
            outs: vec![Some(RegReq::class(GP))],
            projs: vec![],
            flags: OpFlags::empty(),
            cmp: Some(cmp_mode),
            emit: "mov %D0, %C",
            latency: 1,
        },
        OpSpec {
            name: "mov",
            ins: vec![Some(RegReq::class(GP))],
            outs: vec![Some(RegReq::class(GP))],
            projs: vec![],
            flags: OpFlags::empty(),
            cmp: None,
            emit: "mov %D0, %S0",
            latency: 1,
        },
        OpSpec {
            name: "load",
            ins: vec![None, Some(RegReq::class(GP))],
            outs: vec![None, Some(RegReq::class(GP))],
            projs: vec!["mem", "res"],
            flags: OpFlags::empty(),
            cmp: Some(cmp_mode),
            emit: "mov %D1, [%S1]",
            latency: 2,
        },
        OpSpec {
            name: "store",
            ins: vec![None, Some(RegReq::class(GP)), Some(RegReq::class(GP))],
            outs: vec![None],
            projs: vec![],
            flags: OpFlags::empty(),
            cmp: Some(cmp_mode),
            emit: "mov [%S1], %S2",
            latency: 2,
        },
        OpSpec {
            name: "mull",
            ins: vec![
                Some(RegReq::limited(GP, RegisterSet::single(EAX))),
                Some(RegReq::class(GP)),
            ],
            outs: vec![
                Some(RegReq::limited(GP, RegisterSet::single(EAX))),
                Some(RegReq::limited(GP, RegisterSet::single(EDX))),
            ],
            projs: vec!["res_low", "res_high"],
            flags: OpFlags::COMMUTATIVE,
            cmp: None,
            emit: "mul %S1",
            latency: 3,
        },
        OpSpec {
            name: "div",
            ins: vec![
                Some(RegReq::limited(GP, RegisterSet::single(EAX))),
                Some(RegReq::limited(GP, RegisterSet::single(EDX))),
                Some(RegReq::class(GP)),
            ],
            outs: vec![
                Some(RegReq::limited(GP, RegisterSet::single(EAX))),
                Some(RegReq::limited(GP, RegisterSet::single(EDX))),
            ],
            projs: vec!["quot", "rem"],
            flags: OpFlags::empty(),
            cmp: None,
            emit: "div %S2",
            latency: 25,
        },
        OpSpec {
            name: "cmp",
            ins: vec![Some(RegReq::class(GP)), Some(RegReq::class(GP))],
            outs: vec![],
            projs: vec![],
            flags: OpFlags::empty(),
            cmp: None,
            emit: "cmp %S0, %S1",
            latency: 1,
        },
        OpSpec {
            name: "test",
            ins: vec![Some(RegReq::class(GP)), Some(RegReq::class(GP))],
            outs: vec![],
            projs: vec![],
            flags: OpFlags::COMMUTATIVE,
            cmp: None,
            emit: "test %S0, %S1",
            latency: 1,
        },
        OpSpec {
            name: "lea",
            ins: vec![Some(RegReq::class(GP)), Some(RegReq::class(GP))],
            outs: vec![Some(RegReq::class(GP))],
            projs: vec![],
            flags: OpFlags::empty(),
            cmp: Some(cmp_mode),
            emit: "lea %D0, [%S0+%S1]",
            latency: 1,
        },
        minmax("min"),
        minmax("max"),
        OpSpec {
            name: "jmp",
            ins: vec![],
            outs: vec![],
            projs: vec![],
            flags: OpFlags::CONTROL | OpFlags::PINNED | OpFlags::LABELED,
            cmp: None,
            emit: "jmp %L0",
            latency: 1,
        },
        OpSpec {
            name: "jcc",
            ins: vec![],
            outs: vec![],
            projs: vec![],
            flags: OpFlags::CONTROL | OpFlags::PINNED | OpFlags::LABELED,
            cmp: None,
            emit: "j%CC %L0",
            latency: 1,
        },
        OpSpec {
            name: "ret",
            ins: vec![],
            outs: vec![],
            projs: vec![],
            flags: OpFlags::CONTROL | OpFlags::PINNED,
            cmp: None,
            emit: "ret",
            latency: 1,
        },
        OpSpec {
            name: "fadd",
            ins: vec![Some(RegReq::class(FP)), Some(RegReq::class(FP))],
            outs: vec![Some(RegReq::same_as(FP, 0))],
            projs: vec![],
            flags: OpFlags::COMMUTATIVE,
            cmp: None,
            emit: "addsd %D0, %S1",
            latency: 3,
        },
        OpSpec {
            name: "fmul",
            ins: vec![Some(RegReq::class(FP)), Some(RegReq::class(FP))],
            outs: vec![Some(RegReq::same_as(FP, 0))],
            projs: vec![],
            flags: OpFlags::COMMUTATIVE,
            cmp: None,
            emit: "mulsd %D0, %S1",
            latency: 5,
        },
    ];

    Target {
        name: "ia32",
        classes: vec![gp, fp],
        ops,
        stack_pointer: (GP, ESP),
    }
}

fn reg(name: &'static str, kind: RegisterKind) -> Register {
    Register { name, kind }
}

fn two_address(name: &'static str, flags: OpFlags, emit: &'static str, latency: u32) -> OpSpec {
    OpSpec {
        name,
        ins: vec![Some(RegReq::class(GP)), Some(RegReq::class(GP))],
        outs: vec![Some(RegReq::same_as(GP, 0))],
        projs: vec![],
        flags,
        cmp: None,
        emit,
        latency,
    }
}

fn shift(name: &'static str, emit: &'static str) -> OpSpec {
    OpSpec {
        name,
        ins: vec![
            Some(RegReq::class(GP)),
            Some(RegReq::limited(GP, RegisterSet::single(ECX))),
        ],
        outs: vec![Some(RegReq::same_as(GP, 0))],
        projs: vec![],
        flags: OpFlags::empty(),
        cmp: None,
        emit,
        latency: 1,
    }
}

fn minmax(name: &'static str) -> OpSpec {
    OpSpec {
        name,
        ins: vec![Some(RegReq::class(GP)), Some(RegReq::class(GP))],
        outs: vec![Some(RegReq::same_as(GP, 0))],
        projs: vec![],
        flags: OpFlags::COMMUTATIVE,
        cmp: Some(cmp_mode),
        emit: "cmp %D0, %S1; %MM %D0, %S1",
        latency: 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_consistent() {
        let target = ia32();

        for spec in target.ops.iter() {
            // Tuple producers name each of their projections.
            if !spec.projs.is_empty() {
                assert_eq!(spec.projs.len(), spec.outs.len(), "{}", spec.name);
            }

            for req in spec.ins.iter().chain(spec.outs.iter()).flatten() {
                let class = target.class(req.class);
                if let Some(limited) = req.limited {
                    assert!(limited.is_subset(class.allocatable()), "{}", spec.name);
                }
                if let Some(n) = req.same_as {
                    assert!(n < spec.ins.len(), "{}", spec.name);
                }
            }
        }
    }

    #[test]
    fn gp_budget_and_stack_pointer() {
        let target = ia32();
        let (class, index) = target.stack_pointer;

        assert_eq!(target.class(class).n_allocatable(), 6);
        assert_eq!(target.class(class).register(index).name, "esp");
    }

    #[test]
    fn shift_count_is_pinned_to_ecx() {
        let target = ia32();
        let spec = target.op(target.opcode("shl"));

        let req = spec.ins[1].as_ref().unwrap();
        assert_eq!(req.limited, Some(RegisterSet::single(1)));
    }

    #[test]
    fn signedness_is_decided_from_the_mode() {
        assert_eq!(min_max_mnemonic(Mode::Int32, true), "cmovl");
        assert_eq!(min_max_mnemonic(Mode::Uint32, true), "cmovb");
        assert_eq!(min_max_mnemonic(Mode::Int32, false), "cmovg");
        assert_eq!(min_max_mnemonic(Mode::Uint32, false), "cmova");
    }
}
