use std::sync::OnceLock;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::bin_type::BinType;
use crate::stack::{StackState, StackTransformation, TypeTag};

/// The numeric tag identifying an instruction in emitted bytes.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    IntoPrimitive,
    TryFromPrimitive,
)]
#[repr(i8)]
pub enum Opcode {
    Nop = 0,
    Dlog = 1,
    Push = 2,
    Pop = 3,
    Call = 4,
    UnsafeCall = 5,
    Ret = 6,
    Jmp = 7,
    JmpTrue = 8,
    JmpFalse = 9,
    CmpGt = 10,
    CmpLt = 11,
    CmpGe = 12,
    CmpLe = 13,
    CmpEq = 14,
    CmpNe = 15,
    Add = 16,
    Sub = 17,
    Mul = 18,
    Div = 19,
    Mod = 20,
    PushMem = 21,
    PopMem = 22,
    New = 23,
    Free = 24,
    Dup = 25,
    Exit = -1,
}

impl Opcode {
    pub fn byte(self) -> u8 {
        i8::from(self) as u8
    }
}

/// How one instruction parameter consumes its argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Operand of a fixed binary type; `ptr`/`rptr` operands accept
    /// symbolic references resolved at emission.
    Value(BinType),
    /// `type` pseudo-parameter: the named type's one-byte index. Binds
    /// the generic it names to the named type.
    TypeIndex(&'static str),
    /// `sizeof` pseudo-parameter: the named type's byte size as an `int`.
    SizeOf,
    /// `var` pseudo-parameter: the argument's own type index followed by
    /// its encoded value (or a slot reference). Binds the generic it
    /// names to the argument's type.
    Var(&'static str),
}

/// One registered opcode: its parameter shape and stack contract.
#[derive(Debug)]
pub struct InstructionTemplate {
    pub name: &'static str,
    pub opcode: Opcode,
    pub params: &'static [ParamKind],
    pub transformation: StackTransformation,
}

fn transformation(before: Vec<TypeTag>, after: Vec<TypeTag>) -> StackTransformation {
    StackState::new(before).then(StackState::new(after))
}

fn build_instruction_set() -> Vec<InstructionTemplate> {
    use BinType::{Bool, Int, Ptr, Rptr};
    use ParamKind as P;
    use TypeTag::{Concrete, Generic};

    let none = || transformation(vec![], vec![]);
    let binary = |result: TypeTag| {
        transformation(vec![Generic("a"), Generic("b")], vec![result])
    };

    let mut set = vec![
        InstructionTemplate {
            name: "nop",
            opcode: Opcode::Nop,
            params: &[],
            transformation: none(),
        },
        // the top of the stack is intentionally left unchecked here
        InstructionTemplate {
            name: "dlog",
            opcode: Opcode::Dlog,
            params: &[P::TypeIndex("T")],
            transformation: none(),
        },
        InstructionTemplate {
            name: "push",
            opcode: Opcode::Push,
            params: &[P::Var("T")],
            transformation: transformation(vec![], vec![Generic("T")]),
        },
        InstructionTemplate {
            name: "pop",
            opcode: Opcode::Pop,
            params: &[P::Var("T")],
            transformation: transformation(vec![Generic("T")], vec![]),
        },
        // stack effects of call/ret come from the target's signature and
        // are applied by the assembler
        InstructionTemplate {
            name: "call",
            opcode: Opcode::Call,
            params: &[P::Value(Rptr)],
            transformation: none(),
        },
        InstructionTemplate {
            name: "unsafe_call",
            opcode: Opcode::UnsafeCall,
            params: &[P::Value(Rptr)],
            transformation: none(),
        },
        InstructionTemplate {
            name: "ret",
            opcode: Opcode::Ret,
            params: &[],
            transformation: none(),
        },
        InstructionTemplate {
            name: "jmp",
            opcode: Opcode::Jmp,
            params: &[P::Value(Rptr)],
            transformation: none(),
        },
        InstructionTemplate {
            name: "jmp_true",
            opcode: Opcode::JmpTrue,
            params: &[P::Value(Rptr)],
            transformation: transformation(vec![Concrete(Bool)], vec![]),
        },
        InstructionTemplate {
            name: "jmp_false",
            opcode: Opcode::JmpFalse,
            params: &[P::Value(Rptr)],
            transformation: transformation(vec![Concrete(Bool)], vec![]),
        },
    ];

    let comparisons: [(&'static str, Opcode); 6] = [
        ("cmp_gt", Opcode::CmpGt),
        ("cmp_lt", Opcode::CmpLt),
        ("cmp_ge", Opcode::CmpGe),
        ("cmp_le", Opcode::CmpLe),
        ("cmp_eq", Opcode::CmpEq),
        ("cmp_ne", Opcode::CmpNe),
    ];
    for (name, opcode) in comparisons {
        set.push(InstructionTemplate {
            name,
            opcode,
            params: &[P::TypeIndex("a"), P::TypeIndex("b")],
            transformation: binary(Concrete(Bool)),
        });
    }

    let arithmetic: [(&'static str, Opcode); 5] = [
        ("add", Opcode::Add),
        ("sub", Opcode::Sub),
        ("mul", Opcode::Mul),
        ("div", Opcode::Div),
        ("mod", Opcode::Mod),
    ];
    for (name, opcode) in arithmetic {
        set.push(InstructionTemplate {
            name,
            opcode,
            params: &[P::TypeIndex("a"), P::TypeIndex("b")],
            transformation: binary(Generic("a")),
        });
    }

    set.extend([
        InstructionTemplate {
            name: "push_mem",
            opcode: Opcode::PushMem,
            params: &[P::TypeIndex("T"), P::TypeIndex("P"), P::Value(Ptr)],
            transformation: transformation(vec![Concrete(Ptr)], vec![Generic("T")]),
        },
        InstructionTemplate {
            name: "pop_mem",
            opcode: Opcode::PopMem,
            params: &[P::TypeIndex("T"), P::TypeIndex("P"), P::Value(Ptr)],
            transformation: transformation(
                vec![Generic("T"), Concrete(Ptr)],
                vec![],
            ),
        },
        InstructionTemplate {
            name: "new",
            opcode: Opcode::New,
            params: &[P::SizeOf, P::Value(Int)],
            transformation: transformation(vec![], vec![Concrete(Ptr)]),
        },
        InstructionTemplate {
            name: "free",
            opcode: Opcode::Free,
            params: &[],
            transformation: transformation(vec![Concrete(Ptr)], vec![]),
        },
        InstructionTemplate {
            name: "dup",
            opcode: Opcode::Dup,
            params: &[],
            transformation: transformation(
                vec![Generic("T")],
                vec![Generic("T"), Generic("T")],
            ),
        },
        InstructionTemplate {
            name: "exit",
            opcode: Opcode::Exit,
            params: &[],
            transformation: none(),
        },
    ]);

    set
}

/// The process-wide opcode registry, initialized once and read-only
/// afterwards.
pub fn instruction_set() -> &'static [InstructionTemplate] {
    static SET: OnceLock<Vec<InstructionTemplate>> = OnceLock::new();
    SET.get_or_init(build_instruction_set)
}

pub fn lookup(name: &str) -> Option<&'static InstructionTemplate> {
    instruction_set().iter().find(|t| t.name == name)
}
