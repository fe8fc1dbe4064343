/// Bytecode instruction captured for analysis.
#[derive(Clone, Debug)]
pub struct Instruction {
    pub offset: u32,
    pub opcode: u8,
    pub kind: InstructionKind,
}

/// Instruction kinds the policy engine inspects; everything else is opaque.
#[derive(Clone, Debug)]
pub enum InstructionKind {
    Invoke(CallSite),
    GetStatic(FieldRead),
    ConstString(String),
    Other,
}

/// Call site extracted from bytecode. `owner` is the internal class name.
#[derive(Clone, Debug)]
pub struct CallSite {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    pub kind: CallKind,
    /// Constant pool index of the referenced method.
    pub pool_index: u16,
}

/// Static field read extracted from bytecode.
#[derive(Clone, Debug)]
pub struct FieldRead {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

/// Call opcode classification.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum CallKind {
    Virtual,
    Interface,
    Special,
    Static,
}
